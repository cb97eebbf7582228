//! Upload orchestration: fan planned tasks out over a fixed pool of workers.
//!
//! The pipeline for one run:
//!   - a feeder on a blocking thread pulls [`UploadTask`]s from the planner and
//!     pushes them into a bounded channel
//!   - `concurrency` worker tasks share the receiving end; each resolves the
//!     content type, opens the file and streams it through
//!     [`BlobStore::upload_blob`], optionally pausing between two uploads
//!   - a confirmed upload is appended to the [`Ledger`]
//!   - every attempt becomes an [`UploadResult`] on the results channel, which
//!     this function collects into an [`UploadReport`]
//!
//! # Failure policy
//! A failed file never aborts its siblings. With `continue_on_failure` the run
//! completes and the report carries the failures. Without it, the first failure
//! stops scheduling: uploads already in flight finish, nothing new starts, and
//! the run ends with [`UploadError::RunAborted`].
//!
//! # Interrupts
//! Cancelling the `shutdown` token has the same stop-scheduling effect and ends
//! the run with [`UploadError::Interrupted`]. The planner watches the same
//! token, so a long walk that plans nothing still ends promptly.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::UploadOptions;
use crate::contract::{BlobBody, BlobStore, BlobUpload, StorageError, UploadResult, UploadTask};
use crate::error::UploadError;
use crate::ledger::Ledger;
use crate::mime::ContentTypeResolver;
use crate::planner::{PathPlanner, PlanStats};

/// Everything that happened during one run, in completion order.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub results: Vec<UploadResult>,
    /// What the planner skipped or scheduled while feeding this run.
    pub plan: PlanStats,
    pub elapsed: Duration,
}

impl UploadReport {
    pub fn uploaded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &UploadResult> {
        self.results.iter().filter(|r| r.failed())
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(UploadResult::failed)
    }

    /// `0` for a clean run, `2` when some files failed.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            2
        } else {
            0
        }
    }
}

/// Shared, read-only state of the worker pool.
struct WorkerContext {
    store: Arc<dyn BlobStore>,
    ledger: Arc<Ledger>,
    resolver: Arc<ContentTypeResolver>,
    container: String,
    overwrite: bool,
    continue_on_failure: bool,
    pause: Duration,
    stop: CancellationToken,
}

/// Uploads every task the planner yields, with at most `options.concurrency`
/// uploads in flight.
pub async fn run_uploads(
    planner: PathPlanner,
    store: Arc<dyn BlobStore>,
    ledger: Arc<Ledger>,
    resolver: Arc<ContentTypeResolver>,
    options: &UploadOptions,
    shutdown: CancellationToken,
) -> Result<UploadReport, UploadError> {
    let started = Instant::now();
    let concurrency = options.concurrency.max(1);
    // cancelled by the first failure (stop-on-failure mode) or by shutdown
    let stop = shutdown.child_token();

    info!(
        container = %options.container,
        concurrency,
        force = options.force,
        continue_on_failure = options.continue_on_failure,
        "Starting upload run"
    );

    let (task_tx, task_rx) = mpsc::channel::<UploadTask>(concurrency);
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<UploadResult>();

    let counters = planner.counters();
    let feeder = spawn_feeder(planner.stop_on(stop.clone()), task_tx, stop.clone());

    let context = Arc::new(WorkerContext {
        store,
        ledger,
        resolver,
        container: options.container.clone(),
        overwrite: options.force,
        continue_on_failure: options.continue_on_failure,
        pause: options.sleep,
        stop: stop.clone(),
    });
    let task_rx = Arc::new(Mutex::new(task_rx));
    let workers: Vec<JoinHandle<()>> = (0..concurrency)
        .map(|id| {
            tokio::spawn(worker(
                id,
                Arc::clone(&context),
                Arc::clone(&task_rx),
                result_tx.clone(),
            ))
        })
        .collect();
    // workers own the only remaining handles: the feeder unblocks once they exit
    drop(task_rx);
    drop(result_tx);

    let mut results = Vec::new();
    let mut first_failure: Option<UploadResult> = None;
    while let Some(result) = result_rx.recv().await {
        if result.failed() && first_failure.is_none() {
            first_failure = Some(result.clone());
        }
        results.push(result);
    }

    for joined in join_all(workers).await {
        if let Err(e) = joined {
            error!(error = %e, "Upload worker terminated abnormally");
        }
    }
    if let Err(e) = feeder.await {
        error!(error = %e, "Task feeder terminated abnormally");
    }

    let report = UploadReport {
        results,
        plan: counters.snapshot(),
        elapsed: started.elapsed(),
    };
    info!(
        uploaded = report.uploaded(),
        failed = report.failed(),
        "Elapsed: {:.2}s",
        report.elapsed.as_secs_f64()
    );

    if shutdown.is_cancelled() {
        warn!("User interrupted, in-flight uploads were allowed to finish");
        return Err(UploadError::Interrupted);
    }

    if !options.continue_on_failure {
        if let Some(failure) = first_failure {
            return Err(UploadError::RunAborted {
                source_path: failure.task.source,
                blob_name: failure.task.blob_name,
                reason: failure
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
            });
        }
    }

    Ok(report)
}

fn spawn_feeder<T>(
    tasks: T,
    task_tx: mpsc::Sender<UploadTask>,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    T: Iterator<Item = UploadTask> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        for task in tasks {
            if stop.is_cancelled() {
                debug!("Stop requested, no further tasks scheduled");
                break;
            }
            if task_tx.blocking_send(task).is_err() {
                // every worker has exited
                break;
            }
        }
    })
}

async fn worker(
    id: usize,
    context: Arc<WorkerContext>,
    tasks: Arc<Mutex<mpsc::Receiver<UploadTask>>>,
    results: mpsc::UnboundedSender<UploadResult>,
) {
    loop {
        let next = {
            let mut tasks = tasks.lock().await;
            tokio::select! {
                biased;
                _ = context.stop.cancelled() => None,
                task = tasks.recv() => task,
            }
        };
        let Some(task) = next else {
            break;
        };

        let result = upload_one(&context, task).await;
        if result.failed() && !context.continue_on_failure {
            context.stop.cancel();
        }
        if results.send(result).is_err() {
            break;
        }

        if !context.pause.is_zero() {
            tokio::select! {
                _ = context.stop.cancelled() => {}
                _ = tokio::time::sleep(context.pause) => {}
            }
        }
    }
    debug!(worker = id, "Upload worker finished");
}

async fn upload_one(context: &WorkerContext, task: UploadTask) -> UploadResult {
    let content_type = context.resolver.resolve(&task.source);
    debug!(
        source = %task.source.display(),
        blob = %task.blob_name,
        content_type = ?content_type,
        "File mapped to blob"
    );
    info!(
        blob = %task.blob_name,
        content_type = content_type.as_deref().unwrap_or("-"),
        "Uploading"
    );

    let outcome = match open_body(&task.source).await {
        Ok((body, content_length)) => {
            context
                .store
                .upload_blob(BlobUpload {
                    container: context.container.clone(),
                    blob_name: task.blob_name.clone(),
                    body,
                    content_length,
                    content_type: content_type.clone(),
                    overwrite: context.overwrite,
                })
                .await
        }
        Err(e) => Err(StorageError::Read(format!("{}: {e}", task.source.display()))),
    };

    match outcome {
        Ok(()) => {
            let recorded = task.source.to_string_lossy();
            if let Err(e) = context.ledger.append(&recorded).await {
                warn!(
                    source = %recorded,
                    error = %e,
                    "Uploaded, but could not record the file in the ledger"
                );
            }
            UploadResult {
                task,
                content_type,
                error: None,
            }
        }
        Err(e) => {
            error!(
                source = %task.source.display(),
                blob = %task.blob_name,
                error = %e,
                "Error while uploading file"
            );
            UploadResult {
                task,
                content_type,
                error: Some(e),
            }
        }
    }
}

/// Opens `path` for streaming; the length is taken from the open handle.
async fn open_body(path: &Path) -> std::io::Result<(BlobBody, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let length = file.metadata().await?.len();
    Ok((Box::pin(file), length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ContainerStatus;
    use std::path::PathBuf;
    use tokio::io::AsyncReadExt;

    fn result(name: &str, error: Option<StorageError>) -> UploadResult {
        UploadResult {
            task: UploadTask {
                source: PathBuf::from(format!("/data/{name}")),
                blob_name: name.to_string(),
            },
            content_type: None,
            error,
        }
    }

    #[test]
    fn report_exit_codes() {
        let clean = UploadReport {
            results: vec![result("a", None), result("b", None)],
            ..UploadReport::default()
        };
        assert_eq!(clean.uploaded(), 2);
        assert_eq!(clean.exit_code(), 0);

        let partial = UploadReport {
            results: vec![
                result("a", None),
                result("b", Some(StorageError::Transport("reset".into()))),
            ],
            ..UploadReport::default()
        };
        assert_eq!(partial.uploaded(), 1);
        assert_eq!(partial.failed(), 1);
        assert_eq!(partial.exit_code(), 2);
    }

    #[test]
    fn empty_report_is_clean() {
        assert_eq!(UploadReport::default().exit_code(), 0);
    }

    /// Drains each body and keeps `(blob_name, content_length, bytes)`.
    #[derive(Default)]
    struct DrainingStore {
        received: std::sync::Mutex<Vec<(String, u64, Vec<u8>)>>,
    }

    #[async_trait::async_trait]
    impl BlobStore for DrainingStore {
        async fn create_container(&self, _name: &str) -> Result<ContainerStatus, StorageError> {
            Ok(ContainerStatus::AlreadyExists)
        }

        async fn upload_blob(&self, mut upload: BlobUpload) -> Result<(), StorageError> {
            let mut bytes = Vec::new();
            upload
                .body
                .read_to_end(&mut bytes)
                .await
                .map_err(|e| StorageError::Transport(e.to_string()))?;
            self.received
                .lock()
                .unwrap()
                .push((upload.blob_name, upload.content_length, bytes));
            Ok(())
        }
    }

    fn context(store: Arc<dyn BlobStore>, ledger_path: PathBuf) -> WorkerContext {
        WorkerContext {
            store,
            ledger: Arc::new(Ledger::new(ledger_path)),
            resolver: Arc::new(ContentTypeResolver::default()),
            container: "site".into(),
            overwrite: false,
            continue_on_failure: true,
            pause: Duration::ZERO,
            stop: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn file_is_streamed_with_its_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("page.html");
        let content = "<html>".repeat(10_000);
        std::fs::write(&source, &content).unwrap();

        let store = Arc::new(DrainingStore::default());
        let ctx = context(store.clone(), dir.path().join("ledger.log"));
        let result = upload_one(
            &ctx,
            UploadTask {
                source: source.clone(),
                blob_name: "page.html".into(),
            },
        )
        .await;

        assert!(result.succeeded());
        assert_eq!(result.content_type.as_deref(), Some("text/html"));
        let received = store.received.lock().unwrap();
        assert_eq!(received[0].0, "page.html");
        assert_eq!(received[0].1, content.len() as u64);
        assert_eq!(received[0].2, content.as_bytes());
        drop(received);
        assert!(ctx
            .ledger
            .load()
            .await
            .unwrap()
            .contains(&source.to_string_lossy()));
    }

    #[tokio::test]
    async fn missing_source_is_a_read_failure_without_a_store_call() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DrainingStore::default());
        let ctx = context(store.clone(), dir.path().join("ledger.log"));

        let result = upload_one(
            &ctx,
            UploadTask {
                source: dir.path().join("gone.txt"),
                blob_name: "gone.txt".into(),
            },
        )
        .await;

        assert!(matches!(result.error, Some(StorageError::Read(_))));
        assert!(store.received.lock().unwrap().is_empty());
        assert!(ctx.ledger.load().await.unwrap().is_empty());
    }
}
