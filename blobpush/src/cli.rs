///
/// This module implements the CLI interface for blobpush: command parsing,
/// argument validation and the async entrypoint used by `main` and the tests.
///
/// All core logic (planning, ledger, orchestration) lives in the
/// [`blobpush-core`] crate. This module is strictly CLI glue.
///
/// ## How To Use
/// - For command-line users: use the installed `blobpush` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`],
///   or [`execute`] with a resolved [`RunConfig`] and any [`BlobStore`].
///
/// [`blobpush-core`]: ../../blobpush-core/
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use blobpush_core::config::DEFAULT_CONCURRENCY;
use blobpush_core::contract::{BlobStore, ContainerStatus};
use blobpush_core::ledger::{Ledger, PreviousUploads};
use blobpush_core::mime::ContentTypeResolver;
use blobpush_core::orchestrator::run_uploads;
use blobpush_core::planner::PathPlanner;
use blobpush_core::UploadError;

use crate::load_config::{load_config, RunConfig};
use crate::upload::AzureBlobClient;

/// CLI for blobpush: upload a directory tree into an Azure blob container.
#[derive(Parser, Debug)]
#[clap(
    name = "blobpush",
    version,
    about = "Upload a local directory tree into an Azure Storage blob container"
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[clap(long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload the files under --path that are not yet in the ledger
    Upload(UploadArgs),
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    /// Local directory to upload
    #[clap(short = 'p', long)]
    pub path: PathBuf,

    /// Target container, optionally followed by a virtual folder (`container/folder`)
    #[clap(short = 'n', long = "container-name")]
    pub container_name: String,

    /// Leading part of the local path removed when naming blobs (defaults to --path)
    #[clap(short = 'c', long = "cut-path")]
    pub cut_path: Option<String>,

    /// Descend into sub-directories
    #[clap(short = 'r', long)]
    pub recurse: bool,

    /// Re-upload everything, overwrite existing blobs and reset the ledger
    #[clap(short = 'f', long)]
    pub force: bool,

    /// Storage account name (falls back to BLOBPUSH_ACCOUNT_NAME, then settings.json)
    #[clap(short = 'a', long = "account-name")]
    pub account_name: Option<String>,

    /// Storage account key (falls back to BLOBPUSH_ACCOUNT_KEY, then settings.json)
    #[clap(short = 'k', long = "account-key")]
    pub account_key: Option<String>,

    /// Keep uploading after a file fails
    #[clap(
        long = "continue-on-failure",
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_value = "true",
        default_missing_value = "true",
        require_equals = true
    )]
    pub continue_on_failure: bool,

    /// Maximum number of uploads in flight
    #[clap(long, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Pause in milliseconds each worker takes between two uploads (0: no pause)
    #[clap(short = 's', long, default_value_t = 0)]
    pub sleep: u64,

    /// Extra ignore pattern, on top of .blobpushignore (repeatable)
    #[clap(long = "ignore")]
    pub ignore: Vec<String>,
}

fn parse_concurrency(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("concurrency must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("`{raw}` is not a valid number: {e}")),
    }
}

/// How a run that did not hit a fatal error ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every planned file was uploaded.
    Success,
    /// The run went through, but some files failed and will be retried next time.
    CompletedWithFailures { failed: usize },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::CompletedWithFailures { .. } => 2,
        }
    }
}

/// Async CLI entrypoint for integration tests and main().
pub async fn run(cli: Cli, shutdown: CancellationToken) -> Result<Outcome> {
    match cli.command {
        Commands::Upload(args) => {
            let working_dir =
                std::env::current_dir().context("cannot determine the working directory")?;
            let config = load_config(&args, &working_dir)?;

            let client = AzureBlobClient::new(
                &config.credentials,
                config.settings.blob_endpoint.as_deref(),
            )?;
            tracing::info!(command = "upload", path = %args.path.display(), "Starting upload");
            execute(config, Arc::new(client), shutdown).await
        }
    }
}

/// Runs one upload against `store` with an already resolved configuration.
pub async fn execute(
    config: RunConfig,
    store: Arc<dyn BlobStore>,
    shutdown: CancellationToken,
) -> Result<Outcome> {
    let ledger = Arc::new(Ledger::new(config.ledger_path.clone()));
    let previous = if config.options.force {
        PreviousUploads::default()
    } else {
        ledger.load().await?
    };
    tracing::debug!(
        previous = previous.len(),
        force = config.options.force,
        "Files recorded as uploaded will be skipped"
    );

    // validates the root and cut path before any network call
    let planner = PathPlanner::new(config.plan, config.ignore, previous)?;

    match store
        .create_container(&config.options.container)
        .await
        .map_err(UploadError::from)?
    {
        ContainerStatus::Created => {
            tracing::info!(container = %config.options.container, "Created container")
        }
        ContainerStatus::AlreadyExists => {
            tracing::debug!(container = %config.options.container, "Container already exists")
        }
    }

    if config.options.force {
        ledger.truncate().await?;
    }

    let resolver = Arc::new(ContentTypeResolver::new(config.settings.mimes.clone()));
    let report = run_uploads(
        planner,
        store,
        Arc::clone(&ledger),
        resolver,
        &config.options,
        shutdown,
    )
    .await?;

    let stats = &report.plan;
    let failed = report.failed();
    tracing::info!(
        uploaded = report.uploaded(),
        failed,
        planned = stats.planned,
        ignored = stats.ignored,
        already_uploaded = stats.already_uploaded,
        symlinks = stats.symlinks,
        skipped_dirs = stats.skipped_dirs,
        unreadable = stats.unreadable,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Upload run finished"
    );

    if report.has_failures() {
        for failure in report.failures() {
            tracing::warn!(
                source = %failure.task.source.display(),
                blob = %failure.task.blob_name,
                "Will retry on next run"
            );
        }
        Ok(Outcome::CompletedWithFailures { failed })
    } else {
        Ok(Outcome::Success)
    }
}
