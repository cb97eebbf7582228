//! Path planning: turns a local directory into a lazy stream of [`UploadTask`]s.
//!
//! The walk is depth-first (via `walkdir`), with the children of each directory
//! visited in file-name order so runs are reproducible. For every entry the
//! filters apply in a fixed order:
//!
//! 1. symbolic links are skipped (never followed)
//! 2. directories are descended into when recursing, skipped otherwise
//! 3. files matching an ignore rule are skipped
//! 4. files recorded in the ledger by a previous run are skipped
//!
//! Whatever survives becomes a task whose blob name is the file path with the
//! cut prefix removed, the destination prefix prepended, and separators
//! normalized by [`normalize_blob_name`].

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::contract::UploadTask;
use crate::error::UploadError;
use crate::ignore::IgnoreRules;
use crate::ledger::PreviousUploads;

/// What to walk and how to name the results.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub root: PathBuf,
    /// Leading portion of each file path to drop. Defaults to `root`.
    pub cut_prefix: Option<String>,
    /// Virtual folder inside the container, prepended to every blob name.
    pub destination_prefix: String,
    pub recurse: bool,
}

/// Counters describing what the planner did with each entry it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub planned: usize,
    pub ignored: usize,
    pub already_uploaded: usize,
    pub symlinks: usize,
    pub skipped_dirs: usize,
    pub unreadable: usize,
}

/// Live counters behind [`PlanStats`].
///
/// Shared so the numbers stay readable after the planner has been moved onto
/// the feeder thread.
#[derive(Debug, Default)]
pub struct PlanCounters {
    planned: AtomicUsize,
    ignored: AtomicUsize,
    already_uploaded: AtomicUsize,
    symlinks: AtomicUsize,
    skipped_dirs: AtomicUsize,
    unreadable: AtomicUsize,
}

impl PlanCounters {
    pub fn snapshot(&self) -> PlanStats {
        PlanStats {
            planned: self.planned.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            already_uploaded: self.already_uploaded.load(Ordering::Relaxed),
            symlinks: self.symlinks.load(Ordering::Relaxed),
            skipped_dirs: self.skipped_dirs.load(Ordering::Relaxed),
            unreadable: self.unreadable.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Lazy, depth-first producer of upload tasks.
pub struct PathPlanner {
    cut_prefix: String,
    destination_prefix: String,
    recurse: bool,
    ignore: IgnoreRules,
    previous: PreviousUploads,
    walk: walkdir::IntoIter,
    stop: Option<CancellationToken>,
    counters: Arc<PlanCounters>,
}

impl fmt::Debug for PathPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathPlanner")
            .field("cut_prefix", &self.cut_prefix)
            .field("destination_prefix", &self.destination_prefix)
            .field("recurse", &self.recurse)
            .field("ignore_rules", &self.ignore.len())
            .field("previous", &self.previous.len())
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}

impl PathPlanner {
    /// Validates the request and checks that the root can be listed.
    pub fn new(
        request: PlanRequest,
        ignore: IgnoreRules,
        previous: PreviousUploads,
    ) -> Result<Self, UploadError> {
        let root = request.root;
        let root_str = root.to_string_lossy().into_owned();

        if !root.exists() {
            return Err(UploadError::InvalidArgument(format!(
                "Invalid value for '--path': \"{root_str}\" does not exist"
            )));
        }
        if !root.is_dir() {
            return Err(UploadError::InvalidArgument(format!(
                "Invalid value for '--path': \"{root_str}\" is not a folder"
            )));
        }

        let cut_prefix = match request.cut_prefix {
            Some(cut) if !cut.is_empty() => {
                if !root_str.starts_with(&cut) {
                    return Err(UploadError::InvalidArgument(format!(
                        "The root path \"{root_str}\" must start with the given --cut-path \"{cut}\""
                    )));
                }
                cut
            }
            _ => root_str,
        };

        fs::read_dir(&root).map_err(|e| UploadError::io(&root, e))?;
        debug!(
            root = %root.display(),
            cut_prefix = %cut_prefix,
            destination_prefix = %request.destination_prefix,
            recurse = request.recurse,
            "Planning uploads"
        );

        let walk = WalkDir::new(&root)
            .min_depth(1)
            .max_depth(if request.recurse { usize::MAX } else { 1 })
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            cut_prefix,
            destination_prefix: request.destination_prefix,
            recurse: request.recurse,
            ignore,
            previous,
            walk,
            stop: None,
            counters: Arc::default(),
        })
    }

    /// Ends the walk early once `token` is cancelled.
    pub fn stop_on(mut self, token: CancellationToken) -> Self {
        self.stop = Some(token);
        self
    }

    pub fn stats(&self) -> PlanStats {
        self.counters.snapshot()
    }

    /// Handle to the counters, usable after the planner has been consumed.
    pub fn counters(&self) -> Arc<PlanCounters> {
        Arc::clone(&self.counters)
    }

    /// Blob name for a file path produced by this planner.
    pub fn blob_name_for(&self, path: &str) -> String {
        let relative = path.strip_prefix(self.cut_prefix.as_str()).unwrap_or(path);
        if self.destination_prefix.is_empty() {
            normalize_blob_name(relative)
        } else {
            normalize_blob_name(&format!("{}/{}", self.destination_prefix, relative))
        }
    }
}

impl Iterator for PathPlanner {
    type Item = UploadTask;

    fn next(&mut self) -> Option<UploadTask> {
        loop {
            if self.stop.as_ref().is_some_and(CancellationToken::is_cancelled) {
                debug!("Stop requested, walk abandoned");
                return None;
            }

            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                    error!(path = %path, error = %e, "Cannot read entry, skipping");
                    bump(&self.counters.unreadable);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if entry.path_is_symlink() || file_type.is_symlink() {
                debug!(path = %entry.path().display(), "Skipping symbolic link");
                bump(&self.counters.symlinks);
                continue;
            }

            if file_type.is_dir() {
                if !self.recurse {
                    debug!(path = %entry.path().display(), "Skipping directory (not recursing)");
                    bump(&self.counters.skipped_dirs);
                }
                continue;
            }

            if !file_type.is_file() {
                debug!(path = %entry.path().display(), "Skipping special file");
                continue;
            }

            let path = entry.into_path();
            if let Some(pattern) = self.ignore.matching_pattern(&path) {
                info!(path = %path.display(), pattern, "Ignoring...");
                bump(&self.counters.ignored);
                continue;
            }

            let path_str = path.to_string_lossy().into_owned();
            if self.previous.contains(&path_str) {
                info!(path = %path_str, "Skipping, uploaded by a previous run...");
                bump(&self.counters.already_uploaded);
                continue;
            }

            let blob_name = self.blob_name_for(&path_str);
            bump(&self.counters.planned);
            return Some(UploadTask {
                source: path,
                blob_name,
            });
        }
    }
}

/// Turns every `\` into `/`, collapses repeated `/` and strips leading ones,
/// so blob names never create empty-named virtual folders.
pub fn normalize_blob_name(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' && (normalized.is_empty() || normalized.ends_with('/')) {
            continue;
        }
        normalized.push(c);
    }
    normalized
}
