//! Error taxonomy for a blobpush run.
//!
//! Only run-level failures live in [`UploadError`]. A single file that fails to
//! upload is reported through [`crate::contract::UploadResult`] and never
//! becomes an `UploadError`, unless the run was configured to stop on the first
//! failure (see [`UploadError::RunAborted`]).

use std::path::PathBuf;

use thiserror::Error;

use crate::contract::StorageError;

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Missing credentials, missing or malformed settings file.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Bad root path, cut-path that is not a prefix of the root, bad container name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem failure on a file the run cannot proceed without.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Storage failure outside of a single file upload (e.g. creating the container).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A file failed while the run was configured to stop on the first failure.
    #[error("upload of {source_path} to `{blob_name}` failed, run aborted: {reason}")]
    RunAborted {
        source_path: PathBuf,
        blob_name: String,
        reason: String,
    },

    /// The process received an interrupt; no new uploads were scheduled.
    #[error("interrupted by user")]
    Interrupted,
}

impl UploadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UploadError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for a run that ended with this error.
    ///
    /// Every run-level failure exits with `1`; exit code `2` is reserved for runs
    /// that completed with some failed files.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
