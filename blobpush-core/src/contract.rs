//! # contract: the seam between planning/orchestration and blob storage
//!
//! This module defines the [`BlobStore`] trait and the plain data that flows
//! across it. The core crate never talks to the network itself: the CLI crate
//! provides the Azure implementation, and tests provide mocks or fakes.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`; `MockBlobStore` is exported when the
//!   `test-export-mocks` feature is on (the default) so dependents can use it.
//! - Fakes that need to observe concurrency (in-flight counters etc.) can simply
//!   implement the trait by hand.
//!
//! ## Data
//! - [`UploadTask`]: produced by the planner, consumed exactly once by a worker.
//! - [`UploadResult`]: produced by a worker after each attempt.
//! - [`BlobUpload`]: the request handed to the store for one blob.

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use thiserror::Error;
use tokio::io::AsyncRead;

/// One planned upload: a local file and the blob name it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub source: PathBuf,
    pub blob_name: String,
}

/// Outcome of a single upload attempt.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub task: UploadTask,
    /// Content type the blob was (or would have been) stored with.
    pub content_type: Option<String>,
    /// `None` when the upload succeeded.
    pub error: Option<StorageError>,
}

impl UploadResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Blob contents, streamed from the source file by the store.
pub type BlobBody = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// Request to store one blob.
pub struct BlobUpload {
    pub container: String,
    pub blob_name: String,
    pub body: BlobBody,
    /// Exact number of bytes `body` yields.
    pub content_length: u64,
    pub content_type: Option<String>,
    /// Replace an existing blob with the same name; when false an existing blob is a conflict.
    pub overwrite: bool,
}

impl fmt::Debug for BlobUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobUpload")
            .field("container", &self.container)
            .field("blob_name", &self.blob_name)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("overwrite", &self.overwrite)
            .finish_non_exhaustive()
    }
}

/// Result of asking the store to create a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    AlreadyExists,
}

/// Failures reported by a [`BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A blob with the same name exists and overwrite was not requested.
    #[error("blob already exists: {0}")]
    AlreadyExists(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("HTTP {status} ({code}): {message}")]
    Http {
        status: u16,
        code: String,
        message: String,
    },

    /// Connection, TLS or timeout failure before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// The local source file could not be read.
    #[error("cannot read source file: {0}")]
    Read(String),
}

/// Blob storage operations the uploader depends on.
///
/// Implementors own authentication, transport, retries and timeouts. The trait
/// is `Send + Sync` because a single store is shared by all upload workers.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create the container, treating "already exists" as a normal outcome.
    async fn create_container(&self, name: &str) -> Result<ContainerStatus, StorageError>;

    /// Store one blob.
    async fn upload_blob(&self, upload: BlobUpload) -> Result<(), StorageError>;
}
