//! Ledger of files uploaded by previous runs.
//!
//! The ledger is a plain text file with one source path per line. Paths are
//! stored exactly as the planner produced them; nothing is normalized. A run
//! loads it once, appends a line after each confirmed upload, and a forced run
//! truncates it before planning.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::UploadError;

/// Paths recorded by earlier runs, in file order.
#[derive(Debug, Clone, Default)]
pub struct PreviousUploads {
    entries: Vec<String>,
    index: HashSet<String>,
}

impl PreviousUploads {
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains(path)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<String> for PreviousUploads {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let mut uploads = PreviousUploads::default();
        for entry in iter {
            if uploads.index.insert(entry.clone()) {
                uploads.entries.push(entry);
            }
        }
        uploads
    }
}

/// File-backed, append-only ledger.
///
/// Appends go through one handle behind a mutex so concurrent workers never
/// interleave partial lines.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    /// Ledger location for an account/container pair: `<log_dir>/<account>-<container>-files.log`.
    pub fn path_for(log_dir: &Path, account: &str, container: &str) -> PathBuf {
        let container = container.replace(['/', '\\'], "_");
        log_dir.join(format!("{account}-{container}-files.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the recorded paths. A missing ledger is an empty one.
    pub async fn load(&self) -> Result<PreviousUploads, UploadError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(ledger = %self.path.display(), "No ledger yet, nothing uploaded previously");
                return Ok(PreviousUploads::default());
            }
            Err(e) => return Err(UploadError::io(&self.path, e)),
        };

        let previous: PreviousUploads = content
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        info!(ledger = %self.path.display(), entries = previous.len(), "Loaded upload ledger");
        Ok(previous)
    }

    /// Empties the ledger, creating it (and its directory) if needed.
    pub async fn truncate(&self) -> Result<(), UploadError> {
        self.ensure_parent().await?;
        let mut writer = self.writer.lock().await;
        // drop any open append handle so the next append reopens at offset 0
        *writer = None;
        fs::write(&self.path, b"")
            .await
            .map_err(|e| UploadError::io(&self.path, e))?;
        info!(ledger = %self.path.display(), "Truncated upload ledger");
        Ok(())
    }

    /// Records one uploaded path as a single line.
    pub async fn append(&self, path: &str) -> Result<(), UploadError> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            self.ensure_parent().await?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| UploadError::io(&self.path, e))?;
            *writer = Some(file);
        }

        let line = format!("{path}\n");
        if let Some(file) = writer.as_mut() {
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| UploadError::io(&self.path, e))?;
            file.flush()
                .await
                .map_err(|e| UploadError::io(&self.path, e))?;
        }
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), UploadError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::io(parent, e)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_ledger_loads_empty() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("nope.log"));
        assert!(ledger.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_then_load_preserves_exact_strings() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("logs").join("ledger.log"));
        ledger.append("/data/site/a.txt").await.unwrap();
        ledger.append("./relative//b.txt").await.unwrap();

        let previous = ledger.load().await.unwrap();
        assert_eq!(
            previous.entries(),
            &["/data/site/a.txt".to_string(), "./relative//b.txt".to_string()]
        );
        assert!(previous.contains("./relative//b.txt"));
        assert!(!previous.contains("relative/b.txt"));
    }

    #[tokio::test]
    async fn load_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.log");
        std::fs::write(&path, "a\n\nb\n\n").unwrap();
        let previous = Ledger::new(&path).load().await.unwrap();
        assert_eq!(previous.len(), 2);
    }

    #[tokio::test]
    async fn truncate_empties_and_appends_restart() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("ledger.log"));
        ledger.append("old").await.unwrap();
        ledger.truncate().await.unwrap();
        assert!(ledger.load().await.unwrap().is_empty());

        ledger.append("new").await.unwrap();
        let content = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content, "new\n");
    }

    #[tokio::test]
    async fn concurrent_appends_keep_whole_lines() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(Ledger::new(dir.path().join("ledger.log")));

        let mut handles = Vec::new();
        for i in 0..50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.append(&format!("/data/file-{i:03}.bin")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let previous = ledger.load().await.unwrap();
        assert_eq!(previous.len(), 50);
        for i in 0..50 {
            assert!(previous.contains(&format!("/data/file-{i:03}.bin")));
        }
    }

    #[test]
    fn path_for_sanitizes_container() {
        let path = Ledger::path_for(Path::new("logs"), "acct", "site/assets\\img");
        assert_eq!(path, PathBuf::from("logs/acct-site_assets_img-files.log"));
    }
}
