//! Job-scoped scratch areas holding local copies of remote sources.
//!
//! Every job gets `<root>/<job_id>/`; source `i` is downloaded to
//! `source-<i>.media` inside it. File names never come from user input.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StagingError;

pub struct StagingManager {
    root: PathBuf,
    client: Client,
    download_timeout: Duration,
    max_bytes: u64,
}

impl StagingManager {
    pub fn new(root: PathBuf, client: Client, download_timeout: Duration, max_bytes: u64) -> Self {
        Self {
            root,
            client,
            download_timeout,
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch directory for `job_id`.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    /// Download `uri` into the job's scratch directory and return the local path.
    ///
    /// Creates the directory on first use. A partially written file is removed
    /// when the download fails.
    pub async fn stage(
        &self,
        job_id: &str,
        index: usize,
        uri: &str,
    ) -> Result<PathBuf, StagingError> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir).await.map_err(StagingError::Scratch)?;

        let dest = dir.join(format!("source-{index:03}.media"));
        let result = tokio::time::timeout(self.download_timeout, self.download(uri, &dest)).await;

        let outcome = match result {
            Ok(Ok(bytes)) => {
                debug!(job_id, index, bytes, "Staged {} -> {}", uri, dest.display());
                return Ok(dest);
            }
            Ok(Err(e)) => e,
            Err(_) => StagingError::Timeout(self.download_timeout.as_secs()),
        };

        if let Err(e) = self.unstage(&dest).await {
            warn!("Failed to remove partial download {}: {}", dest.display(), e);
        }
        Err(outcome)
    }

    async fn download(&self, uri: &str, dest: &Path) -> Result<u64, StagingError> {
        let mut response = self.client.get(uri).send().await?;
        if !response.status().is_success() {
            return Err(StagingError::Status(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len > self.max_bytes
        {
            return Err(StagingError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut file = fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(StagingError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Delete one staged file. Missing files are not an error.
    pub async fn unstage(&self, path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Remove the job's whole scratch directory. Safe to call any number of times.
    pub async fn cleanup_job(&self, job_id: &str) -> std::io::Result<()> {
        let dir = self.job_dir(job_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(job_id, "Removed scratch directory {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove job directories left behind by a previous process.
    ///
    /// Only directories named like a job id are touched. Only call before any
    /// job of this process has been admitted.
    pub async fn purge_stale(&self) -> std::io::Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let is_job_dir = entry
                .file_name()
                .to_str()
                .is_some_and(|name| Uuid::parse_str(name).is_ok());
            if is_job_dir && entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Purged {} stale scratch directories under {}", removed, self.root.display());
        }
        Ok(removed)
    }
}
