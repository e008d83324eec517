//! Per-stream output directories under the media root.

use crate::domain::stream_key::StreamKey;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("could not create output directory {path:?}: {source}")]
pub struct DirectoryError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Clone)]
pub struct OutputDirectories {
    media_root: PathBuf,
}

impl OutputDirectories {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn dir_for(&self, key: &StreamKey) -> PathBuf {
        self.media_root.join(key.as_str())
    }

    /// Create the stream's directory if needed and clear files left by a previous job.
    ///
    /// Stale files that cannot be removed are logged and skipped; the encoder
    /// overwrites or rolls them out of its window shortly after it starts.
    pub async fn prepare(&self, key: &StreamKey) -> Result<PathBuf, DirectoryError> {
        let dir = self.dir_for(key);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| DirectoryError {
                path: dir.clone(),
                source,
            })?;

        let removed = clear_files(&dir).await;
        debug!(key = %key, dir = ?dir, removed = removed as u64, "output directory prepared");
        Ok(dir)
    }
}

async fn clear_files(dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = ?dir, error = %e, "could not list output directory");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = ?dir, error = %e, "could not read directory entry");
                break;
            }
        };

        let path = entry.path();
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = ?path, error = %e, "could not remove stale file"),
        }
    }
    removed
}
