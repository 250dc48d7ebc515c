//! Snapshot persistence.
//!
//! Snapshots are written as `<snapshot_dir>/<timestamp>.jpg` and synced to
//! disk before the path is handed out, so any log entry that references a
//! snapshot refers to a file that already exists.

use crate::stream::RawFrame;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Errors that can occur while persisting a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to create snapshot directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Frame {sequence} is empty")]
    EmptyFrame { sequence: u64 },
}

/// A persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Capture time in seconds since the Unix epoch
    pub timestamp: i64,

    /// Location of the JPEG on disk
    pub path: PathBuf,
}

impl Snapshot {
    /// Path as stored in the audit log.
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Writes frames into the snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    /// Create the writer, creating the directory if it does not exist.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| SnapshotError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, timestamp: i64) -> PathBuf {
        self.dir.join(format!("{}.jpg", timestamp))
    }

    /// Write the frame and sync it to disk.
    pub async fn persist(&self, timestamp: i64, frame: &RawFrame) -> Result<Snapshot, SnapshotError> {
        if frame.data.is_empty() {
            return Err(SnapshotError::EmptyFrame {
                sequence: frame.sequence,
            });
        }

        let path = self.path_for(timestamp);
        let write_err = |source| SnapshotError::Write {
            path: path.clone(),
            source,
        };

        let mut file = fs::File::create(&path).await.map_err(write_err)?;
        file.write_all(&frame.data).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;

        debug!(path = %path.display(), bytes = frame.data.len(), "Snapshot written");

        Ok(Snapshot { timestamp, path })
    }
}
