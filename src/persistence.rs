//! Snapshot storage for crash recovery.
//!
//! The lobby serializes a [`PersistedSession`] with bincode after every
//! state transition, shot and disconnect, and hands the bytes to a
//! [`SnapshotStore`] keyed by session id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::game::GameSnapshot;
use crate::session::TokenRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no snapshot stored for session {0}")]
    NotFound(String),
    #[error("invalid session id {0:?}")]
    InvalidKey(String),
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot could not be encoded: {0}")]
    Codec(#[from] bincode::Error),
}

/// Everything needed to resume a session after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub game: GameSnapshot,
    pub tokens: Vec<TokenRecord>,
    pub next_user_id: u64,
}

impl PersistedSession {
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, session_id: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
    async fn load(&self, session_id: &str) -> Result<Vec<u8>, StoreError>;
}

/// Keeps snapshots in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, session_id: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id.to_string(), bytes);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<u8>, StoreError> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }
}

/// One `<session_id>.bin` file per session inside `dir`.
///
/// Writes go to a `.tmp` sibling first and are renamed into place, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(session_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.bin", session_id)))
    }
}

#[async_trait::async_trait]
impl SnapshotStore for FileStore {
    async fn save(&self, session_id: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(session_id)?;
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        log::debug!("saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(session_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
