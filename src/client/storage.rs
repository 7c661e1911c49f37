//! Storage scopes for the client session.
//!
//! A "remember me" login persists the session to disk so it survives
//! restarts; otherwise it lives in memory for the life of the process.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::error::ClientError;
use super::session::ClientSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageScope {
    Durable,
    Ephemeral,
}

/// A key-value slot holding at most one session.
pub trait SessionStorage: Send + Sync {
    fn scope(&self) -> StorageScope;
    fn load(&self) -> Result<Option<ClientSession>, ClientError>;
    fn save(&self, session: &ClientSession) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

/// Session stored as a JSON file.
#[derive(Debug, Clone)]
pub struct DurableStorage {
    path: PathBuf,
}

impl DurableStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn storage_err(e: impl std::fmt::Display) -> ClientError {
    ClientError::Storage(e.to_string())
}

impl SessionStorage for DurableStorage {
    fn scope(&self) -> StorageScope {
        StorageScope::Durable
    }

    fn load(&self) -> Result<Option<ClientSession>, ClientError> {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(storage_err)
    }

    fn save(&self, session: &ClientSession) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(storage_err)?;
            }
        }
        let contents = serde_json::to_vec_pretty(session).map_err(storage_err)?;
        std::fs::write(&self.path, contents).map_err(storage_err)
    }

    fn clear(&self) -> Result<(), ClientError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(e)),
        }
    }
}

/// Session held in process memory.
#[derive(Debug, Default)]
pub struct EphemeralStorage {
    slot: Mutex<Option<ClientSession>>,
}

impl EphemeralStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for EphemeralStorage {
    fn scope(&self) -> StorageScope {
        StorageScope::Ephemeral
    }

    fn load(&self) -> Result<Option<ClientSession>, ClientError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &ClientSession) -> Result<(), ClientError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
