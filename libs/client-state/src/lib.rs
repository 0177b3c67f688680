//! # client-state
//!
//! The two flags a client keeps between runs: which party it acts as and
//! whether push notifications are enabled. Stored as one JSON document,
//! rewritten after every change. Without a path the state lives in memory
//! only.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClientStateError {
    #[error("client state IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("client state codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub notifications_enabled: bool,
}

/// Shared handle on the client state. Clones see the same values.
#[derive(Debug, Clone, Default)]
pub struct ClientStateStore {
    path: Option<PathBuf>,
    state: Arc<Mutex<ClientState>>,
}

impl ClientStateStore {
    /// State that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load state from `path`. A missing or empty file yields the defaults;
    /// the file is created on the first change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientStateError> {
        let path = path.into();
        let state = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                ClientState::default()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            debug!(path = %path.display(), "no client state on disk, using defaults");
            ClientState::default()
        };
        Ok(Self {
            path: Some(path),
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> ClientState {
        self.state.lock().clone()
    }

    pub fn party(&self) -> Option<String> {
        self.state.lock().party.clone()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.state.lock().notifications_enabled
    }

    pub fn set_party(&self, party: Option<String>) -> Result<(), ClientStateError> {
        self.update(|state| state.party = party)
    }

    pub fn set_notifications_enabled(&self, enabled: bool) -> Result<(), ClientStateError> {
        self.update(|state| state.notifications_enabled = enabled)
    }

    /// Apply `f` and persist. The in-memory value changes even if the write
    /// fails.
    fn update(&self, f: impl FnOnce(&mut ClientState)) -> Result<(), ClientStateError> {
        let snapshot = {
            let mut state = self.state.lock();
            f(&mut state);
            state.clone()
        };
        if let Err(err) = self.persist(&snapshot) {
            warn!(?err, "failed to persist client state");
            return Err(err);
        }
        Ok(())
    }

    fn persist(&self, state: &ClientState) -> Result<(), ClientStateError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }
}
