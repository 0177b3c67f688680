//! Shared, observable connectivity status.
//!
//! The readiness sequencer and the poller both write it; the coordinator and
//! presentation read it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::metrics::CONNECTIVITY_STATE;
use crate::models::ConnectivityStatus;

/// Cloneable handle on the current [`ConnectivityStatus`].
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<ConnectivityStatus>>,
}

impl Connectivity {
    /// Start in [`ConnectivityStatus::Bootstrapping`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectivityStatus::Bootstrapping);
        CONNECTIVITY_STATE.set(gauge_value(ConnectivityStatus::Bootstrapping));
        Self { tx: Arc::new(tx) }
    }

    /// Current status.
    pub fn get(&self) -> ConnectivityStatus {
        *self.tx.borrow()
    }

    /// Set the status, returning true if it changed. Watchers are only woken
    /// on change.
    pub fn set(&self, status: ConnectivityStatus) -> bool {
        let mut previous = status;
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                previous = *current;
                *current = status;
                true
            }
        });
        if changed {
            CONNECTIVITY_STATE.set(gauge_value(status));
            match status {
                ConnectivityStatus::Degraded => {
                    warn!(from = %previous, to = %status, "store connectivity degraded")
                }
                _ => info!(from = %previous, to = %status, "store connectivity changed"),
            }
        }
        changed
    }

    /// Watch for status changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

fn gauge_value(status: ConnectivityStatus) -> i64 {
    match status {
        ConnectivityStatus::Bootstrapping => 0,
        ConnectivityStatus::Connecting => 1,
        ConnectivityStatus::Connected => 2,
        ConnectivityStatus::Degraded => 3,
    }
}
