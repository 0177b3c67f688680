//! Readiness sequencing and keep-alive.
//!
//! Nothing polls or writes until the store has answered a health probe.
//! Probing retries on a constant interval with no upper bound; the store may
//! take a while to wake up.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::error::{CoordinationError, CoordinationResult};
use crate::metrics::{BOOTSTRAP_PROBES, KEEPALIVE_FAILURES};
use crate::models::ConnectivityStatus;
use crate::store::StateStore;
use crate::task::TaskGuard;

/// Delay between failed health probes.
pub const DEFAULT_HEALTH_RETRY: Duration = Duration::from_secs(3);

/// Keep-alive cadence once connected.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(5 * 60);

/// Health probing before and after the session is admitted.
#[derive(Debug, Clone)]
pub struct Readiness {
    store: Arc<dyn StateStore>,
    connectivity: Connectivity,
    retry_interval: Duration,
    keepalive_interval: Duration,
}

impl Readiness {
    pub fn new(store: Arc<dyn StateStore>, connectivity: Connectivity) -> Self {
        Self::with_intervals(store, connectivity, DEFAULT_HEALTH_RETRY, DEFAULT_KEEPALIVE)
    }

    pub fn with_intervals(
        store: Arc<dyn StateStore>,
        connectivity: Connectivity,
        retry_interval: Duration,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            store,
            connectivity,
            retry_interval,
            keepalive_interval,
        }
    }

    /// Probe the health endpoint until it answers. Returns the number of
    /// probes issued, or [`CoordinationError::Cancelled`] if `token` fires
    /// first.
    pub async fn wait_until_ready(&self, token: &CancellationToken) -> CoordinationResult<u32> {
        let mut probes = 0u32;
        loop {
            probes += 1;
            BOOTSTRAP_PROBES.inc();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CoordinationError::Cancelled),
                result = self.store.health() => result,
            };
            match result {
                Ok(()) => {
                    self.connectivity.set(ConnectivityStatus::Connected);
                    info!(probes, "store is reachable");
                    return Ok(probes);
                }
                Err(err) => {
                    self.connectivity.set(ConnectivityStatus::Connecting);
                    warn!(
                        ?err,
                        probes,
                        retry_ms = self.retry_interval.as_millis(),
                        "store not reachable yet, retrying"
                    );
                }
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CoordinationError::Cancelled),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    /// Probe the health endpoint periodically to keep the store awake.
    /// Failures are counted and otherwise ignored.
    pub fn spawn_keepalive(&self, parent: &CancellationToken) -> TaskGuard {
        let store = self.store.clone();
        let period = self.keepalive_interval;
        TaskGuard::spawn("keepalive", parent, move |cancel| async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately; the store was just probed
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = store.health() => result,
                };
                if let Err(err) = result {
                    KEEPALIVE_FAILURES.inc();
                    debug!(?err, "keep-alive probe failed");
                }
            }
            debug!("keep-alive stopping");
        })
    }
}
