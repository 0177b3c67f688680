//! Fixed-interval polling of the remote garden state.
//!
//! The poller is the single writer of the authoritative snapshot. Every cycle
//! publishes a whole [`Observation`] on a watch channel, so readers never see
//! a half-applied update. A failed read never clears the held state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connectivity::Connectivity;
use crate::metrics::POLL_CYCLES;
use crate::models::{ConnectivityStatus, PartyId, ResourceState};
use crate::store::StateStore;
use crate::task::TaskGuard;

/// Default cadence between reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How a single poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleOutcome {
    /// Read succeeded and the held state was replaced.
    Ok,
    /// The store answered with a malformed payload; the update was ignored.
    Rejected,
    /// The store answered with a non-success status.
    Degraded,
    /// The read failed at the transport level.
    Failed,
}

impl CycleOutcome {
    /// Connectivity implied by this outcome.
    pub fn connectivity(&self) -> ConnectivityStatus {
        match self {
            CycleOutcome::Ok | CycleOutcome::Rejected => ConnectivityStatus::Connected,
            CycleOutcome::Degraded | CycleOutcome::Failed => ConnectivityStatus::Degraded,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Ok => "ok",
            CycleOutcome::Rejected => "rejected",
            CycleOutcome::Degraded => "degraded",
            CycleOutcome::Failed => "failed",
        }
    }
}

/// Snapshot published after each cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Last good state; `None` until the first successful read.
    pub state: Option<ResourceState>,
    /// Connectivity after this cycle.
    pub connectivity: ConnectivityStatus,
    /// Outcome of the latest cycle, `None` before the first one.
    pub outcome: Option<CycleOutcome>,
    /// Number of completed cycles.
    pub cycle: u64,
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            state: None,
            connectivity: ConnectivityStatus::Bootstrapping,
            outcome: None,
            cycle: 0,
        }
    }
}

/// Drives periodic reads of the store.
#[derive(Clone)]
pub struct Poller {
    store: Arc<dyn StateStore>,
    interval: Duration,
    connectivity: Connectivity,
    observations: Arc<watch::Sender<Observation>>,
}

impl Poller {
    pub fn new(store: Arc<dyn StateStore>, interval: Duration, connectivity: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(Observation::default());
        Self {
            store,
            interval,
            connectivity,
            observations: Arc::new(tx),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Latest published observation.
    pub fn observation(&self) -> Observation {
        self.observations.borrow().clone()
    }

    /// Last good state, if any read has succeeded yet.
    pub fn state(&self) -> Option<ResourceState> {
        self.observations.borrow().state.clone()
    }

    /// Receive every published observation.
    pub fn subscribe(&self) -> watch::Receiver<Observation> {
        self.observations.subscribe()
    }

    /// Run one read and publish its result.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let (outcome, fresh) = match self.store.read_state().await {
            Ok(state) => (CycleOutcome::Ok, Some(state)),
            Err(err) if err.is_protocol() => {
                debug!(?err, "ignoring malformed state payload");
                (CycleOutcome::Rejected, None)
            }
            Err(err) if err.is_status() => {
                warn!(?err, "state poll rejected by store");
                (CycleOutcome::Degraded, None)
            }
            Err(err) => {
                warn!(?err, "state poll failed");
                (CycleOutcome::Failed, None)
            }
        };
        POLL_CYCLES.with_label_values(&[outcome.label()]).inc();

        let connectivity = outcome.connectivity();
        self.observations.send_modify(|obs| {
            if let Some(state) = fresh {
                if let Some(prev) = &obs.state {
                    if prev.party() == state.party() && state.since() < prev.since() {
                        debug!(
                            party = %state.party(),
                            prev = prev.since(),
                            next = state.since(),
                            "state timestamp went backwards for same party"
                        );
                    }
                }
                obs.state = Some(state);
            }
            obs.connectivity = connectivity;
            obs.outcome = Some(outcome);
            obs.cycle += 1;
        });
        self.connectivity.set(connectivity);
        trace!(?outcome, "poll cycle complete");
        outcome
    }

    /// Begin polling for `party`. Returns `None` without doing anything when no
    /// party is selected.
    ///
    /// The next tick is deferred while a read is in flight, so at most one
    /// read is outstanding. Polling stops when `parent` is cancelled or the
    /// returned guard is stopped or dropped.
    pub fn start(&self, party: Option<&PartyId>, parent: &CancellationToken) -> Option<TaskGuard> {
        let party = party?;
        let poller = self.clone();
        debug!(%party, interval_ms = self.interval.as_millis(), "starting state poller");

        Some(TaskGuard::spawn("state poller", parent, move |cancel| async move {
            let mut ticker = tokio::time::interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = poller.run_cycle() => {}
                }
            }
            debug!("state poller stopping");
        }))
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("store", &self.store)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
