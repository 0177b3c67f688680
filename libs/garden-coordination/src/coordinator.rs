//! Async driver for the [`Reservation`] state machine.
//!
//! The coordinator is the only component that writes claims and releases to
//! the store. It feeds poll observations into the state machine, arms the
//! generation-tagged claim timeout, and reports intent transitions on a
//! broadcast channel.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::metrics::{INTENT_EVENTS, WRITES};
use crate::models::{PartyId, ResourceState, now_millis};
use crate::poller::Observation;
use crate::reservation::{IntentEvent, Rejection, Reservation, ReservationView};
use crate::store::StateStore;
use crate::task::TaskGuard;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
struct ClaimTimeout {
    generation: u64,
    guard: TaskGuard,
}

/// Arbitrates claim, release and seed for one party.
#[derive(Debug, Clone)]
pub struct ReservationCoordinator {
    reservation: Arc<Mutex<Reservation>>,
    store: Arc<dyn StateStore>,
    connectivity: Connectivity,
    events: broadcast::Sender<IntentEvent>,
    timeout: Arc<Mutex<Option<ClaimTimeout>>>,
    token: CancellationToken,
}

impl ReservationCoordinator {
    /// Claim timeouts run as children of `parent`.
    pub fn new(
        reservation: Reservation,
        store: Arc<dyn StateStore>,
        connectivity: Connectivity,
        parent: &CancellationToken,
    ) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            reservation: Arc::new(Mutex::new(reservation)),
            store,
            connectivity,
            events,
            timeout: Arc::new(Mutex::new(None)),
            token: parent.child_token(),
        }
    }

    pub fn party(&self) -> PartyId {
        self.reservation.lock().party().clone()
    }

    /// Receive intent transitions from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<IntentEvent> {
        self.events.subscribe()
    }

    /// Presentation snapshot.
    pub fn view(&self) -> ReservationView {
        self.reservation
            .lock()
            .view(self.connectivity.get(), Instant::now())
    }

    /// Claim the garden for this party. On success the optimistic occupied
    /// state is visible before the write completes. A failed write is logged
    /// and otherwise ignored.
    pub async fn claim(&self) -> Result<(), Rejection> {
        self.check_running()?;
        let ticket = {
            let mut reservation = self.reservation.lock();
            reservation.begin_claim(self.connectivity.get(), now_millis(), Instant::now())?
        };
        self.emit(IntentEvent::Claimed {
            since: ticket.write.since(),
        });
        self.arm_timeout(ticket.generation, ticket.deadline);
        self.write("claim", &ticket.write).await;
        Ok(())
    }

    /// Release the garden. Returns false when there was nothing to release
    /// and no write was issued.
    pub async fn release(&self) -> Result<bool, Rejection> {
        self.check_running()?;
        let write = {
            let mut reservation = self.reservation.lock();
            reservation.begin_release(self.connectivity.get(), now_millis(), Instant::now())?
        };
        let Some(write) = write else {
            debug!("release ignored, garden not held by this party");
            return Ok(false);
        };
        self.emit(IntentEvent::Released {
            since: write.since(),
        });
        self.write("release", &write).await;
        Ok(true)
    }

    /// Publish an initial free state into a store that has none.
    pub async fn seed(&self) -> Result<(), Rejection> {
        self.check_running()?;
        let write = {
            let mut reservation = self.reservation.lock();
            reservation.begin_seed(self.connectivity.get(), now_millis(), Instant::now())?
        };
        self.emit(IntentEvent::Seeded {
            since: write.since(),
        });
        self.write("seed", &write).await;
        Ok(())
    }

    /// Feed one observation into the state machine.
    pub fn apply(&self, observation: &Observation) -> Option<IntentEvent> {
        let (event, pending) = {
            let mut reservation = self.reservation.lock();
            let event = reservation.observe(observation, Instant::now());
            (event, reservation.pending_deadline().is_some())
        };
        if !pending {
            self.disarm_timeout();
        }
        if let Some(event) = &event {
            self.emit(event.clone());
        }
        event
    }

    /// Follow poll observations and connectivity changes until cancelled.
    pub fn start(
        &self,
        mut observations: watch::Receiver<Observation>,
        parent: &CancellationToken,
    ) -> TaskGuard {
        let coordinator = self.clone();
        let mut connectivity = self.connectivity.subscribe();
        TaskGuard::spawn("reservation coordinator", parent, move |cancel| async move {
            let status = *connectivity.borrow_and_update();
            coordinator
                .reservation
                .lock()
                .note_connectivity(status, Instant::now());
            let current = observations.borrow_and_update().clone();
            coordinator.apply(&current);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = observations.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let observation = observations.borrow_and_update().clone();
                        coordinator.apply(&observation);
                    }
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let status = *connectivity.borrow_and_update();
                        coordinator
                            .reservation
                            .lock()
                            .note_connectivity(status, Instant::now());
                    }
                }
            }
            debug!("reservation coordinator stopping");
        })
    }

    /// Cancel any pending claim timeout and wait for it to exit.
    pub async fn stop(&self) {
        self.token.cancel();
        let pending = self.timeout.lock().take();
        if let Some(timeout) = pending {
            timeout.guard.stop().await;
        }
    }

    fn arm_timeout(&self, generation: u64, deadline: Instant) {
        let reservation = self.reservation.clone();
        let events = self.events.clone();
        let guard = TaskGuard::spawn("claim timeout", &self.token, move |cancel| async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            let event = reservation.lock().expire(generation);
            if let Some(event) = event {
                publish(&events, event);
            }
        });
        // replacing an older timeout drops and aborts it
        let previous = self
            .timeout
            .lock()
            .replace(ClaimTimeout { generation, guard });
        drop(previous);
    }

    fn disarm_timeout(&self) {
        let previous = self.timeout.lock().take();
        if let Some(timeout) = previous {
            debug!(generation = timeout.generation, "claim timeout disarmed");
            timeout.guard.cancel();
        }
    }

    fn check_running(&self) -> Result<(), Rejection> {
        if self.token.is_cancelled() {
            return Err(Rejection::Stopped);
        }
        Ok(())
    }

    fn emit(&self, event: IntentEvent) {
        publish(&self.events, event);
    }

    async fn write(&self, kind: &'static str, state: &ResourceState) {
        match self.store.write_state(state).await {
            Ok(()) => {
                WRITES.with_label_values(&[kind, "ok"]).inc();
                debug!(kind, state = %state.occupancy(), since = state.since(), "state written");
            }
            Err(err) => {
                WRITES.with_label_values(&[kind, "error"]).inc();
                warn!(?err, kind, "state write failed, keeping local state");
            }
        }
    }
}

fn publish(events: &broadcast::Sender<IntentEvent>, event: IntentEvent) {
    INTENT_EVENTS.with_label_values(&[event.label()]).inc();
    info!(event = event.label(), ?event, "reservation intent changed");
    // no receivers is fine
    let _ = events.send(event);
}
