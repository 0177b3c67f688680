//! Reservation state machine.
//!
//! [`Reservation`] combines this client's [`LocalIntent`] with the last
//! authoritative snapshot and an optimistic overlay. It performs no I/O and
//! reads no clock: callers pass wall-clock milliseconds for timestamps and a
//! monotonic [`Instant`] for expiry, so every transition is deterministic.
//!
//! ```text
//!  Idle --claim--> ClaimPending --poll: held by self--> ClaimConfirmed
//!                  ClaimPending --timeout / poll: held by other--> Idle
//!  ClaimConfirmed --release / poll: free / poll: held by other--> Idle
//! ```
//!
//! The store offers no compare-and-set, so two parties claiming inside one
//! poll interval may both write. The store keeps the last write; each side
//! learns the result from its next poll and the loser drops back to Idle.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::models::{ConnectivityStatus, PartyId, ResourceState};
use crate::poller::Observation;

/// How long a claim may stay unconfirmed before local intent reverts.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the store may stay empty while connected before seeding an
/// initial state is offered.
pub const DEFAULT_SEED_GRACE: Duration = Duration::from_secs(20);

/// What this client is trying to do with the garden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalIntent {
    Idle,
    ClaimPending,
    ClaimConfirmed,
}

/// Transition of [`LocalIntent`], reported to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IntentEvent {
    /// A claim write was issued.
    Claimed { since: i64 },
    /// A poll showed this party holding the garden.
    Confirmed { since: i64 },
    /// The claim was not confirmed in time.
    TimedOut,
    /// A release write was issued.
    Released { since: i64 },
    /// A poll showed another party holding the garden (race loss or takeover).
    Superseded { holder: PartyId },
    /// A poll showed the garden free while this party believed it held it.
    Reset,
    /// An initial free state was published into an empty store.
    Seeded { since: i64 },
}

impl IntentEvent {
    /// Short metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            IntentEvent::Claimed { .. } => "claimed",
            IntentEvent::Confirmed { .. } => "confirmed",
            IntentEvent::TimedOut => "timed_out",
            IntentEvent::Released { .. } => "released",
            IntentEvent::Superseded { .. } => "superseded",
            IntentEvent::Reset => "reset",
            IntentEvent::Seeded { .. } => "seeded",
        }
    }
}

/// Why a claim, release or seed was refused. No write is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("party '{0}' is read-only")]
    ReadOnly(PartyId),
    #[error("store is not connected ({0})")]
    NotConnected(ConnectivityStatus),
    #[error("a claim is still waiting for confirmation")]
    ClaimInFlight,
    #[error("garden is already held by this party")]
    AlreadyHolder,
    #[error("garden is held by '{holder}'")]
    HeldByOther { holder: PartyId },
    #[error("store already holds a state")]
    StateKnown,
    #[error("initial state can only be published after the grace period")]
    SeedNotAvailable,
    #[error("session is shutting down")]
    Stopped,
}

/// Locally assumed state shown until the store confirms or contradicts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub state: ResourceState,
    pub expires_at: Instant,
}

/// State to display: the overlay while it is live and not older than the
/// authoritative snapshot, the authoritative snapshot otherwise.
pub fn reconcile(
    authoritative: Option<&ResourceState>,
    overlay: Option<&Overlay>,
    now: Instant,
) -> Option<ResourceState> {
    match overlay {
        Some(overlay)
            if now < overlay.expires_at
                && authoritative.is_none_or(|auth| auth.since() <= overlay.state.since()) =>
        {
            Some(overlay.state.clone())
        }
        _ => authoritative.cloned(),
    }
}

/// A claim admitted by [`Reservation::begin_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTicket {
    /// State to write to the store.
    pub write: ResourceState,
    /// Identifies this claim for [`Reservation::expire`].
    pub generation: u64,
    /// When the claim times out.
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingClaim {
    generation: u64,
    deadline: Instant,
}

/// Snapshot of the reservation for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub party: PartyId,
    pub read_only: bool,
    pub intent: LocalIntent,
    pub connectivity: ConnectivityStatus,
    /// Reconciled state (overlay or authoritative); `None` while unknown.
    pub state: Option<ResourceState>,
    /// A claim is waiting for confirmation.
    pub processing: bool,
    pub can_claim: bool,
    pub can_release: bool,
    pub seed_available: bool,
}

/// Per-session reservation state owned by the coordinator.
#[derive(Debug, Clone)]
pub struct Reservation {
    party: PartyId,
    read_only: bool,
    intent: LocalIntent,
    authoritative: Option<ResourceState>,
    overlay: Option<Overlay>,
    pending: Option<PendingClaim>,
    generation: u64,
    claim_timeout: Duration,
    seed_grace: Duration,
    connected_since: Option<Instant>,
}

impl Reservation {
    pub fn new(party: PartyId, read_only: bool) -> Self {
        Self::with_timeouts(party, read_only, DEFAULT_CLAIM_TIMEOUT, DEFAULT_SEED_GRACE)
    }

    pub fn with_timeouts(
        party: PartyId,
        read_only: bool,
        claim_timeout: Duration,
        seed_grace: Duration,
    ) -> Self {
        Self {
            party,
            read_only,
            intent: LocalIntent::Idle,
            authoritative: None,
            overlay: None,
            pending: None,
            generation: 0,
            claim_timeout,
            seed_grace,
            connected_since: None,
        }
    }

    pub fn party(&self) -> &PartyId {
        &self.party
    }

    pub fn intent(&self) -> LocalIntent {
        self.intent
    }

    pub fn authoritative(&self) -> Option<&ResourceState> {
        self.authoritative.as_ref()
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    /// Reconciled state at `now`.
    pub fn displayed(&self, now: Instant) -> Option<ResourceState> {
        reconcile(self.authoritative.as_ref(), self.overlay.as_ref(), now)
    }

    // an expired overlay from a lost write no longer counts as known state
    fn has_live_overlay(&self, now: Instant) -> bool {
        self.overlay.as_ref().is_some_and(|o| now < o.expires_at)
    }

    /// Track connectivity for the seed grace period.
    pub fn note_connectivity(&mut self, connectivity: ConnectivityStatus, now: Instant) {
        if connectivity.admits_writes() {
            self.connected_since.get_or_insert(now);
        } else {
            self.connected_since = None;
        }
    }

    fn check_writable(&self, connectivity: ConnectivityStatus) -> Result<(), Rejection> {
        if self.read_only {
            return Err(Rejection::ReadOnly(self.party.clone()));
        }
        if !connectivity.admits_writes() {
            return Err(Rejection::NotConnected(connectivity));
        }
        Ok(())
    }

    fn check_claim(&self, connectivity: ConnectivityStatus) -> Result<(), Rejection> {
        self.check_writable(connectivity)?;
        match self.intent {
            LocalIntent::ClaimPending => return Err(Rejection::ClaimInFlight),
            LocalIntent::ClaimConfirmed => return Err(Rejection::AlreadyHolder),
            LocalIntent::Idle => {}
        }
        if let Some(holder) = self.authoritative.as_ref().and_then(|s| s.holder()) {
            if holder == &self.party {
                return Err(Rejection::AlreadyHolder);
            }
            return Err(Rejection::HeldByOther {
                holder: holder.clone(),
            });
        }
        Ok(())
    }

    fn holds(&self, now: Instant) -> bool {
        self.intent == LocalIntent::ClaimConfirmed
            || self
                .displayed(now)
                .is_some_and(|state| state.is_held_by(&self.party))
    }

    /// Admit a claim: Idle → ClaimPending with an optimistic occupied overlay.
    pub fn begin_claim(
        &mut self,
        connectivity: ConnectivityStatus,
        now_ms: i64,
        now: Instant,
    ) -> Result<ClaimTicket, Rejection> {
        self.check_claim(connectivity)?;

        self.generation += 1;
        let deadline = now + self.claim_timeout;
        let write = ResourceState::occupied(self.party.clone(), now_ms);
        self.overlay = Some(Overlay {
            state: write.clone(),
            expires_at: deadline,
        });
        self.intent = LocalIntent::ClaimPending;
        self.pending = Some(PendingClaim {
            generation: self.generation,
            deadline,
        });
        Ok(ClaimTicket {
            write,
            generation: self.generation,
            deadline,
        })
    }

    /// Admit a release. Returns `Ok(None)` when there is nothing to release,
    /// in which case no write must be issued.
    pub fn begin_release(
        &mut self,
        connectivity: ConnectivityStatus,
        now_ms: i64,
        now: Instant,
    ) -> Result<Option<ResourceState>, Rejection> {
        if self.read_only {
            return Err(Rejection::ReadOnly(self.party.clone()));
        }
        if self.intent == LocalIntent::ClaimPending {
            return Err(Rejection::ClaimInFlight);
        }
        if !self.holds(now) {
            return Ok(None);
        }
        self.check_writable(connectivity)?;

        let write = ResourceState::free(self.party.clone(), now_ms);
        self.overlay = Some(Overlay {
            state: write.clone(),
            expires_at: now + self.claim_timeout,
        });
        self.intent = LocalIntent::Idle;
        self.pending = None;
        Ok(Some(write))
    }

    /// Returns true if publishing an initial state is currently offered.
    pub fn seed_available(&self, connectivity: ConnectivityStatus, now: Instant) -> bool {
        !self.read_only
            && connectivity.admits_writes()
            && self.authoritative.is_none()
            && !self.has_live_overlay(now)
            && self
                .connected_since
                .is_some_and(|since| now.saturating_duration_since(since) >= self.seed_grace)
    }

    /// Admit publishing `{Free, party, now}` into a store that has stayed
    /// empty for the grace period.
    pub fn begin_seed(
        &mut self,
        connectivity: ConnectivityStatus,
        now_ms: i64,
        now: Instant,
    ) -> Result<ResourceState, Rejection> {
        self.check_writable(connectivity)?;
        if self.authoritative.is_some() || self.has_live_overlay(now) {
            return Err(Rejection::StateKnown);
        }
        if !self.seed_available(connectivity, now) {
            return Err(Rejection::SeedNotAvailable);
        }
        let write = ResourceState::free(self.party.clone(), now_ms);
        self.overlay = Some(Overlay {
            state: write.clone(),
            expires_at: now + self.claim_timeout,
        });
        Ok(write)
    }

    /// Apply a poll observation. The authoritative snapshot always wins over
    /// stale local intent.
    pub fn observe(&mut self, observation: &Observation, now: Instant) -> Option<IntentEvent> {
        self.note_connectivity(observation.connectivity, now);
        let state = observation.state.as_ref()?;
        self.authoritative = Some(state.clone());

        if self
            .overlay
            .as_ref()
            .is_some_and(|overlay| overlay.state.since() <= state.since())
        {
            self.overlay = None;
        }

        match self.intent {
            LocalIntent::Idle => None,
            LocalIntent::ClaimPending => {
                if state.is_held_by(&self.party) {
                    self.intent = LocalIntent::ClaimConfirmed;
                    self.pending = None;
                    Some(IntentEvent::Confirmed {
                        since: state.since(),
                    })
                } else if let Some(holder) = state.holder() {
                    let holder = holder.clone();
                    self.reset();
                    Some(IntentEvent::Superseded { holder })
                } else {
                    // write not visible yet; the timeout decides
                    None
                }
            }
            LocalIntent::ClaimConfirmed => match state.holder() {
                Some(holder) if holder == &self.party => None,
                Some(holder) => {
                    let holder = holder.clone();
                    self.reset();
                    Some(IntentEvent::Superseded { holder })
                }
                None => {
                    self.reset();
                    Some(IntentEvent::Reset)
                }
            },
        }
    }

    /// Give up on claim `generation` if it is still pending.
    pub fn expire(&mut self, generation: u64) -> Option<IntentEvent> {
        match self.pending {
            Some(pending)
                if pending.generation == generation
                    && self.intent == LocalIntent::ClaimPending =>
            {
                self.reset();
                Some(IntentEvent::TimedOut)
            }
            _ => None,
        }
    }

    /// Pending claim generation and its deadline, if any.
    pub fn pending_deadline(&self) -> Option<(u64, Instant)> {
        self.pending.map(|p| (p.generation, p.deadline))
    }

    fn reset(&mut self) {
        self.intent = LocalIntent::Idle;
        self.pending = None;
        self.overlay = None;
    }

    /// Presentation snapshot at `now`.
    pub fn view(&self, connectivity: ConnectivityStatus, now: Instant) -> ReservationView {
        let state = self.displayed(now);
        let can_release = !self.read_only
            && connectivity.admits_writes()
            && self.intent != LocalIntent::ClaimPending
            && self.holds(now);
        ReservationView {
            party: self.party.clone(),
            read_only: self.read_only,
            intent: self.intent,
            connectivity,
            processing: self.intent == LocalIntent::ClaimPending,
            can_claim: self.check_claim(connectivity).is_ok(),
            can_release,
            seed_available: self.seed_available(connectivity, now),
            state,
        }
    }
}
