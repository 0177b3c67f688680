//! # garden-coordination
//!
//! Reservation coordination for a single shared garden among a fixed roster
//! of parties, over a remote state store that can only be polled.
//!
//! This library provides:
//! - **Typed models** for the store's state payload, parties and
//!   connectivity.
//! - **Store client** over HTTP, plus an in-memory store for tests and
//!   offline runs.
//! - **Poller** publishing whole observations on a fixed interval.
//! - **Reservation state machine** with an optimistic overlay and a pure
//!   reconciliation function, driven by the **coordinator**.
//! - **Readiness sequencer** gating the session on the store's health probe,
//!   plus a keep-alive.
//!
//! ## Design Principles
//!
//! - The store has no compare-and-set. The last write wins and every client
//!   learns the outcome from its next poll.
//! - Polling and health failures never escalate; they only move
//!   connectivity.
//! - Every timer is a task owned by a [`TaskGuard`] and tied to a
//!   cancellation token.

pub mod bootstrap;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod poller;
pub mod reservation;
pub mod store;
pub mod task;

// Re-export key types for convenient access
pub use bootstrap::Readiness;
pub use connectivity::Connectivity;
pub use coordinator::ReservationCoordinator;
pub use error::{CoordinationError, CoordinationResult};
pub use memory::MemoryStore;
pub use models::{ConnectivityStatus, Occupancy, PartyId, ResourceState, Roster, StatePayload};
pub use poller::{CycleOutcome, Observation, Poller};
pub use reservation::{
    IntentEvent, LocalIntent, Overlay, Rejection, Reservation, ReservationView, reconcile,
};
pub use store::{HttpStateStore, StateStore};
pub use task::TaskGuard;
