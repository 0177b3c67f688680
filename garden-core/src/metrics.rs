#![allow(missing_docs)] // lazy_static generated types have no docstrings

//! # metrics
//!
//! process-level statistics. Coordination and notification metrics live in
//! their own crates and register into the same default registry.
use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};

lazy_static! {
    /// When the daemon started
    pub static ref START_TIME: Instant = Instant::now();

    /// daemon uptime
    pub static ref UPTIME: IntGauge = register_int_gauge!("uptime", "daemon uptime (seconds)").unwrap();

    /// party sessions started (party selected while the store is reachable)
    pub static ref SESSIONS_STARTED: IntCounter = register_int_counter!(
        "garden_sessions_started",
        "count of party sessions started"
    ).unwrap();

    /// party sessions stopped
    pub static ref SESSIONS_STOPPED: IntCounter = register_int_counter!(
        "garden_sessions_stopped",
        "count of party sessions stopped"
    ).unwrap();
}
