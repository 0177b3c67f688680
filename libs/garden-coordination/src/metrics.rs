//! Coordination metrics for polling, readiness and reservations.
//!
//! Metrics are lazily initialized on first access via `lazy_static!`.
//! Registration failures are fatal, same as the rest of the process metrics.

use lazy_static::lazy_static;
use prometheus::{
    IntCounter, IntCounterVec, IntGauge, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};

lazy_static! {
    /// Poll cycles by outcome (ok, rejected, degraded, failed)
    pub static ref POLL_CYCLES: IntCounterVec = register_int_counter_vec!(
        "garden_poll_cycles",
        "count of state poll cycles by outcome",
        &["outcome"]
    ).unwrap();

    /// Gauge: current connectivity (0=bootstrapping, 1=connecting, 2=connected, 3=degraded)
    pub static ref CONNECTIVITY_STATE: IntGauge = register_int_gauge!(
        "garden_connectivity_state",
        "current store connectivity (0=bootstrapping, 1=connecting, 2=connected, 3=degraded)"
    ).unwrap();

    /// Health probes issued while bootstrapping
    pub static ref BOOTSTRAP_PROBES: IntCounter = register_int_counter!(
        "garden_bootstrap_probes",
        "count of health probes issued before the store became reachable"
    ).unwrap();

    /// Keep-alive probes that failed (swallowed)
    pub static ref KEEPALIVE_FAILURES: IntCounter = register_int_counter!(
        "garden_keepalive_failures",
        "count of failed keep-alive probes"
    ).unwrap();

    /// Claim/release/seed writes by kind and result
    pub static ref WRITES: IntCounterVec = register_int_counter_vec!(
        "garden_writes",
        "count of state writes by kind and result",
        &["kind", "result"]
    ).unwrap();

    /// Intent transitions by event
    pub static ref INTENT_EVENTS: IntCounterVec = register_int_counter_vec!(
        "garden_intent_events",
        "count of reservation intent transitions by event",
        &["event"]
    ).unwrap();
}
