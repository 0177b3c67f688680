//! Notification subscription metrics.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, register_int_counter_vec};

lazy_static! {
    /// Enable/disable attempts by action and result
    pub static ref SUBSCRIPTION_CHANGES: IntCounterVec = register_int_counter_vec!(
        "garden_notification_subscription_changes",
        "count of notification enable/disable attempts by action and result",
        &["action", "result"]
    ).unwrap();
}
