//! # notifications
//!
//! Best-effort push notification side channel: subscribing this client with
//! the platform push service, registering the subscription with the backend,
//! and rendering incoming push payloads.
//!
//! The platform and the backend sit behind [`PushPlatform`] and
//! [`SubscriptionBackend`] so the lifecycle can be tested without either.

pub mod backend;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod platform;

pub use backend::{HttpSubscriptionBackend, SubscriptionBackend};
pub use error::{NotificationError, NotificationResult};
pub use manager::NotificationSubscriptionManager;
pub use models::{Notice, PlatformSubscription, PushMessage, SubscriptionKeys, render_push};
pub use platform::{ConfiguredPlatform, Permission, PushPlatform};
