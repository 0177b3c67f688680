//! # garden
//!
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
pub use anyhow;
pub use async_trait::async_trait;
pub use client_state;
pub use garden_coordination;
pub use notifications;
pub use tokio;
pub use tokio_util;
pub use tracing;

pub use crate::context::{GardenContext, SessionConfig, SessionError};

pub mod config;
pub mod context;
pub mod metrics;
