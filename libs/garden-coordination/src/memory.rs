//! In-memory [`StateStore`] with last-write-wins semantics.
//!
//! Used by tests and offline runs. Failures can be scripted so the polling and
//! readiness paths can be exercised without a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{CoordinationError, CoordinationResult};
use crate::models::ResourceState;
use crate::store::StateStore;

#[derive(Debug, Default)]
struct MemoryInner {
    state: Option<ResourceState>,
    failing_reads: u32,
    malformed_reads: u32,
    failing_health: u32,
    failing_writes: bool,
    read_delay: Option<Duration>,
    reads: u64,
    health_probes: u64,
    writes: Vec<ResourceState>,
}

/// Shared in-memory store. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an initial state.
    pub fn with_state(state: ResourceState) -> Self {
        let store = Self::default();
        store.set_state(state);
        store
    }

    /// Replace the stored state directly, as another party's write would.
    pub fn set_state(&self, state: ResourceState) {
        self.inner.lock().state = Some(state);
    }

    pub fn state(&self) -> Option<ResourceState> {
        self.inner.lock().state.clone()
    }

    /// Fail the next `n` reads with a transport error.
    pub fn fail_next_reads(&self, n: u32) {
        self.inner.lock().failing_reads = n;
    }

    /// Answer the next `n` reads with a malformed payload.
    pub fn malformed_next_reads(&self, n: u32) {
        self.inner.lock().malformed_reads = n;
    }

    /// Fail the next `n` health probes.
    pub fn fail_next_health(&self, n: u32) {
        self.inner.lock().failing_health = n;
    }

    /// Reject every write with a 500 until switched back.
    pub fn fail_writes(&self, failing: bool) {
        self.inner.lock().failing_writes = failing;
    }

    /// Delay every read, simulating a slow store.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.inner.lock().read_delay = delay;
    }

    /// Number of reads attempted so far.
    pub fn read_count(&self) -> u64 {
        self.inner.lock().reads
    }

    /// Number of health probes attempted so far.
    pub fn health_count(&self) -> u64 {
        self.inner.lock().health_probes
    }

    /// Every write attempted so far, failed ones included.
    pub fn writes(&self) -> Vec<ResourceState> {
        self.inner.lock().writes.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read_state(&self) -> CoordinationResult<ResourceState> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.reads += 1;
            inner.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock();
        if inner.failing_reads > 0 {
            inner.failing_reads -= 1;
            return Err(CoordinationError::Transport("scripted read failure".into()));
        }
        if inner.malformed_reads > 0 {
            inner.malformed_reads -= 1;
            return Err(CoordinationError::Protocol(
                "state payload missing 'famiglia'".into(),
            ));
        }
        inner
            .state
            .clone()
            .ok_or_else(|| CoordinationError::Protocol("store holds no state yet".into()))
    }

    async fn write_state(&self, state: &ResourceState) -> CoordinationResult<()> {
        let mut inner = self.inner.lock();
        inner.writes.push(state.clone());
        if inner.failing_writes {
            return Err(CoordinationError::Status {
                status: 500,
                path: crate::store::STATE_PATH.into(),
            });
        }
        inner.state = Some(state.clone());
        Ok(())
    }

    async fn health(&self) -> CoordinationResult<()> {
        let mut inner = self.inner.lock();
        inner.health_probes += 1;
        if inner.failing_health > 0 {
            inner.failing_health -= 1;
            return Err(CoordinationError::Transport("scripted health failure".into()));
        }
        Ok(())
    }
}
