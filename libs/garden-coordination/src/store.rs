//! Request/response wrapper around the external garden state store.
//!
//! The store exposes three plain HTTP endpoints: read state, write state and a
//! liveness probe. [`StateStore`] is the seam the poller, coordinator and
//! readiness sequencer talk through; [`HttpStateStore`] is the `reqwest`
//! implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, trace};

use crate::error::{CoordinationError, CoordinationResult};
use crate::models::{self, ResourceState};

/// Default request timeout for store calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Path of the read/write state endpoint.
pub const STATE_PATH: &str = "/api/stato";

/// Path of the liveness endpoint.
pub const HEALTH_PATH: &str = "/api/health";

/// Read/write access to the remote garden state.
#[async_trait]
pub trait StateStore: Send + Sync + fmt::Debug + 'static {
    /// Fetch the current state. Malformed payloads are reported as
    /// [`CoordinationError::Protocol`].
    async fn read_state(&self) -> CoordinationResult<ResourceState>;

    /// Overwrite the remote state. Any non-2xx answer is an error.
    async fn write_state(&self, state: &ResourceState) -> CoordinationResult<()>;

    /// Liveness probe.
    async fn health(&self) -> CoordinationResult<()>;
}

/// HTTP implementation of [`StateStore`].
#[derive(Clone)]
pub struct HttpStateStore {
    client: Client,
    state_url: Url,
    health_url: Url,
}

impl HttpStateStore {
    /// Create a store client rooted at `base_url`.
    pub fn new(base_url: &str, request_timeout: Duration) -> CoordinationResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoordinationError::Config(format!("failed to build http client: {e}")))?;
        Self::with_client(client, base_url)
    }

    /// Create a store client sharing an existing `reqwest` client.
    pub fn with_client(client: Client, base_url: &str) -> CoordinationResult<Self> {
        let base = parse_base_url(base_url)?;
        Ok(Self {
            client,
            state_url: join(&base, STATE_PATH)?,
            health_url: join(&base, HEALTH_PATH)?,
        })
    }

    /// URL used for state reads and writes.
    pub fn state_url(&self) -> &Url {
        &self.state_url
    }
}

/// Parse a base url, tolerating a trailing slash.
pub fn parse_base_url(base_url: &str) -> CoordinationResult<Url> {
    Url::parse(base_url.trim_end_matches('/'))
        .map_err(|e| CoordinationError::Config(format!("invalid base url '{base_url}': {e}")))
}

/// Append an absolute endpoint path to `base`, keeping any base path prefix.
pub fn join(base: &Url, path: &str) -> CoordinationResult<Url> {
    let raw = format!("{}{}", base.as_str().trim_end_matches('/'), path);
    Url::parse(&raw).map_err(|e| CoordinationError::Config(format!("invalid url '{raw}': {e}")))
}

fn check_status(status: StatusCode, url: &Url) -> CoordinationResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(CoordinationError::Status {
            status: status.as_u16(),
            path: url.path().to_string(),
        })
    }
}

#[async_trait]
impl StateStore for HttpStateStore {
    async fn read_state(&self) -> CoordinationResult<ResourceState> {
        let resp = self.client.get(self.state_url.clone()).send().await?;
        check_status(resp.status(), &self.state_url)?;
        let body = resp.bytes().await?;
        trace!(len = body.len(), "state payload received");
        models::decode(&body)
    }

    async fn write_state(&self, state: &ResourceState) -> CoordinationResult<()> {
        debug!(
            stato = %state.occupancy(),
            famiglia = %state.party(),
            timestamp = state.since(),
            "writing garden state"
        );
        let resp = self
            .client
            .post(self.state_url.clone())
            .json(state)
            .send()
            .await?;
        check_status(resp.status(), &self.state_url)
    }

    async fn health(&self) -> CoordinationResult<()> {
        let resp = self.client.get(self.health_url.clone()).send().await?;
        check_status(resp.status(), &self.health_url)
    }
}

impl fmt::Debug for HttpStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStateStore")
            .field("state_url", &self.state_url.as_str())
            .field("health_url", &self.health_url.as_str())
            .finish_non_exhaustive()
    }
}
