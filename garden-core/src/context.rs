//! Session wiring.
//!
//! A [`GardenContext`] owns everything one client needs: the store, the
//! readiness sequencer, the notification manager and, once a party is
//! selected and the store is reachable, a running [`Session`] made of one
//! poller and one coordinator. Contexts share nothing, so several can run side
//! by side in one process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use client_state::{ClientStateError, ClientStateStore};
use garden_coordination::{
    Connectivity, CoordinationResult, HttpStateStore, PartyId, Poller, Readiness, Reservation,
    ReservationCoordinator, ReservationView, Roster, StateStore, TaskGuard,
    bootstrap::{DEFAULT_HEALTH_RETRY, DEFAULT_KEEPALIVE},
    poller::DEFAULT_POLL_INTERVAL,
    reservation::{DEFAULT_CLAIM_TIMEOUT, DEFAULT_SEED_GRACE},
};
use notifications::{
    ConfiguredPlatform, HttpSubscriptionBackend, NotificationSubscriptionManager,
    PlatformSubscription, SubscriptionKeys,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::cli;
use crate::metrics::{SESSIONS_STARTED, SESSIONS_STOPPED};

/// Timings of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// cadence of state reads
    pub poll_interval: Duration,
    /// how long a claim may stay unconfirmed
    pub claim_timeout: Duration,
    /// how long the store may stay empty before seeding is offered
    pub seed_grace: Duration,
    /// delay between failed health probes
    pub health_retry: Duration,
    /// keep-alive cadence
    pub keepalive: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            seed_grace: DEFAULT_SEED_GRACE,
            health_retry: DEFAULT_HEALTH_RETRY,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

/// Party selection failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// the name is not on the roster
    #[error("unknown party '{0}'")]
    UnknownParty(String),
    /// the selection could not be persisted
    #[error(transparent)]
    State(#[from] ClientStateError),
}

/// A running party session: one poller, one coordinator.
#[derive(Debug)]
struct Session {
    party: PartyId,
    coordinator: ReservationCoordinator,
    token: CancellationToken,
    tasks: Vec<TaskGuard>,
}

impl Session {
    fn start(
        party: PartyId,
        read_only: bool,
        store: Arc<dyn StateStore>,
        connectivity: Connectivity,
        config: SessionConfig,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let poller = Poller::new(store.clone(), config.poll_interval, connectivity.clone());
        let reservation =
            Reservation::with_timeouts(party.clone(), read_only, config.claim_timeout, config.seed_grace);
        let coordinator = ReservationCoordinator::new(reservation, store, connectivity, &token);

        // coordinator first so it sees the first observation
        let mut tasks = vec![coordinator.start(poller.subscribe(), &token)];
        tasks.extend(poller.start(Some(&party), &token));
        SESSIONS_STARTED.inc();
        info!(%party, read_only, "party session started");
        Self {
            party,
            coordinator,
            token,
            tasks,
        }
    }

    async fn stop(self) {
        self.token.cancel();
        for task in self.tasks {
            task.stop().await;
        }
        self.coordinator.stop().await;
        SESSIONS_STOPPED.inc();
        info!(party = %self.party, "party session stopped");
    }
}

/// Per-client context.
#[derive(Debug)]
pub struct GardenContext {
    store: Arc<dyn StateStore>,
    roster: Roster,
    client_state: ClientStateStore,
    notifications: NotificationSubscriptionManager,
    config: SessionConfig,
    connectivity: Connectivity,
    readiness: Readiness,
    token: CancellationToken,
    ready: AtomicBool,
    // serializes session changes; held across stop/start
    lifecycle: tokio::sync::Mutex<()>,
    session: Mutex<Option<Session>>,
    keepalive: Mutex<Option<TaskGuard>>,
}

impl GardenContext {
    /// Assemble a context from its parts. Nothing runs until [`bootstrap`].
    ///
    /// [`bootstrap`]: GardenContext::bootstrap
    pub fn new(
        store: Arc<dyn StateStore>,
        roster: Roster,
        client_state: ClientStateStore,
        notifications: NotificationSubscriptionManager,
        config: SessionConfig,
    ) -> Self {
        let connectivity = Connectivity::new();
        let readiness = Readiness::with_intervals(
            store.clone(),
            connectivity.clone(),
            config.health_retry,
            config.keepalive,
        );
        Self {
            store,
            roster,
            client_state,
            notifications,
            config,
            connectivity,
            readiness,
            token: CancellationToken::new(),
            ready: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            session: Mutex::new(None),
            keepalive: Mutex::new(None),
        }
    }

    /// Build the HTTP-backed context described by `config`.
    pub fn from_config(config: &cli::Config) -> Result<Self> {
        let roster = config.roster()?;
        let store = HttpStateStore::new(&config.backend_url, config.request_timeout())
            .context("failed to create state store client")?;
        let backend = HttpSubscriptionBackend::new(&config.backend_url, config.request_timeout())
            .context("failed to create subscription backend client")?;
        let client_state = match &config.state_path {
            Some(path) => ClientStateStore::open(path)
                .with_context(|| format!("failed to load client state from {}", path.display()))?,
            None => ClientStateStore::in_memory(),
        };
        if let Some(party) = &config.party {
            client_state.set_party(Some(party.clone()))?;
        }

        let keys = SubscriptionKeys {
            p256dh: config.push_p256dh.clone(),
            auth: config.push_auth.clone(),
        };
        let platform = ConfiguredPlatform::new(config.push_endpoint.clone(), keys.clone());
        if client_state.notifications_enabled() {
            if let Some(endpoint) = &config.push_endpoint {
                platform.adopt(PlatformSubscription {
                    endpoint: endpoint.clone(),
                    expiration_time: None,
                    keys,
                });
            }
        }
        let notifications = NotificationSubscriptionManager::new(
            Arc::new(platform),
            Arc::new(backend),
            client_state.clone(),
        );

        Ok(Self::new(
            Arc::new(store),
            roster,
            client_state,
            notifications,
            config.session(),
        ))
    }

    /// Shared connectivity status.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Parties known to this context.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Push notification lifecycle.
    pub fn notifications(&self) -> &NotificationSubscriptionManager {
        &self.notifications
    }

    /// Persisted client flags.
    pub fn client_state(&self) -> &ClientStateStore {
        &self.client_state
    }

    /// Returns true once the store has answered a health probe.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Returns true while a party session is running.
    pub fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    /// The active party, if a session is running.
    pub fn party(&self) -> Option<PartyId> {
        self.session.lock().as_ref().map(|s| s.party.clone())
    }

    /// Coordinator of the running session.
    pub fn coordinator(&self) -> Option<ReservationCoordinator> {
        self.session.lock().as_ref().map(|s| s.coordinator.clone())
    }

    /// Reservation snapshot of the running session.
    pub fn view(&self) -> Option<ReservationView> {
        self.coordinator().map(|c| c.view())
    }

    /// Wait for the store, then start the keep-alive and the session for the
    /// persisted party. Returns the number of health probes issued.
    pub async fn bootstrap(&self) -> CoordinationResult<u32> {
        let restored = self.notifications.restore();
        debug!(notifications = restored, "bootstrapping");

        let probes = self.readiness.wait_until_ready(&self.token).await?;
        *self.keepalive.lock() = Some(self.readiness.spawn_keepalive(&self.token));
        self.ready.store(true, Ordering::Release);

        let persisted = self.client_state.party();
        match persisted.as_deref().map(|name| self.roster.resolve(name)) {
            Some(Some(party)) => self.restart_session(Some(party)).await,
            Some(None) => {
                warn!(party = ?persisted, "persisted party is not on the roster, ignoring");
            }
            None => debug!("no party selected yet"),
        }
        Ok(probes)
    }

    /// Select the party this client acts as, or clear the selection. The
    /// choice is persisted; the session is restarted if the store is
    /// reachable.
    pub async fn select_party(&self, name: Option<&str>) -> Result<Option<PartyId>, SessionError> {
        let party = match name {
            Some(name) => Some(
                self.roster
                    .resolve(name)
                    .ok_or_else(|| SessionError::UnknownParty(name.to_owned()))?,
            ),
            None => None,
        };
        self.client_state
            .set_party(party.as_ref().map(|p| p.as_str().to_owned()))?;
        if self.is_ready() {
            self.restart_session(party.clone()).await;
        }
        Ok(party)
    }

    async fn restart_session(&self, party: Option<PartyId>) {
        let _lifecycle = self.lifecycle.lock().await;
        let previous = self.session.lock().take();
        if let Some(previous) = previous {
            previous.stop().await;
        }
        if self.token.is_cancelled() {
            return;
        }
        if let Some(party) = party {
            let read_only = self.roster.is_observer(&party);
            let session = Session::start(
                party,
                read_only,
                self.store.clone(),
                self.connectivity.clone(),
                self.config,
                &self.token,
            );
            *self.session.lock() = Some(session);
        }
    }

    /// Stop every task. Nothing this context owns runs after this returns.
    pub async fn stop(&self) {
        self.token.cancel();
        let _lifecycle = self.lifecycle.lock().await;
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.stop().await;
        }
        let keepalive = self.keepalive.lock().take();
        if let Some(keepalive) = keepalive {
            keepalive.stop().await;
        }
        self.ready.store(false, Ordering::Release);
        debug!("garden context stopped");
    }
}
