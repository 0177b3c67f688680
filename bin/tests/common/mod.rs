//! In-process stand-in for the garden backend: state store, health probe and
//! push subscription endpoints on an ephemeral port.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use garden_core::{
    GardenContext, SessionConfig,
    client_state::ClientStateStore,
    garden_coordination::{HttpStateStore, Roster},
    notifications::{
        ConfiguredPlatform, HttpSubscriptionBackend, NotificationSubscriptionManager,
        SubscriptionKeys,
    },
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::{net::TcpListener, task::JoinHandle};

#[derive(Debug, Default)]
pub struct Backend {
    /// raw document served on GET /api/stato, `None` serves `{}`
    pub stato: Option<Value>,
    pub healthy: bool,
    pub reject_writes: bool,
    pub reads: u32,
    pub writes: Vec<Value>,
    pub health_probes: u32,
    pub subscriptions: Vec<String>,
}

#[derive(Debug)]
pub struct FakeBackend {
    pub addr: SocketAddr,
    pub inner: Arc<Mutex<Backend>>,
    task: JoinHandle<()>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let inner = Arc::new(Mutex::new(Backend {
            healthy: true,
            ..Default::default()
        }));
        let app = Router::new()
            .route("/api/stato", get(read_state).post(write_state))
            .route("/api/health", get(health))
            .route("/api/vapidPublicKey", get(public_key))
            .route("/api/subscribe", axum::routing::post(subscribe))
            .route("/api/unsubscribe", axum::routing::delete(unsubscribe))
            .with_state(inner.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            inner,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_state(&self, stato: &str, famiglia: &str, timestamp: i64) {
        self.inner.lock().stato = Some(json!({
            "stato": stato,
            "famiglia": famiglia,
            "timestamp": timestamp,
        }));
    }

    pub fn set_raw(&self, raw: Value) {
        self.inner.lock().stato = Some(raw);
    }

    pub fn stato(&self) -> Option<Value> {
        self.inner.lock().stato.clone()
    }

    /// Build a context for `party` talking to this backend.
    pub fn context(&self, party: &str, config: SessionConfig) -> Arc<GardenContext> {
        self.context_with_push(party, config, Some("https://push.example/garden".into()))
    }

    pub fn context_with_push(
        &self,
        party: &str,
        config: SessionConfig,
        push_endpoint: Option<String>,
    ) -> Arc<GardenContext> {
        let timeout = Duration::from_secs(2);
        let store = HttpStateStore::new(&self.url(), timeout).unwrap();
        let backend = HttpSubscriptionBackend::new(&self.url(), timeout).unwrap();
        let client_state = ClientStateStore::in_memory();
        client_state.set_party(Some(party.to_owned())).unwrap();
        let platform = ConfiguredPlatform::new(
            push_endpoint,
            SubscriptionKeys {
                p256dh: "BNc".into(),
                auth: "tBH".into(),
            },
        );
        let notifications = NotificationSubscriptionManager::new(
            Arc::new(platform),
            Arc::new(backend),
            client_state.clone(),
        );
        let roster = Roster::new(["ermes-ben", "raya", "Visualizzatore"], "Visualizzatore").unwrap();
        Arc::new(GardenContext::new(
            Arc::new(store),
            roster,
            client_state,
            notifications,
            config,
        ))
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Fast timings so scenarios settle within a second or two.
pub fn fast_session() -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_millis(50),
        claim_timeout: Duration::from_millis(600),
        seed_grace: Duration::from_millis(200),
        health_retry: Duration::from_millis(50),
        keepalive: Duration::from_secs(300),
    }
}

/// Poll `cond` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

type Shared = State<Arc<Mutex<Backend>>>;

async fn read_state(State(inner): Shared) -> Json<Value> {
    let mut inner = inner.lock();
    inner.reads += 1;
    Json(inner.stato.clone().unwrap_or_else(|| json!({})))
}

async fn write_state(State(inner): Shared, Json(body): Json<Value>) -> Response {
    let mut inner = inner.lock();
    if inner.reject_writes {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    inner.writes.push(body.clone());
    inner.stato = Some(body);
    StatusCode::OK.into_response()
}

async fn health(State(inner): Shared) -> StatusCode {
    let mut inner = inner.lock();
    inner.health_probes += 1;
    if inner.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn public_key() -> Json<Value> {
    let raw: Vec<u8> = std::iter::once(4u8).chain(1..=64).collect();
    Json(json!({ "publicKey": URL_SAFE_NO_PAD.encode(raw) }))
}

async fn subscribe(State(inner): Shared, Json(body): Json<Value>) -> StatusCode {
    match body.get("endpoint").and_then(Value::as_str) {
        Some(endpoint) => {
            inner.lock().subscriptions.push(endpoint.to_owned());
            StatusCode::CREATED
        }
        None => StatusCode::BAD_REQUEST,
    }
}

async fn unsubscribe(State(inner): Shared, Json(body): Json<Value>) -> StatusCode {
    let Some(endpoint) = body.get("endpoint").and_then(Value::as_str) else {
        return StatusCode::BAD_REQUEST;
    };
    inner.lock().subscriptions.retain(|e| e != endpoint);
    StatusCode::OK
}
