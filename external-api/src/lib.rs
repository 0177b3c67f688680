//! # Healthcheck & control API
//!
//! This crate provides the local http api for healthcheck, metrics and the
//! reservation controls a presentation layer needs.
//! It exposes the following endpoints:
//!
//! GET  /health
//! GET  /ping
//! GET  /metrics
//! GET  /metrics-text
//! GET  /state
//! POST /party
//! POST /claim
//! POST /release
//! POST /seed
//! POST /notifications/enable
//! POST /notifications/disable
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{Router, extract::Extension, routing};
use garden_core::GardenContext;
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, error, info, trace};

pub use crate::models::{Health, State};

/// Requests that take longer than this are answered with 408. Claims and
/// releases wait for the store write, which has its own timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The task runner for the [`ExternalApi`]
#[derive(Debug)]
pub struct ExternalApiGuard {
    task_handle: JoinHandle<()>,
}

impl Drop for ExternalApiGuard {
    fn drop(&mut self) {
        trace!("ExternalApiGuard drop called");
        self.task_handle.abort();
    }
}

/// Listens for health changes and serves the control API for one
/// [`GardenContext`]
#[derive(Debug)]
pub struct ExternalApi {
    tx: mpsc::Sender<Health>,
    rx: mpsc::Receiver<Health>,
    addr: SocketAddr,
    state: State,
    ctx: Arc<GardenContext>,
}

impl ExternalApi {
    /// Create a new ExternalApi instance
    pub fn new(addr: SocketAddr, ctx: Arc<GardenContext>) -> Self {
        trace!("starting external api");
        let (tx, rx) = mpsc::channel(10);
        let state = models::blank_health();
        Self {
            tx,
            rx,
            addr,
            state,
            ctx,
        }
    }

    /// clone the health sender channel
    pub fn sender(&self) -> mpsc::Sender<Health> {
        self.tx.clone()
    }

    /// Listen to Health changes over the channel
    async fn listen_status(mut rx: mpsc::Receiver<Health>, state: State) -> Result<()> {
        while let Some(health) = rx.recv().await {
            let mut guard = state.lock();
            if *guard != health {
                info!(%health, "health changed");
                *guard = health;
            }
        }
        debug!("listen health exited-- nothing listening");
        Ok(())
    }

    /// Build the router
    pub fn router(state: State, ctx: Arc<GardenContext>) -> Router {
        Router::new()
            .route("/health", routing::get(handlers::ok))
            .route("/ping", routing::get(handlers::ping))
            .route("/metrics", routing::get(handlers::metrics))
            .route("/metrics-text", routing::get(handlers::metrics_text))
            .route("/state", routing::get(handlers::state))
            .route("/party", routing::post(handlers::select_party))
            .route("/claim", routing::post(handlers::claim))
            .route("/release", routing::post(handlers::release))
            .route("/seed", routing::post(handlers::seed))
            .route(
                "/notifications/enable",
                routing::post(handlers::enable_notifications),
            )
            .route(
                "/notifications/disable",
                routing::post(handlers::disable_notifications),
            )
            .layer(Extension(state))
            .layer(Extension(ctx))
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(TraceLayer::new_for_http())
    }

    /// serve the HTTP external api until `token` is cancelled
    async fn run(
        addr: SocketAddr,
        state: State,
        ctx: Arc<GardenContext>,
        token: CancellationToken,
    ) -> Result<()> {
        let tcp = TcpListener::bind(&addr).await?;
        let app = Self::router(state, ctx);

        debug!("external API listening on {}", addr);

        axum::serve(tcp, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;
        debug!("external API shut down");
        Ok(())
    }

    /// Kick off the HTTP service and start listening on the health channel.
    /// Returns once `token` is cancelled.
    pub fn start(self, token: CancellationToken) -> JoinHandle<()> {
        let Self {
            tx,
            rx,
            addr,
            state,
            ctx,
        } = self;
        // keep one sender alive so the health listener outlives callers dropping theirs
        tokio::spawn(async move {
            let _tx = tx;
            tokio::select! {
                res = ExternalApi::run(addr, state.clone(), ctx, token) => {
                    if let Err(err) = res {
                        error!(?err, "external API returned an error");
                    }
                }
                res = ExternalApi::listen_status(rx, state) => {
                    if let Err(err) = res {
                        error!(?err, "health task returning, this should not happen");
                    }
                }
            }
        })
    }

    /// Start the api with a guard that aborts it on drop
    pub fn serve(self) -> ExternalApiGuard {
        ExternalApiGuard {
            task_handle: self.start(CancellationToken::new()),
        }
    }
}

mod handlers {

    use std::sync::Arc;

    use axum::{
        Json,
        body::Body,
        extract::Extension,
        http::header,
        http::{Response, StatusCode},
        response::IntoResponse,
    };
    use garden_core::{
        GardenContext,
        garden_coordination::ReservationCoordinator,
        metrics::{START_TIME, UPTIME},
    };
    use prometheus::{Encoder, ProtobufEncoder, TextEncoder};
    use tracing::{debug, error};

    use crate::models::{
        ApiError, ApiResult, Health, NotificationsResponse, PartyRequest, ReleaseResponse,
        ServerResult, State, StateResponse,
    };

    pub(crate) async fn ok(Extension(state): Extension<State>) -> ServerResult<impl IntoResponse> {
        Ok(match *state.lock() {
            Health::Good => StatusCode::OK,
            Health::Bad => StatusCode::INTERNAL_SERVER_ERROR,
        })
    }

    fn coordinator(ctx: &GardenContext) -> ApiResult<ReservationCoordinator> {
        ctx.coordinator().ok_or(ApiError::NoSession)
    }

    fn snapshot(ctx: &GardenContext) -> StateResponse {
        StateResponse {
            ready: ctx.is_ready(),
            connectivity: ctx.connectivity().get(),
            party: ctx.party(),
            notifications_enabled: ctx.notifications().is_enabled(),
            reservation: ctx.view(),
        }
    }

    pub(crate) async fn state(
        Extension(ctx): Extension<Arc<GardenContext>>,
    ) -> Json<StateResponse> {
        Json(snapshot(&ctx))
    }

    pub(crate) async fn select_party(
        Extension(ctx): Extension<Arc<GardenContext>>,
        Json(req): Json<PartyRequest>,
    ) -> ApiResult<Json<StateResponse>> {
        ctx.select_party(req.party.as_deref()).await?;
        Ok(Json(snapshot(&ctx)))
    }

    pub(crate) async fn claim(
        Extension(ctx): Extension<Arc<GardenContext>>,
    ) -> ApiResult<Json<StateResponse>> {
        coordinator(&ctx)?.claim().await?;
        Ok(Json(snapshot(&ctx)))
    }

    pub(crate) async fn release(
        Extension(ctx): Extension<Arc<GardenContext>>,
    ) -> ApiResult<Json<ReleaseResponse>> {
        let released = coordinator(&ctx)?.release().await?;
        if !released {
            debug!("release was a no-op");
        }
        Ok(Json(ReleaseResponse {
            released,
            state: snapshot(&ctx),
        }))
    }

    pub(crate) async fn seed(
        Extension(ctx): Extension<Arc<GardenContext>>,
    ) -> ApiResult<Json<StateResponse>> {
        coordinator(&ctx)?.seed().await?;
        Ok(Json(snapshot(&ctx)))
    }

    pub(crate) async fn enable_notifications(
        Extension(ctx): Extension<Arc<GardenContext>>,
    ) -> ApiResult<Json<NotificationsResponse>> {
        let enabled = ctx.notifications().enable().await?;
        Ok(Json(NotificationsResponse { enabled }))
    }

    pub(crate) async fn disable_notifications(
        Extension(ctx): Extension<Arc<GardenContext>>,
    ) -> ApiResult<Json<NotificationsResponse>> {
        ctx.notifications().disable().await?;
        Ok(Json(NotificationsResponse { enabled: false }))
    }

    pub(crate) async fn metrics() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = ProtobufEncoder::new();
        let mut buf = Vec::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error protobuf encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())?)
            }
            Ok(_) => Ok(resp.status(StatusCode::OK).body(Body::from(buf))?),
        }
    }

    pub(crate) async fn metrics_text() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = TextEncoder::new();
        let mut buf = String::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode_utf8(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error text encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())?)
            }
            Ok(_) => Ok(resp.status(StatusCode::OK).body(Body::from(buf))?),
        }
    }

    pub(crate) async fn ping() -> impl IntoResponse {
        StatusCode::OK
    }
}

/// Various models for API responses
pub mod models {
    use axum::{Json, http::StatusCode, response::IntoResponse};
    use garden_core::{
        SessionError,
        garden_coordination::{ConnectivityStatus, PartyId, Rejection, ReservationView},
        notifications::NotificationError,
    };
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::{fmt, sync::Arc};

    /// The overall health of the system
    pub type State = Arc<Mutex<Health>>;
    /// Health is binary Good/Bad at the moment
    #[derive(Serialize, Deserialize, Debug, PartialEq, Copy, Clone, Eq)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Health {
        /// Report good health
        Good,
        /// Report bad health
        Bad,
    }

    impl fmt::Display for Health {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}",
                match *self {
                    Health::Good => "GOOD",
                    Health::Bad => "BAD",
                }
            )
        }
    }

    pub(crate) fn blank_health() -> State {
        Arc::new(Mutex::new(Health::Bad))
    }

    /// Body of `GET /state` and of successful control calls
    #[derive(Serialize, Debug, Clone)]
    pub struct StateResponse {
        /// the store has answered a health probe
        pub ready: bool,
        /// current connectivity
        pub connectivity: ConnectivityStatus,
        /// selected party, if a session is running
        pub party: Option<PartyId>,
        /// push notifications enabled
        pub notifications_enabled: bool,
        /// reservation snapshot, if a session is running
        pub reservation: Option<ReservationView>,
    }

    /// Body of `POST /release`
    #[derive(Serialize, Debug, Clone)]
    pub struct ReleaseResponse {
        /// false when there was nothing to release
        pub released: bool,
        /// state after the call
        #[serde(flatten)]
        pub state: StateResponse,
    }

    /// Body of `POST /party`
    #[derive(Deserialize, Debug, Clone)]
    pub struct PartyRequest {
        /// party name, `null` clears the selection
        pub party: Option<String>,
    }

    /// Body of notification toggles
    #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NotificationsResponse {
        /// flag after the call
        pub enabled: bool,
    }

    #[derive(Serialize)]
    struct ErrorBody {
        error: String,
    }

    /// Failures of the control endpoints
    #[derive(Debug)]
    pub enum ApiError {
        /// no party selected, or the store is not reachable yet
        NoSession,
        /// the coordinator refused the request
        Rejected(Rejection),
        /// party selection failed
        Session(SessionError),
        /// notification lifecycle failed
        Notifications(NotificationError),
    }

    /// return api result
    pub type ApiResult<T> = Result<T, ApiError>;

    impl From<Rejection> for ApiError {
        fn from(err: Rejection) -> Self {
            ApiError::Rejected(err)
        }
    }

    impl From<SessionError> for ApiError {
        fn from(err: SessionError) -> Self {
            ApiError::Session(err)
        }
    }

    impl From<NotificationError> for ApiError {
        fn from(err: NotificationError) -> Self {
            ApiError::Notifications(err)
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> axum::response::Response {
            let (status, error) = match self {
                ApiError::NoSession => (
                    StatusCode::CONFLICT,
                    "no party session running".to_owned(),
                ),
                ApiError::Rejected(err) => (StatusCode::CONFLICT, err.to_string()),
                ApiError::Session(err @ SessionError::UnknownParty(_)) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                ApiError::Session(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
                ApiError::Notifications(err) if err.is_remote() => {
                    (StatusCode::BAD_GATEWAY, err.to_string())
                }
                ApiError::Notifications(err) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                }
            };
            (status, Json(ErrorBody { error })).into_response()
        }
    }

    // error type
    /// Make our own error that wraps `anyhow::Error`.
    #[derive(Debug)]
    pub struct ServerError(anyhow::Error);
    /// return error result
    pub type ServerResult<T> = Result<T, ServerError>;

    impl IntoResponse for ServerError {
        fn into_response(self) -> axum::response::Response {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}", self.0),
            )
                .into_response()
        }
    }

    impl<E> From<E> for ServerError
    where
        E: Into<anyhow::Error>,
    {
        fn from(err: E) -> Self {
            Self(err.into())
        }
    }
}
