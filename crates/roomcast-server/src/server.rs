//! `RoomcastServer`: Axum HTTP + `WebSocket` gateway around the hub reactor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use roomcast_core::{ConnectionMeta, Hub, HubStats};
use roomcast_settings::{HubSettings, ServerSettings};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::reactor::{HubInput, Reactor};
use crate::session::run_ws_session;
use crate::shutdown::Shutdown;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Input channel of the hub reactor.
    pub inputs: mpsc::Sender<HubInput>,
    /// Latest hub counters.
    pub stats: watch::Receiver<HubStats>,
    /// Gateway stop signal.
    pub shutdown: Arc<Shutdown>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Per-socket outbound queue capacity.
    pub send_queue: usize,
    /// Max inbound message size in bytes.
    pub max_message_size: usize,
}

/// The roomcast gateway, ready to listen.
pub struct RoomcastServer {
    config: ServerSettings,
    keepalive: Duration,
    hub: Hub,
    shutdown: Arc<Shutdown>,
    metrics: Option<PrometheusHandle>,
}

impl RoomcastServer {
    /// Create a server that will drive `hub`.
    pub fn new(settings: &HubSettings, hub: Hub) -> Self {
        Self {
            config: settings.server.clone(),
            keepalive: settings.liveness.interval(),
            hub,
            shutdown: Arc::new(Shutdown::new()),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Listener settings.
    pub fn config(&self) -> &ServerSettings {
        &self.config
    }

    /// Gateway stop signal.
    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    /// Bind, start the reactor and the HTTP server, and return immediately.
    pub async fn listen(self) -> Result<ServerHandle, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (reactor, inputs, stats) = Reactor::new(self.hub, self.keepalive, self.shutdown.token());
        let reactor_task = tokio::spawn(reactor.run());

        let state = AppState {
            inputs,
            stats,
            shutdown: Arc::clone(&self.shutdown),
            start_time: Instant::now(),
            metrics: self.metrics,
            send_queue: self.config.send_queue,
            max_message_size: self.config.max_message_size,
        };
        let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

        let token = self.shutdown.token();
        let server_task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(err) = served {
                tracing::error!(error = %err, "http server failed");
            }
        });

        info!(addr = %local_addr, "roomcast listening");
        Ok(ServerHandle {
            addr: local_addr,
            shutdown: self.shutdown,
            tasks: vec![reactor_task, server_task],
        })
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<Shutdown>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Gateway stop signal.
    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    /// Stop accepting, close every connection and wait for the reactor and
    /// listener tasks.
    pub async fn stop(self) {
        let _ = self.shutdown.drain(self.tasks).await;
    }
}

/// Build the Axum router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_draining() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let meta = ConnectionMeta::from_headers(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        Some(peer),
    );
    let cancel = state.shutdown.session_token();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, meta, state.inputs, state.send_queue, cancel)
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = *state.stats.borrow();
    Json(health::health_check(
        state.start_time,
        stats,
        state.shutdown.is_draining(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn state(metrics: Option<PrometheusHandle>) -> (AppState, mpsc::Receiver<HubInput>) {
        let (inputs, rx) = mpsc::channel(8);
        let (_tx, stats) = watch::channel(HubStats {
            connections: 3,
            groups: 2,
            pending_deliveries: 0,
        });
        let state = AppState {
            inputs,
            stats,
            shutdown: Arc::new(Shutdown::new()),
            start_time: Instant::now(),
            metrics,
            send_queue: 8,
            max_message_size: 1024,
        };
        (state, rx)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_reports_stats() {
        let (state, _rx) = state(None);
        let (status, body) = get_json(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 3);
        assert_eq!(body["groups"], 2);
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_draining() {
        let (state, _rx) = state(None);
        state.shutdown.begin();
        let (_, body) = get_json(router(state), "/health").await;
        assert_eq!(body["status"], "draining");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let (state, _rx) = state(None);
        let (status, _) = get_json(router(state), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_is_text() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let (state, _rx) = state(Some(handle));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (state, _rx) = state(None);
        let (status, _) = get_json(router(state), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn server_exposes_config() {
        let mut settings = HubSettings::default();
        settings.server.port = 0;
        let server = RoomcastServer::new(&settings, Hub::new(&settings));
        assert_eq!(server.config().port, 0);
        assert!(!server.shutdown().is_draining());
    }

    #[tokio::test]
    async fn listen_binds_and_stops() {
        let mut settings = HubSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        let handle = RoomcastServer::new(&settings, Hub::new(&settings))
            .listen()
            .await
            .unwrap();
        assert_ne!(handle.addr().port(), 0);
        handle.stop().await;
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut settings = HubSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = taken.local_addr().unwrap().port();
        let result = RoomcastServer::new(&settings, Hub::new(&settings))
            .listen()
            .await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
