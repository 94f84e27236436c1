//! HTTP and WebSocket surface.
//!
//! - `GET  /mqtt`                   WebSocket; text frames are control messages
//! - `GET  /mqtt/enabled`           whether the feed is accepting writes
//! - `POST /api/v2/write`           line-protocol body forwarded to the feed
//! - `GET  /mqtt/settings`          current simulator settings
//! - `POST /mqtt/settings`          replace simulator settings
//! - `GET  /mqtt/settings/defaults` simulator defaults
//! - `GET  /health`                 broker statistics

pub mod ws;

use crate::broker::{Broker, BrokerStats};
use crate::core::{PulseError, Result, ServerConfig};
use crate::simulator::{Simulator, SimulatorSettings};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Largest accepted write body
pub const WRITE_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub feed: mpsc::Sender<Bytes>,
    pub simulator: Option<Arc<Simulator>>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    broker: BrokerStats,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: status.as_u16(),
        }),
    )
        .into_response()
}

/// Build the router over `state`.
pub fn router(state: AppState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/mqtt", get(ws::ws_handler))
        .route("/mqtt/enabled", get(enabled_handler))
        .merge(write_routes())
        .route("/mqtt/settings", get(settings_handler).post(update_settings_handler))
        .route("/mqtt/settings/defaults", get(default_settings_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app = app.layer(ServiceBuilder::new().layer(CorsLayer::permissive()));
    }
    app
}

/// Line-protocol write endpoints, accepting bodies up to [`WRITE_BODY_LIMIT`].
fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v2/write", post(write_handler))
        .route("/mqtt/api/v2/write", post(write_handler))
        .layer(DefaultBodyLimit::max(WRITE_BODY_LIMIT))
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(config: &ServerConfig, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::new(config.bind_address, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| PulseError::network(format!("failed to bind to {addr}: {e}")))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, router(state, config.enable_cors))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| PulseError::network(format!("server error: {e}")))?;

    info!("server stopped");
    Ok(())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        broker: state.broker.stats(),
    })
}

/// GET /mqtt/enabled
async fn enabled_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(!state.feed.is_closed())
}

/// POST /api/v2/write
async fn write_handler(State(state): State<AppState>, body: Bytes) -> Response {
    debug!(bytes = body.len(), "write request");
    match state.feed.send(body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => {
            warn!("write rejected, feed closed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "feed is not accepting data")
        },
    }
}

/// GET /mqtt/settings
async fn settings_handler(State(state): State<AppState>) -> Response {
    match &state.simulator {
        Some(simulator) => Json(simulator.settings()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "simulator is disabled"),
    }
}

/// GET /mqtt/settings/defaults
async fn default_settings_handler(State(state): State<AppState>) -> Response {
    match &state.simulator {
        Some(simulator) => Json(simulator.defaults().clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "simulator is disabled"),
    }
}

/// POST /mqtt/settings, body is settings JSON regardless of content type
async fn update_settings_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(simulator) = &state.simulator else {
        return error_response(StatusCode::NOT_FOUND, "simulator is disabled");
    };

    let settings: SimulatorSettings = match serde_json::from_slice(&body) {
        Ok(settings) => settings,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid settings: {e}")),
    };

    match simulator.update_settings(settings) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BrokerConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app_state(simulator: bool) -> (AppState, mpsc::Receiver<Bytes>) {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        let (feed, receiver) = broker.feed_channel();
        let simulator = simulator.then(|| Arc::new(Simulator::new(SimulatorSettings::default())));
        (
            AppState {
                broker,
                feed,
                simulator,
            },
            receiver,
        )
    }

    #[tokio::test]
    async fn test_write_forwards_to_feed() {
        let (state, mut receiver) = app_state(false);
        let response = write_handler(State(state), Bytes::from_static(b"m f=1\n")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(receiver.recv().await.as_deref(), Some(&b"m f=1\n"[..]));
    }

    #[tokio::test]
    async fn test_write_to_closed_feed() {
        let (state, receiver) = app_state(false);
        drop(receiver);
        let response = write_handler(State(state), Bytes::from_static(b"m f=1\n")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_settings_routes() {
        let (state, _receiver) = app_state(true);
        let response = settings_handler(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = Bytes::from_static(br#"{"running":false,"sendInterval":500}"#);
        let response = update_settings_handler(State(state.clone()), body).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let simulator = state.simulator.as_ref().unwrap();
        assert!(!simulator.settings().running);
        assert_eq!(simulator.settings().send_interval, 500);

        let response = update_settings_handler(State(state.clone()), Bytes::from_static(b"{")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (disabled, _receiver) = app_state(false);
        let response = default_settings_handler(State(disabled)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn write_request(uri: &str, len: usize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(vec![b'\n'; len]))
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_accepts_large_bodies() {
        let (state, mut receiver) = app_state(false);
        let app = router(state, false);

        let len = 3 * 1024 * 1024;
        let response = app.clone().oneshot(write_request("/api/v2/write", len)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(receiver.recv().await.map(|body| body.len()), Some(len));

        let response = app
            .oneshot(write_request("/mqtt/api/v2/write", WRITE_BODY_LIMIT + 1))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
