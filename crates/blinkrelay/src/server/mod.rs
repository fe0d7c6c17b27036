//! HTTP, WebSocket and SSE surface of the relay.

pub mod error;
pub mod handlers;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use error::ApiError;

use crate::dispatch::IntentDispatcher;
use crate::gateway::PresenceGateway;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Device-facing gateway.
    pub gateway: Arc<PresenceGateway>,
    /// Target of the dispatch proxy endpoint.
    pub dispatcher: Arc<dyn IntentDispatcher>,
    /// Interval between SSE keep-alive comments.
    pub sse_keepalive: Duration,
}

/// Build the router.
///
/// An empty `allowed_origins` list allows every origin.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/heartbeat", post(handlers::heartbeat))
        .route("/api/blink", post(handlers::blink))
        .route("/api/light", post(handlers::light))
        .route("/api/light-state", post(handlers::light_state))
        .route("/api/dispatch", post(handlers::dispatch))
        .route("/api/devices", get(handlers::devices))
        .route("/ws", get(stream::websocket))
        .route("/sse", get(stream::sse))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
