// Module: http
// WebSocket viewer endpoint and health probe

pub mod health;
pub mod websocket;

use std::sync::Arc;

use axum::{routing::get, Router};
use morphcast_core::Config;
use morphcast_sfu::SessionRegistry;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::impls::SessionHandler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub handler: SessionHandler,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(websocket::websocket_handler))
        .merge(health::create_health_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
