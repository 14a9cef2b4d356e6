//! HTTP/WebSocket surface: voice sessions, agent CRUD, audio artifacts.

pub mod routes;
pub mod ws;

use crate::agents::InMemoryAgentRegistry;
use crate::config::VoiceConfig;
use crate::pipeline::SessionDeps;
use axum::http::HeaderValue;
use axum::routing::{any, get};
use axum::{Json, Router};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Everything a new session needs.
    pub deps: SessionDeps,
    /// Concrete registry for the CRUD routes (sessions see it through
    /// the `AgentRegistry` trait inside `deps`).
    pub agents: Arc<InMemoryAgentRegistry>,
}

/// Build the application router.
pub fn router(state: AppState, audio_dir: &Path) -> Router {
    let cors = cors_layer(&state.deps.config);

    Router::new()
        .route("/", get(root))
        .route("/ws", any(ws::websocket_handler))
        .nest("/api/agents", routes::agent_routes())
        .nest_service("/audio", ServeDir::new(audio_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &VoiceConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Voice dialogue server" }))
}
