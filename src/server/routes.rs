//! Agent CRUD routes.

use crate::agents::{AgentPatch, AgentProfile, NewAgent};
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

/// Routes mounted under `/api/agents`.
pub fn agent_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_agents).post(create_agent))
        .route(
            "/{id}",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .route("/{id}/conversation", post(record_conversation))
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentProfile>> {
    Json(state.agents.list())
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentProfile>, StatusCode> {
    state.agents.profile(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn create_agent(
    State(state): State<AppState>,
    Json(new): Json<NewAgent>,
) -> Json<AgentProfile> {
    Json(state.agents.insert(new))
}

async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<AgentPatch>,
) -> Result<Json<AgentProfile>, StatusCode> {
    state
        .agents
        .update(&id, patch)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if state.agents.delete(&id) {
        Ok(Json(serde_json::json!({ "message": "Agent deleted successfully" })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

#[derive(Debug, Deserialize)]
struct ConversationStats {
    duration_seconds: f64,
}

async fn record_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(stats): Query<ConversationStats>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .agents
        .record_conversation(&id, stats.duration_seconds)
        .map(|_| Json(serde_json::json!({ "message": "Stats updated successfully" })))
        .ok_or(StatusCode::NOT_FOUND)
}
