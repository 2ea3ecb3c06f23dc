use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::api_state::ApiState;

/// `GET /health` — liveness plus a cheap dependency probe.
pub async fn health(State(state): State<ApiState>) -> Json<Value> {
    let vector_ok = state.vector.count(None, None).await.is_ok();
    Json(json!({
        "status": if vector_ok { "ok" } else { "degraded" },
        "vector_store": vector_ok,
        "collection": state.vector.collection(),
    }))
}

/// `GET /metrics` — job counts and per-provider LLM stats, as JSON.
pub async fn metrics(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "jobs": state.jobs.metrics(None),
        "providers": state.router.metrics(),
    }))
}
