use axum::{extract::State, Json};
use serde::Deserialize;

use retrieval_pipeline::query::{query, Intent, QueryResult};

use crate::{api_state::ApiState, error::ApiError, tenant::TenantContext};

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Accepted for API compatibility; answers are returned in one piece.
    #[serde(default)]
    pub stream_response: bool,
}

/// `POST /query` — natural-language retrieval with an LLM answer.
pub async fn run_query(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    let deps = state.retrieval_deps(&ctx.tenant_id).await?;
    let result = query(
        &deps,
        &ctx.tenant_id,
        &ctx.platform,
        &request.query,
        request.intent,
        request.top_k,
    )
    .await?;
    Ok(Json(result))
}
