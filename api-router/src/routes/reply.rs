use axum::{extract::State, Json};
use serde::Deserialize;

use retrieval_pipeline::reply::{reply, ReplyResult};

use crate::{api_state::ApiState, error::ApiError, tenant::TenantContext};

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub context_id: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// `POST /reply` — customer reply grounded in a prior `/init` context.
pub async fn generate_reply(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Json(request): Json<ReplyRequest>,
) -> Result<Json<ReplyResult>, ApiError> {
    let deps = state.retrieval_deps(&ctx.tenant_id).await?;
    let result = reply(
        &deps,
        &state.contexts,
        &ctx.tenant_id,
        &request.context_id,
        request.instructions.as_deref(),
    )
    .await?;
    Ok(Json(result))
}
