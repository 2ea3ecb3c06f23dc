use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::{sse::Event, IntoResponse, Sse},
    Json,
};
use futures::StreamExt;
use serde::Deserialize;

use retrieval_pipeline::init::{event_json, init, init_stream};

use crate::{api_state::ApiState, error::ApiError, tenant::TenantContext};

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize)]
pub struct InitParams {
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// `GET /init/{ticket_id}` — the ticket-opening flow; SSE when `stream=true`.
pub async fn init_ticket(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Path(ticket_id): Path<String>,
    Query(params): Query<InitParams>,
) -> Result<axum::response::Response, ApiError> {
    let deps = state.retrieval_deps(&ctx.tenant_id).await?;
    let adapter = state.adapter_for(&ctx);

    if params.stream {
        let stream = init_stream(
            deps,
            state.contexts.clone(),
            adapter,
            ctx.tenant_id,
            ctx.platform,
            ticket_id,
            params.top_k,
        )
        .map(|event| {
            Ok::<_, Infallible>(Event::default().data(event_json(&event).to_string()))
        });
        return Ok(Sse::new(stream).into_response());
    }

    let result = init(
        &deps,
        &state.contexts,
        adapter.as_ref(),
        &ctx.tenant_id,
        &ctx.platform,
        &ticket_id,
        params.top_k,
    )
    .await?;
    Ok(Json(result).into_response())
}
