use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use common::{
    storage::types::integrated_object::{IntegratedObject, ObjectType},
    vector::{DocType, VectorPoint},
};
use ingestion_pipeline::{signals, IngestJobConfig, IngestionEngine};

use crate::{api_state::ApiState, error::ApiError, tenant::TenantContext};

/// Synchronous ingestion refuses anything larger than this; the job path
/// has no limit.
const SYNC_MAX_TICKETS: u64 = 100;

/// `POST /ingest` — small synchronous collection, awaited in-request.
pub async fn ingest_sync(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Json(config): Json<IngestJobConfig>,
) -> Result<Json<Value>, ApiError> {
    if config.max_tickets.is_none_or(|max| max > SYNC_MAX_TICKETS) {
        return Err(ApiError::ValidationError(format!(
            "synchronous ingest is limited to max_tickets <= {SYNC_MAX_TICKETS}; \
             use POST /ingest/jobs for larger collections"
        )));
    }

    let adapter = state.adapter_for(&ctx).ok_or_else(|| {
        ApiError::ValidationError("no upstream credentials for this tenant".to_string())
    })?;
    let store = state.stores.for_tenant(&ctx.tenant_id).await?;

    let engine = IngestionEngine::new(
        adapter,
        store,
        Arc::clone(&state.vector),
        Arc::clone(&state.router),
        Arc::clone(&state.summarizer),
        Arc::clone(&state.config),
    );

    let (_controls, job_signals) = signals::channel();
    let job_id = format!("sync-{}", Utc::now().format("%Y%m%d%H%M%S"));
    let report = engine
        .run(
            &job_id,
            &ctx.tenant_id,
            &ctx.platform,
            &config,
            job_signals,
            Arc::new(|_, _, _, _| {}),
        )
        .await?;

    Ok(Json(json!({ "status": "completed", "report": report })))
}

/// `POST /ingest/sync-summaries` — re-embed stored summaries into the
/// vector collection.
pub async fn sync_summaries(
    State(state): State<ApiState>,
    ctx: TenantContext,
) -> Result<Json<Value>, ApiError> {
    let store = state.stores.for_tenant(&ctx.tenant_id).await?;

    let mut points = Vec::new();
    for (object_type, doc_type) in [
        (ObjectType::Ticket, DocType::Ticket),
        (ObjectType::Article, DocType::Article),
    ] {
        let objects =
            IntegratedObject::get_by_type(&store, &ctx.tenant_id, &ctx.platform, object_type)
                .await?;
        for object in objects {
            let Some(summary) = object.summary.clone() else {
                continue;
            };
            let embedding = state.router.embed(&summary).await?;
            points.push(VectorPoint {
                tenant_id: object.tenant_id,
                platform: object.platform,
                doc_type,
                original_id: object.original_id,
                object_type: object_type.to_string(),
                summary: Some(summary),
                tenant_metadata: json!({
                    "status": object.metadata.status,
                    "priority": object.metadata.priority,
                }),
                embedding,
            });
        }
    }

    let synced = state.vector.upsert(points).await?;
    info!(tenant_id = %ctx.tenant_id, synced, "summaries re-embedded");
    Ok(Json(json!({ "status": "completed", "synced": synced })))
}

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub confirm_token: String,
    #[serde(default)]
    pub hard: bool,
    #[serde(default)]
    pub create_backup: bool,
}

/// `POST /ingest/security/purge-data` — tenant purge gated by the one-day
/// token `DELETE_{tenant}_{platform}_{YYYYMMDD}`.
pub async fn purge_data(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Json(request): Json<PurgeRequest>,
) -> Result<Json<Value>, ApiError> {
    let expected = format!(
        "DELETE_{}_{}_{}",
        ctx.tenant_id,
        ctx.platform,
        Utc::now().format("%Y%m%d")
    );
    if request.confirm_token != expected {
        return Err(ApiError::Forbidden(
            "invalid or expired purge token".to_string(),
        ));
    }

    let backup_path = if request.create_backup {
        Some(state.vector.backup().await?)
    } else {
        None
    };

    let store = state.stores.for_tenant(&ctx.tenant_id).await?;
    IntegratedObject::clear(&store, &ctx.tenant_id, Some(&ctx.platform), request.hard).await?;
    state.vector.purge(&ctx.tenant_id, &ctx.platform).await?;

    info!(
        tenant_id = %ctx.tenant_id,
        hard = request.hard,
        "tenant data purged"
    );
    Ok(Json(json!({
        "status": "completed",
        "hard": request.hard,
        "backup": backup_path.map(|p| p.display().to_string()),
    })))
}
