use api_state::ApiState;
use axum::{
    routing::{get, post},
    Router,
};
use routes::{
    health::{health, metrics},
    ingest::{ingest_sync, purge_data, sync_summaries},
    init::init_ticket,
    jobs::{control_job, create_job, get_job, job_progress, list_jobs},
    query::run_query,
    reply::generate_reply,
};

pub mod api_state;
pub mod error;
pub mod tenant;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1(state: ApiState) -> Router {
    // Diagnostic endpoints skip tenant-header extraction
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/init/{ticket_id}", get(init_ticket))
        .route("/query", post(run_query))
        .route("/reply", post(generate_reply))
        .route("/ingest", post(ingest_sync))
        .route("/ingest/jobs", post(create_job).get(list_jobs))
        .route("/ingest/jobs/{job_id}", get(get_job))
        .route("/ingest/jobs/{job_id}/control", post(control_job))
        .route("/ingest/progress/{job_id}", get(job_progress))
        .route("/ingest/sync-summaries", post(sync_summaries))
        .route("/ingest/security/purge-data", post(purge_data))
        .with_state(state)
}
