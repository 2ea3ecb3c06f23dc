use std::sync::Arc;
use std::time::Duration;

use api_router::{api_routes_v1, api_state::ApiState};
use common::utils::config::get_config;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = Arc::new(get_config()?);
    let http_port = config.http_port;

    // Assemble application state (stores, vector collection, LLM router,
    // job manager) once; everything downstream borrows from here.
    let state = ApiState::new(config).await?;

    // Terminal jobs older than the retention window get swept hourly
    state.jobs.spawn_sweeper(Duration::from_secs(3_600));

    let app = api_routes_v1(state);

    let serve_address = format!("0.0.0.0:{http_port}");
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
        Router,
    };
    use common::storage::types::integrated_object::{
        IntegratedObject, ObjectMetadata, ObjectType,
    };
    use common::utils::config::{AppConfig, StoreBackend};
    use common::vector::{DocType, VectorPoint};
    use http_body_util::BodyExt;
    use ingestion_pipeline::manager::AdapterFactory;
    use llm_router::selection::ProviderWeights;
    use llm_router::task::TaskProfiles;
    use llm_router::testing::{hashed_embedding, ScriptedProvider};
    use llm_router::LlmRouter;
    use platform_adapter::static_adapter::StaticAdapter;
    use platform_adapter::types::NeutralTicket;
    use platform_adapter::PlatformAdapter;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tower::ServiceExt;
    use uuid::Uuid;

    const DIM: u32 = 8;

    fn test_config() -> Arc<AppConfig> {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.store_backend = StoreBackend::Central;
        config.surrealdb_address = Some("mem://".to_string());
        config.vector_address = Some("mem://".to_string());
        config.surrealdb_namespace = format!("test_{}", Uuid::new_v4().simple());
        config.embedding_dimensions = DIM;
        config.request_delay_ms = 0;
        config.data_dir = tempdir.path().to_string_lossy().into_owned();
        config.backup_dir = tempdir
            .path()
            .join("backups")
            .to_string_lossy()
            .into_owned();
        std::mem::forget(tempdir);
        Arc::new(config)
    }

    fn scripted_router() -> Arc<LlmRouter> {
        let provider = Arc::new(ScriptedProvider::always_ok("mock"));
        let mut weights = HashMap::new();
        weights.insert("mock".to_string(), ProviderWeights::default());
        Arc::new(LlmRouter::new(
            vec![provider],
            weights,
            TaskProfiles::new("light", "heavy", Duration::from_secs(5)),
            "embedding-model",
            DIM,
            100,
            Duration::from_secs(3600),
            Duration::from_secs(5),
        ))
    }

    fn recent_ticket(id: &str, subject: &str) -> NeutralTicket {
        NeutralTicket::from_upstream(json!({
            "id": id.parse::<i64>().unwrap_or(0),
            "subject": subject,
            "description": format!("details of {subject}"),
            "status": 2,
            "priority": 2,
            "created_at": (chrono::Utc::now() - chrono::Duration::hours(48)).to_rfc3339(),
            "updated_at": (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339(),
        }))
    }

    fn job_adapter_factory(delay_ms: u64) -> AdapterFactory {
        Arc::new(move |_platform, _config| {
            let mut adapter = StaticAdapter::with_tickets(vec![
                recent_ticket("1001", "printer offline"),
                recent_ticket("1002", "cannot sign in"),
            ]);
            adapter.delay_ms = delay_ms;
            Ok(Arc::new(adapter) as Arc<dyn PlatformAdapter>)
        })
    }

    async fn build_test_app(job_delay_ms: u64) -> (Router, ApiState) {
        let state = ApiState::with_parts(
            test_config(),
            scripted_router(),
            Some(Arc::new(|_ctx: &api_router::tenant::TenantContext| None)),
            Some(job_adapter_factory(job_delay_ms)),
        )
        .await
        .expect("api state");
        (api_routes_v1(state.clone()), state)
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Tenant-ID", "acme")
            .header("X-Platform", "freshdesk")
            .header("X-Domain", "acme.help.example")
            .header("X-API-Key", "k1");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        builder
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .expect("request")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn job_body() -> Value {
        json!({
            "incremental": true,
            "include_kb": false,
            "batch_size": 50,
            "start_date": (chrono::Utc::now() - chrono::Duration::days(3))
                .format("%Y-%m-%d")
                .to_string(),
        })
    }

    async fn wait_for_job_status(app: &Router, job_id: &str, wanted: &str) -> Value {
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(request("GET", &format!("/ingest/jobs/{job_id}"), None))
                .await
                .expect("status response");
            if response.status() == StatusCode::OK {
                let body = json_body(response).await;
                if body["status"] == wanted {
                    return body;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached {wanted}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn health_and_metrics_respond() {
        let (app, _state) = build_test_app(0).await;

        let health = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("req"))
            .await
            .expect("health");
        assert_eq!(health.status(), StatusCode::OK);

        let metrics = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).expect("req"))
            .await
            .expect("metrics");
        assert_eq!(metrics.status(), StatusCode::OK);
        let body = json_body(metrics).await;
        assert!(body["providers"].is_array());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_tenant_headers_are_rejected() {
        let (app, _state) = build_test_app(0).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ingest/jobs")
                    .body(Body::empty())
                    .expect("req"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn job_lifecycle_over_http() {
        let (app, _state) = build_test_app(300).await;

        let created = app
            .clone()
            .oneshot(request("POST", "/ingest/jobs", Some(job_body())))
            .await
            .expect("create");
        assert_eq!(created.status(), StatusCode::OK);
        let created = json_body(created).await;
        assert_eq!(created["status"], "running");
        assert_eq!(created["can_pause"], true);
        let job_id = created["job_id"].as_str().expect("job id").to_string();

        let paused = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/ingest/jobs/{job_id}/control"),
                Some(json!({"action": "pause"})),
            ))
            .await
            .expect("pause");
        assert_eq!(paused.status(), StatusCode::OK);
        assert_eq!(json_body(paused).await["status"], "paused");

        let resumed = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/ingest/jobs/{job_id}/control"),
                Some(json!({"action": "resume"})),
            ))
            .await
            .expect("resume");
        assert_eq!(json_body(resumed).await["status"], "running");

        let cancelled = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/ingest/jobs/{job_id}/control"),
                Some(json!({"action": "cancel"})),
            ))
            .await
            .expect("cancel");
        assert_eq!(json_body(cancelled).await["status"], "cancelled");
        wait_for_job_status(&app, &job_id, "cancelled").await;

        let invalid = app
            .oneshot(request(
                "POST",
                &format!("/ingest/jobs/{job_id}/control"),
                Some(json!({"action": "restart"})),
            ))
            .await
            .expect("invalid action");
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fast_recreate_is_blocked_without_force_rebuild() {
        let (app, _state) = build_test_app(0).await;

        let first = app
            .clone()
            .oneshot(request("POST", "/ingest/jobs", Some(job_body())))
            .await
            .expect("first job");
        assert_eq!(first.status(), StatusCode::OK);
        let job_id = json_body(first).await["job_id"]
            .as_str()
            .expect("job id")
            .to_string();
        wait_for_job_status(&app, &job_id, "completed").await;

        let second = app
            .clone()
            .oneshot(request("POST", "/ingest/jobs", Some(job_body())))
            .await
            .expect("second job");
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        let body = json_body(second).await;
        assert!(body["error"]
            .as_str()
            .expect("error message")
            .contains("recent completion"));

        let mut forced = job_body();
        forced["force_rebuild"] = json!(true);
        let third = app
            .oneshot(request("POST", "/ingest/jobs", Some(forced)))
            .await
            .expect("forced job");
        assert_eq!(third.status(), StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn job_access_is_tenant_scoped() {
        let (app, _state) = build_test_app(300).await;

        let created = app
            .clone()
            .oneshot(request("POST", "/ingest/jobs", Some(job_body())))
            .await
            .expect("create");
        let job_id = json_body(created).await["job_id"]
            .as_str()
            .expect("job id")
            .to_string();

        let other_tenant = Request::builder()
            .method("GET")
            .uri(format!("/ingest/jobs/{job_id}"))
            .header("X-Tenant-ID", "globex")
            .header("X-Domain", "globex.help.example")
            .header("X-API-Key", "k2")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(other_tenant).await.expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sync_ingest_refuses_oversize_requests() {
        let (app, _state) = build_test_app(0).await;

        let response = app
            .oneshot(request(
                "POST",
                "/ingest",
                Some(json!({"max_tickets": 500})),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"]
            .as_str()
            .expect("error")
            .contains("/ingest/jobs"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn init_uses_stored_ticket_when_upstream_is_missing() {
        let (app, state) = build_test_app(0).await;

        // Seed the tenant store and the vector collection directly
        let store = state.stores.for_tenant("acme").await.expect("store");
        IntegratedObject::new(
            "acme".to_string(),
            "freshdesk".to_string(),
            ObjectType::Ticket,
            "999999".to_string(),
            json!({"id": "999999", "subject": "stored subject", "description": "stored body"}),
            "subject: stored subject".to_string(),
            ObjectMetadata {
                status: Some("open".to_string()),
                ..ObjectMetadata::default()
            },
        )
        .upsert(&store)
        .await
        .expect("seed ticket");

        for (id, doc_type, text) in [
            ("999999", DocType::Ticket, "stored subject"),
            ("1002", DocType::Ticket, "another printer issue"),
            ("kb-1", DocType::Article, "printer reset steps"),
        ] {
            state
                .vector
                .upsert(vec![VectorPoint {
                    tenant_id: "acme".to_string(),
                    platform: "freshdesk".to_string(),
                    doc_type,
                    original_id: id.to_string(),
                    object_type: doc_type.as_str().to_string(),
                    summary: Some(text.to_string()),
                    tenant_metadata: json!({}),
                    embedding: hashed_embedding(text, DIM as usize),
                }])
                .await
                .expect("seed vector");
        }

        let response = app
            .clone()
            .oneshot(request("GET", "/init/999999?stream=false", None))
            .await
            .expect("init response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        assert_eq!(body["ticket_data"]["subject"], "stored subject");
        let similar = body["similar_tickets"].as_array().expect("similar");
        assert!(similar
            .iter()
            .all(|doc| doc["original_id"] != "999999"));

        // The returned context id works for /reply
        let context_id = body["context_id"].as_str().expect("context id");
        let reply = app
            .clone()
            .oneshot(request(
                "POST",
                "/reply",
                Some(json!({"context_id": context_id})),
            ))
            .await
            .expect("reply");
        assert_eq!(reply.status(), StatusCode::OK);

        let missing_context = app
            .oneshot(request(
                "POST",
                "/reply",
                Some(json!({"context_id": "does-not-exist"})),
            ))
            .await
            .expect("missing context");
        assert_eq!(missing_context.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn query_answers_with_citations() {
        let (app, state) = build_test_app(0).await;

        state
            .vector
            .upsert(vec![VectorPoint {
                tenant_id: "acme".to_string(),
                platform: "freshdesk".to_string(),
                doc_type: DocType::Ticket,
                original_id: "1001".to_string(),
                object_type: "ticket".to_string(),
                summary: Some(
                    "printer offline after firmware update, office cannot print".to_string(),
                ),
                tenant_metadata: json!({}),
                embedding: hashed_embedding("printer offline", DIM as usize),
            }])
            .await
            .expect("seed");

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/query",
                Some(json!({"query": "printer offline", "intent": "answer"})),
            ))
            .await
            .expect("query response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["answer"], "ok");
        assert!(!body["citations"].as_array().expect("citations").is_empty());

        let empty = app
            .oneshot(request("POST", "/query", Some(json!({"query": "  "}))))
            .await
            .expect("empty query");
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn purge_requires_the_daily_token() {
        let (app, state) = build_test_app(0).await;

        let store = state.stores.for_tenant("acme").await.expect("store");
        IntegratedObject::new(
            "acme".to_string(),
            "freshdesk".to_string(),
            ObjectType::Ticket,
            "1".to_string(),
            json!({}),
            "content".to_string(),
            ObjectMetadata::default(),
        )
        .upsert(&store)
        .await
        .expect("seed");

        let denied = app
            .clone()
            .oneshot(request(
                "POST",
                "/ingest/security/purge-data",
                Some(json!({"confirm_token": "DELETE_acme_freshdesk_19990101"})),
            ))
            .await
            .expect("denied purge");
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let token = format!(
            "DELETE_acme_freshdesk_{}",
            chrono::Utc::now().format("%Y%m%d")
        );
        let allowed = app
            .oneshot(request(
                "POST",
                "/ingest/security/purge-data",
                Some(json!({"confirm_token": token})),
            ))
            .await
            .expect("allowed purge");
        assert_eq!(allowed.status(), StatusCode::OK);

        let rows = IntegratedObject::get_by_type(&store, "acme", "freshdesk", ObjectType::Ticket)
            .await
            .expect("rows");
        assert!(rows.is_empty(), "soft purge hides tenant rows");
    }
}
