use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            integrated_object::{IntegratedObject, ObjectMetadata, ObjectType},
            progress_log::ProgressLog,
        },
    },
    utils::config::AppConfig,
    vector::{DocType, VectorPoint, VectorStore},
};
use llm_router::{
    summarizer::{ConversationTurn, SummaryInput},
    LlmRouter, Summarizer,
};
use platform_adapter::{
    types::{NeutralArticle, NeutralAttachment, NeutralConversation, NeutralTicket},
    PlatformAdapter,
};

use crate::{
    chunks::ChunkWriter,
    job::IngestJobConfig,
    pacing::AdaptivePacer,
    progress::CollectionProgress,
    signals::JobSignals,
    windows::{date_windows, default_start, DateWindow},
};

/// Progress callback `(step, total_steps, message, percentage)`.
pub type ProgressFn = Arc<dyn Fn(u32, u32, &str, f32) + Send + Sync>;

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub tickets_processed: u64,
    pub conversations_processed: u64,
    pub attachments_processed: u64,
    pub kb_articles_processed: u64,
    pub vectors_upserted: u64,
    pub windows_completed: u32,
}

/// A record waiting for the summary/vector phase after its window finished.
struct PendingObject {
    record_id: String,
    original_id: String,
    doc_type: DocType,
    object_type: ObjectType,
    previous_summary: Option<String>,
    summary_input: Option<SummaryInput>,
    content: String,
    status: Option<String>,
    priority: Option<String>,
}

/// Chunked, resumable, controllable collection pipeline. One
/// engine instance drives one `(tenant, platform, config)` run.
pub struct IngestionEngine {
    adapter: Arc<dyn PlatformAdapter>,
    store: Arc<SurrealDbClient>,
    vector: Arc<VectorStore>,
    router: Arc<LlmRouter>,
    summarizer: Arc<Summarizer>,
    config: Arc<AppConfig>,
}

impl IngestionEngine {
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        store: Arc<SurrealDbClient>,
        vector: Arc<VectorStore>,
        router: Arc<LlmRouter>,
        summarizer: Arc<Summarizer>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            adapter,
            store,
            vector,
            router,
            summarizer,
            config,
        }
    }

    fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        Path::new(&self.config.data_dir).join(tenant_id)
    }

    fn start_from_config(job: &IngestJobConfig) -> DateTime<Utc> {
        job.start_date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map_or_else(default_start, |naive| naive.and_utc())
    }

    /// Checkpoint that persists progress before letting a cancel unwind.
    async fn checkpoint(
        signals: &mut JobSignals,
        collection: &mut CollectionProgress,
        tenant_dir: &Path,
    ) -> Result<(), AppError> {
        if let Err(err) = signals.check().await {
            collection.save(tenant_dir).await?;
            return Err(err);
        }
        Ok(())
    }

    pub async fn run(
        &self,
        job_id: &str,
        tenant_id: &str,
        platform: &str,
        job: &IngestJobConfig,
        mut signals: JobSignals,
        progress: ProgressFn,
    ) -> Result<IngestReport, AppError> {
        let tenant_dir = self.tenant_dir(tenant_id);
        let mut collection = CollectionProgress::load(&tenant_dir).await?;

        if job.purge {
            info!(tenant_id, "purging existing rows before collection");
            IntegratedObject::clear(&self.store, tenant_id, Some(platform), false).await?;
        }

        let windows = date_windows(
            Self::start_from_config(job),
            Utc::now(),
            self.config.days_per_chunk,
        );
        #[allow(clippy::cast_possible_truncation)]
        let total_steps = windows.len() as u32 + 2;

        let raw = &collection.raw_data_progress;
        #[allow(clippy::cast_possible_truncation)]
        let mut tickets_writer = ChunkWriter::new(
            &tenant_dir,
            "tickets",
            self.config.raw_data_chunk_size,
            raw.tickets_chunks.len() as u32,
        );
        #[allow(clippy::cast_possible_truncation)]
        let mut conversations_writer = ChunkWriter::new(
            &tenant_dir,
            "conversations",
            self.config.raw_data_chunk_size,
            raw.conversations_chunks.len() as u32,
        );
        #[allow(clippy::cast_possible_truncation)]
        let mut attachments_writer = ChunkWriter::new(
            &tenant_dir,
            "attachments",
            self.config.raw_data_chunk_size,
            raw.attachments_chunks.len() as u32,
        );
        #[allow(clippy::cast_possible_truncation)]
        let mut kb_writer = ChunkWriter::new(
            &tenant_dir,
            "knowledge_base",
            self.config.raw_data_chunk_size,
            raw.knowledge_base_chunks.len() as u32,
        );

        let mut pacer = AdaptivePacer::new(Duration::from_millis(self.config.request_delay_ms));
        let mut report = IngestReport::default();
        let mut pending: Vec<PendingObject> = Vec::new();
        let mut step = 0u32;
        let mut reached_max = false;

        for window in &windows {
            Self::checkpoint(&mut signals, &mut collection, &tenant_dir).await?;

            if collection.is_range_complete(&window.range_id) {
                step += 1;
                continue;
            }
            if reached_max {
                break;
            }

            let window_count = self
                .collect_window(
                    tenant_id,
                    platform,
                    window,
                    job,
                    &mut signals,
                    &mut collection,
                    &tenant_dir,
                    &mut pacer,
                    &mut tickets_writer,
                    &mut conversations_writer,
                    &mut attachments_writer,
                    &mut pending,
                    &mut report,
                    &mut reached_max,
                )
                .await?;

            collection.record_range(&window.range_id, window_count, reached_max);
            Self::sync_chunk_ids(
                &mut collection,
                &tickets_writer,
                &conversations_writer,
                &attachments_writer,
                &kb_writer,
            );
            collection.save(&tenant_dir).await?;
            pacer.on_window_success();

            // Summaries and vectors follow each completed window so a later
            // cancel keeps everything collected so far usable.
            let window_pending = std::mem::take(&mut pending);
            self.summarize_and_vectorize(tenant_id, platform, &mut signals, window_pending, &mut report)
                .await?;

            step += 1;
            report.windows_completed += 1;
            #[allow(clippy::cast_precision_loss)]
            let pct = (f64::from(step) / f64::from(total_steps) * 80.0) as f32;
            let message = format!("collected window {}", window.range_id);
            progress(step, total_steps, &message, pct);
            ProgressLog::log(
                &self.store,
                job_id,
                tenant_id,
                step,
                total_steps,
                &message,
                pct,
            )
            .await?;
        }

        tickets_writer.flush().await?;
        conversations_writer.flush().await?;
        attachments_writer.flush().await?;

        // Knowledge-base pass
        if job.include_kb {
            Self::checkpoint(&mut signals, &mut collection, &tenant_dir).await?;
            self.collect_kb(tenant_id, platform, &mut kb_writer, &mut pending, &mut report)
                .await?;
            kb_writer.flush().await?;
        }
        #[allow(clippy::cast_possible_truncation)]
        let windows_len = windows.len() as u32;
        step = windows_len + 1;
        let message = format!("knowledge base collected ({})", report.kb_articles_processed);
        progress(step, total_steps, &message, 85.0);
        ProgressLog::log(&self.store, job_id, tenant_id, step, total_steps, &message, 85.0)
            .await?;

        Self::sync_chunk_ids(
            &mut collection,
            &tickets_writer,
            &conversations_writer,
            &attachments_writer,
            &kb_writer,
        );
        collection.save(&tenant_dir).await?;

        // Summary + vector phase
        Self::checkpoint(&mut signals, &mut collection, &tenant_dir).await?;
        self.summarize_and_vectorize(tenant_id, platform, &mut signals, pending, &mut report)
            .await?;

        step = total_steps;
        let message = format!(
            "ingestion complete: {} tickets, {} articles, {} vectors",
            report.tickets_processed, report.kb_articles_processed, report.vectors_upserted
        );
        progress(step, total_steps, &message, 100.0);
        ProgressLog::log(&self.store, job_id, tenant_id, step, total_steps, &message, 100.0)
            .await?;
        collection.save(&tenant_dir).await?;

        Ok(report)
    }

    fn sync_chunk_ids(
        collection: &mut CollectionProgress,
        tickets: &ChunkWriter,
        conversations: &ChunkWriter,
        attachments: &ChunkWriter,
        kb: &ChunkWriter,
    ) {
        let raw = &mut collection.raw_data_progress;
        for id in tickets.written_chunk_ids() {
            if !raw.tickets_chunks.contains(id) {
                raw.tickets_chunks.push(id.clone());
            }
        }
        for id in conversations.written_chunk_ids() {
            if !raw.conversations_chunks.contains(id) {
                raw.conversations_chunks.push(id.clone());
            }
        }
        for id in attachments.written_chunk_ids() {
            if !raw.attachments_chunks.contains(id) {
                raw.attachments_chunks.push(id.clone());
            }
        }
        for id in kb.written_chunk_ids() {
            if !raw.knowledge_base_chunks.contains(id) {
                raw.knowledge_base_chunks.push(id.clone());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn collect_window(
        &self,
        tenant_id: &str,
        platform: &str,
        window: &DateWindow,
        job: &IngestJobConfig,
        signals: &mut JobSignals,
        collection: &mut CollectionProgress,
        tenant_dir: &Path,
        pacer: &mut AdaptivePacer,
        tickets_writer: &mut ChunkWriter,
        conversations_writer: &mut ChunkWriter,
        attachments_writer: &mut ChunkWriter,
        pending: &mut Vec<PendingObject>,
        report: &mut IngestReport,
        reached_max: &mut bool,
    ) -> Result<u64, AppError> {
        let mut window_count = 0u64;
        let mut page = 1u32;
        let mut rate_limit_hits = 0u32;

        'pages: loop {
            Self::checkpoint(signals, collection, tenant_dir).await?;
            sleep(pacer.delay()).await;

            let tickets = match self
                .adapter
                .list_tickets(page, self.config.per_page, &window.updated_since())
                .await
            {
                Ok(tickets) => tickets,
                Err(AppError::RateLimited { retry_after_secs }) => {
                    pacer.on_rate_limited();
                    rate_limit_hits += 1;
                    if rate_limit_hits > job.max_retries {
                        return Err(AppError::RateLimited { retry_after_secs });
                    }
                    sleep(Duration::from_secs(retry_after_secs)).await;
                    continue 'pages;
                }
                Err(err) => {
                    collection.save(tenant_dir).await?;
                    return Err(err);
                }
            };

            let page_len = tickets.len();
            for ticket in tickets {
                // The page is ordered by updated_at; past the window end the
                // rest belongs to later windows.
                let past_window = ticket
                    .updated_at
                    .as_deref()
                    .and_then(|updated| DateTime::parse_from_rfc3339(updated).ok())
                    .is_some_and(|updated| updated.with_timezone(&Utc) >= window.end);
                if past_window {
                    break 'pages;
                }

                self.process_ticket(
                    tenant_id,
                    platform,
                    ticket,
                    job,
                    tickets_writer,
                    conversations_writer,
                    attachments_writer,
                    pending,
                    report,
                )
                .await?;
                window_count += 1;

                if job
                    .max_tickets
                    .is_some_and(|max| report.tickets_processed >= max)
                {
                    *reached_max = true;
                    break 'pages;
                }
            }

            if page_len < self.config.per_page as usize {
                break 'pages;
            }
            page += 1;
        }

        Ok(window_count)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_ticket(
        &self,
        tenant_id: &str,
        platform: &str,
        listed: NeutralTicket,
        job: &IngestJobConfig,
        tickets_writer: &mut ChunkWriter,
        conversations_writer: &mut ChunkWriter,
        attachments_writer: &mut ChunkWriter,
        pending: &mut Vec<PendingObject>,
        report: &mut IngestReport,
    ) -> Result<(), AppError> {
        let ticket = if listed.needs_detail_fetch() {
            match self.adapter.get_ticket(&listed.original_id).await? {
                Some(detail) => detail,
                None => listed,
            }
        } else {
            listed
        };

        let conversations: Vec<NeutralConversation> = if job.include_conversations {
            self.adapter.list_conversations(&ticket.original_id).await?
        } else {
            Vec::new()
        };
        let attachments: Vec<NeutralAttachment> = if job.process_attachments {
            self.adapter.list_attachments(&ticket.original_id).await?
        } else {
            Vec::new()
        };

        tickets_writer.push(ticket.raw.clone()).await?;
        for conversation in &conversations {
            conversations_writer.push(conversation.raw.clone()).await?;
        }
        for attachment in &attachments {
            attachments_writer.push(attachment.raw.clone()).await?;
        }

        let tenant_id = tenant_id.to_string();
        let platform = platform.to_string();

        let inline_images = ticket.description_text.matches("<img").count()
            + ticket
                .raw
                .get("description")
                .and_then(serde_json::Value::as_str)
                .map_or(0, |d| d.matches("<img").count());

        #[allow(clippy::cast_possible_truncation)]
        let metadata = ObjectMetadata {
            status: Some(ticket.status.clone()),
            priority: Some(ticket.priority.clone()),
            created_at: ticket.created_at.clone(),
            updated_at: ticket.updated_at.clone(),
            custom_fields: ticket.raw.get("custom_fields").cloned(),
            attachment_count: attachments.len() as u32,
            inline_image_count: inline_images as u32,
            ..ObjectMetadata::default()
        };

        let stored = IntegratedObject::new(
            tenant_id.clone(),
            platform.clone(),
            ObjectType::Ticket,
            ticket.original_id.clone(),
            ticket.raw.clone(),
            ticket.integrated_content(),
            metadata,
        )
        .upsert(&self.store)
        .await?;

        pending.push(PendingObject {
            record_id: stored.id.clone(),
            original_id: ticket.original_id.clone(),
            doc_type: DocType::Ticket,
            object_type: ObjectType::Ticket,
            previous_summary: stored.summary.clone(),
            summary_input: Some(SummaryInput {
                ticket_id: ticket.original_id.clone(),
                subject: ticket.subject.clone(),
                description: ticket.description_text.clone(),
                conversations: conversations
                    .iter()
                    .map(|c| ConversationTurn {
                        from_agent: c.from_agent,
                        body: c.body_text.clone(),
                    })
                    .collect(),
            }),
            content: ticket.integrated_content(),
            status: Some(ticket.status.clone()),
            priority: Some(ticket.priority.clone()),
        });
        report.tickets_processed += 1;

        for conversation in conversations {
            let metadata = ObjectMetadata {
                parent_type: Some("ticket".to_string()),
                parent_original_id: Some(ticket.original_id.clone()),
                created_at: conversation.created_at.clone(),
                ..ObjectMetadata::default()
            };
            IntegratedObject::new(
                tenant_id.clone(),
                platform.clone(),
                ObjectType::Conversation,
                conversation.original_id.clone(),
                conversation.raw.clone(),
                conversation.body_text.clone(),
                metadata,
            )
            .upsert(&self.store)
            .await?;
            report.conversations_processed += 1;
        }

        for attachment in attachments {
            let metadata = ObjectMetadata {
                parent_type: Some(attachment.parent_type.clone()),
                parent_original_id: Some(attachment.parent_original_id.clone()),
                ..ObjectMetadata::default()
            };
            IntegratedObject::new(
                tenant_id.clone(),
                platform.clone(),
                ObjectType::Attachment,
                attachment.original_id.clone(),
                attachment.raw.clone(),
                attachment.name.clone(),
                metadata,
            )
            .upsert(&self.store)
            .await?;
            report.attachments_processed += 1;
        }

        Ok(())
    }

    async fn collect_kb(
        &self,
        tenant_id: &str,
        platform: &str,
        kb_writer: &mut ChunkWriter,
        pending: &mut Vec<PendingObject>,
        report: &mut IngestReport,
    ) -> Result<(), AppError> {
        let articles: Vec<NeutralArticle> = self.adapter.list_kb().await?;
        for article in articles {
            kb_writer.push(article.raw.clone()).await?;

            let metadata = ObjectMetadata {
                status: Some(article.status.clone()),
                created_at: article.created_at.clone(),
                updated_at: article.updated_at.clone(),
                ..ObjectMetadata::default()
            };
            let stored = IntegratedObject::new(
                tenant_id.to_string(),
                platform.to_string(),
                ObjectType::Article,
                article.original_id.clone(),
                article.raw.clone(),
                article.integrated_content(),
                metadata,
            )
            .upsert(&self.store)
            .await?;

            pending.push(PendingObject {
                record_id: stored.id.clone(),
                original_id: article.original_id.clone(),
                doc_type: DocType::Article,
                object_type: ObjectType::Article,
                previous_summary: stored.summary.clone(),
                summary_input: None,
                content: article.integrated_content(),
                status: Some(article.status.clone()),
                priority: None,
            });
            report.kb_articles_processed += 1;
        }
        Ok(())
    }

    /// Generates summaries for collected objects, writes them back, and
    /// upserts a vector for every object whose summary changed.
    async fn summarize_and_vectorize(
        &self,
        tenant_id: &str,
        platform: &str,
        signals: &mut JobSignals,
        pending: Vec<PendingObject>,
        report: &mut IngestReport,
    ) -> Result<(), AppError> {
        let mut points = Vec::new();

        for object in pending {
            if signals.cancelled() {
                return Err(AppError::Cancelled);
            }

            let summary = match &object.summary_input {
                Some(input) => match self.summarizer.summarize(input).await {
                    Ok(summary) => Some(summary.ticket_summary),
                    Err(err) => {
                        warn!(
                            original_id = %object.original_id,
                            error = %err,
                            "summary generation failed; vector uses raw content"
                        );
                        None
                    }
                },
                // Articles are embedded from their own content
                None => None,
            };

            let summary_changed = summary.is_some() && summary != object.previous_summary;
            if let Some(text) = &summary {
                if summary_changed {
                    IntegratedObject::set_summary(&self.store, &object.record_id, text).await?;
                }
            }

            // Vector upsert happens when the summary changed, or when the
            // object never had one (first ingestion of articles and
            // summary-less tickets).
            if !summary_changed && object.previous_summary.is_some() {
                continue;
            }

            let embed_text = summary.clone().unwrap_or_else(|| object.content.clone());
            let embedding = self.router.embed(&embed_text).await?;
            points.push(VectorPoint {
                tenant_id: tenant_id.to_string(),
                platform: platform.to_string(),
                doc_type: object.doc_type,
                original_id: object.original_id.clone(),
                object_type: object.object_type.to_string(),
                summary,
                tenant_metadata: json!({
                    "status": object.status,
                    "priority": object.priority,
                }),
                embedding,
            });
        }

        if !points.is_empty() {
            let written = self.vector.upsert(points).await?;
            report.vectors_upserted += written as u64;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::config::AppConfig;
    use llm_router::selection::ProviderWeights;
    use llm_router::task::TaskProfiles;
    use llm_router::testing::ScriptedProvider;
    use platform_adapter::static_adapter::StaticAdapter;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    const DIM: usize = 8;

    struct Harness {
        engine: IngestionEngine,
        adapter: Arc<StaticAdapter>,
        store: Arc<SurrealDbClient>,
        vector: Arc<VectorStore>,
        _tempdir: tempfile::TempDir,
    }

    fn recent(hours_ago: i64) -> String {
        (Utc::now() - chrono::Duration::hours(hours_ago)).to_rfc3339()
    }

    fn ticket(id: &str, subject: &str) -> NeutralTicket {
        NeutralTicket::from_upstream(json!({
            "id": id.parse::<i64>().unwrap_or(0),
            "subject": subject,
            "description": format!("description of {subject}"),
            "status": 2,
            "priority": 3,
            "created_at": recent(48),
            "updated_at": recent(1),
        }))
    }

    async fn harness(adapter: StaticAdapter) -> Harness {
        let tempdir = tempfile::tempdir().expect("tempdir");

        let database = Uuid::new_v4().to_string();
        let store = Arc::new(
            SurrealDbClient::memory("engine_ns", &database)
                .await
                .expect("memory store"),
        );
        store.ensure_tenant_schema().await.expect("schema");

        let vector_db = Arc::new(
            SurrealDbClient::memory("engine_vec", &database)
                .await
                .expect("memory vector db"),
        );
        let vector = Arc::new(
            VectorStore::new(vector_db, "documents", DIM, "./backups")
                .await
                .expect("vector store"),
        );

        let provider = Arc::new(ScriptedProvider::always_ok("mock"));
        let mut weights = HashMap::new();
        weights.insert("mock".to_string(), ProviderWeights::default());
        let router = Arc::new(LlmRouter::new(
            vec![provider],
            weights,
            TaskProfiles::new("light", "heavy", Duration::from_secs(5)),
            "embedding-model",
            DIM as u32,
            100,
            Duration::from_secs(3600),
            Duration::from_secs(5),
        ));
        let summarizer = Arc::new(Summarizer::new(
            Arc::clone(&router),
            100,
            Duration::from_secs(21_600),
        ));

        let mut config = AppConfig::default();
        config.data_dir = tempdir.path().to_string_lossy().into_owned();
        config.request_delay_ms = 0;
        let config = Arc::new(config);

        let adapter = Arc::new(adapter);
        let engine = IngestionEngine::new(
            Arc::clone(&adapter) as Arc<dyn PlatformAdapter>,
            Arc::clone(&store),
            Arc::clone(&vector),
            router,
            summarizer,
            config,
        );

        Harness {
            engine,
            adapter,
            store,
            vector,
            _tempdir: tempdir,
        }
    }

    fn seeded_adapter() -> StaticAdapter {
        let mut adapter = StaticAdapter::with_tickets(vec![
            ticket("1001", "printer offline"),
            ticket("1002", "cannot sign in"),
        ]);
        adapter.conversations.insert(
            "1001".to_string(),
            vec![NeutralConversation::from_upstream(
                "1001",
                json!({"id": 7, "body_text": "It broke after the update", "incoming": true, "created_at": recent(20)}),
            )],
        );
        adapter.attachments.insert(
            "1001".to_string(),
            vec![NeutralAttachment::from_upstream(
                "ticket",
                "1001",
                json!({"id": 5, "name": "log.txt", "size": 128}),
            )],
        );
        adapter.articles = vec![NeutralArticle::from_upstream(json!({
            "id": 9001,
            "title": "How to reset the printer",
            "description": "Step by step reset guide",
            "status": 2,
            "created_at": recent(500),
            "updated_at": recent(400),
        }))];
        adapter
    }

    fn job_config() -> IngestJobConfig {
        let mut job = IngestJobConfig::default();
        job.start_date = Some(
            (Utc::now() - chrono::Duration::days(5))
                .format("%Y-%m-%d")
                .to_string(),
        );
        job
    }

    fn no_progress() -> ProgressFn {
        Arc::new(|_, _, _, _| {})
    }

    #[tokio::test]
    async fn full_run_persists_objects_chunks_and_vectors() {
        let h = harness(seeded_adapter()).await;
        let (_controls, signals) = crate::signals::channel();

        let report = h
            .engine
            .run("job-1", "acme", "freshdesk", &job_config(), signals, no_progress())
            .await
            .expect("run");

        assert_eq!(report.tickets_processed, 2);
        assert_eq!(report.conversations_processed, 1);
        assert_eq!(report.attachments_processed, 1);
        assert_eq!(report.kb_articles_processed, 1);
        assert_eq!(report.vectors_upserted, 3);
        assert_eq!(report.windows_completed, 1);

        let tickets =
            IntegratedObject::get_by_type(&h.store, "acme", "freshdesk", ObjectType::Ticket)
                .await
                .expect("tickets");
        assert_eq!(tickets.len(), 2);
        assert!(tickets.iter().all(|t| t.summary.is_some()));

        let attachments = IntegratedObject::get_attachments_for_ticket(
            &h.store, "acme", "freshdesk", "1001",
        )
        .await
        .expect("attachments");
        assert_eq!(attachments.len(), 1);

        assert_eq!(h.vector.count(Some("acme"), None).await.expect("count"), 3);

        let tenant_dir = h.engine.tenant_dir("acme");
        let progress = CollectionProgress::load(&tenant_dir).await.expect("progress");
        assert_eq!(progress.completed_ranges.len(), 1);
        assert!(!progress.completed_ranges[0].partial);
        assert_eq!(progress.raw_data_progress.tickets_chunks.len(), 1);
        assert!(tenant_dir
            .join("raw_data/tickets/tickets_chunk_0000.json")
            .exists());

        let latest = ProgressLog::latest(&h.store, "job-1")
            .await
            .expect("latest")
            .expect("row");
        assert!((latest.percentage - 100.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn second_run_skips_completed_windows_and_stays_idempotent() {
        let h = harness(seeded_adapter()).await;

        let (_c1, signals) = crate::signals::channel();
        h.engine
            .run("job-1", "acme", "freshdesk", &job_config(), signals, no_progress())
            .await
            .expect("first run");
        let requests_after_first = h.adapter.requests_made();

        let (_c2, signals) = crate::signals::channel();
        let report = h
            .engine
            .run("job-2", "acme", "freshdesk", &job_config(), signals, no_progress())
            .await
            .expect("second run");

        assert_eq!(report.tickets_processed, 0, "completed window is skipped");
        // Only the KB pass talks to the upstream again
        assert_eq!(h.adapter.requests_made(), requests_after_first + 1);

        let tickets =
            IntegratedObject::get_by_type(&h.store, "acme", "freshdesk", ObjectType::Ticket)
                .await
                .expect("tickets");
        assert_eq!(tickets.len(), 2, "row count unchanged");
        assert_eq!(
            h.vector.count(Some("acme"), None).await.expect("count"),
            3,
            "vector point count unchanged"
        );
    }

    #[tokio::test]
    async fn max_tickets_marks_window_partial() {
        let h = harness(seeded_adapter()).await;
        let (_controls, signals) = crate::signals::channel();

        let mut job = job_config();
        job.max_tickets = Some(1);
        job.include_kb = false;

        let report = h
            .engine
            .run("job-1", "acme", "freshdesk", &job, signals, no_progress())
            .await
            .expect("run");
        assert_eq!(report.tickets_processed, 1);

        let tenant_dir = h.engine.tenant_dir("acme");
        let progress = CollectionProgress::load(&tenant_dir).await.expect("progress");
        assert!(progress.completed_ranges[0].partial);
        assert!(!progress.is_range_complete(&progress.completed_ranges[0].range_id));
    }

    #[tokio::test]
    async fn cancel_persists_progress_and_unwinds() {
        let h = harness(seeded_adapter()).await;
        let (controls, signals) = crate::signals::channel();
        controls.cancel();

        let err = h
            .engine
            .run("job-1", "acme", "freshdesk", &job_config(), signals, no_progress())
            .await
            .expect_err("cancelled");
        assert!(matches!(err, AppError::Cancelled));

        let tenant_dir = h.engine.tenant_dir("acme");
        assert!(
            CollectionProgress::file_path(&tenant_dir).exists(),
            "progress persisted on cancel"
        );
    }
}
