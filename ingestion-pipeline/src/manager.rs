use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use common::{
    error::AppError,
    storage::tenant::TenantStores,
    utils::config::AppConfig,
    vector::VectorStore,
};
use llm_router::{LlmRouter, Summarizer};
use platform_adapter::PlatformAdapter;

use crate::{
    engine::IngestionEngine,
    job::{IngestJob, IngestJobConfig, JobMetrics, JobStatus},
    signals::{channel, JobControls},
};

/// Builds the upstream adapter for one job: `(platform, job config)`.
pub type AdapterFactory =
    Arc<dyn Fn(&str, &IngestJobConfig) -> Result<Arc<dyn PlatformAdapter>, AppError> + Send + Sync>;

/// Everything a job worker needs, assembled once at startup.
#[derive(Clone)]
pub struct JobRuntime {
    pub stores: TenantStores,
    pub vector: Arc<VectorStore>,
    pub router: Arc<LlmRouter>,
    pub summarizer: Arc<Summarizer>,
    pub config: Arc<AppConfig>,
    pub adapter_factory: AdapterFactory,
}

/// Process-singleton owning job lifecycle. Enforces the
/// per-tenant cooldown and the process-wide concurrency cap.
pub struct JobManager {
    runtime: JobRuntime,
    jobs: Arc<RwLock<HashMap<String, IngestJob>>>,
    controls: Arc<Mutex<HashMap<String, JobControls>>>,
    slots: Arc<Semaphore>,
}

impl JobManager {
    pub fn new(runtime: JobRuntime) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(runtime.config.max_concurrent_jobs));
        Arc::new(Self {
            runtime,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            controls: Arc::new(Mutex::new(HashMap::new())),
            slots,
        })
    }

    pub fn create_job(
        &self,
        tenant_id: &str,
        platform: &str,
        config: IngestJobConfig,
    ) -> Result<IngestJob, AppError> {
        let job = IngestJob::new(tenant_id, platform, config);
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| AppError::InternalError("job map lock poisoned".into()))?;
        jobs.insert(job.job_id.clone(), job.clone());
        info!(job_id = %job.job_id, tenant_id, "job created");
        Ok(job)
    }

    /// Starts a pending job: cooldown and concurrency checks, then a
    /// background worker driving the ingestion engine.
    pub fn start_job(self: &Arc<Self>, job_id: &str) -> Result<IngestJob, AppError> {
        let (tenant_id, platform, config) = {
            let jobs = self
                .jobs
                .read()
                .map_err(|_| AppError::InternalError("job map lock poisoned".into()))?;
            let job = jobs
                .get(job_id)
                .ok_or_else(|| AppError::NotFound(format!("job {job_id} not found")))?;
            if job.status != JobStatus::Pending {
                return Err(AppError::Validation(format!(
                    "job {job_id} cannot start from {:?}",
                    job.status
                )));
            }

            // One successful run per tenant within the cooldown window
            if !job.config.force_rebuild {
                let cooldown = chrono::Duration::seconds(self.runtime.config.job_cooldown_secs);
                let recent = jobs.values().any(|other| {
                    other.tenant_id == job.tenant_id
                        && other.status == JobStatus::Completed
                        && other
                            .completed_at
                            .is_some_and(|done| Utc::now() - done < cooldown)
                });
                if recent {
                    warn!(job_id, tenant_id = %job.tenant_id, "blocked by recent completion");
                    return Err(AppError::Validation(
                        "cannot start: recent completion".to_string(),
                    ));
                }
            }

            (job.tenant_id.clone(), job.platform.clone(), job.config.clone())
        };

        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| AppError::Validation("concurrent job limit reached".to_string()))?;

        let (controls, signals) = channel();
        self.controls
            .lock()
            .map_err(|_| AppError::InternalError("controls lock poisoned".into()))?
            .insert(job_id.to_string(), controls);

        let started = self.update_job(job_id, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.log("job started");
        })?;

        let manager = Arc::clone(self);
        let runtime = self.runtime.clone();
        let job_id_owned = job_id.to_string();

        tokio::spawn(async move {
            let _permit = permit;

            let progress_jobs = Arc::clone(&manager.jobs);
            let progress_job_id = job_id_owned.clone();
            let progress: crate::engine::ProgressFn =
                Arc::new(move |step, total, message, percentage| {
                    if let Ok(mut jobs) = progress_jobs.write() {
                        if let Some(job) = jobs.get_mut(&progress_job_id) {
                            job.update_progress(step, total, message, percentage);
                        }
                    }
                });

            let outcome = async {
                let store = runtime.stores.for_tenant(&tenant_id).await?;
                let adapter = (runtime.adapter_factory)(&platform, &config)?;
                let engine = IngestionEngine::new(
                    adapter,
                    store,
                    Arc::clone(&runtime.vector),
                    Arc::clone(&runtime.router),
                    Arc::clone(&runtime.summarizer),
                    Arc::clone(&runtime.config),
                );
                engine
                    .run(&job_id_owned, &tenant_id, &platform, &config, signals, progress)
                    .await
            }
            .await;

            let final_update = manager.update_job(&job_id_owned, |job| {
                job.completed_at = Some(Utc::now());
                match &outcome {
                    Ok(report) => {
                        if job.status == JobStatus::Running {
                            job.status = JobStatus::Completed;
                        }
                        job.progress.tickets_processed = report.tickets_processed;
                        job.progress.kb_articles_processed = report.kb_articles_processed;
                        job.progress.attachments_processed = report.attachments_processed;
                        job.progress.vectors_created = report.vectors_upserted;
                        job.log("job finished");
                    }
                    Err(AppError::Cancelled) => {
                        job.status = JobStatus::Cancelled;
                        job.log("job cancelled");
                    }
                    Err(err) => {
                        job.status = JobStatus::Failed;
                        job.error_message = Some(err.to_string());
                        job.progress.errors_count += 1;
                        job.log(format!("job failed: {err}"));
                    }
                }
            });
            if let Err(err) = final_update {
                error!(job_id = %job_id_owned, error = %err, "failed to record job outcome");
            }

            if let Ok(mut controls) = manager.controls.lock() {
                controls.remove(&job_id_owned);
            }
        });

        Ok(started)
    }

    fn update_job<F>(&self, job_id: &str, mutate: F) -> Result<IngestJob, AppError>
    where
        F: FnOnce(&mut IngestJob),
    {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| AppError::InternalError("job map lock poisoned".into()))?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {job_id} not found")))?;
        mutate(job);
        Ok(job.clone())
    }

    pub fn pause_job(&self, job_id: &str) -> Result<IngestJob, AppError> {
        let job = self.update_job(job_id, |job| {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Paused;
                job.paused_at = Some(Utc::now());
                job.log("job paused");
            }
        })?;
        if job.status != JobStatus::Paused {
            return Err(AppError::Validation(format!(
                "job {job_id} is not running"
            )));
        }
        if let Ok(controls) = self.controls.lock() {
            if let Some(control) = controls.get(job_id) {
                control.pause();
            }
        }
        Ok(job)
    }

    pub fn resume_job(&self, job_id: &str) -> Result<IngestJob, AppError> {
        let job = self.update_job(job_id, |job| {
            if job.status == JobStatus::Paused {
                job.status = JobStatus::Running;
                job.paused_at = None;
                job.log("job resumed");
            }
        })?;
        if job.status != JobStatus::Running {
            return Err(AppError::Validation(format!("job {job_id} is not paused")));
        }
        if let Ok(controls) = self.controls.lock() {
            if let Some(control) = controls.get(job_id) {
                control.resume();
            }
        }
        Ok(job)
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<IngestJob, AppError> {
        let job = self.update_job(job_id, |job| {
            if !job.status.is_terminal() {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                job.log("job cancelled by request");
            }
        })?;
        if job.status != JobStatus::Cancelled {
            return Err(AppError::Validation(format!(
                "job {job_id} already finished"
            )));
        }
        if let Ok(controls) = self.controls.lock() {
            if let Some(control) = controls.get(job_id) {
                control.cancel();
            }
        }
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> Option<IngestJob> {
        self.jobs.read().ok()?.get(job_id).cloned()
    }

    /// Jobs of one tenant (newest first) with optional status filter and
    /// pagination. Returns `(page, total_matching)`.
    pub fn list_jobs(
        &self,
        tenant_id: &str,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<IngestJob>, usize) {
        let Ok(jobs) = self.jobs.read() else {
            return (Vec::new(), 0);
        };
        let mut matching: Vec<IngestJob> = jobs
            .values()
            .filter(|job| job.tenant_id == tenant_id)
            .filter(|job| status.is_none_or(|s| job.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        (matching.into_iter().skip(offset).take(limit).collect(), total)
    }

    pub fn metrics(&self, tenant_id: Option<&str>) -> JobMetrics {
        let Ok(jobs) = self.jobs.read() else {
            return JobMetrics::default();
        };
        let mut metrics = JobMetrics::default();
        for job in jobs.values() {
            if tenant_id.is_some_and(|t| job.tenant_id != t) {
                continue;
            }
            metrics.total_jobs += 1;
            match job.status {
                JobStatus::Pending => metrics.pending += 1,
                JobStatus::Running => metrics.running += 1,
                JobStatus::Paused => metrics.paused += 1,
                JobStatus::Completed => metrics.completed += 1,
                JobStatus::Failed => metrics.failed += 1,
                JobStatus::Cancelled => metrics.cancelled += 1,
            }
        }
        metrics
    }

    /// Drops terminal jobs past the retention window.
    pub fn sweep(&self) {
        let retention = chrono::Duration::hours(self.runtime.config.job_retention_hours);
        let now = Utc::now();
        if let Ok(mut jobs) = self.jobs.write() {
            let before = jobs.len();
            jobs.retain(|_, job| {
                let expired = job.status.is_terminal()
                    && job.completed_at.is_some_and(|done| now - done > retention);
                !expired
            });
            let removed = before - jobs.len();
            if removed > 0 {
                info!(removed, "swept expired jobs");
            }
        }
    }

    /// Background sweeper; one per process, started from `main`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::utils::config::StoreBackend;
    use llm_router::selection::ProviderWeights;
    use llm_router::task::TaskProfiles;
    use llm_router::testing::ScriptedProvider;
    use platform_adapter::static_adapter::StaticAdapter;
    use platform_adapter::types::{
        NeutralArticle, NeutralAttachment, NeutralConversation, NeutralTicket,
    };
    use std::time::Duration;

    /// Adapter whose first upstream call blocks on a gate the test controls.
    struct GatedAdapter {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl PlatformAdapter for GatedAdapter {
        fn platform(&self) -> &str {
            "freshdesk"
        }

        async fn list_tickets(
            &self,
            _page: u32,
            _per_page: u32,
            _updated_since: &str,
        ) -> Result<Vec<NeutralTicket>, AppError> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| AppError::Cancelled)?;
            Ok(Vec::new())
        }

        async fn get_ticket(&self, _id: &str) -> Result<Option<NeutralTicket>, AppError> {
            Ok(None)
        }

        async fn list_conversations(
            &self,
            _id: &str,
        ) -> Result<Vec<NeutralConversation>, AppError> {
            Ok(Vec::new())
        }

        async fn list_attachments(&self, _id: &str) -> Result<Vec<NeutralAttachment>, AppError> {
            Ok(Vec::new())
        }

        async fn list_kb(&self) -> Result<Vec<NeutralArticle>, AppError> {
            Ok(Vec::new())
        }
    }

    async fn runtime_with(adapter_factory: AdapterFactory, max_jobs: usize) -> JobRuntime {
        let mut config = AppConfig::default();
        config.store_backend = StoreBackend::Central;
        config.surrealdb_address = Some("mem://".to_string());
        config.max_concurrent_jobs = max_jobs;
        config.request_delay_ms = 0;
        config.vector_address = Some("mem://".to_string());
        let tempdir = tempfile::tempdir().expect("tempdir");
        config.data_dir = tempdir.path().to_string_lossy().into_owned();
        // Leak the tempdir so the path stays valid for the test process
        std::mem::forget(tempdir);
        let config = Arc::new(config);

        let stores = TenantStores::new(Arc::clone(&config));
        let vector_db = stores.vector_client().await.expect("vector client");
        let vector = Arc::new(
            VectorStore::new(vector_db, "documents", 8, "./backups")
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
            8,
            100,
            Duration::from_secs(3600),
            Duration::from_secs(5),
        ));
        let summarizer = Arc::new(Summarizer::new(
            Arc::clone(&router),
            100,
            Duration::from_secs(21_600),
        ));

        JobRuntime {
            stores,
            vector,
            router,
            summarizer,
            config,
            adapter_factory,
        }
    }

    fn static_factory() -> AdapterFactory {
        Arc::new(|_platform, _config| {
            Ok(Arc::new(StaticAdapter::default()) as Arc<dyn PlatformAdapter>)
        })
    }

    fn gated_factory(gate: Arc<Semaphore>) -> AdapterFactory {
        Arc::new(move |_platform, _config| {
            Ok(Arc::new(GatedAdapter {
                gate: Arc::clone(&gate),
            }) as Arc<dyn PlatformAdapter>)
        })
    }

    fn quick_config() -> IngestJobConfig {
        let mut config = IngestJobConfig::default();
        config.start_date = Some(
            (Utc::now() - chrono::Duration::days(3))
                .format("%Y-%m-%d")
                .to_string(),
        );
        config.include_kb = false;
        config
    }

    async fn wait_for_status(
        manager: &Arc<JobManager>,
        job_id: &str,
        wanted: JobStatus,
    ) -> IngestJob {
        for _ in 0..200 {
            if let Some(job) = manager.get_job(job_id) {
                if job.status == wanted {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached {wanted:?}");
    }

    #[tokio::test]
    async fn lifecycle_pause_resume_cancel() {
        let gate = Arc::new(Semaphore::new(0));
        let runtime = runtime_with(gated_factory(Arc::clone(&gate)), 2).await;
        let manager = JobManager::new(runtime);

        let job = manager
            .create_job("acme", "freshdesk", quick_config())
            .expect("create");
        let started = manager.start_job(&job.job_id).expect("start");
        assert_eq!(started.status, JobStatus::Running);

        let paused = manager.pause_job(&job.job_id).expect("pause");
        assert_eq!(paused.status, JobStatus::Paused);
        assert!(manager.resume_job(&job.job_id).expect("resume").status == JobStatus::Running);

        let cancelled = manager.cancel_job(&job.job_id).expect("cancel");
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // Let the worker observe the cancel and unwind
        gate.add_permits(10);
        let final_job = wait_for_status(&manager, &job.job_id, JobStatus::Cancelled).await;
        assert!(final_job.completed_at.is_some());
    }

    #[tokio::test]
    async fn cooldown_blocks_fast_recreate_unless_forced() {
        let runtime = runtime_with(static_factory(), 2).await;
        let manager = JobManager::new(runtime);

        let first = manager
            .create_job("acme", "freshdesk", quick_config())
            .expect("create");
        manager.start_job(&first.job_id).expect("start");
        wait_for_status(&manager, &first.job_id, JobStatus::Completed).await;

        let second = manager
            .create_job("acme", "freshdesk", quick_config())
            .expect("create second");
        let err = manager.start_job(&second.job_id).expect_err("cooldown");
        assert!(err.to_string().contains("recent completion"));

        let mut forced_config = quick_config();
        forced_config.force_rebuild = true;
        let forced = manager
            .create_job("acme", "freshdesk", forced_config)
            .expect("create forced");
        let started = manager.start_job(&forced.job_id).expect("forced start");
        assert_eq!(started.status, JobStatus::Running);
        wait_for_status(&manager, &forced.job_id, JobStatus::Completed).await;
    }

    #[tokio::test]
    async fn concurrency_cap_rejects_extra_jobs() {
        let gate = Arc::new(Semaphore::new(0));
        let runtime = runtime_with(gated_factory(Arc::clone(&gate)), 1).await;
        let manager = JobManager::new(runtime);

        let first = manager
            .create_job("acme", "freshdesk", quick_config())
            .expect("create");
        manager.start_job(&first.job_id).expect("start first");

        let second = manager
            .create_job("globex", "freshdesk", quick_config())
            .expect("create second");
        let err = manager.start_job(&second.job_id).expect_err("cap");
        assert!(err.to_string().contains("limit"));

        manager.cancel_job(&first.job_id).expect("cancel");
        gate.add_permits(10);
        wait_for_status(&manager, &first.job_id, JobStatus::Cancelled).await;
    }

    #[tokio::test]
    async fn list_and_metrics_are_tenant_scoped() {
        let runtime = runtime_with(static_factory(), 2).await;
        let manager = JobManager::new(runtime);

        manager
            .create_job("acme", "freshdesk", quick_config())
            .expect("create");
        manager
            .create_job("acme", "freshdesk", quick_config())
            .expect("create");
        manager
            .create_job("globex", "freshdesk", quick_config())
            .expect("create");

        let (page, total) = manager.list_jobs("acme", None, 10, 0);
        assert_eq!(total, 2);
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|j| j.tenant_id == "acme"));

        let (limited, total) = manager.list_jobs("acme", None, 1, 1);
        assert_eq!(total, 2);
        assert_eq!(limited.len(), 1);

        let metrics = manager.metrics(Some("globex"));
        assert_eq!(metrics.total_jobs, 1);
        assert_eq!(metrics.pending, 1);

        let (none, total) =
            manager.list_jobs("acme", Some(JobStatus::Completed), 10, 0);
        assert!(none.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn sweep_removes_old_terminal_jobs() {
        let runtime = runtime_with(static_factory(), 2).await;
        let manager = JobManager::new(runtime);

        let job = manager
            .create_job("acme", "freshdesk", quick_config())
            .expect("create");
        manager.cancel_job(&job.job_id).expect("cancel pending");

        // Age the job past the retention window
        manager
            .update_job(&job.job_id, |job| {
                job.completed_at = Some(Utc::now() - chrono::Duration::hours(30));
            })
            .expect("age job");

        manager.sweep();
        assert!(manager.get_job(&job.job_id).is_none());
    }
}
