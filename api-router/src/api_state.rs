use std::sync::Arc;
use std::time::Duration;

use common::{
    error::AppError,
    storage::{tenant::TenantStores, types::tenant_setting::TenantSetting},
    utils::config::AppConfig,
    vector::VectorStore,
};
use moka::future::Cache;
use ingestion_pipeline::{manager::AdapterFactory, JobManager, JobRuntime};
use llm_router::{LlmRouter, Summarizer};
use platform_adapter::{freshdesk::FreshdeskAdapter, PlatformAdapter};
use retrieval_pipeline::{ContextStore, RetrievalDeps};

use crate::tenant::TenantContext;

/// Builds the upstream adapter for one request from its tenant headers.
pub type UpstreamFactory =
    Arc<dyn Fn(&TenantContext) -> Option<Arc<dyn PlatformAdapter>> + Send + Sync>;

#[derive(Clone)]
pub struct ApiState {
    pub stores: TenantStores,
    pub vector: Arc<VectorStore>,
    pub router: Arc<LlmRouter>,
    pub summarizer: Arc<Summarizer>,
    pub jobs: Arc<JobManager>,
    pub contexts: ContextStore,
    pub config: Arc<AppConfig>,
    pub upstream_factory: UpstreamFactory,
    settings_cache: Cache<String, Arc<Vec<(String, String)>>>,
}

impl ApiState {
    /// Production assembly: every dependency built from configuration.
    pub async fn new(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let router = Arc::new(LlmRouter::from_config(&config)?);
        Self::with_parts(config, router, None, None).await
    }

    /// Assembly with injectable LLM router and adapter factories; the
    /// production path passes `None` for both factories.
    pub async fn with_parts(
        config: Arc<AppConfig>,
        router: Arc<LlmRouter>,
        upstream_factory: Option<UpstreamFactory>,
        job_adapter_factory: Option<AdapterFactory>,
    ) -> Result<Self, AppError> {
        let stores = TenantStores::new(Arc::clone(&config));
        let vector_db = stores.vector_client().await?;
        let vector = Arc::new(
            VectorStore::new(
                vector_db,
                &config.vector_collection,
                config.embedding_dimensions as usize,
                &config.backup_dir,
            )
            .await?,
        );

        let summarizer = Arc::new(Summarizer::new(
            Arc::clone(&router),
            config.summary_cache_capacity,
            Duration::from_secs(config.summary_cache_ttl_secs),
        ));

        let upstream_factory = upstream_factory.unwrap_or_else(|| {
            let fallback_domain = config.freshdesk_domain.clone();
            let fallback_key = config.freshdesk_api_key.clone();
            Arc::new(move |ctx: &TenantContext| {
                let domain = if ctx.domain.is_empty() {
                    fallback_domain.clone()?
                } else {
                    ctx.domain.clone()
                };
                let api_key = if ctx.api_key.is_empty() {
                    fallback_key.clone()?
                } else {
                    ctx.api_key.clone()
                };
                Some(Arc::new(FreshdeskAdapter::new(&domain, &api_key))
                    as Arc<dyn PlatformAdapter>)
            })
        });

        let job_adapter_factory = job_adapter_factory.unwrap_or_else(|| {
            let fallback_domain = config.freshdesk_domain.clone();
            let fallback_key = config.freshdesk_api_key.clone();
            Arc::new(move |_platform: &str, job: &ingestion_pipeline::IngestJobConfig| {
                let domain = job
                    .domain
                    .clone()
                    .or_else(|| fallback_domain.clone())
                    .ok_or_else(|| {
                        AppError::Config("no upstream domain configured".to_string())
                    })?;
                let api_key = job
                    .api_key
                    .clone()
                    .or_else(|| fallback_key.clone())
                    .ok_or_else(|| {
                        AppError::Config("no upstream api key configured".to_string())
                    })?;
                Ok(Arc::new(FreshdeskAdapter::new(&domain, &api_key))
                    as Arc<dyn PlatformAdapter>)
            })
        });

        let jobs = JobManager::new(JobRuntime {
            stores: stores.clone(),
            vector: Arc::clone(&vector),
            router: Arc::clone(&router),
            summarizer: Arc::clone(&summarizer),
            config: Arc::clone(&config),
            adapter_factory: job_adapter_factory,
        });

        let contexts = ContextStore::new(
            config.context_cache_capacity,
            Duration::from_secs(config.context_cache_ttl_secs),
        );

        let settings_cache = Cache::builder()
            .max_capacity(1_024)
            .time_to_live(Duration::from_secs(config.settings_cache_ttl_secs))
            .build();

        Ok(Self {
            stores,
            vector,
            router,
            summarizer,
            jobs,
            contexts,
            config,
            upstream_factory,
            settings_cache,
        })
    }

    /// Tenant settings, loaded lazily from the tenant store and cached with
    /// a short TTL. Encrypted values are returned decrypted.
    pub async fn tenant_settings(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<Vec<(String, String)>>, AppError> {
        let stores = self.stores.clone();
        let tenant = tenant_id.to_string();
        self.settings_cache
            .try_get_with(tenant.clone(), async move {
                let store = stores.for_tenant(&tenant).await?;
                let settings = TenantSetting::get_all(&store, &tenant).await?;
                Ok::<_, AppError>(Arc::new(settings))
            })
            .await
            .map_err(|e: Arc<AppError>| AppError::InternalError(e.to_string()))
    }

    pub async fn tenant_setting(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<String>, AppError> {
        let settings = self.tenant_settings(tenant_id).await?;
        Ok(settings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    pub async fn retrieval_deps(&self, tenant_id: &str) -> Result<RetrievalDeps, AppError> {
        let store = self.stores.for_tenant(tenant_id).await?;
        Ok(RetrievalDeps {
            store,
            vector: Arc::clone(&self.vector),
            router: Arc::clone(&self.router),
            summarizer: Arc::clone(&self.summarizer),
        })
    }

    pub fn adapter_for(&self, ctx: &TenantContext) -> Option<Arc<dyn PlatformAdapter>> {
        (self.upstream_factory)(ctx)
    }
}
