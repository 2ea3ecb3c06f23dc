use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One embedded database file per tenant under `data_dir`.
    Embedded,
    /// One database per tenant on a central SurrealDB server.
    Central,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Embedded
}

/// Connection and default-model settings for one LLM provider slot.
#[derive(Clone, Deserialize, Debug, Default)]
pub struct ProviderSlot {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<f64>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,

    // Central-store connection (ignored by the embedded backend)
    #[serde(default)]
    pub surrealdb_address: Option<String>,
    #[serde(default)]
    pub surrealdb_username: Option<String>,
    #[serde(default)]
    pub surrealdb_password: Option<String>,
    #[serde(default = "default_namespace")]
    pub surrealdb_namespace: String,

    // Vector store; defaults to an embedded file next to the tenant stores
    #[serde(default)]
    pub vector_address: Option<String>,
    #[serde(default = "default_vector_collection")]
    pub vector_collection: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,

    // Upstream help-desk fallback credentials (headers win)
    #[serde(default)]
    pub freshdesk_domain: Option<String>,
    #[serde(default)]
    pub freshdesk_api_key: Option<String>,

    // LLM provider slots; a slot without an api_key is not registered
    #[serde(default)]
    pub openai: ProviderSlot,
    #[serde(default)]
    pub anthropic: ProviderSlot,
    #[serde(default)]
    pub gemini: ProviderSlot,
    #[serde(default)]
    pub deepseek: ProviderSlot,

    #[serde(default = "default_llm_global_timeout", alias = "llm_global_timeout")]
    pub llm_global_timeout_secs: f64,
    #[serde(default = "default_light_model")]
    pub light_model: String,
    #[serde(default = "default_heavy_model")]
    pub heavy_model: String,

    // Cache sizing
    #[serde(default = "default_embedding_cache_capacity")]
    pub embedding_cache_capacity: u64,
    #[serde(default = "default_embedding_cache_ttl_secs")]
    pub embedding_cache_ttl_secs: u64,
    #[serde(default = "default_summary_cache_capacity")]
    pub summary_cache_capacity: u64,
    #[serde(default = "default_summary_cache_ttl_secs")]
    pub summary_cache_ttl_secs: u64,
    #[serde(default = "default_settings_cache_ttl_secs")]
    pub settings_cache_ttl_secs: u64,
    #[serde(default = "default_context_cache_capacity")]
    pub context_cache_capacity: u64,
    #[serde(default = "default_context_cache_ttl_secs")]
    pub context_cache_ttl_secs: u64,

    // Ingestion tunables
    #[serde(default = "default_raw_data_chunk_size")]
    pub raw_data_chunk_size: usize,
    #[serde(default = "default_days_per_chunk")]
    pub days_per_chunk: i64,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_job_retention_hours")]
    pub job_retention_hours: i64,
    #[serde(default = "default_job_cooldown_secs")]
    pub job_cooldown_secs: i64,

    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_backup_dir() -> String {
    "./backups".to_string()
}

fn default_namespace() -> String {
    "support".to_string()
}

fn default_vector_collection() -> String {
    "documents".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_llm_global_timeout() -> f64 {
    5.0
}

fn default_light_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_heavy_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_cache_capacity() -> u64 {
    10_000
}

fn default_embedding_cache_ttl_secs() -> u64 {
    3_600
}

fn default_summary_cache_capacity() -> u64 {
    1_000
}

fn default_summary_cache_ttl_secs() -> u64 {
    21_600
}

fn default_settings_cache_ttl_secs() -> u64 {
    300
}

fn default_context_cache_capacity() -> u64 {
    500
}

fn default_context_cache_ttl_secs() -> u64 {
    1_800
}

fn default_raw_data_chunk_size() -> usize {
    1_000
}

fn default_days_per_chunk() -> i64 {
    30
}

fn default_request_delay_ms() -> u64 {
    300
}

fn default_per_page() -> u32 {
    100
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_job_retention_hours() -> i64 {
    24
}

fn default_job_cooldown_secs() -> i64 {
    300
}

fn default_http_port() -> u16 {
    8080
}

impl Default for AppConfig {
    fn default() -> Self {
        // Serde defaults applied to an empty document
        #[allow(clippy::expect_used)]
        let config = serde_json::from_value(serde_json::json!({}))
            .expect("empty AppConfig must deserialize from defaults");
        config
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
