use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FullIngest,
    IncrementalIngest,
    KbOnly,
    TicketsOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobProgress {
    pub total_steps: u32,
    pub current_step: u32,
    pub current_step_name: String,
    pub tickets_processed: u64,
    pub kb_articles_processed: u64,
    pub attachments_processed: u64,
    pub vectors_created: u64,
    pub errors_count: u64,
    pub percentage: f32,
}

fn default_batch_size() -> u32 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_parallel_workers() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJobConfig {
    #[serde(default = "default_true")]
    pub incremental: bool,
    #[serde(default)]
    pub purge: bool,
    #[serde(default = "default_true")]
    pub process_attachments: bool,
    #[serde(default = "default_true")]
    pub include_conversations: bool,
    #[serde(default)]
    pub force_rebuild: bool,
    #[serde(default = "default_true")]
    pub include_kb: bool,
    /// Collection start, `YYYY-MM-DD`; defaults to ten years back.
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub max_tickets: Option<u64>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: u32,
    /// Upstream credentials; fall back to tenant settings / environment.
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for IngestJobConfig {
    fn default() -> Self {
        #[allow(clippy::expect_used)]
        let config = serde_json::from_value(serde_json::json!({}))
            .expect("empty IngestJobConfig must deserialize from defaults");
        config
    }
}

impl IngestJobConfig {
    /// Job type is derived from the configuration the way operators expect:
    /// purge/rebuild force a full run, otherwise incremental wins.
    pub fn job_type(&self) -> JobType {
        if self.purge || self.force_rebuild {
            JobType::FullIngest
        } else if self.incremental {
            JobType::IncrementalIngest
        } else if self.include_kb && !self.process_attachments {
            JobType::KbOnly
        } else {
            JobType::FullIngest
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestJob {
    pub job_id: String,
    pub tenant_id: String,
    pub platform: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub config: IngestJobConfig,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub logs: Vec<String>,
}

impl IngestJob {
    pub fn new(tenant_id: &str, platform: &str, config: IngestJobConfig) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            platform: platform.to_string(),
            job_type: config.job_type(),
            status: JobStatus::Pending,
            config,
            progress: JobProgress::default(),
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            completed_at: None,
            error_message: None,
            logs: Vec::new(),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(format!("{} {}", Utc::now().to_rfc3339(), message.into()));
    }

    /// Progress updates never move backwards (invariant: monotonic steps).
    pub fn update_progress(&mut self, step: u32, total: u32, name: &str, percentage: f32) {
        if step < self.progress.current_step {
            return;
        }
        self.progress.current_step = step;
        self.progress.total_steps = total.max(self.progress.total_steps);
        self.progress.current_step_name = name.to_string();
        self.progress.percentage = percentage.clamp(self.progress.percentage, 100.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobControlAction {
    Pause,
    Resume,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct JobMetrics {
    pub total_jobs: usize,
    pub pending: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}
