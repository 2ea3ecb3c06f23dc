use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use common::error::AppError;

/// One finished (or partially finished) collection window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedRange {
    pub range_id: String,
    pub ticket_count: u64,
    pub partial: bool,
}

/// Chunk ids written per raw-collection pass.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RawDataProgress {
    #[serde(default)]
    pub tickets_chunks: Vec<String>,
    #[serde(default)]
    pub ticket_details_chunks: Vec<String>,
    #[serde(default)]
    pub conversations_chunks: Vec<String>,
    #[serde(default)]
    pub attachments_chunks: Vec<String>,
    #[serde(default)]
    pub knowledge_base_chunks: Vec<String>,
}

/// Per-tenant persisted ingestion progress (`progress.json`). A new run
/// loads this and skips windows it already completed.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CollectionProgress {
    #[serde(default)]
    pub total_collected: u64,
    #[serde(default)]
    pub completed_ranges: Vec<CompletedRange>,
    #[serde(default)]
    pub raw_data_progress: RawDataProgress,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl CollectionProgress {
    pub fn file_path(tenant_dir: &Path) -> PathBuf {
        tenant_dir.join("progress.json")
    }

    pub async fn load(tenant_dir: &Path) -> Result<Self, AppError> {
        let path = Self::file_path(tenant_dir);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let progress: Self = serde_json::from_slice(&bytes)?;
                info!(
                    path = %path.display(),
                    collected = progress.total_collected,
                    ranges = progress.completed_ranges.len(),
                    "loaded existing collection progress"
                );
                Ok(progress)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Every mutation persists immediately so a crash loses at most the
    /// in-flight window.
    pub async fn save(&mut self, tenant_dir: &Path) -> Result<(), AppError> {
        self.last_updated = Some(Utc::now().to_rfc3339());
        tokio::fs::create_dir_all(tenant_dir).await?;
        let path = Self::file_path(tenant_dir);
        tokio::fs::write(&path, serde_json::to_vec_pretty(self)?).await?;
        Ok(())
    }

    pub fn is_range_complete(&self, range_id: &str) -> bool {
        self.completed_ranges
            .iter()
            .any(|r| r.range_id == range_id && !r.partial)
    }

    /// Records a finished window, replacing a previous partial entry.
    pub fn record_range(&mut self, range_id: &str, ticket_count: u64, partial: bool) {
        self.completed_ranges.retain(|r| r.range_id != range_id);
        self.completed_ranges.push(CompletedRange {
            range_id: range_id.to_string(),
            ticket_count,
            partial,
        });
        self.total_collected += ticket_count;
    }
}
