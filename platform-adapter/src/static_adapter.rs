//! Scripted in-memory adapter used by pipeline and orchestrator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::error::AppError;

use crate::{
    types::{NeutralArticle, NeutralAttachment, NeutralConversation, NeutralTicket},
    PlatformAdapter,
};

#[derive(Default)]
pub struct StaticAdapter {
    pub tickets: Vec<NeutralTicket>,
    pub conversations: HashMap<String, Vec<NeutralConversation>>,
    pub attachments: HashMap<String, Vec<NeutralAttachment>>,
    pub articles: Vec<NeutralArticle>,
    /// When set, every call fails; exercises the store-fallback paths.
    pub fail_all: bool,
    /// Artificial per-call latency, for tests that need an in-flight job.
    pub delay_ms: u64,
    request_count: AtomicUsize,
}

impl StaticAdapter {
    pub fn with_tickets(tickets: Vec<NeutralTicket>) -> Self {
        Self {
            tickets,
            ..Self::default()
        }
    }

    pub fn requests_made(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    async fn record_call(&self) -> Result<(), AppError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_all {
            return Err(AppError::ExternalService(
                "scripted upstream failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for StaticAdapter {
    fn platform(&self) -> &str {
        "freshdesk"
    }

    async fn list_tickets(
        &self,
        page: u32,
        per_page: u32,
        updated_since: &str,
    ) -> Result<Vec<NeutralTicket>, AppError> {
        self.record_call().await?;

        let mut matching: Vec<NeutralTicket> = self
            .tickets
            .iter()
            .filter(|t| t.updated_at.as_deref().unwrap_or_default() >= updated_since)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));

        let start = ((page.max(1) - 1) as usize).saturating_mul(per_page as usize);
        Ok(matching
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .collect())
    }

    async fn get_ticket(&self, original_id: &str) -> Result<Option<NeutralTicket>, AppError> {
        self.record_call().await?;
        Ok(self
            .tickets
            .iter()
            .find(|t| t.original_id == original_id)
            .cloned())
    }

    async fn list_conversations(
        &self,
        ticket_original_id: &str,
    ) -> Result<Vec<NeutralConversation>, AppError> {
        self.record_call().await?;
        Ok(self
            .conversations
            .get(ticket_original_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_attachments(
        &self,
        ticket_original_id: &str,
    ) -> Result<Vec<NeutralAttachment>, AppError> {
        self.record_call().await?;
        Ok(self
            .attachments
            .get(ticket_original_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_kb(&self) -> Result<Vec<NeutralArticle>, AppError> {
        self.record_call().await?;
        Ok(self.articles.clone())
    }
}
