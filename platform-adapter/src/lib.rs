use async_trait::async_trait;
use common::error::AppError;

pub mod freshdesk;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod static_adapter;

use types::{NeutralArticle, NeutralAttachment, NeutralConversation, NeutralTicket};

/// Capability set every upstream help-desk variant must provide. All output
/// is platform-neutral; no other component ever talks to the upstream.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> &str;

    /// One page of tickets updated since the given RFC 3339 instant,
    /// ordered by `updated_at` ascending.
    async fn list_tickets(
        &self,
        page: u32,
        per_page: u32,
        updated_since: &str,
    ) -> Result<Vec<NeutralTicket>, AppError>;

    /// Full ticket detail; `None` when the upstream does not know the id.
    async fn get_ticket(&self, original_id: &str) -> Result<Option<NeutralTicket>, AppError>;

    async fn list_conversations(
        &self,
        ticket_original_id: &str,
    ) -> Result<Vec<NeutralConversation>, AppError>;

    /// Attachments of the ticket itself plus those on its conversations.
    async fn list_attachments(
        &self,
        ticket_original_id: &str,
    ) -> Result<Vec<NeutralAttachment>, AppError>;

    async fn list_kb(&self) -> Result<Vec<NeutralArticle>, AppError>;
}
