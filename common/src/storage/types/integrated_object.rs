use serde_json::Value;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Soft-deleted rows stay recoverable for this many days.
pub const SOFT_DELETE_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Ticket,
    Conversation,
    Article,
    Attachment,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Conversation => "conversation",
            Self::Article => "article",
            Self::Attachment => "attachment",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured slice of the upstream payload that queries filter on.
///
/// Parent references are plain `(parent_type, parent_original_id)` pairs;
/// joins are resolved at query time through the 3-tuple, never as pointers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ObjectMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_original_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Value>,
    #[serde(default)]
    pub attachment_count: u32,
    #[serde(default)]
    pub inline_image_count: u32,
}

stored_object!(IntegratedObject, "integrated_object", {
    tenant_id: String,
    platform: String,
    object_type: ObjectType,
    original_id: String,
    original_data: Value,
    integrated_content: String,
    #[serde(default)]
    summary: Option<String>,
    metadata: ObjectMetadata,
    #[serde(default)]
    deleted_at: Option<String>
});

impl IntegratedObject {
    /// Deterministic record id for the identity 4-tuple, so re-ingestion
    /// lands on the same row.
    pub fn record_id(
        tenant_id: &str,
        platform: &str,
        object_type: ObjectType,
        original_id: &str,
    ) -> String {
        let key = format!("{tenant_id}:{platform}:{object_type}:{original_id}");
        Uuid::from_bytes(md5::compute(key.as_bytes()).0).to_string()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: String,
        platform: String,
        object_type: ObjectType,
        original_id: String,
        original_data: Value,
        integrated_content: String,
        metadata: ObjectMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::record_id(&tenant_id, &platform, object_type, &original_id),
            created_at: now,
            updated_at: now,
            tenant_id,
            platform,
            object_type,
            original_id,
            original_data,
            integrated_content,
            summary: None,
            metadata,
            deleted_at: None,
        }
    }

    /// Idempotent write: the same 3-tuple + object type always lands on the
    /// same record, preserving the original `created_at`.
    pub async fn upsert(mut self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let existing: Option<Self> = db.get_item(&self.id).await?;
        if let Some(previous) = existing {
            self.created_at = previous.created_at;
            if self.summary.is_none() {
                self.summary = previous.summary;
            }
        }
        self.updated_at = Utc::now();

        let stored = db.upsert_item(self).await?;
        stored.ok_or_else(|| AppError::InternalError("upsert returned no record".into()))
    }

    pub async fn get(
        db: &SurrealDbClient,
        tenant_id: &str,
        platform: &str,
        object_type: ObjectType,
        original_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let id = Self::record_id(tenant_id, platform, object_type, original_id);
        let found: Option<Self> = db.get_item(&id).await?;
        Ok(found.filter(|o| o.deleted_at.is_none()))
    }

    /// Live objects of one type, newest upstream objects first.
    pub async fn get_by_type(
        db: &SurrealDbClient,
        tenant_id: &str,
        platform: &str,
        object_type: ObjectType,
    ) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .query(
                "SELECT * FROM integrated_object \
                 WHERE tenant_id = $tenant_id AND platform = $platform \
                 AND object_type = $object_type AND deleted_at IS NONE \
                 ORDER BY metadata.created_at DESC",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("platform", platform.to_string()))
            .bind(("object_type", object_type))
            .await?
            .take(0)?;
        Ok(rows)
    }

    pub async fn count_by_type(
        db: &SurrealDbClient,
        tenant_id: &str,
        platform: &str,
        object_type: ObjectType,
    ) -> Result<usize, AppError> {
        #[derive(serde::Deserialize)]
        struct CountRow {
            count: usize,
        }
        let rows: Vec<CountRow> = db
            .query(
                "SELECT count() AS count FROM integrated_object \
                 WHERE tenant_id = $tenant_id AND platform = $platform \
                 AND object_type = $object_type AND deleted_at IS NONE GROUP ALL",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("platform", platform.to_string()))
            .bind(("object_type", object_type))
            .await?
            .take(0)?;
        Ok(rows.first().map_or(0, |r| r.count))
    }

    /// Conversations of one ticket, oldest first.
    pub async fn get_conversations_for_ticket(
        db: &SurrealDbClient,
        tenant_id: &str,
        platform: &str,
        ticket_original_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .query(
                "SELECT * FROM integrated_object \
                 WHERE tenant_id = $tenant_id AND platform = $platform \
                 AND object_type = $object_type AND deleted_at IS NONE \
                 AND metadata.parent_original_id = $parent \
                 ORDER BY metadata.created_at ASC",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("platform", platform.to_string()))
            .bind(("object_type", ObjectType::Conversation))
            .bind(("parent", ticket_original_id.to_string()))
            .await?
            .take(0)?;
        Ok(rows)
    }

    /// Attachments of a ticket: those parented directly on the ticket,
    /// unioned with those parented on any of the ticket's conversations.
    pub async fn get_attachments_for_ticket(
        db: &SurrealDbClient,
        tenant_id: &str,
        platform: &str,
        ticket_original_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let conversations: Vec<Self> = db
            .query(
                "SELECT * FROM integrated_object \
                 WHERE tenant_id = $tenant_id AND platform = $platform \
                 AND object_type = $object_type AND deleted_at IS NONE \
                 AND metadata.parent_original_id = $parent",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("platform", platform.to_string()))
            .bind(("object_type", ObjectType::Conversation))
            .bind(("parent", ticket_original_id.to_string()))
            .await?
            .take(0)?;

        let mut parent_ids: Vec<String> = conversations
            .into_iter()
            .map(|c| c.original_id)
            .collect();
        parent_ids.push(ticket_original_id.to_string());

        let attachments: Vec<Self> = db
            .query(
                "SELECT * FROM integrated_object \
                 WHERE tenant_id = $tenant_id AND platform = $platform \
                 AND object_type = $object_type AND deleted_at IS NONE \
                 AND metadata.parent_original_id IN $parents",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("platform", platform.to_string()))
            .bind(("object_type", ObjectType::Attachment))
            .bind(("parents", parent_ids))
            .await?
            .take(0)?;

        // Union is already deduplicated by record identity, keep stable order
        let mut seen = std::collections::HashSet::new();
        Ok(attachments
            .into_iter()
            .filter(|a| seen.insert(a.original_id.clone()))
            .collect())
    }

    pub async fn set_summary(
        db: &SurrealDbClient,
        record_id: &str,
        summary: &str,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('integrated_object', $id) \
             SET summary = $summary, updated_at = time::now()",
        )
        .bind(("id", record_id.to_string()))
        .bind(("summary", summary.to_string()))
        .await?;
        Ok(())
    }

    /// Soft- or hard-clears a tenant's rows. `platform = None` clears every
    /// platform of the tenant.
    pub async fn clear(
        db: &SurrealDbClient,
        tenant_id: &str,
        platform: Option<&str>,
        hard: bool,
    ) -> Result<(), AppError> {
        let platform_clause = if platform.is_some() {
            " AND platform = $platform"
        } else {
            ""
        };

        let statement = if hard {
            format!("DELETE integrated_object WHERE tenant_id = $tenant_id{platform_clause}")
        } else {
            format!(
                "UPDATE integrated_object SET deleted_at = $now \
                 WHERE tenant_id = $tenant_id AND deleted_at IS NONE{platform_clause}"
            )
        };

        let mut query = db
            .query(statement)
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("now", Utc::now().to_rfc3339()));
        if let Some(p) = platform {
            query = query.bind(("platform", p.to_string()));
        }
        query.await?;
        Ok(())
    }

    /// Un-deletes rows soft-deleted within the recovery window.
    pub async fn restore(
        db: &SurrealDbClient,
        tenant_id: &str,
        platform: &str,
    ) -> Result<usize, AppError> {
        let cutoff = (Utc::now() - chrono::Duration::days(SOFT_DELETE_WINDOW_DAYS)).to_rfc3339();
        let restored: Vec<Self> = db
            .query(
                "UPDATE integrated_object SET deleted_at = NONE \
                 WHERE tenant_id = $tenant_id AND platform = $platform \
                 AND deleted_at != NONE AND deleted_at >= $cutoff",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("platform", platform.to_string()))
            .bind(("cutoff", cutoff))
            .await?
            .take(0)?;
        Ok(restored.len())
    }
}
