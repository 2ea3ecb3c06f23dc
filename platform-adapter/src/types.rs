use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::utils::ids::normalize_original_id;

/// Maps an upstream priority code to its portable label. Already-normalized
/// labels pass through unchanged; unknown codes become their own string so
/// ingestion never stalls on upstream variance.
pub fn priority_label(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(1) => "low".to_string(),
            Some(2) => "medium".to_string(),
            Some(3) => "high".to_string(),
            Some(4) => "urgent".to_string(),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        _ => "medium".to_string(),
    }
}

/// Ticket status code map: `{2: open, 3: pending, 4: resolved, 5: closed}`.
pub fn ticket_status_label(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(2) => "open".to_string(),
            Some(3) => "pending".to_string(),
            Some(4) => "resolved".to_string(),
            Some(5) => "closed".to_string(),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        _ => "open".to_string(),
    }
}

/// Knowledge-base status code map: `{1: draft, 2: published}`.
pub fn article_status_label(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(1) => "draft".to_string(),
            Some(2) => "published".to_string(),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        _ => "draft".to_string(),
    }
}

fn string_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn id_field(raw: &Value, key: &str) -> String {
    match raw.get(key) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => normalize_original_id(s),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeutralTicket {
    pub original_id: String,
    pub subject: String,
    pub description_text: String,
    pub status: String,
    pub priority: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub raw: Value,
}

impl NeutralTicket {
    pub fn from_upstream(raw: Value) -> Self {
        let status = raw
            .get("status")
            .map_or_else(|| "open".to_string(), ticket_status_label);
        let priority = raw
            .get("priority")
            .map_or_else(|| "medium".to_string(), priority_label);

        Self {
            original_id: id_field(&raw, "id"),
            subject: string_field(&raw, "subject"),
            description_text: {
                let text = string_field(&raw, "description_text");
                if text.is_empty() {
                    string_field(&raw, "description")
                } else {
                    text
                }
            },
            status,
            priority,
            created_at: raw.get("created_at").and_then(Value::as_str).map(str::to_string),
            updated_at: raw.get("updated_at").and_then(Value::as_str).map(str::to_string),
            raw,
        }
    }

    /// Searchable text used as `integrated_content`.
    pub fn integrated_content(&self) -> String {
        format!(
            "subject: {}\ndescription: {}",
            self.subject, self.description_text
        )
    }

    /// True when the listing payload is missing fields only the detail
    /// endpoint provides.
    pub fn needs_detail_fetch(&self) -> bool {
        self.description_text.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeutralConversation {
    pub original_id: String,
    pub ticket_original_id: String,
    pub body_text: String,
    pub from_agent: bool,
    pub created_at: Option<String>,
    pub raw: Value,
}

impl NeutralConversation {
    pub fn from_upstream(ticket_original_id: &str, raw: Value) -> Self {
        let body = {
            let text = string_field(&raw, "body_text");
            if text.is_empty() {
                string_field(&raw, "body")
            } else {
                text
            }
        };
        // Freshdesk marks agent replies with `incoming = false`
        let from_agent = !raw.get("incoming").and_then(Value::as_bool).unwrap_or(true);

        Self {
            original_id: id_field(&raw, "id"),
            ticket_original_id: ticket_original_id.to_string(),
            body_text: body,
            from_agent,
            created_at: raw.get("created_at").and_then(Value::as_str).map(str::to_string),
            raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeutralAttachment {
    pub original_id: String,
    pub parent_type: String,
    pub parent_original_id: String,
    pub name: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub raw: Value,
}

impl NeutralAttachment {
    pub fn from_upstream(parent_type: &str, parent_original_id: &str, raw: Value) -> Self {
        Self {
            original_id: id_field(&raw, "id"),
            parent_type: parent_type.to_string(),
            parent_original_id: parent_original_id.to_string(),
            name: string_field(&raw, "name"),
            content_type: raw
                .get("content_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            size: raw.get("size").and_then(Value::as_u64),
            raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeutralArticle {
    pub original_id: String,
    pub title: String,
    pub description_text: String,
    pub status: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub raw: Value,
}

impl NeutralArticle {
    pub fn from_upstream(raw: Value) -> Self {
        let status = raw
            .get("status")
            .map_or_else(|| "draft".to_string(), article_status_label);

        Self {
            original_id: id_field(&raw, "id"),
            title: string_field(&raw, "title"),
            description_text: {
                let text = string_field(&raw, "description_text");
                if text.is_empty() {
                    string_field(&raw, "description")
                } else {
                    text
                }
            },
            status,
            created_at: raw.get("created_at").and_then(Value::as_str).map(str::to_string),
            updated_at: raw.get("updated_at").and_then(Value::as_str).map(str::to_string),
            raw,
        }
    }

    pub fn integrated_content(&self) -> String {
        format!("title: {}\nbody: {}", self.title, self.description_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn code_maps_match_upstream_tables() {
        assert_eq!(priority_label(&json!(1)), "low");
        assert_eq!(priority_label(&json!(4)), "urgent");
        assert_eq!(ticket_status_label(&json!(2)), "open");
        assert_eq!(ticket_status_label(&json!(5)), "closed");
        assert_eq!(article_status_label(&json!(1)), "draft");
        assert_eq!(article_status_label(&json!(2)), "published");
    }

    #[test]
    fn unknown_codes_become_their_own_string() {
        assert_eq!(priority_label(&json!(9)), "9");
        assert_eq!(ticket_status_label(&json!(17)), "17");
    }

    #[test]
    fn normalization_is_idempotent() {
        // Re-normalizing an already-neutral value yields itself
        assert_eq!(priority_label(&json!("high")), "high");
        assert_eq!(ticket_status_label(&json!("pending")), "pending");
        assert_eq!(article_status_label(&json!("published")), "published");
    }

    #[test]
    fn ticket_mapping_extracts_fields() {
        let ticket = NeutralTicket::from_upstream(json!({
            "id": 1001,
            "subject": "Printer offline",
            "description": "It stopped after the update",
            "status": 2,
            "priority": 3,
            "created_at": "2024-03-01T10:00:00Z",
            "updated_at": "2024-03-02T10:00:00Z"
        }));

        assert_eq!(ticket.original_id, "1001");
        assert_eq!(ticket.status, "open");
        assert_eq!(ticket.priority, "high");
        assert_eq!(ticket.description_text, "It stopped after the update");
        assert!(ticket.integrated_content().contains("Printer offline"));
        assert!(!ticket.needs_detail_fetch());
    }

    #[test]
    fn conversation_mapping_detects_agent_replies() {
        let agent_reply = NeutralConversation::from_upstream(
            "1001",
            json!({"id": 7, "body_text": "We are looking into it", "incoming": false}),
        );
        assert!(agent_reply.from_agent);

        let customer_reply = NeutralConversation::from_upstream(
            "1001",
            json!({"id": 8, "body_text": "Any update?", "incoming": true}),
        );
        assert!(!customer_reply.from_agent);
        assert_eq!(customer_reply.ticket_original_id, "1001");
    }

    #[test]
    fn attachment_mapping_records_parent() {
        let attachment = NeutralAttachment::from_upstream(
            "conversation",
            "900",
            json!({"id": 5, "name": "log.txt", "content_type": "text/plain", "size": 2048}),
        );
        assert_eq!(attachment.parent_type, "conversation");
        assert_eq!(attachment.parent_original_id, "900");
        assert_eq!(attachment.size, Some(2048));
    }
}
