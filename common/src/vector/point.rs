use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::utils::ids::point_uuid;

/// Document class a vector point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Ticket,
    Article,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Article => "article",
        }
    }

    /// Accepts both the canonical names and the legacy `kb` spelling.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ticket" => Some(Self::Ticket),
            "article" | "kb" => Some(Self::Article),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One point to upsert: vector plus the tenant-scoped payload.
#[derive(Debug, Clone, Serialize)]
pub struct VectorPoint {
    pub tenant_id: String,
    pub platform: String,
    pub doc_type: DocType,
    pub original_id: String,
    pub object_type: String,
    pub summary: Option<String>,
    pub tenant_metadata: Value,
    pub embedding: Vec<f32>,
}

impl VectorPoint {
    /// Deterministic point id from the 3-tuple.
    pub fn id(&self) -> Uuid {
        point_uuid(&self.tenant_id, &self.platform, &self.original_id)
    }
}

/// A stored point as read back from the collection. Unknown payload fields
/// (legacy `type`, `status`, `source_type`, ...) are captured in `extra` so
/// the in-memory doc-type fallback can inspect them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    #[serde(deserialize_with = "crate::storage::types::deserialize_flexible_id")]
    pub id: String,
    pub tenant_id: String,
    pub platform: String,
    #[serde(default)]
    pub doc_type: Option<String>,
    pub original_id: String,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tenant_metadata: Value,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VectorRecord {
    fn extra_is(&self, key: &str, expected: &str) -> bool {
        match self.extra.get(key) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Number(n)) => n.to_string() == expected,
            _ => false,
        }
    }

    /// In-memory doc-type predicate, tolerant of legacy payloads that never
    /// carried `doc_type`: `type`/`status` of `1` marks a knowledge-base
    /// article, `source_type` of `ticket` marks a ticket.
    pub fn matches_doc_type(&self, wanted: DocType) -> bool {
        if let Some(doc_type) = self.doc_type.as_deref() {
            if DocType::parse(doc_type) == Some(wanted) {
                return true;
            }
        }

        match wanted {
            DocType::Article => self.extra_is("type", "1") || self.extra_is("status", "1"),
            DocType::Ticket => self.extra_is("source_type", "ticket"),
        }
    }
}

/// A search result: the stored record plus its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record: VectorRecord,
    pub distance: f32,
    pub score: f32,
}
