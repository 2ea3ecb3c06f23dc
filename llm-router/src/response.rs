use serde::Serialize;

/// Result of one routed generation, with enough metadata for callers to see
/// which provider answered and whether failover happened.
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub duration_ms: u64,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
    pub provider: String,
    pub attempt: u32,
    pub is_fallback: bool,
}
