use uuid::Uuid;

/// Known upstream id prefixes that are stripped during normalization.
const STRIPPED_PREFIXES: [&str; 2] = ["ticket-", "kb-"];

/// Normalizes an upstream object id into the platform-neutral `original_id`.
pub fn normalize_original_id(raw: &str) -> String {
    let trimmed = raw.trim();
    for prefix in STRIPPED_PREFIXES {
        if let Some(stripped) = trimmed.strip_prefix(prefix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

/// Deterministic vector point id for a 3-tuple.
///
/// The same `(tenant_id, platform, original_id)` always maps to the same
/// UUID, which makes vector upserts idempotent.
pub fn point_uuid(tenant_id: &str, platform: &str, original_id: &str) -> Uuid {
    let unique_key = format!("{tenant_id}:{platform}:{original_id}");
    let digest = md5::compute(unique_key.as_bytes());
    Uuid::from_bytes(digest.0)
}
