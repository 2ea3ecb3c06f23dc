use std::sync::OnceLock;

use axum::{extract::FromRequestParts, http::request::Parts};
use regex::Regex;

use crate::error::ApiError;

/// Tenant ids that can never be used by a customer.
const RESERVED_TENANT_IDS: [&str; 7] =
    ["admin", "api", "www", "app", "system", "root", "internal"];

fn tenant_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]{2,50}$").unwrap())
}

/// Per-request tenant identity, extracted from the `X-Tenant-ID`,
/// `X-Platform`, `X-Domain` and `X-API-Key` headers.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub platform: String,
    pub domain: String,
    pub api_key: String,
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = header(parts, "X-Tenant-ID")
            .ok_or_else(|| ApiError::ValidationError("missing X-Tenant-ID header".to_string()))?
            .to_string();

        if !tenant_id_pattern().is_match(&tenant_id) {
            return Err(ApiError::ValidationError(format!(
                "invalid tenant id: {tenant_id}"
            )));
        }
        if RESERVED_TENANT_IDS.contains(&tenant_id.to_lowercase().as_str()) {
            return Err(ApiError::ValidationError(format!(
                "reserved tenant id: {tenant_id}"
            )));
        }

        let platform = header(parts, "X-Platform")
            .unwrap_or("freshdesk")
            .to_string();
        let domain = header(parts, "X-Domain")
            .ok_or_else(|| ApiError::ValidationError("missing X-Domain header".to_string()))?
            .to_string();
        let api_key = header(parts, "X-API-Key")
            .ok_or_else(|| ApiError::ValidationError("missing X-API-Key header".to_string()))?
            .to_string();

        Ok(Self {
            tenant_id,
            platform,
            domain,
            api_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<TenantContext, ApiError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(()).expect("request");
        let (mut parts, ()) = request.into_parts();
        TenantContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn extracts_all_four_headers() {
        let context = extract(&[
            ("X-Tenant-ID", "acme"),
            ("X-Platform", "zendesk"),
            ("X-Domain", "acme.help.example"),
            ("X-API-Key", "k1"),
        ])
        .await
        .expect("context");

        assert_eq!(context.tenant_id, "acme");
        assert_eq!(context.platform, "zendesk");
        assert_eq!(context.domain, "acme.help.example");
        assert_eq!(context.api_key, "k1");
    }

    #[tokio::test]
    async fn platform_defaults_to_freshdesk() {
        let context = extract(&[
            ("X-Tenant-ID", "acme"),
            ("X-Domain", "acme.help.example"),
            ("X-API-Key", "k1"),
        ])
        .await
        .expect("context");
        assert_eq!(context.platform, "freshdesk");
    }

    #[tokio::test]
    async fn missing_headers_are_rejected() {
        assert!(extract(&[]).await.is_err());
        assert!(extract(&[("X-Tenant-ID", "acme")]).await.is_err());
        assert!(extract(&[
            ("X-Tenant-ID", "acme"),
            ("X-Domain", "acme.help.example")
        ])
        .await
        .is_err());
    }

    #[tokio::test]
    async fn invalid_and_reserved_tenants_are_rejected() {
        let too_long = "way-too-long-".repeat(5);
        for bad in ["a", "has spaces", too_long.as_str(), "admin", "ROOT"] {
            let result = extract(&[
                ("X-Tenant-ID", bad),
                ("X-Domain", "d"),
                ("X-API-Key", "k"),
            ])
            .await;
            assert!(result.is_err(), "{bad} should be rejected");
        }
    }
}
