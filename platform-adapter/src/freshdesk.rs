use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use url::Url;

use common::error::AppError;

use crate::{
    types::{NeutralArticle, NeutralAttachment, NeutralConversation, NeutralTicket},
    PlatformAdapter,
};

/// Default retry cap for one upstream request.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Minimum pause between any two upstream requests.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(300);
/// Upper bound for exponential backoff sleeps.
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Hard stop for internal pagination loops.
const MAX_INTERNAL_PAGES: u32 = 50;

/// Builds the API base URL from a bare company name, a full Freshdesk host,
/// or a URL with scheme (whose path and port are discarded).
pub fn base_url_from_domain(domain: &str) -> String {
    let trimmed = domain.trim().trim_end_matches('/');
    let host = if trimmed.contains("://") {
        Url::parse(trimmed)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| {
                trimmed
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string()
            })
    } else {
        trimmed.to_string()
    };

    if host.contains(".freshdesk.com") {
        format!("https://{host}/api/v2")
    } else {
        format!("https://{host}.freshdesk.com/api/v2")
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64.saturating_mul(1u64 << attempt.min(5));
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

pub struct FreshdeskAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
    request_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl FreshdeskAdapter {
    pub fn new(domain: &str, api_key: &str) -> Self {
        Self::with_pacing(domain, api_key, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_DELAY)
    }

    pub fn with_pacing(
        domain: &str,
        api_key: &str,
        max_retries: u32,
        request_delay: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url_from_domain(domain),
            api_key: api_key.to_string(),
            max_retries,
            request_delay,
            last_request: Mutex::new(None),
        }
    }

    /// Enforces the minimum inter-request delay across concurrent callers.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.request_delay {
                sleep(self.request_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn header_u64(response: &Response, name: &str) -> Option<u64> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// One GET with retry: exponential backoff on transport errors and 5xx,
    /// `Retry-After` on 429, pre-emptive sleep when the rate-limit budget is
    /// nearly exhausted. Non-429 4xx statuses propagate immediately.
    async fn request(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Option<Response>, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            self.pace().await;

            let result = self
                .http
                .get(&url)
                .basic_auth(&self.api_key, Some("X"))
                .query(params)
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        return Err(AppError::ExternalService(format!(
                            "upstream request failed after {attempt} attempts: {err}"
                        )));
                    }
                    warn!(url = %url, attempt, error = %err, "transport error; retrying");
                    sleep(backoff_delay(attempt)).await;
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                attempt += 1;
                if attempt >= self.max_retries {
                    let retry_after =
                        Self::header_u64(&response, "Retry-After").unwrap_or(5);
                    return Err(AppError::RateLimited {
                        retry_after_secs: retry_after,
                    });
                }
                let retry_after = Self::header_u64(&response, "Retry-After")
                    .map_or_else(|| backoff_delay(attempt), Duration::from_secs);
                warn!(url = %url, attempt, delay_secs = retry_after.as_secs(), "429 from upstream");
                sleep(retry_after).await;
                continue;
            }

            if status.is_server_error() {
                attempt += 1;
                if attempt >= self.max_retries {
                    return Err(AppError::ExternalService(format!(
                        "upstream returned {status} after {attempt} attempts"
                    )));
                }
                warn!(url = %url, attempt, %status, "server error; retrying");
                sleep(backoff_delay(attempt)).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::ExternalService(format!(
                    "upstream returned {status}: {body}"
                )));
            }

            // Nearly out of budget: wait out the window before handing back
            if Self::header_u64(&response, "X-RateLimit-Remaining").is_some_and(|r| r <= 1) {
                let reset = Self::header_u64(&response, "X-RateLimit-Reset").unwrap_or(5);
                debug!(reset_secs = reset, "rate-limit budget exhausted; sleeping");
                sleep(Duration::from_secs(reset)).await;
            }

            return Ok(Some(response));
        }
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value, AppError> {
        let response = self.request(path, params).await?.ok_or_else(|| {
            AppError::NotFound(format!("upstream resource not found: {path}"))
        })?;
        Ok(response.json().await?)
    }

    async fn get_json_optional(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Option<Value>, AppError> {
        match self.request(path, params).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }

    fn array_items(value: Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }

    async fn conversation_values(&self, ticket_original_id: &str) -> Result<Vec<Value>, AppError> {
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let body = self
                .get_json(
                    &format!("/tickets/{ticket_original_id}/conversations"),
                    &[("page", page.to_string()), ("per_page", "100".to_string())],
                )
                .await?;
            let items = Self::array_items(body);
            let count = items.len();
            all.extend(items);
            if count < 100 || page >= MAX_INTERNAL_PAGES {
                break;
            }
            page += 1;
        }
        Ok(all)
    }
}

#[async_trait]
impl PlatformAdapter for FreshdeskAdapter {
    fn platform(&self) -> &str {
        "freshdesk"
    }

    async fn list_tickets(
        &self,
        page: u32,
        per_page: u32,
        updated_since: &str,
    ) -> Result<Vec<NeutralTicket>, AppError> {
        let body = self
            .get_json(
                "/tickets",
                &[
                    ("page", page.to_string()),
                    ("per_page", per_page.to_string()),
                    ("updated_since", updated_since.to_string()),
                    ("order_by", "updated_at".to_string()),
                    ("order_type", "asc".to_string()),
                    ("include", "description".to_string()),
                ],
            )
            .await?;

        Ok(Self::array_items(body)
            .into_iter()
            .map(NeutralTicket::from_upstream)
            .collect())
    }

    async fn get_ticket(&self, original_id: &str) -> Result<Option<NeutralTicket>, AppError> {
        let body = self
            .get_json_optional(
                &format!("/tickets/{original_id}"),
                &[("include", "description".to_string())],
            )
            .await?;
        Ok(body.map(NeutralTicket::from_upstream))
    }

    async fn list_conversations(
        &self,
        ticket_original_id: &str,
    ) -> Result<Vec<NeutralConversation>, AppError> {
        let values = self.conversation_values(ticket_original_id).await?;
        Ok(values
            .into_iter()
            .map(|raw| NeutralConversation::from_upstream(ticket_original_id, raw))
            .collect())
    }

    async fn list_attachments(
        &self,
        ticket_original_id: &str,
    ) -> Result<Vec<NeutralAttachment>, AppError> {
        let mut attachments = Vec::new();

        if let Some(detail) = self
            .get_json_optional(&format!("/tickets/{ticket_original_id}"), &[])
            .await?
        {
            if let Some(items) = detail.get("attachments").cloned() {
                attachments.extend(Self::array_items(items).into_iter().map(|raw| {
                    NeutralAttachment::from_upstream("ticket", ticket_original_id, raw)
                }));
            }
        }

        for conversation in self.conversation_values(ticket_original_id).await? {
            let conversation_id = conversation
                .get("id")
                .map(|id| match id {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.clone(),
                    _ => String::new(),
                })
                .unwrap_or_default();
            if let Some(items) = conversation.get("attachments").cloned() {
                attachments.extend(Self::array_items(items).into_iter().map(|raw| {
                    NeutralAttachment::from_upstream("conversation", &conversation_id, raw)
                }));
            }
        }

        Ok(attachments)
    }

    async fn list_kb(&self) -> Result<Vec<NeutralArticle>, AppError> {
        let categories = Self::array_items(self.get_json("/solution/categories", &[]).await?);

        let mut articles = Vec::new();
        for category in categories {
            let Some(category_id) = category.get("id").and_then(Value::as_i64) else {
                continue;
            };
            let folders = Self::array_items(
                self.get_json(&format!("/solution/categories/{category_id}/folders"), &[])
                    .await?,
            );

            for folder in folders {
                let Some(folder_id) = folder.get("id").and_then(Value::as_i64) else {
                    continue;
                };
                let mut page = 1u32;
                loop {
                    let body = self
                        .get_json(
                            &format!("/solution/folders/{folder_id}/articles"),
                            &[("page", page.to_string()), ("per_page", "100".to_string())],
                        )
                        .await?;
                    let items = Self::array_items(body);
                    let count = items.len();
                    articles.extend(items.into_iter().map(NeutralArticle::from_upstream));
                    if count < 100 || page >= MAX_INTERNAL_PAGES {
                        break;
                    }
                    page += 1;
                }
            }
        }

        Ok(articles)
    }
}
