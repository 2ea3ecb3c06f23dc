use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;

use common::error::AppError;
use llm_router::router::GenerateOptions;

use crate::RetrievalDeps;

/// Context captured by `/init`, kept for follow-up `/reply` calls.
#[derive(Debug, Clone)]
pub struct StoredContext {
    pub tenant_id: String,
    pub platform: String,
    pub ticket_id: String,
    pub content: String,
    pub summary_text: String,
}

/// TTL map of init contexts keyed by context id.
#[derive(Clone)]
pub struct ContextStore {
    cache: Cache<String, StoredContext>,
}

impl ContextStore {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn put(&self, context_id: &str, context: StoredContext) {
        self.cache.insert(context_id.to_string(), context).await;
    }

    pub async fn get(&self, context_id: &str) -> Option<StoredContext> {
        self.cache.get(context_id).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyResult {
    pub reply_text: String,
    pub ticket_id: String,
    pub provider: String,
    pub is_fallback: bool,
}

/// Generates a customer-facing reply grounded in a prior init context.
/// Unknown or expired context ids surface as `NotFound`.
pub async fn reply(
    deps: &RetrievalDeps,
    contexts: &ContextStore,
    tenant_id: &str,
    context_id: &str,
    instructions: Option<&str>,
) -> Result<ReplyResult, AppError> {
    let context = contexts
        .get(context_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("context {context_id} not found")))?;

    if context.tenant_id != tenant_id {
        return Err(AppError::Auth(
            "context belongs to another tenant".to_string(),
        ));
    }

    let instructions = instructions.unwrap_or("정중하고 간결하게 답변해주세요.");
    let prompt = format!(
        "다음 티켓 내용과 요약을 바탕으로 고객에게 보낼 답변 초안을 작성해주세요.\n\n\
         티켓 내용:\n{}\n\n요약:\n{}\n\n지침: {}",
        context.content, context.summary_text, instructions
    );

    let response = deps
        .router
        .generate(
            &prompt,
            GenerateOptions {
                system_prompt: Some(
                    "당신은 고객 지원 상담원입니다. 고객에게 보낼 답변을 작성합니다."
                        .to_string(),
                ),
                operation: Some("agent_reply".to_string()),
                ..GenerateOptions::default()
            },
        )
        .await?;

    Ok(ReplyResult {
        reply_text: response.text,
        ticket_id: context.ticket_id,
        provider: response.provider,
        is_fallback: response.is_fallback,
    })
}
