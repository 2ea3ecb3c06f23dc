use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use common::error::AppError;

use crate::{
    quality::{score_summary, QualityScore},
    router::{GenerateOptions, LlmRouter},
};

/// Conversations included in the summary context.
const CONTEXT_CONVERSATIONS: usize = 5;
/// Per-conversation character budget in the context.
const CONTEXT_CONVERSATION_CHARS: usize = 200;
/// Quality retries in batch mode.
const MAX_QUALITY_RETRIES: u32 = 3;
/// Concurrent summaries in batch mode.
const BATCH_CONCURRENCY: usize = 10;

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub from_agent: bool,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct SummaryInput {
    pub ticket_id: String,
    pub subject: String,
    pub description: String,
    pub conversations: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSummary {
    pub ticket_summary: String,
    pub key_points: Vec<String>,
    pub sentiment: String,
    pub priority_recommendation: String,
    pub urgency_level: String,
}

/// Task-typed summary generation with quality scoring.
pub struct Summarizer {
    router: Arc<LlmRouter>,
    cache: Cache<String, TicketSummary>,
}

impl Summarizer {
    pub fn new(router: Arc<LlmRouter>, cache_capacity: u64, cache_ttl: Duration) -> Self {
        Self {
            router,
            cache: Cache::builder()
                .max_capacity(cache_capacity)
                .time_to_live(cache_ttl)
                .build(),
        }
    }

    fn cache_key(input: &SummaryInput) -> String {
        let content_hash = md5::compute(
            format!("{}_{}", input.subject, input.description).as_bytes(),
        );
        format!("summary_{}_{:x}", input.ticket_id, content_hash)
    }

    /// Context string: subject, normalized body, and the last few
    /// conversations trimmed to a fixed length each.
    pub fn build_context(input: &SummaryInput) -> String {
        let mut context = format!(
            "티켓 제목: {}\n티켓 설명: {}\n",
            input.subject, input.description
        );

        if !input.conversations.is_empty() {
            context.push_str("\n최근 대화 내용:\n");
            let start = input
                .conversations
                .len()
                .saturating_sub(CONTEXT_CONVERSATIONS);
            for turn in &input.conversations[start..] {
                let sender = if turn.from_agent { "상담원" } else { "사용자" };
                let mut body: String =
                    turn.body.chars().take(CONTEXT_CONVERSATION_CHARS).collect();
                if turn.body.chars().count() > CONTEXT_CONVERSATION_CHARS {
                    body.push_str("...");
                }
                context.push_str(&format!("- {sender}: {body}\n"));
            }
        }

        context
    }

    fn prompt(context: &str) -> String {
        format!(
            "다음 티켓 정보를 분석하고 요약해주세요:\n\n{context}\n\n\
             다음 형식으로 마크다운 형태로 응답해주세요:\n\n\
             ## 상황 요약\n[티켓의 전반적인 상황을 2-3문장으로 요약]\n\n\
             ## 주요 내용\n- 문제: [고객이 겪고 있는 주요 문제]\n\
             - 요청: [고객의 구체적인 요청사항]\n\
             - 조치: [상담원이 취한 조치나 제공한 답변]\n\n\
             ## 핵심 포인트\n1. [가장 중요한 포인트]\n2. [두 번째 중요한 포인트]\n3. [세 번째 중요한 포인트]\n\n\
             ## 처리 권장사항\n[다음 단계에 대한 권장사항]\n\n\
             응답은 반드시 한국어로 해주시고, 마크다운 형식을 정확히 지켜주세요."
        )
    }

    fn system_prompt() -> String {
        "당신은 고객 지원 티켓을 분석하는 전문가입니다. \
         티켓 내용을 분석하여 구조화된 요약을 생성해주세요."
            .to_string()
    }

    /// Parses the structured response into its fields. Parsing is lenient:
    /// a malformed response still yields a usable summary with defaults.
    pub fn parse(text: &str) -> TicketSummary {
        let mut key_points = Vec::new();
        let mut in_key_points = false;
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.contains("핵심 포인트") || trimmed.to_lowercase().contains("key points")
            {
                in_key_points = true;
                continue;
            }
            if in_key_points {
                if trimmed.starts_with("##") {
                    in_key_points = false;
                    continue;
                }
                let cleaned = trimmed
                    .trim_start_matches(|c: char| {
                        c.is_ascii_digit() || c == '.' || c == '-' || c == ')' || c == ' '
                    })
                    .trim();
                if !cleaned.is_empty() {
                    key_points.push(cleaned.to_string());
                }
            }
        }

        let lowered = text.to_lowercase();
        let sentiment = if lowered.contains("긍정") || lowered.contains("positive") {
            "positive"
        } else if lowered.contains("부정")
            || lowered.contains("불만")
            || lowered.contains("negative")
        {
            "negative"
        } else {
            "neutral"
        };

        let priority_recommendation = if lowered.contains("긴급") || lowered.contains("urgent") {
            "urgent"
        } else if lowered.contains("높음") || lowered.contains("high") {
            "high"
        } else {
            "medium"
        };

        let urgency_level = if lowered.contains("긴급")
            || lowered.contains("urgent")
            || lowered.contains("즉시")
        {
            "high"
        } else {
            "medium"
        };

        TicketSummary {
            ticket_summary: text.trim().to_string(),
            key_points,
            sentiment: sentiment.to_string(),
            priority_recommendation: priority_recommendation.to_string(),
            urgency_level: urgency_level.to_string(),
        }
    }

    async fn generate_once(&self, input: &SummaryInput) -> Result<(TicketSummary, QualityScore), AppError> {
        let context = Self::build_context(input);
        let response = self
            .router
            .generate(
                &Self::prompt(&context),
                GenerateOptions {
                    system_prompt: Some(Self::system_prompt()),
                    operation: Some("ticket_summary".to_string()),
                    ..GenerateOptions::default()
                },
            )
            .await?;

        let score = score_summary(&response.text, &context);
        Ok((Self::parse(&response.text), score))
    }

    /// Cached single summary (6 h TTL keyed on ticket id + content hash).
    pub async fn summarize(&self, input: &SummaryInput) -> Result<TicketSummary, AppError> {
        let key = Self::cache_key(input);
        self.cache
            .try_get_with(key, async {
                let (summary, score) = self.generate_once(input).await?;
                debug!(
                    ticket_id = %input.ticket_id,
                    overall = score.overall,
                    "ticket summary generated"
                );
                Ok::<_, AppError>(summary)
            })
            .await
            .map_err(|e: Arc<AppError>| AppError::Processing(e.to_string()))
    }

    /// Quality-gated summary: retried until the score clears the thresholds
    /// or attempts run out, keeping the best attempt.
    pub async fn summarize_scored(
        &self,
        input: &SummaryInput,
    ) -> Result<(TicketSummary, QualityScore), AppError> {
        let mut best: Option<(TicketSummary, QualityScore)> = None;

        for attempt in 1..=MAX_QUALITY_RETRIES {
            let (summary, score) = self.generate_once(input).await?;
            if score.acceptable() {
                self.cache.insert(Self::cache_key(input), summary.clone()).await;
                return Ok((summary, score));
            }
            warn!(
                ticket_id = %input.ticket_id,
                attempt,
                overall = score.overall,
                structure = score.structure,
                "summary below quality threshold"
            );
            let replace = best
                .as_ref()
                .is_none_or(|(_, best_score)| score.overall > best_score.overall);
            if replace {
                best = Some((summary, score));
            }
        }

        best.ok_or_else(|| AppError::Processing("summary generation yielded nothing".into()))
    }

    /// One-line summary for similar-ticket panels.
    pub async fn summarize_brief(
        &self,
        subject: &str,
        content: &str,
    ) -> Result<String, AppError> {
        let response = self
            .router
            .generate(
                &format!(
                    "다음 티켓을 한 문장으로 요약해주세요:\n제목: {subject}\n내용: {}",
                    content.chars().take(500).collect::<String>()
                ),
                GenerateOptions {
                    operation: Some("similar_ticket_summary".to_string()),
                    max_tokens: Some(128),
                    ..GenerateOptions::default()
                },
            )
            .await?;
        Ok(response.text.trim().to_string())
    }

    /// Bounded-concurrency batch mode with progress streaming.
    pub async fn batch_summarize<F>(
        &self,
        inputs: Vec<SummaryInput>,
        progress: F,
    ) -> Vec<Result<(TicketSummary, QualityScore), AppError>>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let total = inputs.len();
        let semaphore = Arc::new(Semaphore::new(BATCH_CONCURRENCY));
        let completed = AtomicUsize::new(0);

        let tasks = inputs.iter().map(|input| {
            let semaphore = Arc::clone(&semaphore);
            let completed = &completed;
            let progress = &progress;
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| AppError::InternalError("semaphore closed".into()))?;
                let result = self.summarize_scored(input).await;
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                progress(done, total);
                result
            }
        });

        join_all(tasks).await
    }
}
