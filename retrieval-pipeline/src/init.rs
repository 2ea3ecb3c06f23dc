use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    storage::types::integrated_object::{IntegratedObject, ObjectType},
    vector::{DocType, SearchHit},
};
use llm_router::summarizer::{ConversationTurn, SummaryInput};
use llm_router::TicketSummary;
use platform_adapter::PlatformAdapter;

use crate::{
    reply::{ContextStore, StoredContext},
    RetrievalDeps,
};

/// Upstream fetch budget before falling back to the local store.
const LIVE_FETCH_TIMEOUT: Duration = Duration::from_secs(3);
/// Smart conversation filter limits.
const MAX_FILTERED_CONVERSATIONS: usize = 15;
const MAX_CHARS_PER_CONVERSATION: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct TicketData {
    pub original_id: String,
    pub subject: String,
    pub description: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub from_live_upstream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarDoc {
    pub original_id: String,
    pub doc_type: String,
    pub score: f32,
    pub summary: Option<String>,
    pub brief: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub context_id: String,
    pub ticket_data: TicketData,
    pub summary: TicketSummary,
    pub similar_tickets: Vec<SimilarDoc>,
    pub kb_documents: Vec<SimilarDoc>,
}

/// Progress event emitted on the streaming variant.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InitEvent {
    Progress {
        stage: String,
        progress_percent: u8,
    },
    Complete {
        result: Box<InitResult>,
    },
    Error {
        message: String,
    },
}

struct LoadedTicket {
    data: TicketData,
    conversations: Vec<ConversationTurn>,
}

/// A conversation's usefulness for the init context: informative turns are
/// longer, mention concrete problems, or carry questions.
fn informativeness(turn: &ConversationTurn) -> f64 {
    let chars = turn.body.chars().count();
    #[allow(clippy::cast_precision_loss)]
    let mut score = (chars.min(MAX_CHARS_PER_CONVERSATION) as f64)
        / MAX_CHARS_PER_CONVERSATION as f64;

    let lowered = turn.body.to_lowercase();
    for marker in ["error", "fail", "문제", "오류", "안됨", "not working", "how"] {
        if lowered.contains(marker) {
            score += 0.3;
        }
    }
    if lowered.contains('?') {
        score += 0.2;
    }
    if turn.from_agent {
        score += 0.1;
    }
    score
}

/// Selects up to 15 conversations of at most 500 chars each, preferring the
/// most informative turns but keeping chronological order.
pub fn filter_conversations(conversations: &[ConversationTurn]) -> Vec<ConversationTurn> {
    if conversations.len() <= MAX_FILTERED_CONVERSATIONS {
        return conversations
            .iter()
            .map(|turn| ConversationTurn {
                from_agent: turn.from_agent,
                body: turn.body.chars().take(MAX_CHARS_PER_CONVERSATION).collect(),
            })
            .collect();
    }

    let mut scored: Vec<(usize, f64)> = conversations
        .iter()
        .enumerate()
        .map(|(i, turn)| (i, informativeness(turn)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<usize> = scored
        .into_iter()
        .take(MAX_FILTERED_CONVERSATIONS)
        .map(|(i, _)| i)
        .collect();
    selected.sort_unstable();

    selected
        .into_iter()
        .filter_map(|i| conversations.get(i))
        .map(|turn| ConversationTurn {
            from_agent: turn.from_agent,
            body: turn.body.chars().take(MAX_CHARS_PER_CONVERSATION).collect(),
        })
        .collect()
}

async fn load_ticket(
    deps: &RetrievalDeps,
    adapter: Option<&Arc<dyn PlatformAdapter>>,
    tenant_id: &str,
    platform: &str,
    ticket_id: &str,
) -> Result<LoadedTicket, AppError> {
    if let Some(adapter) = adapter {
        let live = tokio::time::timeout(LIVE_FETCH_TIMEOUT, adapter.get_ticket(ticket_id)).await;
        match live {
            Ok(Ok(Some(ticket))) => {
                let conversations = adapter
                    .list_conversations(ticket_id)
                    .await
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| ConversationTurn {
                        from_agent: c.from_agent,
                        body: c.body_text,
                    })
                    .collect();
                return Ok(LoadedTicket {
                    data: TicketData {
                        original_id: ticket.original_id,
                        subject: ticket.subject,
                        description: ticket.description_text,
                        status: Some(ticket.status),
                        priority: Some(ticket.priority),
                        from_live_upstream: true,
                    },
                    conversations,
                });
            }
            Ok(Ok(None)) => {
                info!(ticket_id, "ticket absent upstream; using stored copy");
            }
            Ok(Err(err)) => {
                warn!(ticket_id, error = %err, "live fetch failed; using stored copy");
            }
            Err(_elapsed) => {
                warn!(ticket_id, "live fetch timed out; using stored copy");
            }
        }
    }

    let stored = IntegratedObject::get(
        &deps.store,
        tenant_id,
        platform,
        ObjectType::Ticket,
        ticket_id,
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("ticket {ticket_id} not found")))?;

    let conversations = IntegratedObject::get_conversations_for_ticket(
        &deps.store,
        tenant_id,
        platform,
        ticket_id,
    )
    .await?
    .into_iter()
    .map(|c| ConversationTurn {
        from_agent: false,
        body: c.integrated_content,
    })
    .collect();

    let subject = stored
        .original_data
        .get("subject")
        .and_then(Value::as_str)
        .unwrap_or(&stored.integrated_content)
        .to_string();
    let description = stored
        .original_data
        .get("description_text")
        .or_else(|| stored.original_data.get("description"))
        .and_then(Value::as_str)
        .map_or_else(|| stored.integrated_content.clone(), str::to_string);

    Ok(LoadedTicket {
        data: TicketData {
            original_id: stored.original_id,
            subject,
            description,
            status: stored.metadata.status,
            priority: stored.metadata.priority,
            from_live_upstream: false,
        },
        conversations,
    })
}

fn hit_to_doc(hit: &SearchHit) -> SimilarDoc {
    SimilarDoc {
        original_id: hit.record.original_id.clone(),
        doc_type: hit
            .record
            .doc_type
            .clone()
            .unwrap_or_else(|| "ticket".to_string()),
        score: hit.score,
        summary: hit.record.summary.clone(),
        brief: None,
    }
}

/// The `/init` flow: live-or-stored ticket, content assembly,
/// then parallel summary + typed vector searches, with per-similar-ticket
/// briefs once the similar set is known.
pub async fn init(
    deps: &RetrievalDeps,
    contexts: &ContextStore,
    adapter: Option<&Arc<dyn PlatformAdapter>>,
    tenant_id: &str,
    platform: &str,
    ticket_id: &str,
    top_k: usize,
) -> Result<InitResult, AppError> {
    let loaded = load_ticket(deps, adapter, tenant_id, platform, ticket_id).await?;
    let filtered = filter_conversations(&loaded.conversations);

    let content = format!(
        "subject: {}\ndescription: {}\nconversations: {}",
        loaded.data.subject,
        loaded.data.description,
        filtered
            .iter()
            .map(|turn| turn.body.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    );

    let summary_input = SummaryInput {
        ticket_id: ticket_id.to_string(),
        subject: loaded.data.subject.clone(),
        description: loaded.data.description.clone(),
        conversations: filtered,
    };

    let embedding = deps.router.embed(&content).await?;

    // The three branches have no mutual ordering; wait for all of them
    let (summary, similar_hits, kb_hits) = tokio::join!(
        deps.summarizer.summarize(&summary_input),
        deps.vector.search(
            &embedding,
            top_k + 1,
            tenant_id,
            Some(platform),
            Some(DocType::Ticket),
        ),
        deps.vector.search(
            &embedding,
            top_k,
            tenant_id,
            Some(platform),
            Some(DocType::Article),
        ),
    );
    let summary = summary?;

    let mut similar_tickets: Vec<SimilarDoc> = similar_hits?
        .iter()
        .filter(|hit| hit.record.original_id != ticket_id)
        .take(top_k)
        .map(hit_to_doc)
        .collect();
    let kb_documents: Vec<SimilarDoc> = kb_hits?.iter().take(top_k).map(hit_to_doc).collect();

    // Light briefs for the similar tickets, generated concurrently
    let briefs = futures::future::join_all(similar_tickets.iter().map(|doc| {
        let text = doc.summary.clone().unwrap_or_default();
        let subject = doc.original_id.clone();
        async move {
            if text.is_empty() {
                return None;
            }
            deps.summarizer.summarize_brief(&subject, &text).await.ok()
        }
    }))
    .await;
    for (doc, brief) in similar_tickets.iter_mut().zip(briefs) {
        doc.brief = brief;
    }

    let context_id = Uuid::new_v4().to_string();
    contexts
        .put(
            &context_id,
            StoredContext {
                tenant_id: tenant_id.to_string(),
                platform: platform.to_string(),
                ticket_id: ticket_id.to_string(),
                content,
                summary_text: summary.ticket_summary.clone(),
            },
        )
        .await;

    Ok(InitResult {
        context_id,
        ticket_data: loaded.data,
        summary,
        similar_tickets,
        kb_documents,
    })
}

/// Streaming variant: emits progress events per stage, then the aggregate.
#[allow(clippy::too_many_arguments)]
pub fn init_stream(
    deps: RetrievalDeps,
    contexts: ContextStore,
    adapter: Option<Arc<dyn PlatformAdapter>>,
    tenant_id: String,
    platform: String,
    ticket_id: String,
    top_k: usize,
) -> impl Stream<Item = InitEvent> {
    async_stream::stream! {
        yield InitEvent::Progress { stage: "ticket_fetch".to_string(), progress_percent: 10 };

        let result = init(
            &deps,
            &contexts,
            adapter.as_ref(),
            &tenant_id,
            &platform,
            &ticket_id,
            top_k,
        )
        .await;

        match result {
            Ok(result) => {
                yield InitEvent::Progress { stage: "summary".to_string(), progress_percent: 60 };
                yield InitEvent::Progress { stage: "similar_tickets".to_string(), progress_percent: 80 };
                yield InitEvent::Progress { stage: "kb_documents".to_string(), progress_percent: 90 };
                yield InitEvent::Complete { result: Box::new(result) };
            }
            Err(err) => {
                yield InitEvent::Error { message: err.to_string() };
            }
        }
    }
}

/// Serializes an event for an SSE `data:` line.
pub fn event_json(event: &InitEvent) -> Value {
    json!(event)
}
