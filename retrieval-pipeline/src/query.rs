use serde::{Deserialize, Serialize};
use serde_json::json;

use common::{error::AppError, vector::DocType};
use llm_router::router::GenerateOptions;

use crate::{
    context_builder::{build_optimized_context, ContextDoc, ContextMetadata, MAX_CONTEXT_TOKENS},
    RetrievalDeps,
};

/// What the caller wants done with the retrieved context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Search,
    Recommend,
    #[default]
    Answer,
    Summarize,
}

impl Intent {
    fn system_prompt(self) -> &'static str {
        match self {
            Self::Search => {
                "당신은 고객 지원 검색 도우미입니다. 검색된 문서들을 근거로 \
                 관련 항목을 찾아 정리해주세요. 각 항목의 출처 문서 번호를 표시하세요."
            }
            Self::Recommend => {
                "당신은 고객 지원 추천 도우미입니다. 검색된 문서들을 근거로 \
                 해결 방법과 참고 문서를 추천해주세요."
            }
            Self::Answer => {
                "당신은 고객 지원 전문가입니다. 검색된 문서들만 근거로 질문에 \
                 답변해주세요. 근거가 없으면 모른다고 답하세요."
            }
            Self::Summarize => {
                "당신은 고객 지원 분석가입니다. 검색된 문서들의 내용을 \
                 핵심 위주로 요약해주세요."
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub original_id: String,
    pub doc_type: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub context: ContextMetadata,
    pub provider: String,
    pub is_fallback: bool,
}

/// The `/query` flow: embed, dual typed search, merge by score,
/// context assembly, intent-keyed generation.
pub async fn query(
    deps: &RetrievalDeps,
    tenant_id: &str,
    platform: &str,
    question: &str,
    intent: Intent,
    top_k: usize,
) -> Result<QueryResult, AppError> {
    if question.trim().is_empty() {
        return Err(AppError::Validation("query text is required".to_string()));
    }
    let top_k = top_k.max(1);

    let embedding = deps.router.embed(question).await?;

    // Split the budget between content types; tickets get the larger half
    let ticket_k = top_k.div_ceil(2);
    let kb_k = top_k - ticket_k;

    let (ticket_hits, kb_hits) = tokio::join!(
        deps.vector.search(
            &embedding,
            ticket_k,
            tenant_id,
            Some(platform),
            Some(DocType::Ticket),
        ),
        deps.vector.search(
            &embedding,
            kb_k.max(1),
            tenant_id,
            Some(platform),
            Some(DocType::Article),
        ),
    );

    let mut hits = ticket_hits?;
    hits.extend(kb_hits?);
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);

    let docs: Vec<ContextDoc> = hits
        .iter()
        .map(|hit| {
            let content = hit
                .record
                .summary
                .clone()
                .unwrap_or_default();
            ContextDoc {
                content,
                metadata: json!({
                    "original_id": hit.record.original_id,
                    "doc_type": hit.record.doc_type,
                    "score": hit.score,
                }),
            }
        })
        .collect();

    let built = build_optimized_context(docs, Some(question), top_k, MAX_CONTEXT_TOKENS);

    let citations: Vec<Citation> = built
        .docs
        .iter()
        .filter_map(|doc| {
            Some(Citation {
                original_id: doc
                    .metadata
                    .get("original_id")?
                    .as_str()?
                    .to_string(),
                doc_type: doc
                    .metadata
                    .get("doc_type")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("ticket")
                    .to_string(),
                score: doc
                    .metadata
                    .get("score")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or_default() as f32,
            })
        })
        .collect();

    let prompt = format!(
        "검색된 문서:\n{}\n\n질문: {question}",
        built.as_prompt_block()
    );
    let response = deps
        .router
        .generate(
            &prompt,
            GenerateOptions {
                system_prompt: Some(Intent::system_prompt(intent).to_string()),
                operation: Some("agent_chat".to_string()),
                ..GenerateOptions::default()
            },
        )
        .await?;

    Ok(QueryResult {
        answer: response.text,
        citations,
        context: built.metadata,
        provider: response.provider,
        is_fallback: response.is_fallback,
    })
}
