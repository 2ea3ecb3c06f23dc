use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use common::utils::text::{content_hash, count_tokens, is_similar, split_sentences};

pub const MAX_CONTEXT_TOKENS: usize = 8_000;
pub const SIMILARITY_THRESHOLD: f64 = 0.8;
pub const TARGET_TOKENS_PER_DOC: usize = 400;
pub const DEFAULT_TOP_K: usize = 50;
const MIN_CHUNK_TOKENS: usize = 100;

/// One retrieved document entering the context builder.
#[derive(Debug, Clone, Serialize)]
pub struct ContextDoc {
    pub content: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextMetadata {
    pub original_count: usize,
    pub after_deduplication_count: usize,
    pub final_count: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuiltContext {
    pub docs: Vec<ContextDoc>,
    pub metadata: ContextMetadata,
}

impl BuiltContext {
    /// Rendered context block handed to the LLM.
    pub fn as_prompt_block(&self) -> String {
        self.docs
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("[doc {}]\n{}", i + 1, doc.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Strong dedup: md5 content hash first, then pairwise similarity against
/// the docs already kept.
pub fn remove_duplicates(docs: Vec<ContextDoc>) -> Vec<ContextDoc> {
    let mut unique: Vec<ContextDoc> = Vec::new();
    let mut seen_hashes: HashSet<String> = HashSet::new();

    for doc in docs {
        if doc.content.trim().is_empty() {
            continue;
        }
        let hash = content_hash(&doc.content);
        if seen_hashes.contains(&hash) {
            continue;
        }
        if unique
            .iter()
            .any(|kept| is_similar(&doc.content, &kept.content, SIMILARITY_THRESHOLD))
        {
            continue;
        }
        seen_hashes.insert(hash);
        unique.push(doc);
    }
    unique
}

fn quality_score(doc: &ContextDoc, query: Option<&str>) -> f64 {
    let mut score = 0.0;

    let chars = doc.content.chars().count();
    score += if (200..=2_000).contains(&chars) {
        1.0
    } else if chars < 200 {
        0.5
    } else {
        0.7
    };

    let tokens = count_tokens(&doc.content);
    score += if (MIN_CHUNK_TOKENS..=TARGET_TOKENS_PER_DOC * 3 / 2).contains(&tokens) {
        1.0
    } else if tokens < MIN_CHUNK_TOKENS {
        0.3
    } else {
        0.8
    };

    if let Some(source) = doc
        .metadata
        .get("doc_type")
        .and_then(Value::as_str)
    {
        if source.contains("article") || source.contains("kb") {
            score += 0.5;
        } else if source.contains("ticket") {
            score += 0.3;
        }
    }
    if doc.metadata.get("created_at").is_some() {
        score += 0.2;
    }

    if let Some(query) = query {
        let query_words: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if !query_words.is_empty() {
            let doc_words: HashSet<String> = doc
                .content
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect();
            let common = query_words.intersection(&doc_words).count();
            #[allow(clippy::cast_precision_loss)]
            let relevance = common as f64 / query_words.len() as f64;
            score += relevance * 2.0;
        }
    }

    score
}

/// Keeps the `top_k` highest-quality docs, preserving their input order.
pub fn apply_top_k(docs: Vec<ContextDoc>, top_k: usize, query: Option<&str>) -> Vec<ContextDoc> {
    if docs.len() <= top_k {
        return docs;
    }

    let mut scored: Vec<(usize, f64, ContextDoc)> = docs
        .into_iter()
        .enumerate()
        .map(|(i, doc)| {
            let score = quality_score(&doc, query);
            (i, score, doc)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<(usize, ContextDoc)> = scored
        .into_iter()
        .take(top_k)
        .map(|(i, _, doc)| (i, doc))
        .collect();
    kept.sort_by_key(|(i, _)| *i);
    kept.into_iter().map(|(_, doc)| doc).collect()
}

/// Trims each doc to its most query-relevant sentences, aiming at
/// `target_tokens` per document.
pub fn extract_relevant(
    docs: Vec<ContextDoc>,
    query: &str,
    target_tokens: usize,
) -> Vec<ContextDoc> {
    let query_words: HashSet<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if query_words.is_empty() {
        return docs;
    }

    let mut processed = Vec::with_capacity(docs.len());
    for doc in docs {
        let sentences = split_sentences(&doc.content);
        if sentences.is_empty() {
            continue;
        }

        let mut scored: Vec<(f64, usize, &String)> = sentences
            .iter()
            .enumerate()
            .filter_map(|(i, sentence)| {
                let words: HashSet<String> = sentence
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .map(str::to_string)
                    .collect();
                let common = query_words.intersection(&words).count();
                if common == 0 {
                    return None;
                }
                #[allow(clippy::cast_precision_loss)]
                let score = common as f64 / query_words.len() as f64;
                Some((score, i, sentence))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let original_tokens = count_tokens(&doc.content);
        let budget = target_tokens.min(original_tokens);
        let mut selected: Vec<(usize, &String)> = Vec::new();
        let mut used = 0usize;
        for (_, position, sentence) in &scored {
            let tokens = count_tokens(sentence);
            if used + tokens <= budget {
                selected.push((*position, sentence));
                used += tokens;
            } else if selected.is_empty() {
                selected.push((*position, sentence));
                break;
            } else {
                break;
            }
        }

        if selected.is_empty() {
            continue;
        }
        // Keep document order for readability
        selected.sort_by_key(|(position, _)| *position);
        let content = selected
            .into_iter()
            .map(|(_, s)| s.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        processed.push(ContextDoc {
            content,
            metadata: doc.metadata,
        });
    }
    processed
}

/// Caps the total context size, always keeping at least one document.
pub fn enforce_token_cap(docs: Vec<ContextDoc>, max_tokens: usize) -> (Vec<ContextDoc>, usize) {
    let mut kept = Vec::new();
    let mut total = 0usize;
    for doc in docs {
        let tokens = count_tokens(&doc.content);
        if total + tokens > max_tokens && !kept.is_empty() {
            break;
        }
        total += tokens;
        kept.push(doc);
    }
    (kept, total)
}

/// Full pipeline: dedup → quality top-k → relevance extraction → token cap.
pub fn build_optimized_context(
    docs: Vec<ContextDoc>,
    query: Option<&str>,
    top_k: usize,
    max_tokens: usize,
) -> BuiltContext {
    let original_count = docs.len();

    let deduplicated = remove_duplicates(docs);
    let after_deduplication_count = deduplicated.len();

    let ranked = apply_top_k(deduplicated, top_k, query);
    let extracted = match query {
        Some(query) if !query.trim().is_empty() => {
            extract_relevant(ranked, query, TARGET_TOKENS_PER_DOC)
        }
        _ => ranked,
    };
    let (docs, total_tokens) = enforce_token_cap(extracted, max_tokens);

    BuiltContext {
        metadata: ContextMetadata {
            original_count,
            after_deduplication_count,
            final_count: docs.len(),
            total_tokens,
        },
        docs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(content: &str) -> ContextDoc {
        ContextDoc {
            content: content.to_string(),
            metadata: json!({"doc_type": "ticket"}),
        }
    }

    #[test]
    fn dedup_removes_exact_and_near_duplicates() {
        let base = "The printer went offline right after the firmware update and nobody in the office can print anything at all.";
        let near = "The printer went offline right after the firmware update and nobody in this office can print anything at all.";
        let other = "Billing totals on the March invoice are wrong; the customer was charged twice for one seat.";

        let docs = vec![doc(base), doc(base), doc(near), doc(other)];
        let built = build_optimized_context(docs, None, 10, MAX_CONTEXT_TOKENS);

        assert_eq!(built.metadata.original_count, 4);
        assert_eq!(built.metadata.after_deduplication_count, 2);
        assert_eq!(built.metadata.final_count, 2);
        assert!(built.metadata.total_tokens <= MAX_CONTEXT_TOKENS);
    }

    #[test]
    fn token_cap_keeps_at_least_one_doc() {
        let long = "word ".repeat(4_000);
        let (kept, total) = enforce_token_cap(vec![doc(&long), doc(&long)], 100);
        assert_eq!(kept.len(), 1, "first doc always kept");
        assert!(total > 100, "single oversized doc is not truncated here");
    }

    #[test]
    fn top_k_prefers_higher_quality_but_keeps_order() {
        let small = doc("tiny");
        let good_a = doc(&"alpha troubleshooting detail ".repeat(20));
        let good_b = doc(&"beta troubleshooting detail ".repeat(20));

        let kept = apply_top_k(vec![good_a.clone(), small, good_b.clone()], 2, None);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].content.starts_with("alpha"));
        assert!(kept[1].content.starts_with("beta"));
    }

    #[test]
    fn relevance_extraction_trims_to_matching_sentences() {
        let content = "The printer is offline. The weather was nice yesterday. \
                       Restarting the printer did not help.";
        let extracted = extract_relevant(
            vec![doc(content)],
            "printer offline",
            TARGET_TOKENS_PER_DOC,
        );
        assert_eq!(extracted.len(), 1);
        assert!(extracted[0].content.contains("printer is offline"));
        assert!(!extracted[0].content.contains("weather"));
    }

    #[test]
    fn prompt_block_numbers_documents() {
        let built = build_optimized_context(
            vec![doc("first document body with enough words to survive"), doc("second document body with different words entirely")],
            None,
            10,
            MAX_CONTEXT_TOKENS,
        );
        let block = built.as_prompt_block();
        assert!(block.contains("[doc 1]"));
        assert!(block.contains("[doc 2]"));
    }
}
