use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tiktoken_rs::CoreBPE;

/// Minimum length before two texts are even compared for similarity.
const MIN_SIMILARITY_LEN: usize = 20;
/// Sequences at least this long get the popular-element optimization when
/// building the match index.
const AUTOJUNK_MIN_LEN: usize = 200;

fn cl100k() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()).as_ref()
}

fn is_hangul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

/// Counts tokens with the cl100k BPE, falling back to a character heuristic
/// when the tokenizer is unavailable. Hangul-heavy text packs fewer
/// characters per token, so the fallback divisor shrinks for it.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    if let Some(bpe) = cl100k() {
        return bpe.encode_with_special_tokens(text).len();
    }

    let total = text.chars().count();
    let hangul = text.chars().filter(|c| is_hangul(*c)).count();
    let divisor = if total > 0 && hangul * 2 > total {
        3.5
    } else {
        4.0
    };
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let estimate = (total as f64 / divisor) as usize;
    estimate.max(1)
}

/// Fast duplicate-detection hash over whitespace- and punctuation-normalized
/// lowercase content.
pub fn content_hash(text: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    static PUNCT: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    let ws = WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    #[allow(clippy::unwrap_used)]
    let punct = PUNCT.get_or_init(|| Regex::new(r"[^\w\s]").unwrap());

    let lowered = text.trim().to_lowercase();
    let collapsed = ws.replace_all(&lowered, " ");
    let normalized = punct.replace_all(&collapsed, "");
    format!("{:x}", md5::compute(normalized.as_bytes()))
}

/// Index of positions per element of `b`, plus the "popular" set: in long
/// sequences, elements occurring in more than 1% of positions are kept out
/// of the index and only used to extend already-found blocks.
struct MatchIndex {
    b2j: HashMap<char, Vec<usize>>,
    popular: HashSet<char>,
}

impl MatchIndex {
    fn new(b: &[char]) -> Self {
        let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, c) in b.iter().enumerate() {
            b2j.entry(*c).or_default().push(j);
        }

        let mut popular = HashSet::new();
        if b.len() >= AUTOJUNK_MIN_LEN {
            let threshold = b.len() / 100 + 1;
            b2j.retain(|c, positions| {
                if positions.len() > threshold {
                    popular.insert(*c);
                    false
                } else {
                    true
                }
            });
        }

        Self { b2j, popular }
    }
}

/// Longest matching block of `a[alo..ahi]` and `b[blo..bhi]`, as
/// `(i, j, size)`. Mirrors the classic diff behavior: among equally long
/// blocks the earliest in `a`, then earliest in `b`, wins; found blocks are
/// extended over popular elements afterwards.
#[allow(clippy::many_single_char_names)]
fn longest_match(
    a: &[char],
    b: &[char],
    index: &MatchIndex,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut besti = alo;
    let mut bestj = blo;
    let mut bestsize = 0;

    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut newj2len = HashMap::new();
        if let Some(positions) = index.b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = if j == 0 {
                    1
                } else {
                    j2len.get(&(j - 1)).copied().unwrap_or(0) + 1
                };
                newj2len.insert(j, k);
                if k > bestsize {
                    besti = i + 1 - k;
                    bestj = j + 1 - k;
                    bestsize = k;
                }
            }
        }
        j2len = newj2len;
    }

    // Grow the block over popular elements on both sides
    while besti > alo
        && bestj > blo
        && index.popular.contains(&b[bestj - 1])
        && a[besti - 1] == b[bestj - 1]
    {
        besti -= 1;
        bestj -= 1;
        bestsize += 1;
    }
    while besti + bestsize < ahi
        && bestj + bestsize < bhi
        && index.popular.contains(&b[bestj + bestsize])
        && a[besti + bestsize] == b[bestj + bestsize]
    {
        bestsize += 1;
    }

    (besti, bestj, bestsize)
}

/// Ratcliff/Obershelp similarity: `2·M / (len(a) + len(b))`, where `M` is
/// the total size of the recursively found longest matching blocks.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let index = MatchIndex::new(&b);
    let mut matches = 0usize;
    let mut queue = vec![(0usize, a.len(), 0usize, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, size) = longest_match(&a, &b, &index, alo, ahi, blo, bhi);
        if size > 0 {
            matches += size;
            queue.push((alo, i, blo, j));
            queue.push((i + size, ahi, j + size, bhi));
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let ratio = 2.0 * matches as f64 / (a.len() + b.len()) as f64;
    ratio
}

/// Whether two texts are near-duplicates (Ratcliff/Obershelp ratio, the
/// longest-matching-block metric).
///
/// Very short texts and texts with wildly different lengths are never
/// considered similar, which keeps short boilerplate from collapsing
/// unrelated documents.
pub fn is_similar(a: &str, b: &str, threshold: f64) -> bool {
    if a.len() < MIN_SIMILARITY_LEN || b.len() < MIN_SIMILARITY_LEN {
        return false;
    }

    let (shorter, longer) = if a.len() <= b.len() {
        (a.len(), b.len())
    } else {
        (b.len(), a.len())
    };
    #[allow(clippy::cast_precision_loss)]
    let length_ratio = shorter as f64 / longer as f64;
    if length_ratio < 0.3 {
        return false;
    }

    sequence_ratio(a, b) >= threshold
}

/// Splits text into sentences on terminal punctuation followed by
/// whitespace, tolerating a closing quote after the terminator.
pub fn split_sentences(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    let boundary = BOUNDARY.get_or_init(|| Regex::new(r#"[.!?]["']*\s+"#).unwrap());

    let mut sentences = Vec::new();
    let mut start = 0;
    for m in boundary.find_iter(trimmed) {
        // Keep the punctuation (and trailing quote) with the sentence.
        let end = m.end() - m.as_str().trim_start_matches(|c: char| !c.is_whitespace()).len();
        let sentence = trimmed[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = m.end();
    }

    let tail = trimmed[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_count_is_positive_for_text() {
        assert_eq!(count_tokens(""), 0);
        assert!(count_tokens("hello world") >= 2);
    }

    #[test]
    fn content_hash_ignores_formatting() {
        let a = content_hash("Printer   offline!");
        let b = content_hash("printer offline");
        assert_eq!(a, b);
        assert_ne!(a, content_hash("printer online"));
    }

    #[test]
    fn sequence_ratio_matches_known_values() {
        // Longest matching block "bcd" -> 2*3 / 8
        assert!((sequence_ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
        assert!((sequence_ratio("same text", "same text") - 1.0).abs() < 1e-9);
        assert!(sequence_ratio("abc", "xyz") < 1e-9);
        assert!((sequence_ratio("", "") - 1.0).abs() < 1e-9);
        assert!(sequence_ratio("abc", "") < 1e-9);
    }

    #[test]
    fn sequence_ratio_rewards_contiguous_runs() {
        // A reordered clause shares vocabulary but breaks the contiguous
        // runs the metric is built on
        let base = "the printer is offline and nobody can print";
        let reordered = "nobody can print and the printer is offline";
        let contiguous = "the printer is offline and nobody can print today";
        assert!(sequence_ratio(base, contiguous) > sequence_ratio(base, reordered));
    }

    #[test]
    fn similarity_rejects_short_and_mismatched_lengths() {
        assert!(!is_similar("short", "short", 0.8));
        let long = "a sentence that is clearly long enough to compare".repeat(4);
        assert!(!is_similar(&long, "tiny text but just over twenty", 0.8));
    }

    #[test]
    fn similarity_detects_near_duplicates() {
        let a = "The customer cannot log in after the password reset email";
        let b = "The customer cannot log in after the password reset e-mail";
        assert!(is_similar(a, b, 0.8));
        assert!(!is_similar(
            a,
            "Invoice totals are wrong on the March statement for billing",
            0.8
        ));
    }

    #[test]
    fn splits_sentences_with_quotes() {
        let sentences =
            split_sentences("The printer is offline. \"It was working yesterday!\" Please advise.");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "The printer is offline.");
    }
}
