use serde::Serialize;

use common::utils::text::count_tokens;

/// The four required summary sections. Korean is the default register; the
/// English equivalents are accepted when scoring.
pub const SECTION_MARKERS: [(&str, &str); 4] = [
    ("상황 요약", "Situation Summary"),
    ("주요 내용", "Key Details"),
    ("핵심 포인트", "Key Points"),
    ("처리 권장사항", "Recommended Actions"),
];

/// Completion-information concepts a good summary extracts.
const COMPLETION_MARKERS: [(&str, &str); 3] =
    [("문제", "Problem"), ("요청", "Request"), ("조치", "Action")];

/// Default acceptance thresholds for batch summarization.
pub const OVERALL_THRESHOLD: f64 = 0.90;
pub const STRUCTURE_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QualityScore {
    pub structure: f64,
    pub completion: f64,
    pub fidelity: f64,
    pub language: f64,
    pub length: f64,
    pub overall: f64,
}

impl QualityScore {
    pub fn acceptable(&self) -> bool {
        self.overall >= OVERALL_THRESHOLD && self.structure >= STRUCTURE_THRESHOLD
    }
}

fn contains_marker(text: &str, pair: (&str, &str)) -> bool {
    text.contains(pair.0) || text.to_lowercase().contains(&pair.1.to_lowercase())
}

fn content_words(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

/// Weighted quality score: structure 30%, completion-info 25%, content
/// fidelity by word overlap 20%, language quality 15%, length 10%.
pub fn score_summary(summary: &str, source: &str) -> QualityScore {
    let structure = {
        let present = SECTION_MARKERS
            .iter()
            .filter(|pair| contains_marker(summary, **pair))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let score = present as f64 / SECTION_MARKERS.len() as f64;
        score
    };

    let completion = {
        let present = COMPLETION_MARKERS
            .iter()
            .filter(|pair| contains_marker(summary, **pair))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let score = present as f64 / COMPLETION_MARKERS.len() as f64;
        score
    };

    let fidelity = {
        let summary_words = content_words(summary);
        let source_words = content_words(source);
        if summary_words.is_empty() || source_words.is_empty() {
            0.0
        } else {
            let common = summary_words.intersection(&source_words).count();
            #[allow(clippy::cast_precision_loss)]
            let overlap = common as f64 / summary_words.len() as f64;
            // A structured summary adds scaffolding words; a third overlap
            // with the source already indicates faithful content
            (overlap * 3.0).min(1.0)
        }
    };

    let language = {
        let total = summary.chars().count();
        if total == 0 {
            0.0
        } else {
            let bad = summary
                .chars()
                .filter(|c| *c == '\u{FFFD}' || (c.is_control() && !c.is_whitespace()))
                .count();
            #[allow(clippy::cast_precision_loss)]
            let score = 1.0 - (bad as f64 / total as f64);
            score
        }
    };

    let length = {
        let tokens = count_tokens(summary);
        #[allow(clippy::cast_precision_loss)]
        let t = tokens as f64;
        if tokens == 0 {
            0.0
        } else if (50.0..=800.0).contains(&t) {
            1.0
        } else if t < 50.0 {
            t / 50.0
        } else {
            (800.0 / t).max(0.5)
        }
    };

    let overall = 0.30 * structure + 0.25 * completion + 0.20 * fidelity + 0.15 * language
        + 0.10 * length;

    QualityScore {
        structure,
        completion,
        fidelity,
        language,
        length,
        overall,
    }
}
