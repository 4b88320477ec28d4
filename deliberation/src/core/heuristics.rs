//! Text heuristics used when turning goals into tool actions.

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::core::types::Goal;

const INTENT_PREFIXES: &[&str] = &[
    "to research and model ",
    "to research ",
    "research ",
    "learn about: ",
    "learn about ",
    "explore ",
    "investigate ",
    "analyze ",
    "understand ",
];

const FILLER_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "should", "could", "may", "might", "can", "based", "using", "through",
    "emphasizing", "focusing", "quiet", "steady", "ordinary", "routine",
];

const SIGNIFICANT_PREFIXES: &[&str] = &[
    "learn about: ",
    "research ",
    "develop ",
    "create ",
    "need ",
    "deep ",
    "deeper ",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "should", "could", "may", "might", "can", "based", "using", "about",
    "learn", "research",
];

const RESEARCH_MARKERS: &[&str] = &["research", "investigate", "explore", "analyze", "understand"];

const PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '—', '-', '"', '\'', '(', ')'];

const MAX_SEARCH_KEYWORDS: usize = 5;
const KEYWORD_FALLBACK_CHARS: usize = 30;
const DUPLICATE_PREFIX_CHARS: usize = 50;
const DUPLICATE_PREFIX_MIN_CHARS: usize = 20;
/// Jaccard overlap of significant keywords that marks two goals as duplicates.
pub const KEYWORD_OVERLAP_THRESHOLD: f64 = 0.80;

/// Reduce a goal description to a short search query.
///
/// Leading intent phrases and filler words are dropped and at most five
/// keywords are kept. Falls back to the first 30 characters of the input.
pub fn extract_search_keywords(description: &str) -> String {
    let lowered = description.to_lowercase();
    let mut text = lowered.as_str();
    for prefix in INTENT_PREFIXES {
        text = text.strip_prefix(prefix).unwrap_or(text);
    }

    let keywords: Vec<&str> = text
        .split_whitespace()
        .map(|word| word.trim_matches(PUNCTUATION))
        .filter(|word| word.chars().count() >= 3 && !FILLER_WORDS.contains(word))
        .take(MAX_SEARCH_KEYWORDS)
        .collect();

    if keywords.is_empty() {
        return description.chars().take(KEYWORD_FALLBACK_CHARS).collect();
    }
    keywords.join(" ")
}

/// Extract `http(s)` URLs from search output lines of the form `URL: <url>`.
pub fn extract_urls(search_output: &str) -> Vec<String> {
    static URL_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"URL: \s*(https?://\S+)").unwrap());
    search_output
        .lines()
        .filter_map(|line| URL_RE.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|url| url.as_str().to_string())
        .collect()
}

/// True when the description asks for research rather than a single lookup.
pub fn is_research_goal(description: &str) -> bool {
    description
        .to_lowercase()
        .split_whitespace()
        .map(|word| word.trim_matches(PUNCTUATION))
        .any(|word| RESEARCH_MARKERS.contains(&word))
}

/// Lowercased words of at least four characters with stop words removed.
pub fn significant_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut text = lowered.as_str();
    for prefix in SIGNIFICANT_PREFIXES {
        text = text.strip_prefix(prefix).unwrap_or(text);
    }
    text.split_whitespace()
        .map(|word| word.trim_matches(PUNCTUATION))
        .filter(|word| word.chars().count() >= 4 && !STOP_WORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two keyword sets; 0 when either is empty.
pub fn keyword_overlap(left: &[String], right: &[String]) -> f64 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let left: HashSet<&str> = left.iter().map(String::as_str).collect();
    let right: HashSet<&str> = right.iter().map(String::as_str).collect();
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Which textual rule matched when a proposal was judged a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateMatch {
    Exact,
    Prefix,
    KeywordOverlap,
}

/// Textual duplicate detection against existing goals.
///
/// Returns the id of the first matching goal and the rule that matched.
pub fn find_textual_duplicate<'a>(
    proposal: &str,
    existing: impl IntoIterator<Item = &'a Goal> + Clone,
) -> Option<(&'a str, DuplicateMatch)> {
    let proposal_lower = proposal.to_lowercase();

    for goal in existing.clone() {
        let existing_lower = goal.description.to_lowercase();
        if proposal_lower == existing_lower {
            return Some((goal.id.as_str(), DuplicateMatch::Exact));
        }
        if prefix_contained(&proposal_lower, &existing_lower) {
            return Some((goal.id.as_str(), DuplicateMatch::Prefix));
        }
    }

    let proposal_keywords = significant_keywords(proposal);
    for goal in existing {
        let overlap = keyword_overlap(&proposal_keywords, &significant_keywords(&goal.description));
        if overlap >= KEYWORD_OVERLAP_THRESHOLD {
            return Some((goal.id.as_str(), DuplicateMatch::KeywordOverlap));
        }
    }
    None
}

fn prefix_contained(left: &str, right: &str) -> bool {
    let len = left
        .chars()
        .count()
        .min(right.chars().count())
        .min(DUPLICATE_PREFIX_CHARS);
    if len < DUPLICATE_PREFIX_MIN_CHARS {
        return false;
    }
    let left_prefix: String = left.chars().take(len).collect();
    let right_prefix: String = right.chars().take(len).collect();
    right.contains(&left_prefix) || left.contains(&right_prefix)
}

/// Cosine similarity of two embeddings; 0 for mismatched or zero vectors.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_left = 0.0f64;
    let mut norm_right = 0.0f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        norm_left += a * a;
        norm_right += b * b;
    }
    if norm_left == 0.0 || norm_right == 0.0 {
        return 0.0;
    }
    dot / (norm_left.sqrt() * norm_right.sqrt())
}

/// Truncate to `max` characters for log lines and thought summaries.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::GoalSource;
    use chrono::{TimeZone, Utc};

    fn goal(id: &str, description: &str) -> Goal {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut goal = Goal::new(description, GoalSource::Reflection, 5, now);
        goal.id = id.to_string();
        goal
    }

    #[test]
    fn keywords_strip_intent_prefix_and_filler() {
        assert_eq!(
            extract_search_keywords("Research the history of Rust's borrow checker"),
            "history rust's borrow checker"
        );
        assert_eq!(
            extract_search_keywords("Learn about: quantum error correction codes in practice today"),
            "quantum error correction codes practice"
        );
    }

    #[test]
    fn keywords_fall_back_to_prefix_of_description() {
        assert_eq!(extract_search_keywords("to be or"), "to be or");
        assert_eq!(
            extract_search_keywords("a an the of is it by on at do to be or an a and the"),
            "a an the of is it by on at do "
        );
    }

    #[test]
    fn urls_are_taken_from_url_lines_only() {
        let output = "1. Rust\n    URL: https://www.rust-lang.org/\n    Snippet: see URL: ftp://nope\n2. Docs\n    URL: http://docs.rs/serde extra\n";
        assert_eq!(
            extract_urls(output),
            vec![
                "https://www.rust-lang.org/".to_string(),
                "http://docs.rs/serde".to_string()
            ]
        );
        assert!(extract_urls("no links here").is_empty());
    }

    #[test]
    fn research_intent_matches_whole_words() {
        assert!(is_research_goal("Investigate memory allocators"));
        assert!(is_research_goal("deep research: tokio internals"));
        assert!(!is_research_goal("Write a haiku about researchers"));
    }

    #[test]
    fn duplicate_detection_covers_exact_prefix_and_overlap() {
        let existing = [
            goal("g1", "Understand async runtimes in Rust"),
            goal("g2", "Compare garbage collectors across managed languages and their tradeoffs"),
            goal("g3", "Catalogue embedded database engines written natively"),
        ];

        let exact = find_textual_duplicate("understand async runtimes in rust", &existing);
        assert_eq!(exact, Some(("g1", DuplicateMatch::Exact)));

        let prefix = find_textual_duplicate(
            "Compare garbage collectors across managed languages",
            &existing,
        );
        assert_eq!(prefix, Some(("g2", DuplicateMatch::Prefix)));

        let overlap =
            find_textual_duplicate("Natively written embedded database engines catalogue", &existing);
        assert_eq!(overlap, Some(("g3", DuplicateMatch::KeywordOverlap)));

        assert!(find_textual_duplicate("Write poetry about the sea", &existing).is_none());
    }

    #[test]
    fn cosine_similarity_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
