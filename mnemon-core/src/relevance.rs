//! Query relevance scoring.
//!
//! Relevance is literal token overlap between the query and a record's
//! content and tags, plus a bonus for exact tag hits. There is no stemming
//! and no synonym expansion.

use crate::memory::MemoryRecord;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}_]+").expect("invalid regex"));

/// Share of the base score taken from query coverage; the rest is Jaccard.
const COVERAGE_SHARE: f64 = 0.7;

/// Lowercased set of word tokens in `text`.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    TOKEN_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Computes how relevant a record is to a query.
///
/// Implementations must be pure: same inputs, same score, no side effects.
pub trait RelevanceScorer: Send + Sync {
    /// Relevance in [0, 1]. A query without tokens scores 0.
    fn score(&self, query: &str, record: &MemoryRecord) -> f64;
}

/// Token-overlap scorer with a tag-match bonus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenOverlapScorer {
    tag_bonus: f64,
}

impl TokenOverlapScorer {
    pub fn new(tag_bonus: f64) -> Self {
        Self {
            tag_bonus: tag_bonus.clamp(0.0, 1.0),
        }
    }

    /// Score against an already tokenized query.
    pub fn score_tokens(&self, query_tokens: &BTreeSet<String>, record: &MemoryRecord) -> f64 {
        if query_tokens.is_empty() {
            return 0.0;
        }

        let mut record_tokens = tokenize(&record.content);
        for tag in &record.tags {
            record_tokens.extend(tokenize(tag));
        }

        let shared = query_tokens.intersection(&record_tokens).count() as f64;
        let union = query_tokens.union(&record_tokens).count() as f64;
        let coverage = shared / query_tokens.len() as f64;
        let jaccard = if union > 0.0 { shared / union } else { 0.0 };
        let base = COVERAGE_SHARE * coverage + (1.0 - COVERAGE_SHARE) * jaccard;

        let tag_hit = record
            .tags
            .iter()
            .any(|tag| query_tokens.contains(&tag.to_lowercase()));
        let bonus = if tag_hit { self.tag_bonus } else { 0.0 };

        (base + bonus).clamp(0.0, 1.0)
    }
}

impl Default for TokenOverlapScorer {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl RelevanceScorer for TokenOverlapScorer {
    fn score(&self, query: &str, record: &MemoryRecord) -> f64 {
        self.score_tokens(&tokenize(query), record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn record(content: &str, tags: &[&str]) -> MemoryRecord {
        MemoryRecord::new("fact", content, 0.5, Utc::now()).with_tags(tags.iter().copied())
    }

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        let tokens = tokenize("Python, list-Comprehensions & loops!");
        let expected: BTreeSet<String> = ["python", "list", "comprehensions", "loops"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_empty_query_scores_zero() {
        let scorer = TokenOverlapScorer::default();
        let rec = record("anything at all", &["anything"]);
        assert_eq!(scorer.score("", &rec), 0.0);
        assert_eq!(scorer.score("   ", &rec), 0.0);
        assert_eq!(scorer.score("?!", &rec), 0.0);
    }

    #[test]
    fn test_no_overlap_scores_zero() {
        let scorer = TokenOverlapScorer::default();
        let rec = record("PostgreSQL connection pooling", &["database"]);
        assert_eq!(scorer.score("python performance", &rec), 0.0);
    }

    #[test]
    fn test_full_overlap_beats_partial() {
        let scorer = TokenOverlapScorer::default();
        let rec = record("python performance tips", &[]);
        let full = scorer.score("python performance", &rec);
        let partial = scorer.score("python databases", &rec);
        assert!(full > partial);
        assert!(partial > 0.0);
    }

    #[test]
    fn test_tag_match_adds_bonus() {
        let scorer = TokenOverlapScorer::new(0.2);
        let tagged = record("list comprehensions are fast", &["Python"]);
        let untagged = record("list comprehensions are fast python", &[]);
        // same token sets, only the exact tag hit differs
        let diff = scorer.score("python", &tagged) - scorer.score("python", &untagged);
        assert!((diff - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_scoring_is_deterministic_and_pure() {
        let scorer = TokenOverlapScorer::default();
        let rec = record("user prefers detailed technical explanations", &["preference"]);
        let before = rec.clone();
        let a = scorer.score("technical explanations", &rec);
        let b = scorer.score("technical explanations", &rec);
        assert_eq!(a, b);
        assert_eq!(rec, before);
    }

    proptest! {
        #[test]
        fn score_stays_in_unit_interval(
            query in "[a-z ]{0,40}",
            content in "[a-z ]{0,80}",
            tag in "[a-z]{1,8}"
        ) {
            let scorer = TokenOverlapScorer::new(1.0);
            let rec = record(&content, &[tag.as_str()]);
            let score = scorer.score(&query, &rec);
            prop_assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }

        #[test]
        fn tokenless_queries_always_score_zero(
            query in "[ .,;!?-]{0,20}",
            content in "[a-z ]{0,80}"
        ) {
            let scorer = TokenOverlapScorer::default();
            prop_assert_eq!(scorer.score(&query, &record(&content, &["x"])), 0.0);
        }
    }
}
