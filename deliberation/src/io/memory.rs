//! Memory store and embedder contracts.
//!
//! The engine only reads and writes through these traits; the vector index
//! behind them is owned by the host.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::Outcome;
use crate::io::reasoner::Learning;

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default)]
    pub id: String,
    pub content: String,
    pub importance: f64,
    pub is_collective: bool,
    #[serde(default)]
    pub concept_tags: Vec<String>,
    #[serde(default)]
    pub outcome_tag: Option<Outcome>,
    #[serde(default)]
    pub trust_score: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Collective memory for a learning; importance and trust follow confidence.
    pub fn from_learning(learning: &Learning, embedding: Vec<f32>, now: DateTime<Utc>) -> Self {
        let confidence = learning.confidence.clamp(0.0, 1.0);
        let mut content = format!("LEARNING [{}]: {}", learning.category, learning.what);
        if !learning.context.trim().is_empty() {
            content.push_str(&format!(
                " (Context: {}, Confidence: {confidence:.2})",
                learning.context.trim()
            ));
        } else {
            content.push_str(&format!(" (Confidence: {confidence:.2})"));
        }
        Self {
            id: String::new(),
            content,
            importance: confidence,
            is_collective: true,
            concept_tags: vec!["learning".to_string(), learning.category.clone()],
            outcome_tag: Some(Outcome::Good),
            trust_score: confidence,
            metadata: BTreeMap::new(),
            embedding,
            created_at: now,
        }
    }

    /// Collective memory holding a research synthesis.
    pub fn from_synthesis(
        root_question: &str,
        synthesis: &str,
        goal_id: &str,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("goal_id".to_string(), goal_id.to_string());
        Self {
            id: String::new(),
            content: format!("Research: {root_question}\n\nFindings:\n{synthesis}"),
            importance: 0.9,
            is_collective: true,
            concept_tags: vec!["research".to_string(), "synthesis".to_string()],
            outcome_tag: Some(Outcome::Good),
            trust_score: 0.9,
            metadata,
            embedding,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub limit: usize,
    pub min_score: f64,
    pub include_personal: bool,
    pub include_collective: bool,
    pub user_id: Option<String>,
}

impl SearchQuery {
    /// Search over collective memories only.
    pub fn collective(text: impl Into<String>, limit: usize, min_score: f64) -> Self {
        Self {
            text: text.into(),
            limit,
            min_score,
            include_personal: false,
            include_collective: true,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f64,
}

/// Abstraction over the memory index.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Memories scoring at least `query.min_score` against `embedding`, best first.
    async fn search(&self, query: &SearchQuery, embedding: &[f32]) -> Result<Vec<ScoredMemory>>;

    /// Store a memory and return its id.
    async fn store(&self, memory: Memory) -> Result<String>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Memory>>;

    async fn total_count(&self) -> Result<usize>;
}

/// Abstraction over the text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn learning_memory_carries_confidence() {
        let learning = Learning {
            what: "Parse pages soon after searching".to_string(),
            context: "search results go stale".to_string(),
            category: "tools".to_string(),
            confidence: 0.85,
        };
        let memory = Memory::from_learning(&learning, vec![0.1], at());
        assert_eq!(
            memory.content,
            "LEARNING [tools]: Parse pages soon after searching (Context: search results go stale, Confidence: 0.85)"
        );
        assert_eq!(memory.importance, 0.85);
        assert_eq!(memory.trust_score, 0.85);
        assert!(memory.is_collective);
        assert_eq!(memory.concept_tags, vec!["learning", "tools"]);
    }

    #[test]
    fn synthesis_memory_links_goal() {
        let memory = Memory::from_synthesis("Why?", "Because.", "goal_1", Vec::new(), at());
        assert_eq!(memory.content, "Research: Why?\n\nFindings:\nBecause.");
        assert_eq!(memory.importance, 0.9);
        assert_eq!(memory.metadata.get("goal_id").map(String::as_str), Some("goal_1"));
    }
}
