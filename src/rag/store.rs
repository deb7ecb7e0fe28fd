//! VectorIndex trait: the narrow boundary to the vector database.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{IndexError, KnowledgeRecord, RecordKind};

/// Restricts a search to one partition, optionally excluding a record kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFilter {
    pub partition_key: String,
    pub exclude_kind: Option<RecordKind>,
}

impl IndexFilter {
    /// Knowledge records of one partition (chat history excluded).
    pub fn knowledge_of(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            exclude_kind: Some(RecordKind::ChatHistory),
        }
    }

    pub fn matches(&self, record: &KnowledgeRecord) -> bool {
        record.partition_key == self.partition_key
            && self.exclude_kind.map_or(true, |kind| record.kind != kind)
    }
}

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: KnowledgeRecord,
    /// Cosine similarity, higher is better.
    pub score: f32,
}

/// Implementations must return search hits ordered by score, best first.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &'static str;

    /// Creates the collection/schema when absent.
    async fn ensure_ready(&self) -> Result<(), IndexError>;

    async fn search(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError>;

    /// Inserts or replaces the record with the same id.
    async fn upsert(&self, record: KnowledgeRecord) -> Result<(), IndexError>;

    /// Records for the ids that exist; unknown ids are skipped.
    async fn retrieve(&self, ids: &[Uuid]) -> Result<Vec<KnowledgeRecord>, IndexError>;

    async fn delete(&self, ids: &[Uuid]) -> Result<(), IndexError>;
}

/// Calls `ensure_ready` up to `attempts` times, sleeping `delay` between
/// tries. Returns whether the index became ready.
pub async fn connect_with_retries(index: &dyn VectorIndex, attempts: u32, delay: Duration) -> bool {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match index.ensure_ready().await {
            Ok(()) => {
                tracing::info!(index = index.name(), attempt, "Vector index ready");
                return true;
            }
            Err(err) => {
                tracing::warn!(
                    index = index.name(),
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "Vector index connection attempt failed"
                );
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    tracing::error!(
        index = index.name(),
        "All vector index connection attempts failed; retrieval will return no context"
    );
    false
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
