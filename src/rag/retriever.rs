use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use super::store::{IndexFilter, VectorIndex};
use crate::llm::Embedder;
use crate::tenant::TenantRecord;

/// Separator between snippets in the assembled context.
pub const CONTEXT_DELIMITER: &str = "\n---\n";

#[derive(Debug, Clone, Serialize)]
pub struct RankedSnippet {
    pub id: Uuid,
    pub title: String,
    pub text: String,
    pub score: f32,
}

impl AsRef<str> for RankedSnippet {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// Per-request retrieval output. Every failure mode collapses into the
/// empty shape (`context_found == false`).
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub snippets: Vec<RankedSnippet>,
    pub context: String,
    pub context_found: bool,
    /// Best candidate score, whether or not it passed the threshold.
    pub top_score: Option<f32>,
    pub elapsed: Duration,
}

impl RetrievalResult {
    fn empty(elapsed: Duration) -> Self {
        Self {
            elapsed,
            ..Self::default()
        }
    }

    pub fn sources_used(&self) -> usize {
        self.snippets.len()
    }
}

pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    limit: usize,
    threshold: f32,
}

impl ContextRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        limit: usize,
        threshold: f32,
    ) -> Self {
        Self {
            embedder,
            index,
            limit: limit.max(1),
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub async fn retrieve(&self, tenant: &TenantRecord, query: &str) -> RetrievalResult {
        let started = Instant::now();

        let vector = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(chat_id = %tenant.id, error = %err, "Query embedding failed");
                return RetrievalResult::empty(started.elapsed());
            }
        };

        let filter = IndexFilter::knowledge_of(tenant.partition_key.clone());
        let candidates = match self.index.search(&vector, &filter, self.limit).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(
                    chat_id = %tenant.id,
                    index = self.index.name(),
                    error = %err,
                    "Vector search failed"
                );
                return RetrievalResult::empty(started.elapsed());
            }
        };

        tracing::debug!(
            chat_id = %tenant.id,
            candidates = candidates.len(),
            "Vector search returned candidates"
        );

        let top_score = candidates.first().map(|c| c.score);
        let snippets: Vec<RankedSnippet> = candidates
            .into_iter()
            // Isolation must not rest on the backend's filter alone.
            .filter(|c| filter.matches(&c.record))
            .filter(|c| c.score > self.threshold)
            .filter(|c| !c.record.text.trim().is_empty())
            .map(|c| RankedSnippet {
                id: c.record.id,
                title: c.record.title,
                text: c.record.text,
                score: c.score,
            })
            .collect();

        let context = snippets
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_DELIMITER);

        RetrievalResult {
            context_found: !snippets.is_empty(),
            snippets,
            context,
            top_score,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EmbeddingError, HashingEmbedder};
    use crate::rag::store::ScoredRecord;
    use crate::rag::{IndexError, KnowledgeRecord, RecordKind};
    use async_trait::async_trait;

    /// Returns a fixed candidate list regardless of the query.
    struct FixedIndex {
        hits: Vec<ScoredRecord>,
        fail: bool,
    }

    #[async_trait]
    impl VectorIndex for FixedIndex {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn ensure_ready(&self) -> Result<(), IndexError> {
            Ok(())
        }

        async fn search(
            &self,
            _vector: &[f32],
            _filter: &IndexFilter,
            _limit: usize,
        ) -> Result<Vec<ScoredRecord>, IndexError> {
            if self.fail {
                return Err(IndexError::Unavailable("down".into()));
            }
            Ok(self.hits.clone())
        }

        async fn upsert(&self, _record: KnowledgeRecord) -> Result<(), IndexError> {
            Ok(())
        }

        async fn retrieve(&self, _ids: &[Uuid]) -> Result<Vec<KnowledgeRecord>, IndexError> {
            Ok(Vec::new())
        }

        async fn delete(&self, _ids: &[Uuid]) -> Result<(), IndexError> {
            Ok(())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn dimension(&self) -> usize {
            4
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("refused".into()))
        }
    }

    fn hit(partition: &str, text: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            record: KnowledgeRecord::knowledge(partition, "t", text),
            score,
        }
    }

    fn retriever(index: FixedIndex) -> ContextRetriever {
        ContextRetriever::new(Arc::new(HashingEmbedder::new(4)), Arc::new(index), 10, 0.05)
    }

    fn acme() -> TenantRecord {
        TenantRecord::new("acme")
    }

    #[tokio::test]
    async fn threshold_is_strict() {
        let index = FixedIndex {
            hits: vec![
                hit("acme", "above", 0.05 + 1e-4),
                hit("acme", "exact", 0.05),
                hit("acme", "below", 0.01),
            ],
            fail: false,
        };

        let result = retriever(index).retrieve(&acme(), "q").await;

        assert!(result.context_found);
        assert_eq!(result.sources_used(), 1);
        assert_eq!(result.context, "above");
        assert_eq!(result.top_score, Some(0.05 + 1e-4));
    }

    #[tokio::test]
    async fn joins_snippets_in_ranked_order() {
        let index = FixedIndex {
            hits: vec![hit("acme", "first", 0.9), hit("acme", "second", 0.4)],
            fail: false,
        };

        let result = retriever(index).retrieve(&acme(), "q").await;

        assert_eq!(result.context, "first\n---\nsecond");
        assert_eq!(result.sources_used(), 2);
    }

    #[tokio::test]
    async fn foreign_and_history_records_are_dropped() {
        let index = FixedIndex {
            hits: vec![
                hit("globex", "foreign", 0.9),
                ScoredRecord {
                    record: KnowledgeRecord::knowledge("acme", "t", "history")
                        .with_kind(RecordKind::ChatHistory),
                    score: 0.9,
                },
            ],
            fail: false,
        };

        let result = retriever(index).retrieve(&acme(), "q").await;

        assert!(!result.context_found);
        assert!(result.context.is_empty());
    }

    #[tokio::test]
    async fn failures_collapse_to_no_context() {
        let empty = retriever(FixedIndex {
            hits: vec![],
            fail: false,
        })
        .retrieve(&acme(), "q")
        .await;
        let below = retriever(FixedIndex {
            hits: vec![hit("acme", "weak", 0.0)],
            fail: false,
        })
        .retrieve(&acme(), "q")
        .await;
        let down = retriever(FixedIndex {
            hits: vec![],
            fail: true,
        })
        .retrieve(&acme(), "q")
        .await;
        let no_embedding = ContextRetriever::new(
            Arc::new(BrokenEmbedder),
            Arc::new(FixedIndex {
                hits: vec![hit("acme", "x", 0.9)],
                fail: false,
            }),
            10,
            0.05,
        )
        .retrieve(&acme(), "q")
        .await;

        for result in [empty, below, down, no_embedding] {
            assert!(!result.context_found);
            assert_eq!(result.sources_used(), 0);
            assert!(result.context.is_empty());
        }
    }
}
