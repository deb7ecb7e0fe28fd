//! Manual knowledge management for a tenant's partition.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use super::store::VectorIndex;
use super::{IndexError, KnowledgeRecord, RecordKind};
use crate::llm::{Embedder, EmbeddingError};
use crate::tenant::TenantRecord;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("content must not be empty")]
    EmptyContent,
    #[error("knowledge record not found")]
    NotFound,
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewKnowledge {
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub struct KnowledgeService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl KnowledgeService {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub async fn add(
        &self,
        tenant: &TenantRecord,
        knowledge: NewKnowledge,
    ) -> Result<Uuid, KnowledgeError> {
        let content = knowledge.content.trim();
        if content.is_empty() {
            return Err(KnowledgeError::EmptyContent);
        }

        let vector = self.embedder.embed(content).await?;
        let mut record =
            KnowledgeRecord::knowledge(tenant.partition_key.clone(), knowledge.title.trim(), content)
                .with_vector(vector);
        record.category = knowledge
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        record.tags = knowledge
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let id = record.id;
        self.index.upsert(record).await?;
        tracing::info!(chat_id = %tenant.id, point_id = %id, "Knowledge added");
        Ok(id)
    }

    /// Records owned by another partition are reported as not found.
    pub async fn get(&self, tenant: &TenantRecord, id: Uuid) -> Result<KnowledgeRecord, KnowledgeError> {
        self.index
            .retrieve(&[id])
            .await?
            .into_iter()
            .find(|record| {
                record.partition_key == tenant.partition_key && record.kind == RecordKind::Knowledge
            })
            .ok_or(KnowledgeError::NotFound)
    }

    /// Re-embeds only when the text changes. Returns the stored record.
    pub async fn update(
        &self,
        tenant: &TenantRecord,
        id: Uuid,
        title: Option<String>,
        text: Option<String>,
    ) -> Result<KnowledgeRecord, KnowledgeError> {
        let mut record = self.get(tenant, id).await?;

        if let Some(title) = title {
            record.title = title.trim().to_string();
        }

        if let Some(text) = text {
            let text = text.trim();
            if text.is_empty() {
                return Err(KnowledgeError::EmptyContent);
            }
            if text != record.text {
                record.vector = self.embedder.embed(text).await?;
                record.text = text.to_string();
            }
        }

        self.index.upsert(record.clone()).await?;
        tracing::info!(chat_id = %tenant.id, point_id = %id, "Knowledge updated");
        Ok(record)
    }

    pub async fn delete(&self, tenant: &TenantRecord, id: Uuid) -> Result<(), KnowledgeError> {
        self.get(tenant, id).await?;
        self.index.delete(&[id]).await?;
        tracing::info!(chat_id = %tenant.id, point_id = %id, "Knowledge deleted");
        Ok(())
    }
}
