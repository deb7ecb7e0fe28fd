//! Request-level composition: resolve tenant, retrieve context, answer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::llm::{AnswerOutcome, AnswerSynthesizer, TokenUsage};
use crate::rag::ContextRetriever;
use crate::tenant::{TenantDirectory, TenantRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Neither the key nor the host matched a tenant. Distinct from a
    /// resolved tenant that simply has no matching knowledge.
    #[error("unknown chat")]
    UnknownChat,
}

/// How a request identifies its tenant: an explicit key (tenant id or a
/// hostname) takes precedence over the request's own host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantLookup {
    pub key: Option<String>,
    pub host: Option<String>,
}

impl TenantLookup {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            host: None,
        }
    }

    pub fn host(host: impl Into<String>) -> Self {
        Self {
            key: None,
            host: Some(host.into()),
        }
    }
}

impl From<&str> for TenantLookup {
    fn from(value: &str) -> Self {
        TenantLookup::key(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub context_found: bool,
    pub sources_used: usize,
}

/// A handled request plus the measurements reported in the request log.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub chat_id: String,
    pub response: ChatResponse,
    pub outcome: AnswerOutcome,
    pub top_score: Option<f32>,
    pub retrieval_elapsed: Duration,
    pub model_elapsed: Duration,
    pub usage: TokenUsage,
}

pub struct ChatPipeline {
    directory: Arc<TenantDirectory>,
    retriever: Arc<ContextRetriever>,
    synthesizer: Arc<AnswerSynthesizer>,
}

impl ChatPipeline {
    pub fn new(
        directory: Arc<TenantDirectory>,
        retriever: Arc<ContextRetriever>,
        synthesizer: Arc<AnswerSynthesizer>,
    ) -> Self {
        Self {
            directory,
            retriever,
            synthesizer,
        }
    }

    pub fn directory(&self) -> &Arc<TenantDirectory> {
        &self.directory
    }

    /// A present key is authoritative: when it matches nothing the request
    /// host is not consulted.
    pub async fn resolve(&self, lookup: &TenantLookup) -> Option<Arc<TenantRecord>> {
        if let Some(key) = lookup.key.as_deref() {
            return self.directory.resolve(key).await;
        }
        match lookup.host.as_deref() {
            Some(host) => self.directory.find_by_host(host).await,
            None => None,
        }
    }

    pub async fn handle(
        &self,
        lookup: impl Into<TenantLookup>,
        query: &str,
    ) -> Result<ChatResponse, PipelineError> {
        self.run(&lookup.into(), query).await.map(|turn| turn.response)
    }

    pub async fn run(&self, lookup: &TenantLookup, query: &str) -> Result<ChatTurn, PipelineError> {
        let started = Instant::now();
        let Some(tenant) = self.resolve(lookup).await else {
            tracing::warn!(
                key = lookup.key.as_deref().unwrap_or(""),
                host = lookup.host.as_deref().unwrap_or(""),
                "Chat request for unknown tenant"
            );
            return Err(PipelineError::UnknownChat);
        };

        let retrieval = self.retriever.retrieve(&tenant, query).await;
        let answer = self
            .synthesizer
            .answer(query, &retrieval.snippets, tenant.system_prompt.as_deref())
            .await;

        tracing::debug!(
            chat_id = %tenant.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chat pipeline finished"
        );

        Ok(ChatTurn {
            chat_id: tenant.id.clone(),
            response: ChatResponse {
                response: answer.text,
                context_found: retrieval.context_found,
                sources_used: retrieval.sources_used(),
            },
            outcome: answer.outcome,
            top_score: retrieval.top_score,
            retrieval_elapsed: retrieval.elapsed,
            model_elapsed: answer.model_elapsed,
            usage: answer.usage,
        })
    }
}
