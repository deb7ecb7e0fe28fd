use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{
    AppConfig, AppPaths, ConfigService, EmbeddingProvider, IndexBackend, TenantSourceKind,
};
use crate::core::security::AdminKey;
use crate::llm::{AnswerSynthesizer, Embedder, GeminiModel, GenerativeModel, HashingEmbedder, HttpEmbedder};
use crate::pipeline::ChatPipeline;
use crate::rag::store::connect_with_retries;
use crate::rag::{ContextRetriever, KnowledgeService, QdrantIndex, SqliteIndex, VectorIndex};
use crate::tenant::{FileTenantSource, RemoteTenantSource, TenantDirectory, TenantSource};

pub mod error;

use error::InitializationError;

/// Shared state handed to every route.
///
/// Holds the tenant directory and the services built on top of it. The
/// directory is the only piece with mutable internals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub directory: Arc<TenantDirectory>,
    pub pipeline: Arc<ChatPipeline>,
    pub knowledge: Arc<KnowledgeService>,
    pub admin_key: AdminKey,
}

impl AppState {
    /// Loads configuration from `paths` and builds the state from it.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config_service = ConfigService::new(paths);
        let config = config_service.load()?;
        tracing::info!(path = %config_service.config_path().display(), "Configuration loaded");
        Self::from_config(config).await
    }

    /// Builds every collaborator described by `config`.
    ///
    /// The vector index is probed with retries; if it never becomes ready the
    /// service still starts and retrieval degrades to no-context.
    pub async fn from_config(config: AppConfig) -> Result<Arc<Self>, InitializationError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ragchat-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(InitializationError::HttpClient)?;

        let source = build_tenant_source(&config, &client)?;
        tracing::info!(source = %source.describe(), "Loading tenant directory");
        let directory = Arc::new(TenantDirectory::load(source, config.tenants.cache_ttl()).await);

        let embedder = build_embedder(&config, &client);
        let index = build_index(&config, &client).await?;

        let ready = connect_with_retries(
            index.as_ref(),
            config.vector_index.connect_retries,
            Duration::from_secs(config.vector_index.retry_delay_secs),
        )
        .await;
        if !ready {
            tracing::error!(
                index = index.name(),
                "Vector index unreachable; answers will fall back to the no-context message"
            );
        }

        if config.generation.api_key.is_none() {
            tracing::warn!("No generation API key configured; model calls will fail");
        }
        let model: Arc<dyn GenerativeModel> = Arc::new(GeminiModel::new(
            client,
            &config.generation.base_url,
            config.generation.model.clone(),
            config.generation.api_key.clone(),
            config.generation.timeout(),
        ));

        Ok(Self::from_parts(config, directory, embedder, index, model))
    }

    /// Assembles the state from already-built collaborators.
    pub fn from_parts(
        config: AppConfig,
        directory: Arc<TenantDirectory>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn GenerativeModel>,
    ) -> Arc<Self> {
        let admin_key = AdminKey::new(config.admin.api_key.clone());
        if !admin_key.is_configured() {
            tracing::warn!("No admin API key configured; management endpoints are open");
        }

        let retriever = Arc::new(ContextRetriever::new(
            embedder.clone(),
            index.clone(),
            config.vector_index.search_limit,
            config.vector_index.relevance_threshold,
        ));
        let synthesizer = Arc::new(AnswerSynthesizer::new(
            model,
            config.chat.language,
            config.generation.timeout(),
        ));
        let pipeline = Arc::new(ChatPipeline::new(directory.clone(), retriever, synthesizer));
        let knowledge = Arc::new(KnowledgeService::new(embedder, index));

        Arc::new(AppState {
            config: Arc::new(config),
            directory,
            pipeline,
            knowledge,
            admin_key,
        })
    }
}

fn build_tenant_source(
    config: &AppConfig,
    client: &reqwest::Client,
) -> Result<Arc<dyn TenantSource>, InitializationError> {
    let tenants = &config.tenants;
    match tenants.source {
        TenantSourceKind::File => {
            let path = tenants.config_path.clone().ok_or_else(|| {
                InitializationError::TenantSource("tenants.config_path is not set".to_string())
            })?;
            Ok(Arc::new(FileTenantSource::new(path)))
        }
        TenantSourceKind::Remote => {
            let base_url = tenants
                .api_base_url
                .as_deref()
                .filter(|url| !url.trim().is_empty())
                .ok_or_else(|| {
                    InitializationError::TenantSource(
                        "tenants.api_base_url is required for the remote source".to_string(),
                    )
                })?;
            Ok(Arc::new(RemoteTenantSource::new(
                client.clone(),
                base_url,
                tenants.admin_api_key.clone(),
                tenants.request_timeout(),
            )))
        }
    }
}

fn build_embedder(config: &AppConfig, client: &reqwest::Client) -> Arc<dyn Embedder> {
    let dimension = config.vector_index.dimension;
    match config.embedding.provider {
        EmbeddingProvider::Http => Arc::new(HttpEmbedder::new(
            client.clone(),
            &config.embedding.base_url,
            config.embedding.model.clone(),
            config.embedding.api_key.clone(),
            dimension,
            Duration::from_secs(config.embedding.timeout_secs),
        )),
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(dimension)),
    }
}

async fn build_index(
    config: &AppConfig,
    client: &reqwest::Client,
) -> Result<Arc<dyn VectorIndex>, InitializationError> {
    let settings = &config.vector_index;
    match settings.backend {
        IndexBackend::Qdrant => Ok(Arc::new(QdrantIndex::new(
            client.clone(),
            &settings.url,
            settings.collection.clone(),
            settings.api_key.clone(),
            settings.dimension,
            settings.timeout(),
        ))),
        IndexBackend::Sqlite => {
            let index = match settings.sqlite_path.as_deref() {
                Some(path) => SqliteIndex::open(path, settings.dimension).await,
                None => SqliteIndex::in_memory(settings.dimension).await,
            }
            .map_err(InitializationError::Index)?;
            Ok(Arc::new(index))
        }
    }
}
