#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ragchat_backend::core::config::AppConfig;
use ragchat_backend::llm::{
    AnswerSynthesizer, Generation, GenerativeModel, HashingEmbedder, Language, ModelError,
};
use ragchat_backend::pipeline::ChatPipeline;
use ragchat_backend::rag::{ContextRetriever, KnowledgeRecord, SqliteIndex, VectorIndex};
use ragchat_backend::state::AppState;
use ragchat_backend::tenant::{DirectoryError, TenantDirectory, TenantRecord, TenantSource};

pub const DIMENSION: usize = 256;

pub struct StaticSource(pub Vec<TenantRecord>);

#[async_trait]
impl TenantSource for StaticSource {
    async fn load(&self) -> Result<Vec<TenantRecord>, DirectoryError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Answers with the prompt it was given, so assertions can see the context.
pub struct PromptEchoModel {
    pub calls: Mutex<Vec<String>>,
}

impl PromptEchoModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerativeModel for PromptEchoModel {
    fn name(&self) -> &str {
        "prompt-echo"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, ModelError> {
        self.calls.lock().unwrap().push(prompt.to_string());
        Ok(Generation::text(prompt))
    }
}

pub struct FailingModel(pub ModelError);

#[async_trait]
impl GenerativeModel for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> Result<Generation, ModelError> {
        Err(self.0.clone())
    }
}

pub fn tenants() -> Vec<TenantRecord> {
    vec![
        TenantRecord::new("acme").with_hosts(["acme.test"]),
        TenantRecord::new("globex").with_hosts(["www.globex.test"]),
    ]
}

pub async fn directory(records: Vec<TenantRecord>) -> Arc<TenantDirectory> {
    Arc::new(TenantDirectory::load(Arc::new(StaticSource(records)), Duration::from_secs(60)).await)
}

pub async fn seeded_index(knowledge: &[(&str, &str)]) -> Arc<SqliteIndex> {
    let embedder = HashingEmbedder::new(DIMENSION);
    let index = Arc::new(SqliteIndex::in_memory(DIMENSION).await.unwrap());
    for (partition, text) in knowledge {
        let record = KnowledgeRecord::knowledge(*partition, "seed", *text)
            .with_vector(embedder.embed_sync(text));
        index.upsert(record).await.unwrap();
    }
    index
}

pub async fn pipeline(
    knowledge: &[(&str, &str)],
    model: Arc<dyn GenerativeModel>,
) -> ChatPipeline {
    let retriever = ContextRetriever::new(
        Arc::new(HashingEmbedder::new(DIMENSION)),
        seeded_index(knowledge).await,
        10,
        0.05,
    );
    let synthesizer = AnswerSynthesizer::new(model, Language::En, Duration::from_secs(5));
    ChatPipeline::new(
        directory(tenants()).await,
        Arc::new(retriever),
        Arc::new(synthesizer),
    )
}

pub async fn app_state(
    admin_key: Option<&str>,
    knowledge: &[(&str, &str)],
    model: Arc<dyn GenerativeModel>,
) -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.admin.api_key = admin_key.map(str::to_string);
    config.chat.language = Language::En;
    config.chat.max_message_chars = 100;
    config.vector_index.dimension = DIMENSION;

    AppState::from_parts(
        config,
        directory(tenants()).await,
        Arc::new(HashingEmbedder::new(DIMENSION)),
        seeded_index(knowledge).await,
        model,
    )
}
