//! Typed view of the merged configuration document.
//!
//! Every section is optional in `config.yml`; missing keys fall back to the
//! defaults below, which mirror the production deployment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::Language;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub chat: ChatConfig,
    pub tenants: TenantsConfig,
    pub vector_index: VectorIndexConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty means any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub max_message_chars: usize,
    pub language: Language,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 4000,
            language: Language::Ja,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSourceKind {
    File,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantsConfig {
    pub source: TenantSourceKind,
    pub config_path: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub admin_api_key: Option<String>,
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl TenantsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            source: TenantSourceKind::File,
            config_path: None,
            api_base_url: None,
            admin_api_key: None,
            cache_ttl_secs: 30,
            request_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    Qdrant,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub backend: IndexBackend,
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub dimension: usize,
    pub search_limit: usize,
    pub relevance_threshold: f32,
    pub timeout_secs: u64,
    pub connect_retries: u32,
    pub retry_delay_secs: u64,
    pub sqlite_path: Option<PathBuf>,
}

impl VectorIndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Qdrant,
            url: "http://vectordb:6333".to_string(),
            api_key: None,
            collection: "chat_context".to_string(),
            dimension: 384,
            search_limit: 10,
            relevance_threshold: 0.05,
            timeout_secs: 10,
            connect_retries: 5,
            retry_delay_secs: 2,
            sqlite_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    Http,
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Http,
            base_url: "http://localhost:8080".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            api_key: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash-lite".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub api_key: Option<String>,
}
