pub mod paths;
pub mod service;
pub mod settings;
pub mod validation;

use thiserror::Error;

pub use paths::AppPaths;
pub use service::ConfigService;
pub use settings::{
    AdminConfig, AppConfig, ChatConfig, EmbeddingConfig, EmbeddingProvider, GenerationConfig,
    IndexBackend, ServerConfig, TenantSourceKind, TenantsConfig, VectorIndexConfig,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config at '{path}': expected {expected}")]
    Invalid { path: String, expected: &'static str },
    #[error("invalid config at '{path}': value must be between {min} and {max}")]
    OutOfRange { path: String, min: f64, max: f64 },
    #[error("invalid config at '{path}': expected one of {allowed:?}")]
    NotOneOf {
        path: String,
        allowed: &'static [&'static str],
    },
}
