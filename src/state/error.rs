use thiserror::Error;

use crate::core::config::ConfigError;
use crate::rag::IndexError;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("Failed to open vector index: {0}")]
    Index(#[source] IndexError),

    #[error("Invalid tenant source configuration: {0}")]
    TenantSource(String),
}
