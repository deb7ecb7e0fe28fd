use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Failure categories a generative model can report. The synthesizer picks
/// the user-facing message from the variant; the payload is operator detail
/// and is only logged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model call timed out: {0}")]
    Timeout(String),
    #[error("model quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("model provider error: {0}")]
    Provider(String),
    #[error("unexpected model error: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input: Option<u32>,
    pub output: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
        }
    }
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// provider name (e.g. "gemini")
    fn name(&self) -> &str;

    /// single-shot completion of a composite prompt
    async fn generate(&self, prompt: &str) -> Result<Generation, ModelError>;
}
