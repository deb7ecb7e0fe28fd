pub mod embedding;
pub mod gemini;
pub mod prompt;
pub mod provider;
pub mod synthesizer;

pub use embedding::{Embedder, EmbeddingError, HashingEmbedder, HttpEmbedder};
pub use gemini::GeminiModel;
pub use prompt::{build_prompt, Language, Messages};
pub use provider::{Generation, GenerativeModel, ModelError, TokenUsage};
pub use synthesizer::{contextual_fallback, Answer, AnswerOutcome, AnswerSynthesizer};
