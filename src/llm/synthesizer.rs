use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::prompt::{build_prompt, Language};
use super::provider::{GenerativeModel, ModelError, TokenUsage};
use crate::rag::CONTEXT_DELIMITER;

/// Upper bound, in characters, on snippet text surfaced by the fallback.
pub const FALLBACK_SNIPPET_CHARS: usize = 1200;
const FALLBACK_SNIPPET_COUNT: usize = 2;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Success,
    NoContext,
    Timeout,
    QuotaExceeded,
    ProviderError,
    UnknownError,
}

impl AnswerOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerOutcome::Success => "success",
            AnswerOutcome::NoContext => "no_context",
            AnswerOutcome::Timeout => "timeout",
            AnswerOutcome::QuotaExceeded => "quota_exceeded",
            AnswerOutcome::ProviderError => "provider_error",
            AnswerOutcome::UnknownError => "unknown_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub outcome: AnswerOutcome,
    pub usage: TokenUsage,
    /// Time spent in the model call; zero when it was skipped.
    pub model_elapsed: Duration,
}

/// Turns a question and retrieved context into the text returned to the
/// user. Never fails: model errors become localized messages.
pub struct AnswerSynthesizer {
    model: Arc<dyn GenerativeModel>,
    language: Language,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn GenerativeModel>, language: Language, timeout: Duration) -> Self {
        Self {
            model,
            language,
            timeout,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Answers from the given snippets, best first. Blank snippets are
    /// ignored; with none left the model is not called.
    pub async fn answer<S: AsRef<str>>(
        &self,
        query: &str,
        snippets: &[S],
        persona: Option<&str>,
    ) -> Answer {
        let messages = self.language.messages();
        let snippets: Vec<&str> = snippets
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| !s.trim().is_empty())
            .collect();

        if snippets.is_empty() {
            return Answer {
                text: messages.no_context.to_string(),
                outcome: AnswerOutcome::NoContext,
                usage: TokenUsage::default(),
                model_elapsed: Duration::ZERO,
            };
        }

        let context = snippets.join(CONTEXT_DELIMITER);
        let prompt = build_prompt(self.language, persona, &context, query);

        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.model.generate(&prompt)).await
        {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(format!(
                "no response within {}s",
                self.timeout.as_secs_f32()
            ))),
        };
        let model_elapsed = started.elapsed();

        let (text, outcome) = match result {
            Ok(generation) => {
                return Answer {
                    text: generation.text,
                    outcome: AnswerOutcome::Success,
                    usage: generation.usage,
                    model_elapsed,
                };
            }
            Err(ModelError::Timeout(detail)) => {
                tracing::warn!(model = self.model.name(), error = %detail, "Model call timed out");
                (messages.timeout.to_string(), AnswerOutcome::Timeout)
            }
            Err(ModelError::QuotaExceeded(detail)) => {
                tracing::warn!(model = self.model.name(), error = %detail, "Model quota exhausted");
                (
                    contextual_fallback(&snippets, messages.quota_exceeded, messages.fallback_heading),
                    AnswerOutcome::QuotaExceeded,
                )
            }
            Err(ModelError::Provider(detail)) => {
                tracing::error!(model = self.model.name(), error = %detail, "Model provider error");
                (
                    contextual_fallback(&snippets, messages.provider_error, messages.fallback_heading),
                    AnswerOutcome::ProviderError,
                )
            }
            Err(ModelError::Unknown(detail)) => {
                tracing::error!(model = self.model.name(), error = %detail, "Unexpected model error");
                (messages.unknown_error.to_string(), AnswerOutcome::UnknownError)
            }
        };

        Answer {
            text,
            outcome,
            usage: TokenUsage::default(),
            model_elapsed,
        }
    }
}

/// The apology followed by up to the first two snippets, jointly capped at
/// [`FALLBACK_SNIPPET_CHARS`] characters.
pub fn contextual_fallback(snippets: &[&str], base_message: &str, heading: &str) -> String {
    let sections: Vec<&str> = snippets
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(FALLBACK_SNIPPET_COUNT)
        .collect();
    if sections.is_empty() {
        return base_message.to_string();
    }

    let mut snippet = sections.join(CONTEXT_DELIMITER);
    if snippet.chars().count() > FALLBACK_SNIPPET_CHARS {
        let truncated: String = snippet.chars().take(FALLBACK_SNIPPET_CHARS).collect();
        snippet = format!("{}{}", truncated.trim_end(), ELLIPSIS);
    }

    format!("{}\n\n{}\n{}", base_message, heading, snippet)
}
