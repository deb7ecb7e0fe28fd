use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::provider::{Generation, GenerativeModel, ModelError, TokenUsage};

const ERROR_BODY_EXCERPT: usize = 500;

/// Google Gemini `generateContent` over REST.
#[derive(Clone)]
pub struct GeminiModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u32>,
    #[serde(default)]
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GeminiModel {
    pub fn new(
        client: Client,
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

/// Maps an HTTP failure onto the model error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> ModelError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let api_status = envelope
        .as_ref()
        .map(|e| e.error.status.as_str())
        .unwrap_or_default();
    let detail = match &envelope {
        Some(e) if !e.error.message.is_empty() => {
            format!("{} {}: {}", status.as_u16(), api_status, e.error.message)
        }
        _ => {
            let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
            format!("{}: {}", status.as_u16(), excerpt)
        }
    };

    if status == StatusCode::GATEWAY_TIMEOUT || api_status == "DEADLINE_EXCEEDED" {
        ModelError::Timeout(detail)
    } else if status == StatusCode::TOO_MANY_REQUESTS || api_status == "RESOURCE_EXHAUSTED" {
        ModelError::QuotaExceeded(detail)
    } else {
        ModelError::Provider(detail)
    }
}

/// A request that never got a response means the provider is unreachable,
/// not that the integration is broken.
fn classify_send_error(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ModelError::Provider(format!("unreachable: {}", err))
    } else {
        ModelError::Unknown(err.to_string())
    }
}

#[async_trait]
impl GenerativeModel for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, ModelError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        let mut request = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request.send().await.map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                ModelError::Timeout(err.to_string())
            } else {
                ModelError::Unknown(format!("undecodable response: {}", err))
            }
        })?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ModelError::Unknown(
                "response contained no text candidate".to_string(),
            ));
        }

        let usage = parsed
            .usage_metadata
            .map(|u| TokenUsage {
                input: u.prompt_token_count,
                output: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(Generation { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AnswerOutcome, AnswerSynthesizer, Language};
    use axum::extract::Path;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn model(base: &str, timeout: Duration) -> GeminiModel {
        GeminiModel::new(
            Client::new(),
            base,
            "gemini-2.0-flash-lite",
            Some("gkey".to_string()),
            timeout,
        )
    }

    async fn failing_server(status: StatusCode, body: Value) -> String {
        let router = Router::new().route(
            "/v1beta/models/:call",
            post(move || {
                let body = body.clone();
                async move { (status, Json(body)) }
            }),
        );
        serve(router).await
    }

    #[tokio::test]
    async fn returns_text_and_usage() {
        let router = Router::new().route(
            "/v1beta/models/:call",
            post(
                |Path(call): Path<String>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    assert_eq!(call, "gemini-2.0-flash-lite:generateContent");
                    assert_eq!(headers.get("x-goog-api-key").unwrap(), "gkey");
                    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
                    Json(json!({
                        "candidates": [{"content": {"parts": [{"text": "echo: "}, {"text": prompt}]}}],
                        "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4}
                    }))
                },
            ),
        );
        let base = serve(router).await;

        let generation = model(&base, Duration::from_secs(5))
            .generate("hello")
            .await
            .unwrap();

        assert_eq!(generation.text, "echo: hello");
        assert_eq!(generation.usage.input, Some(12));
        assert_eq!(generation.usage.output, Some(4));
    }

    #[tokio::test]
    async fn classifies_quota_and_deadline_errors() {
        let quota = failing_server(
            StatusCode::TOO_MANY_REQUESTS,
            json!({"error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}}),
        )
        .await;
        let result = model(&quota, Duration::from_secs(5)).generate("q").await;
        assert!(matches!(result, Err(ModelError::QuotaExceeded(_))));

        let deadline = failing_server(
            StatusCode::GATEWAY_TIMEOUT,
            json!({"error": {"code": 504, "message": "deadline", "status": "DEADLINE_EXCEEDED"}}),
        )
        .await;
        let result = model(&deadline, Duration::from_secs(5)).generate("q").await;
        assert!(matches!(result, Err(ModelError::Timeout(_))));

        let other = failing_server(
            StatusCode::BAD_REQUEST,
            json!({"error": {"code": 400, "message": "bad key", "status": "INVALID_ARGUMENT"}}),
        )
        .await;
        let result = model(&other, Duration::from_secs(5)).generate("q").await;
        assert!(matches!(result, Err(ModelError::Provider(msg)) if msg.contains("bad key")));
    }

    #[tokio::test]
    async fn slow_response_is_a_timeout() {
        let router = Router::new().route(
            "/v1beta/models/:call",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({}))
            }),
        );
        let base = serve(router).await;

        let result = model(&base, Duration::from_millis(100)).generate("q").await;
        assert!(matches!(result, Err(ModelError::Timeout(_))));
    }

    #[tokio::test]
    async fn empty_candidates_are_unknown() {
        let router = Router::new().route(
            "/v1beta/models/:call",
            post(|| async { Json(json!({"candidates": []})) }),
        );
        let base = serve(router).await;

        let result = model(&base, Duration::from_secs(5)).generate("q").await;
        assert!(matches!(result, Err(ModelError::Unknown(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_provider_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let unreachable = model(&format!("http://{}", addr), Duration::from_secs(5));
        let result = unreachable.generate("q").await;
        assert!(matches!(result, Err(ModelError::Provider(_))));

        let synthesizer = AnswerSynthesizer::new(
            std::sync::Arc::new(unreachable),
            Language::En,
            Duration::from_secs(5),
        );
        let answer = synthesizer.answer("q", &["Alpha info", "Beta info"], None).await;
        assert_eq!(answer.outcome, AnswerOutcome::ProviderError);
        assert!(answer.text.contains("Alpha info"));
        assert!(answer.text.contains("Beta info"));
    }

    #[test]
    fn quota_status_without_json_body_is_still_quota() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, ModelError::QuotaExceeded(msg) if msg.contains("slow down")));
    }
}
