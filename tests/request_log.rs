mod common;

use std::io;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;

use common::{app_state, FailingModel, PromptEchoModel};
use ragchat_backend::llm::{GenerativeModel, ModelError};
use ragchat_backend::server::router;

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn chat_request_lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| line.contains("chat_request"))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Sends one chat request and returns the logged `chat_request` lines.
async fn chat_and_capture(
    model: Arc<dyn GenerativeModel>,
    knowledge: &[(&str, &str)],
    body: serde_json::Value,
) -> Vec<String> {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let app = router(app_state(None, knowledge, model).await);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ORIGIN, "https://www.acme.test")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    logs.chat_request_lines()
}

const ACME: &[(&str, &str)] = &[("acme", "Acme ships blue widgets.")];

#[tokio::test]
async fn chat_request_event_carries_request_metrics() {
    let body = json!({"message": "widgets", "chat_id": "acme"});
    let lines = chat_and_capture(PromptEchoModel::new(), ACME, body).await;

    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    for field in [
        "chat_id=acme",
        "request_id=",
        "origin_domain=acme.test",
        "message_length=7",
        "context_found=true",
        "sources_used=1",
        "top_similarity_score=",
        "vector_search_ms=",
        "llm_ms=",
        "outcome=\"success\"",
        "total_ms=",
    ] {
        assert!(line.contains(field), "missing {} in {}", field, line);
    }
}

#[tokio::test]
async fn chat_request_event_reports_failure_outcome() {
    let model = Arc::new(FailingModel(ModelError::QuotaExceeded("429".to_string())));
    let body = json!({"message": "widgets", "chat_id": "acme"});
    let lines = chat_and_capture(model, ACME, body).await;

    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("outcome=\"quota_exceeded\""));
    assert!(lines[0].contains("context_found=true"));
    assert!(!lines[0].contains("tokens_input"));
}

#[tokio::test]
async fn chat_request_event_reports_no_context() {
    let body = json!({"message": "opening hours", "chatId": "globex"});
    let lines = chat_and_capture(PromptEchoModel::new(), ACME, body).await;

    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("chat_id=globex"));
    assert!(lines[0].contains("outcome=\"no_context\""));
    assert!(lines[0].contains("context_found=false"));
    assert!(lines[0].contains("sources_used=0"));
}
