mod common;

use std::sync::Arc;

use common::{pipeline, FailingModel, PromptEchoModel};
use ragchat_backend::llm::{Language, ModelError};
use ragchat_backend::pipeline::{PipelineError, TenantLookup};

#[tokio::test]
async fn answers_from_the_tenants_knowledge() {
    let model = PromptEchoModel::new();
    let pipeline = pipeline(&[("acme", "Acme ships blue widgets.")], model.clone()).await;

    let response = pipeline
        .handle("acme", "what color are your widgets")
        .await
        .unwrap();

    assert!(response.response.contains("blue"));
    assert!(response.context_found);
    assert_eq!(response.sources_used, 1);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn tenant_without_knowledge_gets_not_found_message() {
    let model = PromptEchoModel::new();
    let pipeline = pipeline(&[("globex", "Globex ships blue widgets.")], model.clone()).await;

    let response = pipeline
        .handle("acme", "what color are your widgets")
        .await
        .unwrap();

    assert_eq!(response.response, Language::En.messages().no_context);
    assert!(!response.context_found);
    assert_eq!(response.sources_used, 0);
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn quota_exhaustion_falls_back_to_snippets() {
    let model = Arc::new(FailingModel(ModelError::QuotaExceeded(
        "RESOURCE_EXHAUSTED".to_string(),
    )));
    let pipeline = pipeline(&[("acme", "Alpha info"), ("acme", "Beta info")], model).await;

    let response = pipeline.handle("acme", "info").await.unwrap();

    let messages = Language::En.messages();
    assert!(response.response.starts_with(messages.quota_exceeded));
    assert!(response.response.contains(messages.fallback_heading));
    assert!(response.response.contains("Alpha info"));
    assert!(response.response.contains("Beta info"));
    assert!(!response.response.contains("RESOURCE_EXHAUSTED"));
    assert!(response.context_found);
    assert_eq!(response.sources_used, 2);
}

#[tokio::test]
async fn hosts_resolve_with_or_without_www() {
    let pipeline = pipeline(&[("globex", "Globex ships red widgets.")], PromptEchoModel::new()).await;

    for host in ["globex.test", "www.globex.test", "https://WWW.globex.test/widget"] {
        let response = pipeline
            .run(&TenantLookup::host(host), "widgets")
            .await
            .unwrap();
        assert_eq!(response.chat_id, "globex");
        assert!(response.response.context_found);
    }
}

#[tokio::test]
async fn unknown_tenant_is_not_an_empty_answer() {
    let pipeline = pipeline(&[], PromptEchoModel::new()).await;

    let err = pipeline.handle("initech", "hello").await.unwrap_err();
    assert_eq!(err, PipelineError::UnknownChat);

    let err = pipeline
        .run(&TenantLookup::host("initech.test"), "hello")
        .await
        .unwrap_err();
    assert_eq!(err, PipelineError::UnknownChat);
}
