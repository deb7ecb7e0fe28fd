use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::server::extract::{ApiJson, ApiQuery};
use crate::server::tenant_key::{origin_host, tenant_lookup, TenantKeyFields};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub keys: TenantKeyFields,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    ApiQuery(query_keys): ApiQuery<TenantKeyFields>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let started = Instant::now();
    let request_id = Uuid::new_v4();

    let message = payload.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("Message is required".to_string()));
    }
    let message_length = message.chars().count();
    let max_chars = state.config.chat.max_message_chars;
    if message_length > max_chars {
        return Err(ApiError::BadRequest(format!(
            "Message must be at most {} characters",
            max_chars
        )));
    }

    let lookup = tenant_lookup(&payload.keys, &query_keys, &headers);
    let turn = state.pipeline.run(&lookup, message).await?;

    tracing::info!(
        chat_id = %turn.chat_id,
        request_id = %request_id,
        origin_domain = %origin_host(&headers).unwrap_or_default(),
        message_length,
        context_found = turn.response.context_found,
        sources_used = turn.response.sources_used,
        top_similarity_score = turn.top_score,
        vector_search_ms = turn.retrieval_elapsed.as_millis() as u64,
        llm_ms = turn.model_elapsed.as_millis() as u64,
        tokens_input = turn.usage.input,
        tokens_output = turn.usage.output,
        outcome = turn.outcome.as_str(),
        total_ms = started.elapsed().as_millis() as u64,
        "chat_request"
    );

    Ok(Json(turn.response))
}
