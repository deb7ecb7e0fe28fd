use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::core::security::require_admin_key;
use crate::server::extract::{ApiJson, ApiPath, ApiQuery};
use crate::rag::NewKnowledge;
use crate::state::AppState;
use crate::tenant::TenantRecord;

#[derive(Debug, Deserialize)]
pub struct AddKnowledgeRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Hostname alternative to `chat_id`.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(flatten)]
    pub knowledge: NewKnowledge,
}

#[derive(Debug, Deserialize)]
pub struct ChatScope {
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateKnowledgeRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

async fn resolve_tenant(
    state: &AppState,
    keys: &[Option<&str>],
) -> Result<Arc<TenantRecord>, ApiError> {
    let key = keys
        .iter()
        .flatten()
        .map(|key| key.trim())
        .find(|key| !key.is_empty())
        .ok_or_else(|| ApiError::BadRequest("chat_id is required".to_string()))?;

    state
        .directory
        .resolve(key)
        .await
        .ok_or(ApiError::UnknownChat)
}

pub async fn add_knowledge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<AddKnowledgeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin_key(&headers, &state.admin_key)?;
    let tenant = resolve_tenant(
        &state,
        &[payload.chat_id.as_deref(), payload.target.as_deref()],
    )
    .await?;

    let id = state.knowledge.add(&tenant, payload.knowledge).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Knowledge added",
        "qdrant_point_id": id,
    })))
}

pub async fn get_knowledge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(scope): ApiQuery<ChatScope>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin_key(&headers, &state.admin_key)?;
    let tenant = resolve_tenant(&state, &[scope.chat_id.as_deref()]).await?;

    let record = state.knowledge.get(&tenant, id).await?;
    Ok(Json(json!({"knowledge": record})))
}

pub async fn update_knowledge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateKnowledgeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin_key(&headers, &state.admin_key)?;
    let tenant = resolve_tenant(&state, &[payload.chat_id.as_deref()]).await?;

    let record = state
        .knowledge
        .update(&tenant, id, payload.title, payload.text)
        .await?;
    Ok(Json(json!({"success": true, "updated": record})))
}

pub async fn delete_knowledge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(scope): ApiQuery<ChatScope>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin_key(&headers, &state.admin_key)?;
    let tenant = resolve_tenant(&state, &[scope.chat_id.as_deref()]).await?;

    state.knowledge.delete(&tenant, id).await?;
    Ok(Json(json!({"deleted": id})))
}
