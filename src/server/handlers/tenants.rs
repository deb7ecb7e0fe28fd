use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use crate::core::errors::ApiError;
use crate::core::security::require_admin_key;
use crate::state::AppState;

pub async fn debug_tenants(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin_key(&headers, &state.admin_key)?;
    Ok(Json(state.directory.stats().await))
}

pub async fn refresh_tenants(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin_key(&headers, &state.admin_key)?;
    let stats = state.directory.refresh().await;
    tracing::info!(
        chat_count = stats.chat_count,
        host_count = stats.host_count,
        "Tenant directory refreshed on request"
    );
    Ok(Json(stats))
}
