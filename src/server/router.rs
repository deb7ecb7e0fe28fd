use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::security::ADMIN_KEY_HEADER;
use crate::server::handlers::{chat, health, knowledge, tenants};
use crate::state::AppState;

/// Creates the application router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.config.server.cors_allowed_origins);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/chat", post(chat::chat))
        .route("/api/add_knowledge", post(knowledge::add_knowledge))
        .route(
            "/api/knowledge/:id",
            get(knowledge::get_knowledge)
                .put(knowledge::update_knowledge)
                .delete(knowledge::delete_knowledge),
        )
        .route("/api/debug/tenants", get(tenants::debug_tenants))
        .route("/api/tenants/refresh", post(tenants::refresh_tenants))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

/// The widget is embedded on customer sites, so an empty list allows any
/// origin.
fn build_cors_layer(configured: &[String]) -> CorsLayer {
    let allowed_origins = configured
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(ADMIN_KEY_HEADER),
        ])
}
