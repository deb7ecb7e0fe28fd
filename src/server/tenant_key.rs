//! Extraction of the tenant key from an inbound chat request.
//!
//! Sources are tried in a fixed order: body fields, then query parameters
//! with the same names, then the `Origin` header host, then `Host`.

use axum::http::{header, HeaderMap};
use serde::Deserialize;

use crate::pipeline::TenantLookup;
use crate::tenant::normalize_host;

/// The accepted key fields, in priority order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantKeyFields {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default, rename = "chatId")]
    pub chat_id_camel: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default, rename = "tenantId")]
    pub tenant_id_camel: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl TenantKeyFields {
    pub fn first(&self) -> Option<&str> {
        [
            &self.chat_id,
            &self.chat_id_camel,
            &self.tenant_id,
            &self.tenant_id_camel,
            &self.domain,
        ]
        .into_iter()
        .filter_map(|value| value.as_deref())
        .map(str::trim)
        .find(|value| !value.is_empty())
    }
}

/// Normalized host of the `Origin` header. `Origin: null` yields none.
pub fn origin_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.eq_ignore_ascii_case("null"))
        .and_then(normalize_host)
}

fn host_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(normalize_host)
}

pub fn tenant_lookup(
    body: &TenantKeyFields,
    query: &TenantKeyFields,
    headers: &HeaderMap,
) -> TenantLookup {
    TenantLookup {
        key: body.first().or_else(|| query.first()).map(str::to_string),
        host: origin_host(headers).or_else(|| host_header(headers)),
    }
}
