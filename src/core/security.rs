use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::core::errors::ApiError;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

/// Shared secret guarding the management endpoints.
///
/// With no key configured the endpoints are open; `AppState` logs a warning
/// at startup in that case.
#[derive(Debug, Clone, Default)]
pub struct AdminKey {
    value: Option<String>,
}

impl AdminKey {
    pub fn new(value: Option<String>) -> Self {
        let value = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Self { value }
    }

    pub fn is_configured(&self) -> bool {
        self.value.is_some()
    }
}

pub fn require_admin_key(headers: &HeaderMap, expected: &AdminKey) -> Result<(), ApiError> {
    let Some(expected) = expected.value.as_deref() else {
        return Ok(());
    };

    let header_value = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if header_value.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    if !bool::from(header_value.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn accepts_matching_header() {
        let expected = AdminKey::new(Some("secret".to_string()));
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static("secret"));

        assert!(require_admin_key(&headers, &expected).is_ok());
    }

    #[test]
    fn rejects_missing_or_wrong_header() {
        let expected = AdminKey::new(Some("secret".to_string()));

        let missing = require_admin_key(&HeaderMap::new(), &expected);
        assert!(matches!(missing, Err(ApiError::Unauthorized)));

        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static("secreT"));
        let wrong = require_admin_key(&headers, &expected);
        assert!(matches!(wrong, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn open_when_no_key_configured() {
        let expected = AdminKey::new(Some("   ".to_string()));
        assert!(!expected.is_configured());
        assert!(require_admin_key(&HeaderMap::new(), &expected).is_ok());
    }

    #[test]
    fn rejects_non_utf8_header_value() {
        let expected = AdminKey::new(Some("secret".to_string()));
        let mut headers = HeaderMap::new();
        let non_utf8 = HeaderValue::from_bytes(&[0xFF, 0xFE]).unwrap();
        headers.insert(ADMIN_KEY_HEADER, non_utf8);

        assert!(matches!(
            require_admin_key(&headers, &expected),
            Err(ApiError::Unauthorized)
        ));
    }
}
