use serde_json::{Map, Value};

use super::ConfigError;

pub fn validate_config(config: &Value) -> Result<(), ConfigError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(chat) = expect_optional_object(root, "chat")? {
        validate_u64_field(
            chat,
            "chat.max_message_chars",
            "max_message_chars",
            1,
            1_000_000,
        )?;
        validate_enum_field(chat, "chat.language", "language", &["ja", "en"])?;
    }

    if let Some(tenants) = expect_optional_object(root, "tenants")? {
        validate_enum_field(tenants, "tenants.source", "source", &["file", "remote"])?;
        validate_optional_string_field(tenants, "tenants.config_path", "config_path")?;
        validate_optional_string_field(tenants, "tenants.api_base_url", "api_base_url")?;
        validate_optional_string_field(tenants, "tenants.admin_api_key", "admin_api_key")?;
        validate_u64_field(
            tenants,
            "tenants.cache_ttl_secs",
            "cache_ttl_secs",
            1,
            86_400,
        )?;
        validate_u64_field(
            tenants,
            "tenants.request_timeout_secs",
            "request_timeout_secs",
            1,
            600,
        )?;
        if tenants.get("source").and_then(|v| v.as_str()) == Some("remote")
            && tenants
                .get("api_base_url")
                .and_then(|v| v.as_str())
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(ConfigError::Invalid {
                path: "tenants.api_base_url".to_string(),
                expected: "non-empty URL when tenants.source is 'remote'",
            });
        }
    }

    if let Some(index) = expect_optional_object(root, "vector_index")? {
        validate_enum_field(index, "vector_index.backend", "backend", &["qdrant", "sqlite"])?;
        validate_optional_string_field(index, "vector_index.url", "url")?;
        validate_optional_string_field(index, "vector_index.collection", "collection")?;
        validate_u64_field(index, "vector_index.dimension", "dimension", 1, 65_536)?;
        validate_u64_field(index, "vector_index.search_limit", "search_limit", 1, 1_000)?;
        validate_f64_field(
            index,
            "vector_index.relevance_threshold",
            "relevance_threshold",
            -1.0,
            1.0,
        )?;
        validate_u64_field(index, "vector_index.timeout_secs", "timeout_secs", 1, 600)?;
        validate_u64_field(
            index,
            "vector_index.connect_retries",
            "connect_retries",
            0,
            100,
        )?;
        validate_u64_field(
            index,
            "vector_index.retry_delay_secs",
            "retry_delay_secs",
            0,
            600,
        )?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_enum_field(
            embedding,
            "embedding.provider",
            "provider",
            &["http", "hashing"],
        )?;
        validate_optional_string_field(embedding, "embedding.base_url", "base_url")?;
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        validate_u64_field(embedding, "embedding.timeout_secs", "timeout_secs", 1, 600)?;
    }

    if let Some(generation) = expect_optional_object(root, "generation")? {
        validate_enum_field(generation, "generation.provider", "provider", &["gemini"])?;
        validate_optional_string_field(generation, "generation.base_url", "base_url")?;
        validate_optional_string_field(generation, "generation.model", "model")?;
        validate_u64_field(generation, "generation.timeout_secs", "timeout_secs", 1, 600)?;
    }

    if let Some(admin) = expect_optional_object(root, "admin")? {
        validate_optional_string_field(admin, "admin.api_key", "api_key")?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ConfigError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ConfigError::OutOfRange {
            path: path.to_string(),
            min: min as f64,
            max: max as f64,
        });
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(ConfigError::OutOfRange {
            path: path.to_string(),
            min,
            max,
        });
    }
    Ok(())
}

fn validate_enum_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    allowed: &'static [&'static str],
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    match value.as_str() {
        Some(text) if allowed.contains(&text) => Ok(()),
        _ => Err(ConfigError::NotOneOf {
            path: path.to_string(),
            allowed,
        }),
    }
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(ConfigError::Invalid {
                path: format!("{}[{}]", path, index),
                expected: "string",
            });
        };
        if text.trim().is_empty() {
            return Err(ConfigError::Invalid {
                path: format!("{}[{}]", path, index),
                expected: "non-empty string",
            });
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        path: path.to_string(),
        expected,
    }
}
