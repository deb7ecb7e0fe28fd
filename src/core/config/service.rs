use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::AppConfig;
use super::validation::validate_config;
use super::ConfigError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 8] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "credential",
    "private_key",
    "access_key",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 3] = ["max_tokens", "tokens_input", "tokens_output"];

/// Environment variables understood by the deployed service, mapped onto
/// config paths. Applied after the YAML files so deployments can be
/// configured purely through the environment.
const ENV_OVERRIDES: [(&str, &[&str]); 8] = [
    ("GEMINI_API_KEY", &["generation", "api_key"]),
    ("GEMINI_MODEL_NAME", &["generation", "model"]),
    ("QDRANT_URL", &["vector_index", "url"]),
    ("QDRANT_API_KEY", &["vector_index", "api_key"]),
    ("TENANT_CONFIG_PATH", &["tenants", "config_path"]),
    ("ADMIN_API_KEY", &["admin", "api_key"]),
    ("EMBEDDING_BASE_URL", &["embedding", "base_url"]),
    ("CHAT_LANGUAGE", &["chat", "language"]),
];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("RAGCHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Merged `config.yml` + `secrets.yml` document before env overrides.
    pub fn load_raw(&self) -> Result<Value, ConfigError> {
        let public_config = load_yaml_file(&self.config_path())?;
        let secrets_config = load_yaml_file(&self.secrets_path())?;
        Ok(deep_merge(&public_config, &secrets_config))
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut raw = self.load_raw()?;
        apply_env_overrides(&mut raw, |name| env::var(name).ok());
        let mut config = parse_config(raw)?;
        self.fill_path_defaults(&mut config);
        Ok(config)
    }

    /// Fills unset paths and anchors relative ones at the project root.
    fn fill_path_defaults(&self, config: &mut AppConfig) {
        config.tenants.config_path = Some(match config.tenants.config_path.take() {
            Some(path) => self.anchor(path),
            None => self.paths.default_tenant_file(),
        });
        config.vector_index.sqlite_path = Some(match config.vector_index.sqlite_path.take() {
            Some(path) => self.anchor(path),
            None => self.paths.default_sqlite_index(),
        });
    }

    fn anchor(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.paths.project_root.join(path)
        }
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

/// Validates the merged document and converts it into the typed config.
pub fn parse_config(raw: Value) -> Result<AppConfig, ConfigError> {
    validate_config(&raw)?;
    serde_json::from_value(raw).map_err(|err| ConfigError::Parse(err.to_string()))
}

pub fn apply_env_overrides<F>(config: &mut Value, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for (name, path) in ENV_OVERRIDES {
        if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
            ensure_object_path(config, path, Value::String(value.trim().to_string()));
        }
    }

    if let Some(port) = lookup("PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
        ensure_object_path(config, &["server", "port"], Value::from(port));
    }

    if let Some(base_url) = lookup("MANAGEMENT_API_BASE_URL").filter(|v| !v.trim().is_empty()) {
        ensure_object_path(
            config,
            &["tenants", "api_base_url"],
            Value::String(base_url.trim().to_string()),
        );
        ensure_object_path(
            config,
            &["tenants", "source"],
            Value::String("remote".to_string()),
        );
        // The management API shares the admin key with this service.
        if let Some(key) = lookup("ADMIN_API_KEY").filter(|v| !v.trim().is_empty()) {
            ensure_object_path(
                config,
                &["tenants", "admin_api_key"],
                Value::String(key.trim().to_string()),
            );
        }
    }
}

fn load_yaml_file(path: &Path) -> Result<Value, ConfigError> {
    if !path.exists() {
        return Ok(Value::Object(Map::new()));
    }

    let contents = fs::read_to_string(path)
        .map_err(|err| ConfigError::Parse(format!("{}: {}", path.display(), err)))?;
    let value = serde_yaml::from_str::<Value>(&contents)
        .map_err(|err| ConfigError::Parse(format!("{}: {}", path.display(), err)))?;

    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(ConfigError::Invalid {
            path: path.display().to_string(),
            expected: "mapping",
        }),
    }
}

fn ensure_object_path(config: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        return;
    }

    let mut current = config;
    for (index, key) in path.iter().enumerate() {
        if index == path.len() - 1 {
            if let Some(map) = current.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            return;
        }

        if !current.get(*key).map(|v| v.is_object()).unwrap_or(false) {
            let Some(map) = current.as_object_mut() else {
                return;
            };
            map.insert((*key).to_string(), Value::Object(Map::new()));
        }

        let Some(next) = current.get_mut(*key) else {
            return;
        };
        current = next;
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}
