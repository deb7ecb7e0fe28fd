use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{DirectoryError, TenantRecord};

const ADMIN_KEY_HEADER: &str = "X-Admin-API-Key";
const ERROR_BODY_EXCERPT: usize = 500;

/// Backing store the directory reloads from.
#[async_trait]
pub trait TenantSource: Send + Sync {
    async fn load(&self) -> Result<Vec<TenantRecord>, DirectoryError>;

    /// Human readable location, surfaced in directory stats.
    fn describe(&self) -> String;
}

// --- static file -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TenantFile {
    #[serde(default)]
    tenants: Vec<TenantFileEntry>,
}

#[derive(Debug, Deserialize)]
struct TenantFileEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    allowed_domains: Vec<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    partition_key: Option<String>,
}

/// Tenants listed in a JSON (or YAML, by extension) document:
/// `{"tenants": [{"id": "...", "allowed_domains": ["..."]}]}`.
#[derive(Debug, Clone)]
pub struct FileTenantSource {
    path: PathBuf,
}

impl FileTenantSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_yaml(&self) -> bool {
        matches!(
            self.path.extension().and_then(|ext| ext.to_str()),
            Some("yml") | Some("yaml")
        )
    }
}

#[async_trait]
impl TenantSource for FileTenantSource {
    async fn load(&self) -> Result<Vec<TenantRecord>, DirectoryError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            DirectoryError::Invalid(format!("{}: {}", self.path.display(), err))
        })?;

        let document: TenantFile = if self.is_yaml() {
            serde_yaml::from_str(&contents)
                .map_err(|err| DirectoryError::Invalid(format!("{}: {}", self.path.display(), err)))?
        } else {
            serde_json::from_str(&contents)
                .map_err(|err| DirectoryError::Invalid(format!("{}: {}", self.path.display(), err)))?
        };

        let records = document
            .tenants
            .into_iter()
            .filter_map(|entry| {
                let id = entry.id.filter(|id| !id.trim().is_empty())?;
                let mut record = TenantRecord::new(id.trim())
                    .with_hosts(&entry.allowed_domains)
                    .with_system_prompt(entry.system_prompt);
                if let Some(name) = entry.display_name.filter(|n| !n.trim().is_empty()) {
                    record = record.with_display_name(name);
                }
                if let Some(key) = entry.partition_key.filter(|k| !k.trim().is_empty()) {
                    record = record.with_partition_key(key);
                }
                Some(record)
            })
            .collect();

        Ok(records)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

// --- management API --------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatListing {
    #[serde(default)]
    chats: Vec<ChatListingRow>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Targets {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct ChatListingRow {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    targets: Option<Targets>,
    #[serde(default)]
    target_type: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
}

impl ChatListingRow {
    fn into_record(self) -> Option<TenantRecord> {
        let id = self.id.filter(|id| !id.trim().is_empty())?;

        let mut targets = match self.targets {
            Some(Targets::One(target)) => vec![target],
            Some(Targets::Many(targets)) => targets,
            None => Vec::new(),
        };
        if targets.is_empty() {
            targets.extend(self.target.filter(|t| !t.trim().is_empty()));
        }

        let is_web = self
            .target_type
            .as_deref()
            .map(|t| t.is_empty() || t == "web")
            .unwrap_or(true);

        let mut record = TenantRecord::new(id).with_system_prompt(self.system_prompt);
        if let Some(name) = self.display_name.filter(|n| !n.trim().is_empty()) {
            record = record.with_display_name(name);
        }
        if is_web {
            record = record.with_hosts(&targets);
        }
        Some(record)
    }
}

/// Read-only chat listing served by the management API at
/// `GET {base_url}/api/chats`.
#[derive(Debug, Clone)]
pub struct RemoteTenantSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteTenantSource {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout,
        }
    }

    fn listing_url(&self) -> String {
        format!("{}/api/chats", self.base_url)
    }
}

#[async_trait]
impl TenantSource for RemoteTenantSource {
    async fn load(&self) -> Result<Vec<TenantRecord>, DirectoryError> {
        let url = self.listing_url();
        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.header(ADMIN_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|err| {
            tracing::error!(
                url = %url,
                has_api_key = self.api_key.is_some(),
                error = %err,
                "Tenant listing request failed"
            );
            DirectoryError::Unavailable(err.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
            tracing::error!(
                url = %url,
                has_api_key = self.api_key.is_some(),
                status = status.as_u16(),
                body = %excerpt,
                "Tenant listing returned an error status"
            );
            return Err(DirectoryError::Unavailable(format!(
                "API returned {}: {}",
                status.as_u16(),
                excerpt
            )));
        }

        let listing: ChatListing = response
            .json()
            .await
            .map_err(|err| DirectoryError::Unavailable(format!("invalid listing: {}", err)))?;

        tracing::info!(url = %url, count = listing.chats.len(), "Loaded tenant listing");

        Ok(listing
            .chats
            .into_iter()
            .filter_map(ChatListingRow::into_record)
            .collect())
    }

    fn describe(&self) -> String {
        format!("remote:{}", self.listing_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn file_source_skips_entries_without_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants.json");
        std::fs::write(
            &path,
            r#"{"tenants": [
                {"id": "acme", "allowed_domains": ["https://www.acme.test"], "system_prompt": ""},
                {"allowed_domains": ["orphan.test"]},
                {"id": "globex", "allowed_domains": [], "partition_key": "globex-kb", "display_name": "Globex"}
            ]}"#,
        )
        .unwrap();

        let records = FileTenantSource::new(&path).load().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "acme");
        assert!(records[0].allowed_hosts.contains("acme.test"));
        assert_eq!(records[0].system_prompt, None);
        assert_eq!(records[1].partition_key, "globex-kb");
        assert_eq!(records[1].display_name, "Globex");
    }

    #[tokio::test]
    async fn file_source_reads_yaml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants.yml");
        std::fs::write(
            &path,
            "tenants:\n  - id: acme\n    allowed_domains: [acme.test]\n",
        )
        .unwrap();

        let records = FileTenantSource::new(&path).load().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn missing_or_malformed_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = FileTenantSource::new(dir.path().join("nope.json")).load().await;
        assert!(matches!(missing, Err(DirectoryError::Invalid(_))));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let broken = FileTenantSource::new(&path).load().await;
        assert!(matches!(broken, Err(DirectoryError::Invalid(_))));
    }

    #[tokio::test]
    async fn remote_source_maps_targets_and_sends_key() {
        let router = Router::new().route(
            "/api/chats",
            get(|headers: HeaderMap| async move {
                let key = headers
                    .get("x-admin-api-key")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if key != "k" {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"error": "no"})));
                }
                (
                    StatusCode::OK,
                    Json(json!({"chats": [
                        {"id": "acme", "targets": ["acme.test", "https://shop.acme.test/"]},
                        {"id": "line", "target": "line-bot", "target_type": "line"},
                        {"id": "solo", "target": "solo.test", "display_name": "Solo"},
                        {"target": "noid.test"}
                    ]})),
                )
            }),
        );
        let base = serve(router).await;

        let source = RemoteTenantSource::new(
            reqwest::Client::new(),
            &format!("{}/", base),
            Some("k".to_string()),
            Duration::from_secs(2),
        );
        let records = source.load().await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].allowed_hosts.len(), 2);
        assert!(records[1].allowed_hosts.is_empty());
        assert!(records[2].allowed_hosts.contains("solo.test"));
        assert_eq!(records[2].display_name, "Solo");
    }

    #[tokio::test]
    async fn remote_error_status_is_unavailable() {
        let router = Router::new().route(
            "/api/chats",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Json(Value::Null)) }),
        );
        let base = serve(router).await;

        let source =
            RemoteTenantSource::new(reqwest::Client::new(), &base, None, Duration::from_secs(2));
        let result = source.load().await;

        assert!(matches!(result, Err(DirectoryError::Unavailable(msg)) if msg.contains("500")));
    }
}
