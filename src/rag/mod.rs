//! Knowledge storage and retrieval.
//!
//! Records live in one shared vector index; every record carries the
//! partition key of the tenant that owns it, and every query is filtered by
//! the caller's partition.

pub mod knowledge;
pub mod qdrant;
pub mod retriever;
pub mod sqlite;
pub mod store;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub use knowledge::{KnowledgeService, NewKnowledge};
pub use qdrant::QdrantIndex;
pub use retriever::{ContextRetriever, RankedSnippet, RetrievalResult, CONTEXT_DELIMITER};
pub use sqlite::SqliteIndex;
pub use store::{IndexFilter, ScoredRecord, VectorIndex};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),
    #[error("vector index rejected the request: {0}")]
    Rejected(String),
    #[error("malformed vector index response: {0}")]
    Decode(String),
    #[error("vector has {actual} dimensions, index expects {expected}")]
    Dimension { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Knowledge,
    ChatHistory,
}

impl RecordKind {
    /// Payload tag. Chat history is stored as `chat`.
    pub fn as_payload(self) -> &'static str {
        match self {
            RecordKind::Knowledge => "knowledge",
            RecordKind::ChatHistory => "chat",
        }
    }

    /// Payload tags that map to this kind, for index filters.
    pub fn payload_aliases(self) -> &'static [&'static str] {
        match self {
            RecordKind::Knowledge => &["knowledge"],
            RecordKind::ChatHistory => &["chat", "chat_history"],
        }
    }

    /// Records written without a `type` are knowledge.
    pub fn from_payload(value: Option<&str>) -> Self {
        match value {
            Some("chat") | Some("chat_history") => RecordKind::ChatHistory,
            _ => RecordKind::Knowledge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    Manual,
    FileUpload,
    UrlFetch,
}

impl KnowledgeSource {
    pub fn as_payload(self) -> &'static str {
        match self {
            KnowledgeSource::Manual => "manual",
            KnowledgeSource::FileUpload => "file_upload",
            KnowledgeSource::UrlFetch => "url_fetch",
        }
    }

    pub fn from_payload(value: Option<&str>) -> Self {
        match value {
            Some("file_upload") => KnowledgeSource::FileUpload,
            Some("url_fetch") | Some("url") => KnowledgeSource::UrlFetch,
            _ => KnowledgeSource::Manual,
        }
    }
}

const PAYLOAD_TEXT: &str = "text";
const PAYLOAD_TITLE: &str = "title";
pub(crate) const PAYLOAD_PARTITION: &str = "chat_id";
/// Older producers wrote the partition under this name.
pub(crate) const PAYLOAD_PARTITION_ALIAS: &str = "partition_key";
pub(crate) const PAYLOAD_KIND: &str = "type";
const PAYLOAD_SOURCE: &str = "source";
const PAYLOAD_CATEGORY: &str = "category";
const PAYLOAD_TAGS: &str = "tags";
const PAYLOAD_TIMESTAMP: &str = "timestamp";

const KNOWN_PAYLOAD_KEYS: [&str; 9] = [
    PAYLOAD_TEXT,
    PAYLOAD_TITLE,
    PAYLOAD_PARTITION,
    PAYLOAD_PARTITION_ALIAS,
    PAYLOAD_KIND,
    PAYLOAD_SOURCE,
    PAYLOAD_CATEGORY,
    PAYLOAD_TAGS,
    PAYLOAD_TIMESTAMP,
];

/// One stored knowledge (or chat history) entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeRecord {
    pub id: Uuid,
    pub partition_key: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub text: String,
    pub title: String,
    pub kind: RecordKind,
    pub source: KnowledgeSource,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Payload fields written by other producers (e.g. `url`, `file_type`).
    /// Carried through updates untouched.
    pub extra: Map<String, Value>,
}

impl KnowledgeRecord {
    pub fn knowledge(
        partition_key: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            partition_key: partition_key.into(),
            vector: Vec::new(),
            text: text.into(),
            title: title.into(),
            kind: RecordKind::Knowledge,
            source: KnowledgeSource::Manual,
            category: None,
            tags: Vec::new(),
            created_at: Utc::now(),
            extra: Map::new(),
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn to_payload(&self) -> Value {
        let mut payload = self.extra.clone();
        payload.insert(PAYLOAD_TEXT.into(), Value::String(self.text.clone()));
        payload.insert(PAYLOAD_TITLE.into(), Value::String(self.title.clone()));
        payload.insert(
            PAYLOAD_PARTITION.into(),
            Value::String(self.partition_key.clone()),
        );
        payload.insert(PAYLOAD_KIND.into(), Value::from(self.kind.as_payload()));
        payload.insert(PAYLOAD_SOURCE.into(), Value::from(self.source.as_payload()));
        payload.insert(
            PAYLOAD_CATEGORY.into(),
            self.category.clone().map(Value::String).unwrap_or(Value::Null),
        );
        payload.insert(
            PAYLOAD_TAGS.into(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        let timestamp = self.created_at.timestamp_millis() as f64 / 1000.0;
        payload.insert(PAYLOAD_TIMESTAMP.into(), Value::from(timestamp));
        Value::Object(payload)
    }

    /// Rebuilds a record from an index payload. Missing fields get the same
    /// defaults older producers implied (knowledge, manual, empty title).
    pub fn from_payload(id: Uuid, vector: Vec<f32>, payload: &Value) -> Self {
        let empty = Map::new();
        let map = payload.as_object().unwrap_or(&empty);
        let text_field = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let tags = map
            .get(PAYLOAD_TAGS)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let created_at = map
            .get(PAYLOAD_TIMESTAMP)
            .and_then(Value::as_f64)
            .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single())
            .unwrap_or_default();

        let partition_key = [PAYLOAD_PARTITION, PAYLOAD_PARTITION_ALIAS]
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .find(|value| !value.trim().is_empty())
            .unwrap_or_default()
            .to_string();

        let extra = map
            .iter()
            .filter(|(key, _)| !KNOWN_PAYLOAD_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            id,
            partition_key,
            vector,
            text: text_field(PAYLOAD_TEXT),
            title: text_field(PAYLOAD_TITLE),
            kind: RecordKind::from_payload(map.get(PAYLOAD_KIND).and_then(Value::as_str)),
            source: KnowledgeSource::from_payload(map.get(PAYLOAD_SOURCE).and_then(Value::as_str)),
            category: map
                .get(PAYLOAD_CATEGORY)
                .and_then(Value::as_str)
                .map(str::to_string),
            tags,
            created_at,
            extra,
        }
    }
}
