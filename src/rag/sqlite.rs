//! SQLite-backed vector index.
//!
//! In-process store using SQLite for payloads and brute-force cosine
//! similarity for search. Suited to local deployments and tests; production
//! uses Qdrant.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::store::{cosine_similarity, IndexFilter, ScoredRecord, VectorIndex};
use super::{IndexError, KnowledgeRecord};

pub struct SqliteIndex {
    pool: SqlitePool,
    dimension: usize,
    db_path: Option<PathBuf>,
}

impl SqliteIndex {
    pub async fn open(db_path: &Path, dimension: usize) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                IndexError::Unavailable(format!(
                    "cannot create index directory {}: {}",
                    parent.display(),
                    err
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        let index = Self {
            pool,
            dimension,
            db_path: Some(db_path.to_path_buf()),
        };
        index.init_schema().await?;
        Ok(index)
    }

    /// Private in-memory database, dropped with the index.
    pub async fn in_memory(dimension: usize) -> Result<Self, IndexError> {
        let options = SqliteConnectOptions::new().in_memory(true);

        // A single long-lived connection; each new in-memory connection
        // would see an empty database.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        let index = Self {
            pool,
            dimension,
            db_path: None,
        };
        index.init_schema().await?;
        Ok(index)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    async fn init_schema(&self) -> Result<(), IndexError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS knowledge_points (
                id TEXT PRIMARY KEY,
                partition_key TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_knowledge_partition ON knowledge_points(partition_key)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Option<KnowledgeRecord> {
        let id: String = row.get("id");
        let id = Uuid::parse_str(&id).ok()?;
        let payload_str: String = row.get("payload");
        let payload = serde_json::from_str::<Value>(&payload_str).unwrap_or(Value::Null);
        let embedding: Vec<u8> = row.get("embedding");

        Some(KnowledgeRecord::from_payload(
            id,
            Self::deserialize_embedding(&embedding),
            &payload,
        ))
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_ready(&self) -> Result<(), IndexError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        self.check_dimension(vector)?;

        let rows = sqlx::query(
            "SELECT id, payload, embedding
             FROM knowledge_points
             WHERE partition_key = ?1",
        )
        .bind(&filter.partition_key)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut scored: Vec<ScoredRecord> = rows
            .iter()
            .filter_map(Self::row_to_record)
            .filter(|record| filter.matches(record))
            .map(|record| {
                let score = cosine_similarity(vector, &record.vector);
                ScoredRecord { record, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit.max(1));

        Ok(scored)
    }

    async fn upsert(&self, record: KnowledgeRecord) -> Result<(), IndexError> {
        self.check_dimension(&record.vector)?;

        let blob = Self::serialize_embedding(&record.vector);
        let payload = record.to_payload().to_string();

        sqlx::query(
            "INSERT OR REPLACE INTO knowledge_points (id, partition_key, kind, payload, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(record.id.to_string())
        .bind(&record.partition_key)
        .bind(record.kind.as_payload())
        .bind(&payload)
        .bind(&blob)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn retrieve(&self, ids: &[Uuid]) -> Result<Vec<KnowledgeRecord>, IndexError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                "SELECT id, payload, embedding
                 FROM knowledge_points
                 WHERE id = ?1",
            )
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            if let Some(record) = row.as_ref().and_then(Self::row_to_record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for id in ids {
            sqlx::query("DELETE FROM knowledge_points WHERE id = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }
}

fn db_error(err: sqlx::Error) -> IndexError {
    IndexError::Unavailable(err.to_string())
}
