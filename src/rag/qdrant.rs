//! Qdrant vector index over its REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::store::{IndexFilter, ScoredRecord, VectorIndex};
use super::{IndexError, KnowledgeRecord, PAYLOAD_KIND, PAYLOAD_PARTITION, PAYLOAD_PARTITION_ALIAS};

const ERROR_BODY_EXCERPT: usize = 300;

#[derive(Debug, Clone)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    dimension: usize,
    timeout: Duration,
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct StoredPoint {
    id: Value,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    vector: Option<Value>,
}

impl QdrantIndex {
    pub fn new(
        client: Client,
        base_url: &str,
        collection: impl Into<String>,
        api_key: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            dimension,
            timeout,
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, url).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, IndexError> {
        let response = builder
            .send()
            .await
            .map_err(|err| IndexError::Unavailable(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
        let message = format!("{} returned {}: {}", self.collection, status.as_u16(), excerpt);
        if status.is_server_error() {
            Err(IndexError::Unavailable(message))
        } else {
            Err(IndexError::Rejected(message))
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, IndexError> {
        response
            .json::<QdrantResponse<T>>()
            .await
            .map(|body| body.result)
            .map_err(|err| IndexError::Decode(err.to_string()))
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

    fn filter_body(filter: &IndexFilter) -> Value {
        let mut body = json!({
            "must": [{
                "should": [
                    { "key": PAYLOAD_PARTITION, "match": { "value": filter.partition_key } },
                    { "key": PAYLOAD_PARTITION_ALIAS, "match": { "value": filter.partition_key } }
                ]
            }]
        });
        if let Some(kind) = filter.exclude_kind {
            body["must_not"] = json!([
                { "key": PAYLOAD_KIND, "match": { "any": kind.payload_aliases() } }
            ]);
        }
        body
    }
}

/// Point ids this service writes are UUIDs; anything else is skipped.
fn parse_point_id(id: &Value) -> Option<Uuid> {
    id.as_str().and_then(|s| Uuid::parse_str(s).ok())
}

fn parse_vector(value: Option<Value>) -> Vec<f32> {
    value
        .and_then(|v| v.as_array().cloned())
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_f64)
                .map(|f| f as f32)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn ensure_ready(&self) -> Result<(), IndexError> {
        let url = self.collection_url("");
        let probe = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|err| IndexError::Unavailable(err.to_string()))?;

        match probe.status() {
            status if status.is_success() => {
                tracing::info!(collection = %self.collection, "Collection already exists");
            }
            StatusCode::NOT_FOUND => {
                let body = json!({
                    "vectors": { "size": self.dimension, "distance": "Cosine" }
                });
                self.send(self.request(Method::PUT, &url).json(&body)).await?;
                tracing::info!(
                    collection = %self.collection,
                    dimension = self.dimension,
                    "Created collection"
                );
            }
            status => {
                return Err(IndexError::Unavailable(format!(
                    "collection probe returned {}",
                    status.as_u16()
                )));
            }
        }

        // Idempotent on the Qdrant side.
        let index_body = json!({ "field_name": PAYLOAD_PARTITION, "field_schema": "keyword" });
        let index_url = self.collection_url("/index?wait=true");
        if let Err(err) = self
            .send(self.request(Method::PUT, &index_url).json(&index_body))
            .await
        {
            tracing::warn!(error = %err, "Failed to create payload index on chat_id");
        }

        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &IndexFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        self.check_dimension(vector)?;

        let body = json!({
            "vector": vector,
            "limit": limit.max(1),
            "with_payload": true,
            "filter": Self::filter_body(filter),
        });
        let url = self.collection_url("/points/search");
        let response = self.send(self.request(Method::POST, &url).json(&body)).await?;
        let hits: Vec<SearchHit> = Self::decode(response).await?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let Some(id) = parse_point_id(&hit.id) else {
                    tracing::debug!(id = %hit.id, "Skipping point with non-UUID id");
                    return None;
                };
                Some(ScoredRecord {
                    record: KnowledgeRecord::from_payload(id, Vec::new(), &hit.payload),
                    score: hit.score,
                })
            })
            .collect())
    }

    async fn upsert(&self, record: KnowledgeRecord) -> Result<(), IndexError> {
        self.check_dimension(&record.vector)?;

        let body = json!({
            "points": [{
                "id": record.id.to_string(),
                "vector": record.vector,
                "payload": record.to_payload(),
            }]
        });
        let url = self.collection_url("/points?wait=true");
        self.send(self.request(Method::PUT, &url).json(&body)).await?;
        Ok(())
    }

    async fn retrieve(&self, ids: &[Uuid]) -> Result<Vec<KnowledgeRecord>, IndexError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "ids": ids.iter().map(Uuid::to_string).collect::<Vec<_>>(),
            "with_payload": true,
            "with_vector": true,
        });
        let url = self.collection_url("/points");
        let response = self.send(self.request(Method::POST, &url).json(&body)).await?;
        let points: Vec<StoredPoint> = Self::decode(response).await?;

        Ok(points
            .into_iter()
            .filter_map(|point| {
                let id = parse_point_id(&point.id)?;
                Some(KnowledgeRecord::from_payload(
                    id,
                    parse_vector(point.vector),
                    &point.payload,
                ))
            })
            .collect())
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }

        let body = json!({
            "points": ids.iter().map(Uuid::to_string).collect::<Vec<_>>(),
        });
        let url = self.collection_url("/points/delete?wait=true");
        self.send(self.request(Method::POST, &url).json(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Minimal in-process stand-in for the Qdrant points API.
    #[derive(Default)]
    struct FakeQdrant {
        collection_exists: bool,
        created: Vec<Value>,
        points: HashMap<String, (Vec<f32>, Value)>,
        last_filter: Option<Value>,
        api_keys: Vec<String>,
    }

    type Shared = Arc<Mutex<FakeQdrant>>;

    fn record_key(state: &Shared, headers: &HeaderMap) {
        if let Some(key) = headers.get("api-key").and_then(|v| v.to_str().ok()) {
            state.lock().unwrap().api_keys.push(key.to_string());
        }
    }

    async fn serve(state: Shared) -> String {
        let router = Router::new()
            .route(
                "/collections/:name",
                get(
                    |State(s): State<Shared>, headers: HeaderMap| async move {
                        record_key(&s, &headers);
                        if s.lock().unwrap().collection_exists {
                            (axum::http::StatusCode::OK, Json(json!({"result": {}})))
                        } else {
                            (
                                axum::http::StatusCode::NOT_FOUND,
                                Json(json!({"status": {"error": "Not found"}})),
                            )
                        }
                    },
                )
                .put(
                    |State(s): State<Shared>, Json(body): Json<Value>| async move {
                        let mut guard = s.lock().unwrap();
                        guard.collection_exists = true;
                        guard.created.push(body);
                        Json(json!({"result": true}))
                    },
                ),
            )
            .route(
                "/collections/:name/index",
                put(|| async { Json(json!({"result": {}})) }),
            )
            .route(
                "/collections/:name/points",
                put(
                    |State(s): State<Shared>, Json(body): Json<Value>| async move {
                        let mut guard = s.lock().unwrap();
                        for point in body["points"].as_array().cloned().unwrap_or_default() {
                            let vector = parse_vector(Some(point["vector"].clone()));
                            guard.points.insert(
                                point["id"].as_str().unwrap().to_string(),
                                (vector, point["payload"].clone()),
                            );
                        }
                        Json(json!({"result": {"status": "completed"}}))
                    },
                )
                .post(
                    |State(s): State<Shared>, Json(body): Json<Value>| async move {
                        let guard = s.lock().unwrap();
                        let result: Vec<Value> = body["ids"]
                            .as_array()
                            .cloned()
                            .unwrap_or_default()
                            .iter()
                            .filter_map(|id| {
                                let id = id.as_str()?;
                                let (vector, payload) = guard.points.get(id)?;
                                Some(json!({"id": id, "vector": vector, "payload": payload}))
                            })
                            .collect();
                        Json(json!({"result": result}))
                    },
                ),
            )
            .route(
                "/collections/:name/points/search",
                post(
                    |State(s): State<Shared>, Json(body): Json<Value>| async move {
                        let mut guard = s.lock().unwrap();
                        guard.last_filter = Some(body["filter"].clone());
                        let partition = body["filter"]["must"][0]["should"][0]["match"]["value"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string();
                        let result: Vec<Value> = guard
                            .points
                            .iter()
                            .filter(|(_, (_, payload))| {
                                payload["chat_id"] == partition.as_str()
                                    || payload["partition_key"] == partition.as_str()
                            })
                            .map(|(id, (_, payload))| {
                                json!({"id": id, "score": 0.9, "payload": payload})
                            })
                            .chain(std::iter::once(json!({"id": 42, "score": 0.8, "payload": {}})))
                            .collect();
                        Json(json!({"result": result}))
                    },
                ),
            )
            .route(
                "/collections/:name/points/delete",
                post(
                    |State(s): State<Shared>,
                     Path(_name): Path<String>,
                     Json(body): Json<Value>| async move {
                        let mut guard = s.lock().unwrap();
                        for id in body["points"].as_array().cloned().unwrap_or_default() {
                            if let Some(id) = id.as_str() {
                                guard.points.remove(id);
                            }
                        }
                        Json(json!({"result": {"status": "completed"}}))
                    },
                ),
            )
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn index(base: &str) -> QdrantIndex {
        QdrantIndex::new(
            Client::new(),
            base,
            "chat_context",
            Some("qkey".to_string()),
            2,
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn ensure_ready_creates_missing_collection() {
        let state: Shared = Arc::default();
        let base = serve(state.clone()).await;

        index(&base).ensure_ready().await.unwrap();

        let guard = state.lock().unwrap();
        assert_eq!(guard.created.len(), 1);
        assert_eq!(guard.created[0]["vectors"]["size"], 2);
        assert_eq!(guard.created[0]["vectors"]["distance"], "Cosine");
        assert_eq!(guard.api_keys, vec!["qkey".to_string()]);
    }

    #[tokio::test]
    async fn upsert_search_retrieve_delete_round_trip() {
        let state: Shared = Arc::default();
        let base = serve(state.clone()).await;
        let index = index(&base);

        let acme = KnowledgeRecord::knowledge("acme", "Widgets", "Acme ships blue widgets.")
            .with_vector(vec![1.0, 0.0]);
        let globex =
            KnowledgeRecord::knowledge("globex", "Other", "Globex").with_vector(vec![1.0, 0.0]);
        index.upsert(acme.clone()).await.unwrap();
        index.upsert(globex).await.unwrap();

        let hits = index
            .search(&[1.0, 0.0], &IndexFilter::knowledge_of("acme"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1, "non-UUID ids are skipped");
        assert_eq!(hits[0].record.text, "Acme ships blue widgets.");

        let filter = state.lock().unwrap().last_filter.clone().unwrap();
        assert_eq!(filter["must"][0]["should"][0]["key"], "chat_id");
        assert_eq!(filter["must"][0]["should"][1]["key"], "partition_key");
        assert_eq!(filter["must_not"][0]["key"], "type");
        assert_eq!(filter["must_not"][0]["match"]["any"], json!(["chat", "chat_history"]));

        let fetched = index.retrieve(&[acme.id]).await.unwrap();
        assert_eq!(fetched[0].vector, vec![1.0, 0.0]);
        assert_eq!(fetched[0].partition_key, "acme");

        index.delete(&[acme.id]).await.unwrap();
        assert!(index.retrieve(&[acme.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let index = index("http://127.0.0.1:9");
        let result = index
            .search(&[1.0, 0.0], &IndexFilter::knowledge_of("acme"), 10)
            .await;
        assert!(matches!(result, Err(IndexError::Unavailable(_))));
    }
}
