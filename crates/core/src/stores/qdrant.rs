use crate::error::StoreError;
use crate::models::{EmbeddedChunk, SearchFilter, SearchHit};
use crate::store::{rank_hits, CorpusStore};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Qdrant-backed corpus store over its HTTP API. Point ids are derived from
/// chunk ids, so upserting the same chunk replaces the existing point.
#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    endpoint: String,
    collection: String,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
            collection: collection.into(),
            vector_size,
        })
    }

    /// Creates the collection when missing. The vector size is fixed once
    /// the collection exists; changing it requires a full re-ingestion into
    /// a fresh collection.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(format!("{}/collections/{}", self.endpoint, self.collection))
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(format!("{}/collections/{}", self.endpoint, self.collection))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "collection setup failed with {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn filter_clauses(filter: &SearchFilter) -> Vec<Value> {
        let mut must = Vec::new();
        if let Some(document_id) = &filter.document_id {
            must.push(json!({ "key": "document_id", "match": { "value": document_id } }));
        }
        if let Some(contains_image) = filter.contains_image {
            must.push(json!({ "key": "contains_image", "match": { "value": contains_image } }));
        }
        must
    }
}

/// Qdrant point ids must be integers or UUIDs; fold the chunk id into a
/// deterministic UUID-shaped string.
fn chunk_point_id(chunk_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!(
        "{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    )
}

#[async_trait]
impl CorpusStore for QdrantStore {
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let points = chunks
            .iter()
            .map(|embedded| {
                if embedded.vector.len() != self.vector_size {
                    return Err(StoreError::Request(format!(
                        "embedding dimension {} != {}",
                        embedded.vector.len(),
                        self.vector_size
                    )));
                }

                let metadata = embedded.metadata();
                Ok(json!({
                    "id": chunk_point_id(&embedded.chunk.chunk_id),
                    "vector": embedded.vector,
                    "payload": {
                        "chunk_id": embedded.chunk.chunk_id,
                        "document_id": metadata.document_id,
                        "page_start": metadata.page_start,
                        "page_end": metadata.page_end,
                        "contains_image": metadata.contains_image,
                        "text": embedded.chunk.text,
                        "span_start": embedded.chunk.span_start,
                        "span_end": embedded.chunk.span_end,
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if vector.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                vector.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        let clauses = Self::filter_clauses(filter);
        if !clauses.is_empty() {
            body["filter"] = json!({ "must": clauses });
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let raw_hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::new();
        for hit in raw_hits {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let payload = |key: &str| {
                hit.pointer(&format!("/payload/{key}"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let page = |key: &str| {
                hit.pointer(&format!("/payload/{key}"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32
            };

            hits.push(SearchHit {
                chunk_id: payload("chunk_id"),
                document_id: payload("document_id"),
                score,
                text: payload("text"),
                page_start: page("page_start"),
                page_end: page("page_end"),
                contains_image: hit
                    .pointer("/payload/contains_image")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            });
        }

        // deterministic tie order regardless of backend behaviour
        Ok(rank_hits(hits, top_k))
    }

    async fn delete(&self, document_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/delete?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "filter": {
                    "must": [{ "key": "document_id", "match": { "value": document_id } }]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }
}
