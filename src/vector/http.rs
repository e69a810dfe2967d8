//! REST client for a remote vector index.
//!
//! The index announces its shape at `GET /describe`:
//!
//! ```json
//! { "namespaces": true, "metadataFilter": false }
//! ```
//!
//! Namespaced indexes expose `POST /namespaces/{token}/upsert|query|delete`;
//! global indexes expose `POST /upsert`, `POST /query` (with an optional
//! `filter` object of `field: value` equalities) and `POST /remove`.
//! Queries answer `{"matches": [{"id", "score", "metadata"}]}`.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use marble_core::error::{Error, Result, Service};
use marble_core::namespace::{MetadataFilter, NamespaceToken};
use marble_core::vector::{
    FilteredIndex, IndexCapabilities, IndexShape, NamespacedIndex, VectorBackend, VectorMatch,
    VectorRecord,
};

use crate::config::VectorConfig;
use crate::http_retry::{client, send_json};

const MAX_RETRIES: u32 = 3;

pub struct HttpVectorIndex {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpVectorIndex {
    pub fn from_config(config: &VectorConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .context("vector.url is required for the http backend")?;
        let api_key = match config.api_key_env {
            Some(ref var) => Some(
                std::env::var(var)
                    .with_context(|| format!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        Ok(Self::new(client(config.timeout_secs)?, url, api_key))
    }

    pub fn new(client: reqwest::Client, url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn call(&self, label: &str, path: &str, body: Option<Value>) -> Result<Value> {
        let endpoint = format!("{}{}", self.url, path);
        send_json(Service::VectorIndex, label, MAX_RETRIES, || {
            let mut req = match body {
                Some(ref b) => self.client.post(&endpoint).json(b),
                None => self.client.get(&endpoint),
            };
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }
            req
        })
        .await
    }
}

fn parse_matches(json: &Value) -> Result<Vec<VectorMatch>> {
    let Some(items) = json.get("matches") else {
        return Err(Error::upstream(
            Service::VectorIndex,
            "query response has no matches field",
        ));
    };
    serde_json::from_value(items.clone()).map_err(|e| {
        Error::upstream(
            Service::VectorIndex,
            format!("invalid matches in query response: {}", e),
        )
    })
}

fn parse_capabilities(json: &Value) -> IndexCapabilities {
    let flag = |camel: &str, snake: &str| {
        json.get(camel)
            .or_else(|| json.get(snake))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    };
    IndexCapabilities {
        namespaces: flag("namespaces", "namespaces"),
        metadata_filter: flag("metadataFilter", "metadata_filter"),
    }
}

#[async_trait]
impl VectorBackend for HttpVectorIndex {
    async fn describe(&self) -> Result<IndexCapabilities> {
        let json = self.call("vector index describe", "/describe", None).await?;
        Ok(parse_capabilities(&json))
    }

    fn into_shape(self: Arc<Self>, caps: &IndexCapabilities) -> IndexShape {
        if caps.namespaces {
            IndexShape::Namespaced(self)
        } else {
            IndexShape::Filtered(self)
        }
    }
}

#[async_trait]
impl NamespacedIndex for HttpVectorIndex {
    async fn upsert(&self, namespace: &NamespaceToken, records: &[VectorRecord]) -> Result<()> {
        let path = format!("/namespaces/{}/upsert", namespace);
        self.call("vector upsert", &path, Some(json!({ "vectors": records })))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        namespace: &NamespaceToken,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let path = format!("/namespaces/{}/query", namespace);
        let body = json!({ "vector": vector, "topK": top_k, "includeMetadata": true });
        let json = self.call("vector query", &path, Some(body)).await?;
        parse_matches(&json)
    }

    async fn delete(&self, namespace: &NamespaceToken, ids: &[String]) -> Result<()> {
        let path = format!("/namespaces/{}/delete", namespace);
        self.call("vector delete", &path, Some(json!({ "ids": ids })))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FilteredIndex for HttpVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        self.call("vector upsert", "/upsert", Some(json!({ "vectors": records })))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>> {
        let mut body = json!({ "vector": vector, "topK": top_k, "includeMetadata": true });
        if let Some(filter) = filter {
            body["filter"] = json!(filter);
        }
        let json = self.call("vector query", "/query", Some(body)).await?;
        parse_matches(&json)
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        self.call("vector remove", "/remove", Some(json!({ "ids": ids })))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use marble_core::models::Visibility;
    use marble_core::namespace::Namespace;
    use marble_core::vector::memory::{IndexMode, InMemoryVectorIndex};
    use marble_core::vector::{connect, PartitionOptions, VectorMetadata};

    /// Namespaced REST index backed by the in-memory index.
    async fn serve_fake() -> String {
        let index = Arc::new(InMemoryVectorIndex::new(IndexMode::Namespaced));
        let app = Router::new()
            .route(
                "/describe",
                get(|| async { Json(json!({"namespaces": true, "metadataFilter": false})) }),
            )
            .route(
                "/namespaces/{token}/upsert",
                post(
                    |State(idx): State<Arc<InMemoryVectorIndex>>,
                     Path(token): Path<String>,
                     Json(body): Json<Value>| async move {
                        let records: Vec<VectorRecord> =
                            serde_json::from_value(body["vectors"].clone()).unwrap();
                        NamespacedIndex::upsert(&*idx, &NamespaceToken::from_raw(token), &records)
                            .await
                            .unwrap();
                        Json(json!({"upserted": records.len()}))
                    },
                ),
            )
            .route(
                "/namespaces/{token}/query",
                post(
                    |State(idx): State<Arc<InMemoryVectorIndex>>,
                     Path(token): Path<String>,
                     Json(body): Json<Value>| async move {
                        let vector: Vec<f32> =
                            serde_json::from_value(body["vector"].clone()).unwrap();
                        let top_k = body["topK"].as_u64().unwrap() as usize;
                        let matches = NamespacedIndex::query(
                            &*idx,
                            &NamespaceToken::from_raw(token),
                            &vector,
                            top_k,
                        )
                        .await
                        .unwrap();
                        Json(json!({ "matches": matches }))
                    },
                ),
            )
            .with_state(index);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn record(id: &str, owner: &str) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            values: vec![1.0, 0.0, 0.0],
            metadata: VectorMetadata {
                chunk_id: id.into(),
                file_id: "f1".into(),
                folder_id: "d1".into(),
                folder_name: "Docs".into(),
                file_name: "a.txt".into(),
                start_line: 1,
                end_line: 1,
                visibility: Visibility::Personal,
                owner_id: owner.into(),
                organization_id: "o1".into(),
                team_id: None,
                generation: 1,
            },
        }
    }

    #[tokio::test]
    async fn detects_shape_and_round_trips_through_namespaces() {
        let url = serve_fake().await;
        let backend = Arc::new(HttpVectorIndex::new(reqwest::Client::new(), url, None));
        let partition = connect(backend, PartitionOptions::default()).await.unwrap();
        assert_eq!(partition.shape(), "namespaced");

        let mine = Namespace::User("u1".into()).encode();
        let theirs = Namespace::User("u2".into()).encode();
        partition.upsert(&mine, &record("c1", "u1")).await.unwrap();
        partition.upsert(&theirs, &record("c2", "u2")).await.unwrap();

        let hits = partition.query(&mine, &[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c1");
        assert_eq!(hits[0].metadata.owner_id, "u1");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let url = serve_fake().await;
        let index = HttpVectorIndex::new(reqwest::Client::new(), url, None);
        let err = FilteredIndex::remove(&index, &["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Upstream {
                service: Service::VectorIndex,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn capability_flags_accept_both_casings() {
        let caps = parse_capabilities(&json!({"namespaces": false, "metadata_filter": true}));
        assert!(!caps.namespaces);
        assert!(caps.metadata_filter);
        assert_eq!(parse_capabilities(&json!({})), IndexCapabilities::default());
    }

    #[test]
    fn missing_matches_is_upstream_error() {
        assert!(parse_matches(&json!({"results": []})).is_err());
    }
}
