//! Vector Partition Adapter.
//!
//! Enforces the visibility boundary inside the vector index itself: every
//! write and query is addressed to one [`Namespace`], so a caller can only
//! ever reach vectors of the partitions the retrieval engine resolved for
//! them.
//!
//! Two incompatible index shapes are supported behind one interface:
//!
//! - **Namespaced** ([`NamespacedIndex`]): upsert/query/delete take the
//!   namespace token as an explicit argument; no metadata filtering.
//! - **Global with metadata filter** ([`FilteredIndex`]): upsert and
//!   `remove` operate globally by vector id; query takes a metadata filter
//!   decoded from the namespace token.
//!
//! The shape is learned once through the [`VectorBackend::describe`]
//! capability check in [`connect`], which returns the matching
//! [`VectorPartition`] implementation. Nothing downstream re-checks it.
//!
//! # Filtered fallback
//!
//! Some index versions silently ignore filters they do not support, and
//! some return nothing for a filter they cannot evaluate. The filtered
//! adapter therefore:
//!
//! 1. refuses (in [`connect`]) a global index that does not assert filter
//!    support,
//! 2. re-checks every returned match against the namespace filter, and
//! 3. only when [`PartitionOptions::unfiltered_fallback`] is enabled,
//!    retries a zero-match query once without a filter, keeping only the
//!    in-scope matches of the broader result.

pub mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::Visibility;
use crate::namespace::{MetadataFilter, Namespace, NamespaceToken};

/// Denormalized payload stored with every vector, sufficient to render a
/// citation without a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMetadata {
    pub chunk_id: String,
    pub file_id: String,
    pub folder_id: String,
    pub folder_name: String,
    pub file_name: String,
    pub start_line: i64,
    pub end_line: i64,
    pub visibility: Visibility,
    pub owner_id: String,
    pub organization_id: String,
    pub team_id: Option<String>,
    pub generation: i64,
}

impl VectorMetadata {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        filter.matches(&self.to_json())
    }
}

/// One entry of the index, keyed by chunk id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

/// Result of the one-time capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexCapabilities {
    /// Calls take an explicit namespace argument.
    pub namespaces: bool,
    /// Global queries honor metadata filters.
    pub metadata_filter: bool,
}

/// Index whose operations are scoped by an explicit namespace.
#[async_trait]
pub trait NamespacedIndex: Send + Sync {
    async fn upsert(&self, namespace: &NamespaceToken, records: &[VectorRecord]) -> Result<()>;

    async fn query(
        &self,
        namespace: &NamespaceToken,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>>;

    async fn delete(&self, namespace: &NamespaceToken, ids: &[String]) -> Result<()>;
}

/// Index with one global keyspace and metadata-filtered queries.
#[async_trait]
pub trait FilteredIndex: Send + Sync {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>>;

    async fn remove(&self, ids: &[String]) -> Result<()>;
}

/// Call surface handed out by a backend after probing.
pub enum IndexShape {
    Namespaced(Arc<dyn NamespacedIndex>),
    Filtered(Arc<dyn FilteredIndex>),
}

/// A concrete index client before its shape is known.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Ask the index what it supports.
    async fn describe(&self) -> Result<IndexCapabilities>;

    /// Hand out the call surface matching `caps`.
    fn into_shape(self: Arc<Self>, caps: &IndexCapabilities) -> IndexShape;
}

/// Visibility-partitioned view of a vector index.
#[async_trait]
pub trait VectorPartition: Send + Sync {
    async fn upsert(&self, namespace: &NamespaceToken, record: &VectorRecord) -> Result<()>;

    async fn query(
        &self,
        namespace: &NamespaceToken,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>>;

    /// Like [`query`](Self::query), restricted to vectors of `file_ids`.
    ///
    /// Returns up to `top_k` matches from those files even when other
    /// files of the namespace rank higher.
    async fn query_files(
        &self,
        namespace: &NamespaceToken,
        vector: &[f32],
        top_k: usize,
        file_ids: &BTreeSet<String>,
    ) -> Result<Vec<VectorMatch>>;

    /// Delete vectors by id. A no-op for an empty id list.
    async fn delete(&self, namespace: &NamespaceToken, ids: &[String]) -> Result<()>;

    /// `"namespaced"` or `"filtered"`, for logs.
    fn shape(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionOptions {
    pub unfiltered_fallback: bool,
}

/// Describe `backend` once and wrap it in the matching adapter.
///
/// # Errors
///
/// [`Error::Validation`] when the index exposes neither namespaces nor
/// metadata filtering: such an index cannot enforce visibility.
pub async fn connect(
    backend: Arc<dyn VectorBackend>,
    options: PartitionOptions,
) -> Result<Arc<dyn VectorPartition>> {
    let caps = backend.describe().await?;

    let partition: Arc<dyn VectorPartition> = match backend.into_shape(&caps) {
        IndexShape::Namespaced(index) => Arc::new(NamespacedPartition::new(index)),
        IndexShape::Filtered(index) => {
            if !caps.metadata_filter {
                return Err(Error::validation(
                    "vector index supports neither namespaces nor metadata filters",
                ));
            }
            Arc::new(FilteredPartition::new(index, options.unfiltered_fallback))
        }
    };

    info!(shape = partition.shape(), "vector index connected");
    Ok(partition)
}

pub struct NamespacedPartition {
    index: Arc<dyn NamespacedIndex>,
}

impl NamespacedPartition {
    pub fn new(index: Arc<dyn NamespacedIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl VectorPartition for NamespacedPartition {
    async fn upsert(&self, namespace: &NamespaceToken, record: &VectorRecord) -> Result<()> {
        self.index
            .upsert(namespace, std::slice::from_ref(record))
            .await
    }

    async fn query(
        &self,
        namespace: &NamespaceToken,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        self.index.query(namespace, vector, top_k).await
    }

    /// The index cannot filter by file, so widen the request until enough
    /// matches from `file_ids` turn up or the namespace runs dry.
    async fn query_files(
        &self,
        namespace: &NamespaceToken,
        vector: &[f32],
        top_k: usize,
        file_ids: &BTreeSet<String>,
    ) -> Result<Vec<VectorMatch>> {
        if top_k == 0 || file_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut fetch = top_k;
        loop {
            let matches = self.index.query(namespace, vector, fetch).await?;
            let exhausted = matches.len() < fetch;
            let mut admitted: Vec<VectorMatch> = matches
                .into_iter()
                .filter(|m| file_ids.contains(&m.metadata.file_id))
                .collect();
            if admitted.len() >= top_k || exhausted {
                admitted.truncate(top_k);
                return Ok(admitted);
            }
            fetch = fetch.saturating_mul(2);
        }
    }

    async fn delete(&self, namespace: &NamespaceToken, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.index.delete(namespace, ids).await
    }

    fn shape(&self) -> &'static str {
        "namespaced"
    }
}

pub struct FilteredPartition {
    index: Arc<dyn FilteredIndex>,
    unfiltered_fallback: bool,
}

impl FilteredPartition {
    pub fn new(index: Arc<dyn FilteredIndex>, unfiltered_fallback: bool) -> Self {
        Self {
            index,
            unfiltered_fallback,
        }
    }

    /// Filtered query with the post-check and the optional fallback.
    async fn query_filtered(
        &self,
        ns: &Namespace,
        filter: &MetadataFilter,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let matches = self.index.query(vector, top_k, Some(filter)).await?;
        let returned = matches.len();
        let in_scope: Vec<VectorMatch> = matches
            .into_iter()
            .filter(|m| m.metadata.matches(filter))
            .collect();
        if in_scope.len() < returned {
            warn!(
                namespace = %ns,
                dropped = returned - in_scope.len(),
                "index returned matches outside the requested filter"
            );
        }

        if returned > 0 || !self.unfiltered_fallback {
            return Ok(in_scope);
        }

        warn!(namespace = %ns, "filtered query returned nothing; retrying without filter");
        let broad = self.index.query(vector, top_k, None).await?;
        Ok(broad
            .into_iter()
            .filter(|m| m.metadata.matches(filter))
            .collect())
    }
}

#[async_trait]
impl VectorPartition for FilteredPartition {
    async fn upsert(&self, namespace: &NamespaceToken, record: &VectorRecord) -> Result<()> {
        let ns = Namespace::decode(namespace)?;
        if !record.metadata.matches(&ns.filter()) {
            return Err(Error::validation(format!(
                "vector {} does not belong to namespace {}",
                record.id, ns
            )));
        }
        self.index.upsert(std::slice::from_ref(record)).await
    }

    async fn query(
        &self,
        namespace: &NamespaceToken,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let ns = Namespace::decode(namespace)?;
        self.query_filtered(&ns, &ns.filter(), vector, top_k).await
    }

    /// One filtered query per file, with `fileId` added to the namespace
    /// filter, merged into a single ranking.
    async fn query_files(
        &self,
        namespace: &NamespaceToken,
        vector: &[f32],
        top_k: usize,
        file_ids: &BTreeSet<String>,
    ) -> Result<Vec<VectorMatch>> {
        let ns = Namespace::decode(namespace)?;
        let mut merged = Vec::new();
        for file_id in file_ids {
            let filter = ns.filter().with("fileId", file_id.as_str());
            merged.extend(self.query_filtered(&ns, &filter, vector, top_k).await?);
        }
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        merged.truncate(top_k);
        Ok(merged)
    }

    async fn delete(&self, _namespace: &NamespaceToken, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.index.remove(ids).await
    }

    fn shape(&self) -> &'static str {
        "filtered"
    }
}
