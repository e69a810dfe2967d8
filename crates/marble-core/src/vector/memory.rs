//! In-memory vector index for tests and embedded use.
//!
//! Brute-force cosine similarity over every stored vector. The index can
//! impersonate each shape a real deployment might expose, including the
//! misbehaving ones the filtered adapter has to defend against.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result, Service};
use crate::namespace::{MetadataFilter, Namespace, NamespaceToken};

use super::{
    FilteredIndex, IndexCapabilities, IndexShape, NamespacedIndex, VectorBackend, VectorMatch,
    VectorRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Explicit namespace argument on every call.
    Namespaced,
    /// Global keyspace, honors metadata filters.
    Filtered,
    /// Global keyspace, advertises no filter support.
    Unfiltered,
    /// Advertises filter support but returns unfiltered results.
    FilterIgnoring,
    /// Advertises filter support but returns nothing for any filter.
    FilterBlind,
}

struct Entry {
    namespace: Option<NamespaceToken>,
    record: VectorRecord,
}

pub struct InMemoryVectorIndex {
    mode: IndexMode,
    entries: RwLock<Vec<Entry>>,
    failing: RwLock<HashSet<Namespace>>,
    /// Upserts left before every further upsert fails; `None` is unlimited.
    upsert_budget: RwLock<Option<usize>>,
    queries: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryVectorIndex {
    pub fn new(mode: IndexMode) -> Self {
        Self {
            mode,
            entries: RwLock::new(Vec::new()),
            failing: RwLock::new(HashSet::new()),
            upsert_budget: RwLock::new(None),
            queries: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Make every query against `namespace` fail with an upstream error.
    pub fn fail_queries_for(&self, namespace: Namespace) {
        self.failing.write().unwrap().insert(namespace);
    }

    /// Accept `n` more record upserts, then fail every one after that.
    pub fn fail_upserts_after(&self, n: usize) {
        *self.upsert_budget.write().unwrap() = Some(n);
    }

    /// Insert a record directly, bypassing the partition adapter.
    pub fn seed(&self, record: VectorRecord) -> Result<()> {
        let namespace = match self.mode {
            IndexMode::Namespaced => {
                let m = &record.metadata;
                Some(
                    Namespace::for_entity(
                        m.visibility,
                        &m.organization_id,
                        &m.owner_id,
                        m.team_id.as_deref(),
                    )?
                    .encode(),
                )
            }
            _ => None,
        };
        self.put(namespace, record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|e| e.record.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of queries received, fallback retries included.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn put(&self, namespace: Option<NamespaceToken>, record: VectorRecord) {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|e| !(e.record.id == record.id && e.namespace == namespace));
        entries.push(Entry { namespace, record });
    }

    fn spend_upsert(&self) -> Result<()> {
        let mut budget = self.upsert_budget.write().unwrap();
        match budget.as_mut() {
            Some(0) => Err(Error::upstream(Service::VectorIndex, "simulated upsert failure")),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_failure(&self, namespace: &Namespace) -> Result<()> {
        if self.failing.read().unwrap().contains(namespace) {
            return Err(Error::upstream(
                Service::VectorIndex,
                format!("simulated outage for {}", namespace),
            ));
        }
        Ok(())
    }

    fn rank<'a>(
        &self,
        candidates: impl Iterator<Item = &'a VectorRecord>,
        vector: &[f32],
        top_k: usize,
    ) -> Vec<VectorMatch> {
        let mut scored: Vec<VectorMatch> = candidates
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);
        scored
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorIndex {
    async fn describe(&self) -> Result<IndexCapabilities> {
        Ok(match self.mode {
            IndexMode::Namespaced => IndexCapabilities {
                namespaces: true,
                metadata_filter: false,
            },
            IndexMode::Unfiltered => IndexCapabilities::default(),
            IndexMode::Filtered | IndexMode::FilterIgnoring | IndexMode::FilterBlind => {
                IndexCapabilities {
                    namespaces: false,
                    metadata_filter: true,
                }
            }
        })
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
impl NamespacedIndex for InMemoryVectorIndex {
    async fn upsert(&self, namespace: &NamespaceToken, records: &[VectorRecord]) -> Result<()> {
        for record in records {
            self.spend_upsert()?;
            self.put(Some(namespace.clone()), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &NamespaceToken,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_failure(&Namespace::decode(namespace)?)?;
        let entries = self.entries.read().unwrap();
        Ok(self.rank(
            entries
                .iter()
                .filter(|e| e.namespace.as_ref() == Some(namespace))
                .map(|e| &e.record),
            vector,
            top_k,
        ))
    }

    async fn delete(&self, namespace: &NamespaceToken, ids: &[String]) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.entries
            .write()
            .unwrap()
            .retain(|e| !(e.namespace.as_ref() == Some(namespace) && ids.contains(&e.record.id)));
        Ok(())
    }
}

#[async_trait]
impl FilteredIndex for InMemoryVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        for record in records {
            self.spend_upsert()?;
            self.put(None, record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(filter) = filter {
            let failing: Vec<Namespace> = self.failing.read().unwrap().iter().cloned().collect();
            for ns in failing {
                let scoped = ns
                    .filter()
                    .fields()
                    .all(|(k, v)| filter.fields().any(|(fk, fv)| fk == k && fv == v));
                if scoped {
                    self.check_failure(&ns)?;
                }
            }
        }

        let filter = match (self.mode, filter) {
            (IndexMode::FilterBlind, Some(_)) => return Ok(Vec::new()),
            (IndexMode::FilterIgnoring, _) => None,
            (_, f) => f,
        };

        let entries = self.entries.read().unwrap();
        Ok(self.rank(
            entries
                .iter()
                .map(|e| &e.record)
                .filter(|r| filter.map(|f| r.metadata.matches(f)).unwrap_or(true)),
            vector,
            top_k,
        ))
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.entries
            .write()
            .unwrap()
            .retain(|e| !ids.contains(&e.record.id));
        Ok(())
    }
}
