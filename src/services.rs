//! Wiring of the concrete collaborators.
//!
//! [`Services::build`] turns a [`Config`] into the shared, `Arc`-held
//! components the CLI and the HTTP server work with. Tests assemble the
//! same struct from in-memory parts with [`Services::from_parts`].

use std::sync::Arc;

use tracing::info;

use marble_core::completion::CompletionModel;
use marble_core::embedding::EmbeddingProvider;
use marble_core::error::Result;
use marble_core::ingest::IngestPipeline;
use marble_core::objects::{ObjectStore, TextConverter};
use marble_core::retrieval::RetrievalEngine;
use marble_core::store::Store;
use marble_core::vector::{connect, PartitionOptions, VectorPartition};
use marble_core::visibility::Principal;

use crate::completion::create_completion;
use crate::config::{Config, IngestionConfig};
use crate::convert::LocalConverter;
use crate::embedding::create_provider;
use crate::object_store::create_object_store;
use crate::sqlite_store::SqliteStore;
use crate::vector::create_vector_backend;
use crate::{db, migrate};

/// Collaborators the ingestion pipeline and the retrieval engine run on.
pub struct Parts {
    pub store: Arc<dyn Store>,
    pub objects: Arc<dyn ObjectStore>,
    pub converter: Arc<dyn TextConverter>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub completion: Arc<dyn CompletionModel>,
    pub vectors: Arc<dyn VectorPartition>,
}

#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub objects: Arc<dyn ObjectStore>,
    pub vectors: Arc<dyn VectorPartition>,
    pub pipeline: Arc<IngestPipeline>,
    pub engine: Arc<RetrievalEngine>,
    pub ingestion: IngestionConfig,
}

impl Services {
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;

        let backend = create_vector_backend(&config.vector, &pool)?;
        let vectors = connect(
            backend,
            PartitionOptions {
                unfiltered_fallback: config.retrieval.unfiltered_fallback,
            },
        )
        .await?;

        let parts = Parts {
            store: Arc::new(SqliteStore::new(pool)),
            objects: create_object_store(&config.storage)?,
            converter: Arc::new(LocalConverter::new()),
            embedder: create_provider(&config.embedding)?,
            completion: create_completion(&config.completion)?,
            vectors,
        };

        info!(
            storage = %config.storage.backend,
            vector = %config.vector.backend,
            embedding = %config.embedding.provider,
            completion = %config.completion.provider,
            "services ready"
        );
        Ok(Self::from_parts(config, parts))
    }

    pub fn from_parts(config: &Config, parts: Parts) -> Self {
        let pipeline = IngestPipeline::new(
            parts.store.clone(),
            parts.objects.clone(),
            parts.converter,
            parts.embedder.clone(),
            parts.vectors.clone(),
            config.chunking.settings(),
        );
        let engine = RetrievalEngine::new(
            parts.store.clone(),
            parts.embedder,
            parts.completion,
            parts.vectors.clone(),
            config.retrieval.top_k,
        );

        Self {
            store: parts.store,
            objects: parts.objects,
            vectors: parts.vectors,
            pipeline: Arc::new(pipeline),
            engine: Arc::new(engine),
            ingestion: config.ingestion.clone(),
        }
    }

    /// The caller with their active team memberships loaded.
    pub async fn principal(&self, user_id: &str, organization_id: &str) -> Result<Principal> {
        let teams = self.store.team_memberships(user_id).await?;
        Ok(Principal::new(user_id, organization_id).with_teams(teams))
    }
}
