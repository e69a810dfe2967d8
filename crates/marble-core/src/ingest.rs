//! Ingestion pipeline: raw upload → searchable, line-addressable chunks.
//!
//! ```text
//! object store ──get──▶ [convert] ──▶ segment ──▶ embed (one batch)
//!                                                    │
//!        insert chunks + upsert vectors (generation N)
//!                                                    │
//!        flip active generation N (CAS) ──▶ sweep generations < N
//! ```
//!
//! # Replace protocol
//!
//! Re-ingesting a file never deletes before it inserts. The new chunk rows
//! and vectors are written under a freshly allocated generation number,
//! the file's active-generation pointer is moved forward with a
//! compare-and-set, and only then are older generations swept. Retrieval
//! hydrates active-generation chunks only, so a reader sees either the
//! previous complete chunk set or the next one, never a mix.
//!
//! When two ingestions of one file race, the one holding the newer
//! generation wins the flip; the loser removes what it wrote and reports
//! itself as superseded.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{ChunkRecord, FileContentUpdate, FileRecord};
use crate::namespace::{Namespace, NamespaceToken};
use crate::objects::{
    is_plain_text, storage_key, text_file_name, KeyParts, ObjectStore, TextConverter,
};
use crate::segment::segment;
use crate::store::Store;
use crate::vector::{VectorMetadata, VectorPartition, VectorRecord};

/// Segmenter parameters, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            overlap: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub file_id: String,
    pub chunk_count: usize,
    pub generation: i64,
    /// A newer ingestion of the same file won the generation flip; this
    /// run's chunks were discarded.
    pub superseded: bool,
    /// Chunks of older generations removed after the flip.
    pub swept: usize,
}

pub struct IngestPipeline {
    store: Arc<dyn Store>,
    objects: Arc<dyn ObjectStore>,
    converter: Arc<dyn TextConverter>,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorPartition>,
    settings: ChunkSettings,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        objects: Arc<dyn ObjectStore>,
        converter: Arc<dyn TextConverter>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorPartition>,
        settings: ChunkSettings,
    ) -> Self {
        Self {
            store,
            objects,
            converter,
            embedder,
            vectors,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Ingest `file_id` on behalf of `acting_user_id`, who must own it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] when the file record (or its object) is
    ///   missing, or the file is soft-deleted.
    /// - [`Error::Forbidden`] when the acting user is not the owner.
    /// - [`Error::Validation`] when the text yields no segments.
    /// - [`Error::Consistency`] when the embedding count does not match.
    /// - [`Error::Upstream`] for collaborator failures.
    pub async fn ingest(&self, file_id: &str, acting_user_id: &str) -> Result<IngestOutcome> {
        let mut file = self
            .store
            .get_file(file_id)
            .await?
            .filter(|f| !f.deleted)
            .ok_or_else(|| Error::not_found(format!("file {}", file_id)))?;

        if file.owner_id != acting_user_id {
            return Err(Error::forbidden(format!(
                "file {}: only the owner can ingest it",
                file_id
            )));
        }

        let folder = self
            .store
            .get_folder(&file.folder_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("folder {}", file.folder_id)))?;

        let text = self.load_text(&mut file).await?;

        let segments = segment(&text, self.settings.chunk_size, self.settings.overlap)?;
        if segments.is_empty() {
            return Err(Error::validation(format!(
                "file {}: no content to ingest",
                file_id
            )));
        }

        let texts: Vec<String> = segments.iter().map(|s| s.content.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != segments.len() {
            return Err(Error::Consistency(format!(
                "file {}: {} segments but {} embeddings",
                file_id,
                segments.len(),
                embeddings.len()
            )));
        }

        let namespace = Namespace::for_entity(
            file.visibility,
            &file.organization_id,
            &file.owner_id,
            file.team_id.as_deref(),
        )?;
        let token = namespace.encode();
        let generation = self.store.begin_generation(file_id).await?;
        debug!(file_id, generation, %namespace, "writing generation");

        let mut written: Vec<String> = Vec::with_capacity(segments.len());
        for (index, (seg, values)) in segments.into_iter().zip(embeddings).enumerate() {
            let chunk = ChunkRecord {
                id: uuid::Uuid::new_v4().to_string(),
                file_id: file.id.clone(),
                folder_id: file.folder_id.clone(),
                organization_id: file.organization_id.clone(),
                owner_id: file.owner_id.clone(),
                team_id: file.team_id.clone(),
                visibility: file.visibility,
                generation,
                chunk_index: index as i64,
                start_line: seg.start_line,
                end_line: seg.end_line,
                content: seg.content,
            };
            let record = VectorRecord {
                id: chunk.id.clone(),
                values,
                metadata: VectorMetadata {
                    chunk_id: chunk.id.clone(),
                    file_id: file.id.clone(),
                    folder_id: folder.id.clone(),
                    folder_name: folder.name.clone(),
                    file_name: file.name.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    visibility: file.visibility,
                    owner_id: file.owner_id.clone(),
                    organization_id: file.organization_id.clone(),
                    team_id: file.team_id.clone(),
                    generation,
                },
            };

            let step = async {
                self.store.insert_chunk(&chunk).await?;
                written.push(chunk.id.clone());
                self.vectors.upsert(&token, &record).await
            };
            if let Err(e) = step.await {
                self.discard(&token, &written).await;
                return Err(e);
            }
        }

        if !self.store.activate_generation(file_id, generation).await? {
            info!(file_id, generation, "superseded by a newer ingestion");
            self.discard(&token, &written).await;
            return Ok(IngestOutcome {
                file_id: file_id.to_string(),
                chunk_count: written.len(),
                generation,
                superseded: true,
                swept: 0,
            });
        }

        let swept = match sweep_superseded(
            self.store.as_ref(),
            self.vectors.as_ref(),
            Some(file_id),
        )
        .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!(file_id, error = %e, "sweep of older generations failed; will retry later");
                0
            }
        };

        info!(file_id, generation, chunks = written.len(), swept, "file ready");
        Ok(IngestOutcome {
            file_id: file_id.to_string(),
            chunk_count: written.len(),
            generation,
            superseded: false,
            swept,
        })
    }

    /// Fetch the file's bytes and return its text, converting and
    /// replacing the stored object first when it is not plain text.
    async fn load_text(&self, file: &mut FileRecord) -> Result<String> {
        let bytes = self
            .objects
            .get(&file.storage_key)
            .await?
            .ok_or_else(|| Error::not_found(format!("object {}", file.storage_key)))?;

        if is_plain_text(&file.mime_type) {
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }

        let text = self
            .converter
            .to_text(&bytes, &file.mime_type, &file.name)
            .await?;

        let name = text_file_name(&file.name);
        let key = storage_key(
            &KeyParts {
                visibility: file.visibility,
                organization_id: &file.organization_id,
                team_id: file.team_id.as_deref(),
                owner_id: Some(&file.owner_id),
                folder_id: &file.folder_id,
                file_id: &file.id,
            },
            &name,
        );
        let update = FileContentUpdate {
            name,
            storage_key: key,
            size: text.len() as i64,
            mime_type: "text/plain".to_string(),
        };

        self.objects
            .put(&update.storage_key, text.clone().into_bytes(), &update.mime_type)
            .await?;
        self.store.update_file_content(&file.id, &update).await?;

        let old_key = std::mem::replace(&mut file.storage_key, update.storage_key);
        file.name = update.name;
        file.size = update.size;
        file.mime_type = update.mime_type;

        if old_key != file.storage_key {
            if let Err(e) = self.objects.delete(&old_key).await {
                warn!(key = %old_key, error = %e, "failed to delete original object");
            }
        }
        info!(file_id = %file.id, name = %file.name, "converted to plain text");
        Ok(text)
    }

    /// Best-effort removal of chunks this run wrote.
    async fn discard(&self, token: &NamespaceToken, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.vectors.delete(token, ids).await {
            warn!(error = %e, count = ids.len(), "failed to discard vectors");
        }
        if let Err(e) = self.store.delete_chunks(ids).await {
            warn!(error = %e, count = ids.len(), "failed to discard chunk rows");
        }
    }
}

/// Delete chunks (rows and vectors) of generations older than their file's
/// active generation. Returns the number of chunks removed.
///
/// Vectors go first: a chunk row whose vector is gone is harmless, while a
/// vector without its row is only dropped at hydration.
pub async fn sweep_superseded(
    store: &dyn Store,
    vectors: &dyn VectorPartition,
    file_id: Option<&str>,
) -> Result<usize> {
    let stale = store.superseded_chunks(file_id).await?;
    if stale.is_empty() {
        return Ok(0);
    }

    let mut by_namespace: HashMap<NamespaceToken, Vec<String>> = HashMap::new();
    for chunk in &stale {
        let ns = Namespace::for_entity(
            chunk.visibility,
            &chunk.organization_id,
            &chunk.owner_id,
            chunk.team_id.as_deref(),
        )?;
        by_namespace
            .entry(ns.encode())
            .or_default()
            .push(chunk.id.clone());
    }

    let mut removed = 0;
    for (token, ids) in by_namespace {
        vectors.delete(&token, &ids).await?;
        store.delete_chunks(&ids).await?;
        removed += ids.len();
    }
    debug!(removed, "swept superseded chunks");
    Ok(removed)
}
