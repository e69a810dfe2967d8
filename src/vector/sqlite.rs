//! Vector index stored in the `vectors` table of the SQLite database.
//!
//! Global keyspace with metadata filtering: filters become
//! `json_extract(metadata_json, '$.field') = ?` predicates, and cosine
//! similarity is computed in Rust over the little-endian f32 blobs that
//! survive the filter.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use marble_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use marble_core::error::{Error, Result, Service};
use marble_core::namespace::MetadataFilter;
use marble_core::vector::{
    FilteredIndex, IndexCapabilities, IndexShape, VectorBackend, VectorMatch, VectorMetadata,
    VectorRecord,
};

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::upstream(Service::VectorIndex, e)
}

/// Filter keys are interpolated into the JSON path, so only plain
/// identifiers are accepted.
fn json_path(field: &str) -> Result<String> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::validation(format!(
            "unsupported metadata filter field: {:?}",
            field
        )));
    }
    Ok(format!("$.{}", field))
}

#[async_trait]
impl VectorBackend for SqliteVectorIndex {
    async fn describe(&self) -> Result<IndexCapabilities> {
        Ok(IndexCapabilities {
            namespaces: false,
            metadata_filter: true,
        })
    }

    fn into_shape(self: Arc<Self>, _caps: &IndexCapabilities) -> IndexShape {
        IndexShape::Filtered(self)
    }
}

#[async_trait]
impl FilteredIndex for SqliteVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for record in records {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| Error::upstream(Service::VectorIndex, e))?;
            sqlx::query(
                r#"
                INSERT INTO vectors (id, dims, embedding, metadata_json)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(&record.id)
            .bind(record.values.len() as i64)
            .bind(vec_to_blob(&record.values))
            .bind(metadata)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>> {
        let mut sql =
            String::from("SELECT id, embedding, metadata_json FROM vectors WHERE dims = ?");
        let mut binds = Vec::new();
        if let Some(filter) = filter {
            for (field, value) in filter.fields() {
                sql.push_str(" AND json_extract(metadata_json, ?) = ?");
                binds.push(json_path(field)?);
                binds.push(value.to_string());
            }
        }

        let mut query = sqlx::query(&sql).bind(vector.len() as i64);
        for value in &binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let raw: String = row.get("metadata_json");
            let metadata: VectorMetadata = serde_json::from_str(&raw).map_err(|e| {
                Error::upstream(Service::VectorIndex, format!("corrupt metadata: {}", e))
            })?;
            matches.push(VectorMatch {
                id: row.get("id"),
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                metadata,
            });
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for id in ids {
            sqlx::query("DELETE FROM vectors WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
