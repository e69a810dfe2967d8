//! Vector index backends.
//!
//! | Backend | Shape | Notes |
//! |---------|-------|-------|
//! | `sqlite` | global, filtered | Shares the relational database file |
//! | `http` | learned from `GET /describe` | Remote REST index |
//!
//! Either way the backend is wrapped by
//! [`marble_core::vector::connect`], which picks the partition adapter.

pub mod http;
pub mod sqlite;

use std::sync::Arc;

use anyhow::bail;
use sqlx::SqlitePool;

use marble_core::vector::VectorBackend;

use crate::config::VectorConfig;

pub use http::HttpVectorIndex;
pub use sqlite::SqliteVectorIndex;

pub fn create_vector_backend(
    config: &VectorConfig,
    pool: &SqlitePool,
) -> anyhow::Result<Arc<dyn VectorBackend>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorIndex::new(pool.clone()))),
        "http" => Ok(Arc::new(HttpVectorIndex::from_config(config)?)),
        other => bail!("Unknown vector backend: {}", other),
    }
}
