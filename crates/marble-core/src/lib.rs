//! # Marble Core
//!
//! Runtime-agnostic logic for Marble's scoped knowledge engine: data models,
//! the three-tier visibility model, the line-addressable segmenter, the
//! namespace-partitioned vector adapter, the ingestion pipeline, and the
//! multi-scope retrieval engine.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! Every external collaborator (relational store, object storage, text
//! conversion, embedding and completion models, vector index) is reached
//! through a trait, and in-memory implementations ship alongside for tests.
//!
//! ```text
//! upload ──▶ ingest::IngestPipeline ──▶ store (chunks) + vector (namespaced)
//!                                                   │
//! question ──▶ retrieval::RetrievalEngine ◀─────────┘
//!                 │  fan-out, merge, hydrate
//!                 ▼
//!           answer + citations + sources
//! ```

pub mod completion;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod namespace;
pub mod objects;
pub mod retrieval;
pub mod search;
pub mod segment;
pub mod store;
pub mod vector;
pub mod visibility;
