//! # Marble
//!
//! Multi-tenant knowledge assistant: members of an organization upload
//! files into personal, team, or organization folders and ask questions
//! answered from the documents they are allowed to read, with line-level
//! citations.
//!
//! The domain logic (visibility model, segmentation, namespace-partitioned
//! vector access, ingestion and retrieval) lives in [`marble_core`]; this
//! crate supplies the concrete collaborators and the surfaces around them.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`sqlite_store`] | Relational store on SQLite |
//! | [`object_store`] | Filesystem and S3 object storage |
//! | [`convert`] | PDF/DOCX/PPTX to text |
//! | [`embedding`] / [`completion`] | Model clients (OpenAI, Ollama) |
//! | [`vector`] | SQLite and HTTP vector indexes |
//! | [`services`] | Wiring of the above |
//! | [`ingest`] | Background ingestion worker with retry |
//! | [`server`] | HTTP API (axum) |
//! | [`admin`], [`chat`], [`status`] | CLI command implementations |

pub mod admin;
pub mod chat;
pub mod completion;
pub mod config;
pub mod convert;
pub mod db;
pub mod embedding;
pub mod http_retry;
pub mod ingest;
pub mod migrate;
pub mod object_store;
pub mod server;
pub mod services;
pub mod sqlite_store;
pub mod status;
pub mod vector;
