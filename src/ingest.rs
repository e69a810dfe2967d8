//! Background ingestion worker.
//!
//! `POST /ingest` answers `202 Accepted` and hands the file to
//! [`spawn_ingest`]. The detached task retries collaborator failures with
//! linear backoff (`attempt * retry_backoff_secs`) and records every
//! attempt on the file, so a client polling `GET /files/{id}/status`
//! eventually sees `ready` or `failed` with the last error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use marble_core::error::Error;
use marble_core::ingest::{sweep_superseded, IngestOutcome, IngestPipeline};
use marble_core::models::FileStatus;
use marble_core::store::Store;

use crate::config::{Config, IngestionConfig};
use crate::services::Services;

/// Run [`ingest_with_retry`] on a detached task.
pub fn spawn_ingest(
    services: &Services,
    file_id: String,
    user_id: String,
) -> JoinHandle<marble_core::error::Result<IngestOutcome>> {
    let pipeline = services.pipeline.clone();
    let store = services.store.clone();
    let config = services.ingestion.clone();
    tokio::spawn(
        async move { ingest_with_retry(pipeline, store, &config, &file_id, &user_id).await },
    )
}

/// Ingest `file_id`, retrying upstream failures up to `max_attempts`.
///
/// Missing files and non-owners are rejected without touching the file.
/// Other non-retryable errors (validation, consistency) fail the file on
/// the first attempt.
pub async fn ingest_with_retry(
    pipeline: Arc<IngestPipeline>,
    store: Arc<dyn Store>,
    config: &IngestionConfig,
    file_id: &str,
    user_id: &str,
) -> marble_core::error::Result<IngestOutcome> {
    // Reject callers who may not ingest before touching the file's status.
    let file = store
        .get_file(file_id)
        .await?
        .filter(|f| !f.deleted)
        .ok_or_else(|| Error::not_found(format!("file {}", file_id)))?;
    if file.owner_id != user_id {
        return Err(Error::forbidden(format!(
            "file {}: only the owner can ingest it",
            file_id
        )));
    }

    store
        .set_file_status(file_id, FileStatus::Uploading, None)
        .await?;

    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        store.record_attempt(file_id).await?;

        match pipeline.ingest(file_id, user_id).await {
            Ok(outcome) => {
                info!(
                    file_id,
                    attempt,
                    chunks = outcome.chunk_count,
                    generation = outcome.generation,
                    superseded = outcome.superseded,
                    swept = outcome.swept,
                    "ingestion finished"
                );
                return Ok(outcome);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = Duration::from_secs(config.retry_backoff_secs * attempt as u64);
                warn!(file_id, attempt, ?delay, error = %e, "ingestion attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(file_id, attempt, error = %e, "ingestion failed");
                mark_failed(store.as_ref(), file_id, &e).await;
                return Err(e);
            }
        }
    }
}

async fn mark_failed(store: &dyn Store, file_id: &str, err: &Error) {
    let message = err.to_string();
    if let Err(e) = store
        .set_file_status(file_id, FileStatus::Failed, Some(&message))
        .await
    {
        error!(file_id, error = %e, "could not record ingestion failure");
    }
}

/// `marble ingest`: ingest in the foreground and print the outcome.
pub async fn run_ingest(config: &Config, file_id: &str, user_id: &str) -> Result<()> {
    let services = Services::build(config).await?;
    let outcome = ingest_with_retry(
        services.pipeline.clone(),
        services.store.clone(),
        &services.ingestion,
        file_id,
        user_id,
    )
    .await?;

    if outcome.superseded {
        println!(
            "File {} was re-ingested concurrently; generation {} discarded.",
            outcome.file_id, outcome.generation
        );
    } else {
        println!(
            "Ingested file {}: {} chunks (generation {}, {} superseded chunks removed).",
            outcome.file_id, outcome.chunk_count, outcome.generation, outcome.swept
        );
    }
    Ok(())
}

/// `marble sweep`: remove chunks of superseded generations.
pub async fn run_sweep(config: &Config, file_id: Option<&str>) -> Result<()> {
    let services = Services::build(config).await?;
    let removed =
        sweep_superseded(services.store.as_ref(), services.vectors.as_ref(), file_id).await?;
    println!("Removed {} superseded chunks.", removed);
    Ok(())
}
