//! Retrying JSON-over-HTTP calls shared by the model and index clients.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately, not retryable
//!   by the ingestion worker either
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use marble_core::error::{Error, Result, Service};

/// Send the request built by `make` until it succeeds, a non-retryable
/// status comes back, or `max_retries` retries are spent. Returns the JSON
/// body, or `Value::Null` for an empty one.
pub async fn send_json<F>(service: Service, label: &str, max_retries: u32, make: F) -> Result<Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(%service, label, attempt, ?delay, "retrying");
            tokio::time::sleep(delay).await;
        }

        match make().send().await {
            Ok(response) => {
                let status = response.status();
                let body_text = response.text().await.unwrap_or_default();

                if status.is_success() {
                    if body_text.trim().is_empty() {
                        return Ok(Value::Null);
                    }
                    return serde_json::from_str(&body_text).map_err(|e| {
                        Error::upstream(service, format!("{}: invalid JSON response: {}", label, e))
                    });
                }

                let message = format!("{} returned {}: {}", label, status, truncate(&body_text));
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(Error::upstream(service, message));
                    continue;
                }
                return Err(Error::rejected(service, message));
            }
            Err(e) => {
                last_err = Some(Error::upstream(
                    service,
                    format!("{} unreachable: {}", label, e),
                ));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| Error::upstream(service, format!("{} failed after retries", label))))
}

pub fn client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(300) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
