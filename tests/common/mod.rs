#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const DIMS: usize = 64;

/// Bag-of-words feature hashing: texts sharing words get similar vectors.
pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    v
}

/// Local stand-in for Ollama's `POST /api/embed`.
pub struct FakeOllama {
    pub url: String,
    pub calls: Arc<AtomicUsize>,
}

impl FakeOllama {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Serve the fake on an ephemeral port. With `fail_first > 0` the first
/// that many calls answer 503.
pub async fn fake_ollama(fail_first: usize) -> FakeOllama {
    fake_ollama_failing(fail_first, StatusCode::SERVICE_UNAVAILABLE).await
}

/// Like [`fake_ollama`], failing with `status` instead of 503.
pub async fn fake_ollama_failing(fail_first: usize, status: StatusCode) -> FakeOllama {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = (calls.clone(), fail_first, status);
    let app = Router::new()
        .route(
            "/api/embed",
            post(
                |State((calls, fail_first, status)): State<(Arc<AtomicUsize>, usize, StatusCode)>,
                 Json(body): Json<Value>| async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < fail_first {
                        return (status, Json(json!({"error": "busy"})));
                    }
                    let inputs: Vec<String> = match &body["input"] {
                        Value::String(s) => vec![s.clone()],
                        other => serde_json::from_value(other.clone()).unwrap_or_default(),
                    };
                    let embeddings: Vec<Vec<f32>> = inputs.iter().map(|t| hash_embed(t)).collect();
                    (StatusCode::OK, Json(json!({ "embeddings": embeddings })))
                },
            ),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    FakeOllama {
        url: format!("http://{}", addr),
        calls,
    }
}

/// Write a config using the filesystem object store, the SQLite vector
/// index, the given embedding URL, and the extractive completion.
pub fn write_config(root: &Path, embedding_url: &str, extra: &str) -> PathBuf {
    let content = format!(
        r#"[db]
path = "{root}/data/marble.sqlite"

[storage]
backend = "filesystem"
root = "{root}/data/objects"

[chunking]
chunk_size = 400
overlap = 50

[retrieval]
top_k = 4

[embedding]
provider = "ollama"
model = "fake"
dims = {dims}
url = "{url}"
max_retries = 0
timeout_secs = 5

[completion]
provider = "extractive"

[ingestion]
max_attempts = 2
retry_backoff_secs = 0
{extra}"#,
        root = root.display(),
        dims = DIMS,
        url = embedding_url,
        extra = extra,
    );
    let config_dir = root.join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    let path = config_dir.join("marble.toml");
    std::fs::write(&path, content).unwrap();
    path
}

pub fn temp_root() -> TempDir {
    TempDir::new().unwrap()
}

pub const MARBLE: &str = "Project Marble empowers teams to chat with their files.";

pub const HANDBOOK: &str = "Expense reports are due on the fifth business day of each month.
Travel must be booked through the internal portal.
Laptops are refreshed every three years.";
