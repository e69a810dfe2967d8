//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait every embedding backend
//! implements, the response-envelope normalizer shared by the HTTP
//! providers, and pure helpers for vector serialization and similarity.
//!
//! Concrete providers (OpenAI, Ollama) live in the `marble` app crate.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result, Service};

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::upstream(Service::Embedding, "empty embedding response"))
    }
}

/// Normalize the response shapes embedding services return into a plain
/// list of vectors.
///
/// Accepted envelopes:
///
/// - `{"data": [{"embedding": [...], "index": 0}, ...]}` (OpenAI; sorted by
///   `index` when present)
/// - `{"embeddings": [[...], ...]}` (Ollama `/api/embed`)
/// - `{"embedding": [...]}` (single-vector endpoints)
/// - `{"vectors": [[...], ...]}`
/// - a bare `[[...], ...]` array
pub fn normalize_embedding_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    if let Some(data) = json.get("data").and_then(|d| d.as_array()) {
        let mut indexed = Vec::with_capacity(data.len());
        for (position, item) in data.iter().enumerate() {
            let values = item
                .get("embedding")
                .ok_or_else(|| malformed("data item without embedding"))?;
            let index = item
                .get("index")
                .and_then(|i| i.as_u64())
                .map(|i| i as usize)
                .unwrap_or(position);
            indexed.push((index, parse_vector(values)?));
        }
        indexed.sort_by_key(|(index, _)| *index);
        return Ok(indexed.into_iter().map(|(_, v)| v).collect());
    }

    for key in ["embeddings", "vectors"] {
        if let Some(list) = json.get(key) {
            return parse_matrix(list);
        }
    }

    if let Some(single) = json.get("embedding") {
        return Ok(vec![parse_vector(single)?]);
    }

    if json.is_array() {
        return parse_matrix(json);
    }

    Err(malformed("unrecognized response envelope"))
}

fn parse_matrix(value: &Value) -> Result<Vec<Vec<f32>>> {
    value
        .as_array()
        .ok_or_else(|| malformed("expected a list of vectors"))?
        .iter()
        .map(parse_vector)
        .collect()
}

fn parse_vector(value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| malformed("expected a vector"))?
        .iter()
        .map(|n| {
            n.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| malformed("non-numeric vector component"))
        })
        .collect()
}

fn malformed(what: &str) -> Error {
    Error::upstream(
        Service::Embedding,
        format!("invalid embedding response: {}", what),
    )
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use marble_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_envelope_sorted_by_index() {
        let resp = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = normalize_embedding_response(&resp).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn ollama_and_bare_envelopes() {
        let ollama = json!({"embeddings": [[0.5, 0.5], [0.1, 0.2]]});
        assert_eq!(normalize_embedding_response(&ollama).unwrap().len(), 2);

        let bare = json!([[1.0], [2.0], [3.0]]);
        assert_eq!(normalize_embedding_response(&bare).unwrap().len(), 3);

        let single = json!({"embedding": [0.25, 0.75]});
        assert_eq!(
            normalize_embedding_response(&single).unwrap(),
            vec![vec![0.25, 0.75]]
        );
    }

    #[test]
    fn unknown_envelope_is_upstream_error() {
        let err = normalize_embedding_response(&json!({"result": "ok"})).unwrap_err();
        assert!(matches!(
            err,
            Error::Upstream {
                service: Service::Embedding,
                ..
            }
        ));
        assert!(normalize_embedding_response(&json!({"embeddings": [["x"]]})).is_err());
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
