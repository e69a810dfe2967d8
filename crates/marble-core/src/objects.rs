//! Object storage and text conversion contracts.
//!
//! Raw upload bytes live in an object store keyed by a deterministic path
//! derived from the file's governance fields. Documents that are not plain
//! text pass through a [`TextConverter`] before segmentation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Visibility;

/// Key/value byte storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write (or overwrite) an object. Returns once the write is durable.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Delete an object; deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Converts document formats (PDF, DOCX, ...) into plain UTF-8 text.
#[async_trait]
pub trait TextConverter: Send + Sync {
    async fn to_text(&self, bytes: &[u8], mime_type: &str, file_name: &str) -> Result<String>;
}

/// Governance fields that determine where a file's bytes are stored.
#[derive(Debug, Clone, Copy)]
pub struct KeyParts<'a> {
    pub visibility: Visibility,
    pub organization_id: &'a str,
    pub team_id: Option<&'a str>,
    pub owner_id: Option<&'a str>,
    pub folder_id: &'a str,
    pub file_id: &'a str,
}

/// Deterministic object key:
/// `{visibility}/{org}/[{team}/]{owner|system}/{folder}/{file}/{sanitized name}`.
///
/// ```rust
/// use marble_core::models::Visibility;
/// use marble_core::objects::{storage_key, KeyParts};
///
/// let key = storage_key(
///     &KeyParts {
///         visibility: Visibility::Team,
///         organization_id: "o1",
///         team_id: Some("t1"),
///         owner_id: Some("u1"),
///         folder_id: "d1",
///         file_id: "f1",
///     },
///     "Q3 plan (final).pdf",
/// );
/// assert_eq!(key, "team/o1/t1/u1/d1/f1/Q3_plan_final_.pdf");
/// ```
pub fn storage_key(parts: &KeyParts<'_>, file_name: &str) -> String {
    let mut segments = vec![parts.visibility.as_str(), parts.organization_id];
    if let Some(team) = parts.team_id {
        segments.push(team);
    }
    segments.push(parts.owner_id.unwrap_or("system"));
    segments.push(parts.folder_id);
    segments.push(parts.file_id);

    let name = sanitize_file_name(file_name);
    let mut key = segments.join("/");
    key.push('/');
    key.push_str(&name);
    key
}

/// Keep `[A-Za-z0-9._-]`, collapse every other run of characters into a
/// single `_`, and fall back to `file` when nothing usable remains.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sub = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
            out.push(c);
            last_was_sub = false;
        } else if !last_was_sub {
            out.push('_');
            last_was_sub = true;
        }
    }
    let trimmed = out.trim_matches('.');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Name of the plain-text replacement of a converted document:
/// `report.pdf` → `report.txt`.
pub fn text_file_name(original: &str) -> String {
    let stem = match original.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => original,
    };
    format!("{}.txt", stem)
}

/// Mime types that are segmented directly without conversion.
pub fn is_plain_text(mime_type: &str) -> bool {
    let base = mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .to_ascii_lowercase();
    base.starts_with("text/")
        || matches!(
            base.as_str(),
            "application/json" | "application/xml" | "application/x-yaml" | "application/yaml"
        )
}

/// In-memory [`ObjectStore`] for tests and embedding in other hosts.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().unwrap().get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().unwrap().get(key).map(|(b, _)| b.clone()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects
            .write()
            .unwrap()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personal_key_without_team() {
        let key = storage_key(
            &KeyParts {
                visibility: Visibility::Personal,
                organization_id: "o1",
                team_id: None,
                owner_id: Some("u1"),
                folder_id: "d1",
                file_id: "f1",
            },
            "notes.md",
        );
        assert_eq!(key, "personal/o1/u1/d1/f1/notes.md");
    }

    #[test]
    fn unowned_root_uses_system_segment() {
        let key = storage_key(
            &KeyParts {
                visibility: Visibility::Organization,
                organization_id: "o1",
                team_id: None,
                owner_id: None,
                folder_id: "root",
                file_id: "f1",
            },
            "policy.txt",
        );
        assert_eq!(key, "organization/o1/system/root/f1/policy.txt");
    }

    #[test]
    fn sanitizing() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name("résumé 2024.docx"), "r_sum_2024.docx");
        assert_eq!(sanitize_file_name("???"), "file");
        assert_eq!(sanitize_file_name(""), "file");
    }

    #[test]
    fn text_names() {
        assert_eq!(text_file_name("report.pdf"), "report.txt");
        assert_eq!(text_file_name("archive.tar.gz"), "archive.tar.txt");
        assert_eq!(text_file_name("README"), "README.txt");
        assert_eq!(text_file_name(".env"), ".env.txt");
    }

    #[test]
    fn plain_text_detection() {
        assert!(is_plain_text("text/plain"));
        assert!(is_plain_text("text/markdown; charset=utf-8"));
        assert!(is_plain_text("application/json"));
        assert!(!is_plain_text("application/pdf"));
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = InMemoryObjectStore::new();
        store.put("a/b", b"hi".to_vec(), "text/plain").await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), Some(b"hi".to_vec()));
        store.delete("a/b").await.unwrap();
        store.delete("a/b").await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), None);
    }
}
