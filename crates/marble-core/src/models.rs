//! Core data models used throughout Marble.
//!
//! These types mirror the rows of the relational store and the payloads that
//! flow between the ingestion pipeline and the retrieval engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Visibility tier of a folder, file, or chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Personal,
    Team,
    Organization,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Personal => "personal",
            Visibility::Team => "team",
            Visibility::Organization => "organization",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Visibility::Personal),
            "team" => Ok(Visibility::Team),
            "organization" => Ok(Visibility::Organization),
            other => Err(Error::validation(format!("unknown visibility: {}", other))),
        }
    }
}

/// Ingestion status of a file.
///
/// `uploading → ready` on success; `uploading → failed` once the background
/// worker gives up. A failed file moves back to `uploading` when it is
/// re-ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Uploading,
    Ready,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploading => "uploading",
            FileStatus::Ready => "ready",
            FileStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(FileStatus::Uploading),
            "ready" => Ok(FileStatus::Ready),
            "failed" => Ok(FileStatus::Failed),
            other => Err(Error::validation(format!("unknown file status: {}", other))),
        }
    }
}

/// Access level of an explicit per-file grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Viewer,
    Editor,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Viewer => "viewer",
            AccessLevel::Editor => "editor",
        }
    }
}

impl FromStr for AccessLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(AccessLevel::Viewer),
            "editor" => Ok(AccessLevel::Editor),
            other => Err(Error::validation(format!("unknown access level: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub visibility: Visibility,
    /// `None` only for the organization-root folder.
    pub owner_id: Option<String>,
    pub team_id: Option<String>,
    pub deleted: bool,
}

/// A stored document. `active_generation` points at the chunk generation
/// retrieval is allowed to hydrate; `0` means nothing has been ingested yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: String,
    pub organization_id: String,
    pub folder_id: String,
    pub owner_id: String,
    pub team_id: Option<String>,
    pub visibility: Visibility,
    pub name: String,
    pub storage_key: String,
    pub size: i64,
    pub mime_type: String,
    pub status: FileStatus,
    pub deleted: bool,
    pub active_generation: i64,
    pub attempts: i64,
    pub last_error: Option<String>,
}

/// Replacement content written back after conversion to plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContentUpdate {
    pub name: String,
    pub storage_key: String,
    pub size: i64,
    pub mime_type: String,
}

/// A line-addressable segment of a file's text, tagged with the ingestion
/// generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: String,
    pub file_id: String,
    pub folder_id: String,
    pub organization_id: String,
    pub owner_id: String,
    pub team_id: Option<String>,
    pub visibility: Visibility,
    pub generation: i64,
    pub chunk_index: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub content: String,
}

/// A chunk joined with the names needed to render a citation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydratedChunk {
    pub chunk: ChunkRecord,
    pub folder_name: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePermission {
    pub file_id: String,
    pub user_id: String,
    pub access: AccessLevel,
}

/// One supporting excerpt handed to the completion model and returned to
/// the caller as a `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContext {
    pub chunk_id: String,
    pub file_id: String,
    pub folder_name: String,
    pub file_name: String,
    pub start_line: i64,
    pub end_line: i64,
    pub score: f32,
    pub content: String,
}

/// A `{folder, file, [startLine, endLine]}` reference chosen by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub folder: String,
    pub file: String,
    pub lines: [i64; 2],
}

/// Persisted question/answer exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRecord {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub scope: Option<String>,
    pub knowledge_mode: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_parses_its_own_labels() {
        for v in [Visibility::Personal, Visibility::Team, Visibility::Organization] {
            assert_eq!(v.as_str().parse::<Visibility>().unwrap(), v);
        }
        assert!("public".parse::<Visibility>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&FileStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }

    #[test]
    fn citation_lines_serialize_as_pair() {
        let c = Citation {
            folder: "Handbook".into(),
            file: "intro.txt".into(),
            lines: [1, 4],
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["lines"], serde_json::json!([1, 4]));
    }
}
