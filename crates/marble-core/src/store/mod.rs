//! Relational store abstraction.
//!
//! The [`Store`] trait is everything the ingestion pipeline and the
//! retrieval engine need from the system of record: file and folder
//! metadata, chunk rows, grants, team memberships, and chat history.
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Generations
//!
//! Chunk rows are tagged with the ingestion generation that wrote them.
//! A file's `active_generation` is the only generation retrieval may
//! hydrate; [`Store::activate_generation`] moves it forward with a
//! compare-and-set so a slower, older ingestion can never overwrite the
//! result of a newer one.

pub mod memory;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{
    ChatRecord, ChunkRecord, FileContentUpdate, FilePermission, FileRecord, FileStatus, Folder,
    HydratedChunk, Organization, Team,
};
use crate::visibility::ensure_can_join_team;

/// Abstract relational store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`begin_generation`](Store::begin_generation) | Allocate the next chunk generation of a file |
/// | [`insert_chunk`](Store::insert_chunk) | Write one chunk row of a generation |
/// | [`activate_generation`](Store::activate_generation) | Monotonic flip of the visible generation |
/// | [`superseded_chunks`](Store::superseded_chunks) | Chunks older than their file's active generation |
/// | [`hydrate_chunks`](Store::hydrate_chunks) | Resolve vector matches back to visible chunk rows |
/// | [`save_chat`](Store::save_chat) | Persist a question/answer exchange |
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_file(&self, id: &str) -> Result<Option<FileRecord>>;

    async fn get_folder(&self, id: &str) -> Result<Option<Folder>>;

    async fn get_team(&self, id: &str) -> Result<Option<Team>>;

    /// Point the file at converted content (new name, key, size, mime).
    async fn update_file_content(&self, file_id: &str, update: &FileContentUpdate)
        -> Result<()>;

    /// Allocate and return the next generation number for `file_id`.
    async fn begin_generation(&self, file_id: &str) -> Result<i64>;

    async fn insert_chunk(&self, chunk: &ChunkRecord) -> Result<()>;

    /// Make `generation` the visible one and mark the file ready.
    ///
    /// Returns `false`, changing nothing, when the file already points at
    /// the same or a newer generation.
    async fn activate_generation(&self, file_id: &str, generation: i64) -> Result<bool>;

    /// Chunks whose generation is older than their file's active one,
    /// for one file or for every file when `file_id` is `None`.
    ///
    /// Chunks of generations newer than the active one belong to
    /// ingestions still in flight and are never returned.
    async fn superseded_chunks(&self, file_id: Option<&str>) -> Result<Vec<ChunkRecord>>;

    async fn delete_chunks(&self, ids: &[String]) -> Result<()>;

    async fn set_file_status(
        &self,
        file_id: &str,
        status: FileStatus,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Count one more ingestion attempt and return the new total.
    async fn record_attempt(&self, file_id: &str) -> Result<i64>;

    /// Load the chunks with the given ids that belong to the active
    /// generation of a non-deleted file, joined with folder and file
    /// names. Missing ids are skipped; the input order is preserved.
    async fn hydrate_chunks(&self, ids: &[String]) -> Result<Vec<HydratedChunk>>;

    async fn permissions_for_user(&self, user_id: &str) -> Result<Vec<FilePermission>>;

    /// Ids of the teams `user_id` is an active member of.
    async fn team_memberships(&self, user_id: &str) -> Result<Vec<String>>;

    /// Make `user_id` an active member of `team_id`. Idempotent for the
    /// same team. Must refuse with [`Error::Validation`] when the user is
    /// active in another team, atomically with the insert, so concurrent
    /// joins cannot both succeed.
    async fn add_team_member(&self, team_id: &str, user_id: &str) -> Result<()>;

    async fn save_chat(&self, record: &ChatRecord) -> Result<()>;

    async fn create_organization(&self, org: &Organization) -> Result<()>;

    async fn create_team(&self, team: &Team) -> Result<()>;

    async fn create_folder(&self, folder: &Folder) -> Result<()>;

    async fn create_file(&self, file: &FileRecord) -> Result<()>;

    async fn grant_permission(&self, grant: &FilePermission) -> Result<()>;
}

/// Add `user_id` to `team_id` within `organization_id`.
///
/// The team must exist in the caller's organization. The one-active-team
/// rule is checked up front by [`ensure_can_join_team`] for a clear error,
/// and enforced again by [`Store::add_team_member`] under concurrency.
pub async fn join_team(
    store: &dyn Store,
    organization_id: &str,
    user_id: &str,
    team_id: &str,
) -> Result<Team> {
    let team = store
        .get_team(team_id)
        .await?
        .filter(|t| t.organization_id == organization_id)
        .ok_or_else(|| Error::not_found(format!("team {}", team_id)))?;

    let current = store.team_memberships(user_id).await?;
    ensure_can_join_team(&current, team_id)?;
    if !current.iter().any(|t| t == team_id) {
        store.add_team_member(team_id, user_id).await?;
    }
    Ok(team)
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryStore;
    use super::*;

    fn team(id: &str, org: &str) -> Team {
        Team {
            id: id.into(),
            organization_id: org.into(),
            name: id.to_uppercase(),
            slug: id.into(),
        }
    }

    #[tokio::test]
    async fn join_is_idempotent_and_single() {
        let store = InMemoryStore::new();
        store.create_team(&team("t1", "o1")).await.unwrap();
        store.create_team(&team("t2", "o1")).await.unwrap();

        join_team(&store, "o1", "alice", "t1").await.unwrap();
        join_team(&store, "o1", "alice", "t1").await.unwrap();
        assert_eq!(store.team_memberships("alice").await.unwrap(), vec!["t1"]);

        let err = join_team(&store, "o1", "alice", "t2").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn store_refuses_a_second_active_team() {
        let store = InMemoryStore::new();
        store.add_team_member("t1", "alice").await.unwrap();
        store.add_team_member("t1", "alice").await.unwrap();
        let err = store.add_team_member("t2", "alice").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.team_memberships("alice").await.unwrap(), vec!["t1"]);
    }

    #[tokio::test]
    async fn join_rejects_foreign_team() {
        let store = InMemoryStore::new();
        store.create_team(&team("t9", "other")).await.unwrap();
        let err = join_team(&store, "o1", "alice", "t9").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
