//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! One `RwLock` guards all tables so multi-row operations such as the
//! generation flip are atomic, matching what the SQL backend gets from a
//! single `UPDATE ... WHERE`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{
    ChatRecord, ChunkRecord, FileContentUpdate, FilePermission, FileRecord, FileStatus, Folder,
    HydratedChunk, Organization, Team,
};
use crate::visibility::ensure_can_join_team;

use super::Store;

#[derive(Default)]
struct Tables {
    organizations: HashMap<String, Organization>,
    teams: HashMap<String, Team>,
    members: Vec<(String, String)>,
    folders: HashMap<String, Folder>,
    files: HashMap<String, FileRecord>,
    next_generation: HashMap<String, i64>,
    chunks: Vec<ChunkRecord>,
    permissions: Vec<FilePermission>,
    chats: Vec<ChatRecord>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored chunk, in insertion order.
    pub fn chunks(&self) -> Vec<ChunkRecord> {
        self.tables.read().unwrap().chunks.clone()
    }

    pub fn chats(&self) -> Vec<ChatRecord> {
        self.tables.read().unwrap().chats.clone()
    }

    /// Soft-delete a file.
    pub fn mark_file_deleted(&self, file_id: &str) {
        if let Some(f) = self.tables.write().unwrap().files.get_mut(file_id) {
            f.deleted = true;
        }
    }
}

fn missing_file(file_id: &str) -> Error {
    Error::not_found(format!("file {}", file_id))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_file(&self, id: &str) -> Result<Option<FileRecord>> {
        Ok(self.tables.read().unwrap().files.get(id).cloned())
    }

    async fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        Ok(self.tables.read().unwrap().folders.get(id).cloned())
    }

    async fn get_team(&self, id: &str) -> Result<Option<Team>> {
        Ok(self.tables.read().unwrap().teams.get(id).cloned())
    }

    async fn update_file_content(
        &self,
        file_id: &str,
        update: &FileContentUpdate,
    ) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let file = tables
            .files
            .get_mut(file_id)
            .ok_or_else(|| missing_file(file_id))?;
        file.name = update.name.clone();
        file.storage_key = update.storage_key.clone();
        file.size = update.size;
        file.mime_type = update.mime_type.clone();
        Ok(())
    }

    async fn begin_generation(&self, file_id: &str) -> Result<i64> {
        let mut tables = self.tables.write().unwrap();
        if !tables.files.contains_key(file_id) {
            return Err(missing_file(file_id));
        }
        let next = tables
            .next_generation
            .entry(file_id.to_string())
            .or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn insert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        self.tables.write().unwrap().chunks.push(chunk.clone());
        Ok(())
    }

    async fn activate_generation(&self, file_id: &str, generation: i64) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        let file = tables
            .files
            .get_mut(file_id)
            .ok_or_else(|| missing_file(file_id))?;
        if file.active_generation >= generation {
            return Ok(false);
        }
        file.active_generation = generation;
        file.status = FileStatus::Ready;
        file.last_error = None;
        Ok(true)
    }

    async fn superseded_chunks(&self, file_id: Option<&str>) -> Result<Vec<ChunkRecord>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .chunks
            .iter()
            .filter(|c| file_id.map(|f| f == c.file_id).unwrap_or(true))
            .filter(|c| {
                tables
                    .files
                    .get(&c.file_id)
                    .map(|f| c.generation < f.active_generation)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn delete_chunks(&self, ids: &[String]) -> Result<()> {
        self.tables
            .write()
            .unwrap()
            .chunks
            .retain(|c| !ids.contains(&c.id));
        Ok(())
    }

    async fn set_file_status(
        &self,
        file_id: &str,
        status: FileStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let file = tables
            .files
            .get_mut(file_id)
            .ok_or_else(|| missing_file(file_id))?;
        file.status = status;
        file.last_error = last_error.map(str::to_string);
        Ok(())
    }

    async fn record_attempt(&self, file_id: &str) -> Result<i64> {
        let mut tables = self.tables.write().unwrap();
        let file = tables
            .files
            .get_mut(file_id)
            .ok_or_else(|| missing_file(file_id))?;
        file.attempts += 1;
        Ok(file.attempts)
    }

    async fn hydrate_chunks(&self, ids: &[String]) -> Result<Vec<HydratedChunk>> {
        let tables = self.tables.read().unwrap();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(chunk) = tables.chunks.iter().find(|c| &c.id == id) else {
                continue;
            };
            let Some(file) = tables.files.get(&chunk.file_id) else {
                continue;
            };
            if file.deleted || file.active_generation != chunk.generation {
                continue;
            }
            let folder_name = tables
                .folders
                .get(&chunk.folder_id)
                .map(|f| f.name.clone())
                .unwrap_or_default();
            out.push(HydratedChunk {
                chunk: chunk.clone(),
                folder_name,
                file_name: file.name.clone(),
            });
        }
        Ok(out)
    }

    async fn permissions_for_user(&self, user_id: &str) -> Result<Vec<FilePermission>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .permissions
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn team_memberships(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .members
            .iter()
            .filter(|(_, u)| u == user_id)
            .map(|(t, _)| t.clone())
            .collect())
    }

    async fn add_team_member(&self, team_id: &str, user_id: &str) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let current: Vec<String> = tables
            .members
            .iter()
            .filter(|(_, u)| u == user_id)
            .map(|(t, _)| t.clone())
            .collect();
        ensure_can_join_team(&current, team_id)?;
        let pair = (team_id.to_string(), user_id.to_string());
        if !tables.members.contains(&pair) {
            tables.members.push(pair);
        }
        Ok(())
    }

    async fn save_chat(&self, record: &ChatRecord) -> Result<()> {
        self.tables.write().unwrap().chats.push(record.clone());
        Ok(())
    }

    async fn create_organization(&self, org: &Organization) -> Result<()> {
        self.tables
            .write()
            .unwrap()
            .organizations
            .insert(org.id.clone(), org.clone());
        Ok(())
    }

    async fn create_team(&self, team: &Team) -> Result<()> {
        self.tables
            .write()
            .unwrap()
            .teams
            .insert(team.id.clone(), team.clone());
        Ok(())
    }

    async fn create_folder(&self, folder: &Folder) -> Result<()> {
        self.tables
            .write()
            .unwrap()
            .folders
            .insert(folder.id.clone(), folder.clone());
        Ok(())
    }

    async fn create_file(&self, file: &FileRecord) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables
            .next_generation
            .insert(file.id.clone(), file.active_generation);
        tables.files.insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn grant_permission(&self, grant: &FilePermission) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables
            .permissions
            .retain(|p| !(p.file_id == grant.file_id && p.user_id == grant.user_id));
        tables.permissions.push(grant.clone());
        Ok(())
    }
}
