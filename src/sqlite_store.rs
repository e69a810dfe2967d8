//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`migrate`](crate::migrate). The generation flip is a single
//! conditional `UPDATE`, which SQLite applies atomically.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use marble_core::error::{Error, Result, Service};
use marble_core::models::{
    ChatRecord, ChunkRecord, FileContentUpdate, FilePermission, FileRecord, FileStatus, Folder,
    HydratedChunk, Organization, Team,
};
use marble_core::store::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::upstream(Service::RelationalStore, e)
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

const FILE_COLUMNS: &str = "id, organization_id, folder_id, owner_id, team_id, visibility, name, \
     storage_key, size, mime_type, status, deleted, active_generation, attempts, last_error";

const CHUNK_COLUMNS: &str = "c.id, c.file_id, c.folder_id, c.organization_id, c.owner_id, \
     c.team_id, c.visibility, c.generation, c.chunk_index, c.start_line, c.end_line, c.content";

fn file_from_row(row: &SqliteRow) -> Result<FileRecord> {
    Ok(FileRecord {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        folder_id: row.get("folder_id"),
        owner_id: row.get("owner_id"),
        team_id: row.get("team_id"),
        visibility: row.get::<String, _>("visibility").parse()?,
        name: row.get("name"),
        storage_key: row.get("storage_key"),
        size: row.get("size"),
        mime_type: row.get("mime_type"),
        status: row.get::<String, _>("status").parse()?,
        deleted: row.get::<i64, _>("deleted") != 0,
        active_generation: row.get("active_generation"),
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: row.get("id"),
        file_id: row.get("file_id"),
        folder_id: row.get("folder_id"),
        organization_id: row.get("organization_id"),
        owner_id: row.get("owner_id"),
        team_id: row.get("team_id"),
        visibility: row.get::<String, _>("visibility").parse()?,
        generation: row.get("generation"),
        chunk_index: row.get("chunk_index"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        content: row.get("content"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_file(&self, id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM files WHERE id = ?", FILE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        let row = sqlx::query(
            "SELECT id, organization_id, name, visibility, owner_id, team_id, deleted \
             FROM folders WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(Folder {
                id: row.get("id"),
                organization_id: row.get("organization_id"),
                name: row.get("name"),
                visibility: row.get::<String, _>("visibility").parse()?,
                owner_id: row.get("owner_id"),
                team_id: row.get("team_id"),
                deleted: row.get::<i64, _>("deleted") != 0,
            })),
            None => Ok(None),
        }
    }

    async fn get_team(&self, id: &str) -> Result<Option<Team>> {
        let row = sqlx::query("SELECT id, organization_id, name, slug FROM teams WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|row| Team {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            name: row.get("name"),
            slug: row.get("slug"),
        }))
    }

    async fn update_file_content(
        &self,
        file_id: &str,
        update: &FileContentUpdate,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE files SET name = ?, storage_key = ?, size = ?, mime_type = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&update.name)
        .bind(&update.storage_key)
        .bind(update.size)
        .bind(&update.mime_type)
        .bind(now_ts())
        .bind(file_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("file {}", file_id)));
        }
        Ok(())
    }

    async fn begin_generation(&self, file_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "UPDATE files SET next_generation = next_generation + 1, updated_at = ? \
             WHERE id = ? RETURNING next_generation",
        )
        .bind(now_ts())
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| r.get::<i64, _>("next_generation"))
            .ok_or_else(|| Error::not_found(format!("file {}", file_id)))
    }

    async fn insert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, file_id, folder_id, organization_id, owner_id, team_id,
                                visibility, generation, chunk_index, start_line, end_line, content)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.file_id)
        .bind(&chunk.folder_id)
        .bind(&chunk.organization_id)
        .bind(&chunk.owner_id)
        .bind(&chunk.team_id)
        .bind(chunk.visibility.as_str())
        .bind(chunk.generation)
        .bind(chunk.chunk_index)
        .bind(chunk.start_line)
        .bind(chunk.end_line)
        .bind(&chunk.content)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn activate_generation(&self, file_id: &str, generation: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET active_generation = ?, status = 'ready', last_error = NULL, \
             updated_at = ? WHERE id = ? AND active_generation < ?",
        )
        .bind(generation)
        .bind(now_ts())
        .bind(file_id)
        .bind(generation)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_file(file_id).await? {
            Some(_) => Ok(false),
            None => Err(Error::not_found(format!("file {}", file_id))),
        }
    }

    async fn superseded_chunks(&self, file_id: Option<&str>) -> Result<Vec<ChunkRecord>> {
        let sql = format!(
            "SELECT {} FROM chunks c JOIN files f ON f.id = c.file_id \
             WHERE c.generation < f.active_generation AND (? IS NULL OR c.file_id = ?) \
             ORDER BY c.file_id, c.generation, c.chunk_index",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(file_id)
            .bind(file_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn delete_chunks(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for id in ids {
            sqlx::query("DELETE FROM chunks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn set_file_status(
        &self,
        file_id: &str,
        status: FileStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE files SET status = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(last_error)
        .bind(now_ts())
        .bind(file_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("file {}", file_id)));
        }
        Ok(())
    }

    async fn record_attempt(&self, file_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "UPDATE files SET attempts = attempts + 1, updated_at = ? WHERE id = ? \
             RETURNING attempts",
        )
        .bind(now_ts())
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| r.get::<i64, _>("attempts"))
            .ok_or_else(|| Error::not_found(format!("file {}", file_id)))
    }

    async fn hydrate_chunks(&self, ids: &[String]) -> Result<Vec<HydratedChunk>> {
        let sql = format!(
            "SELECT {}, f.name AS file_name, COALESCE(d.name, '') AS folder_name \
             FROM chunks c \
             JOIN files f ON f.id = c.file_id \
             LEFT JOIN folders d ON d.id = c.folder_id \
             WHERE c.id = ? AND f.deleted = 0 AND c.generation = f.active_generation",
            CHUNK_COLUMNS
        );

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            if let Some(row) = row {
                out.push(HydratedChunk {
                    chunk: chunk_from_row(&row)?,
                    folder_name: row.get("folder_name"),
                    file_name: row.get("file_name"),
                });
            }
        }
        Ok(out)
    }

    async fn permissions_for_user(&self, user_id: &str) -> Result<Vec<FilePermission>> {
        let rows =
            sqlx::query("SELECT file_id, user_id, access FROM file_permissions WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(FilePermission {
                    file_id: row.get("file_id"),
                    user_id: row.get("user_id"),
                    access: row.get::<String, _>("access").parse()?,
                })
            })
            .collect()
    }

    async fn team_memberships(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT team_id FROM team_members WHERE user_id = ? AND active = 1 ORDER BY joined_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(|r| r.get("team_id")).collect())
    }

    async fn add_team_member(&self, team_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO team_members (team_id, user_id, active, joined_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(team_id, user_id) DO UPDATE SET active = 1
            "#,
        )
        .bind(team_id)
        .bind(user_id)
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::validation("user already belongs to another team")
            }
            _ => db_err(e),
        })?;
        Ok(())
    }

    async fn save_chat(&self, record: &ChatRecord) -> Result<()> {
        let citations = serde_json::to_string(&record.citations)
            .map_err(|e| Error::upstream(Service::RelationalStore, e))?;
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, organization_id, user_id, question, answer,
                                       citations_json, scope, knowledge_mode, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.organization_id)
        .bind(&record.user_id)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(citations)
        .bind(&record.scope)
        .bind(record.knowledge_mode)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_organization(&self, org: &Organization) -> Result<()> {
        sqlx::query("INSERT INTO organizations (id, slug, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&org.id)
            .bind(&org.slug)
            .bind(&org.name)
            .bind(now_ts())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_team(&self, team: &Team) -> Result<()> {
        sqlx::query("INSERT INTO teams (id, organization_id, name, slug) VALUES (?, ?, ?, ?)")
            .bind(&team.id)
            .bind(&team.organization_id)
            .bind(&team.name)
            .bind(&team.slug)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_folder(&self, folder: &Folder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO folders (id, organization_id, name, visibility, owner_id, team_id, deleted)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&folder.id)
        .bind(&folder.organization_id)
        .bind(&folder.name)
        .bind(folder.visibility.as_str())
        .bind(&folder.owner_id)
        .bind(&folder.team_id)
        .bind(folder.deleted)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_file(&self, file: &FileRecord) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            r#"
            INSERT INTO files (id, organization_id, folder_id, owner_id, team_id, visibility,
                               name, storage_key, size, mime_type, status, deleted,
                               next_generation, active_generation, attempts, last_error,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.organization_id)
        .bind(&file.folder_id)
        .bind(&file.owner_id)
        .bind(&file.team_id)
        .bind(file.visibility.as_str())
        .bind(&file.name)
        .bind(&file.storage_key)
        .bind(file.size)
        .bind(&file.mime_type)
        .bind(file.status.as_str())
        .bind(file.deleted)
        .bind(file.active_generation)
        .bind(file.active_generation)
        .bind(file.attempts)
        .bind(&file.last_error)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn grant_permission(&self, grant: &FilePermission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_permissions (file_id, user_id, access) VALUES (?, ?, ?)
            ON CONFLICT(file_id, user_id) DO UPDATE SET access = excluded.access
            "#,
        )
        .bind(&grant.file_id)
        .bind(&grant.user_id)
        .bind(grant.access.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
