//! Idempotent schema creation.
//!
//! `marble init` runs these statements; every one is `IF NOT EXISTS`, so
//! re-running is safe.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        id TEXT PRIMARY KEY,
        slug TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        name TEXT NOT NULL,
        slug TEXT NOT NULL,
        UNIQUE(organization_id, slug),
        FOREIGN KEY (organization_id) REFERENCES organizations(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS team_members (
        team_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        joined_at INTEGER NOT NULL,
        PRIMARY KEY (team_id, user_id),
        FOREIGN KEY (team_id) REFERENCES teams(id)
    )
    "#,
    // At most one active team per user, whatever the interleaving of joins.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_team_members_one_active
        ON team_members(user_id) WHERE active = 1
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS folders (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        name TEXT NOT NULL,
        visibility TEXT NOT NULL CHECK (visibility IN ('personal', 'team', 'organization')),
        owner_id TEXT,
        team_id TEXT,
        deleted INTEGER NOT NULL DEFAULT 0,
        CHECK (visibility != 'team' OR team_id IS NOT NULL),
        FOREIGN KEY (organization_id) REFERENCES organizations(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        folder_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        team_id TEXT,
        visibility TEXT NOT NULL CHECK (visibility IN ('personal', 'team', 'organization')),
        name TEXT NOT NULL,
        storage_key TEXT NOT NULL,
        size INTEGER NOT NULL,
        mime_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'uploading',
        deleted INTEGER NOT NULL DEFAULT 0,
        next_generation INTEGER NOT NULL DEFAULT 0,
        active_generation INTEGER NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CHECK (visibility != 'team' OR team_id IS NOT NULL),
        FOREIGN KEY (folder_id) REFERENCES folders(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL,
        folder_id TEXT NOT NULL,
        organization_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        team_id TEXT,
        visibility TEXT NOT NULL,
        generation INTEGER NOT NULL,
        chunk_index INTEGER NOT NULL,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        content TEXT NOT NULL,
        UNIQUE(file_id, generation, chunk_index),
        FOREIGN KEY (file_id) REFERENCES files(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_file_generation ON chunks(file_id, generation)",
    r#"
    CREATE TABLE IF NOT EXISTS file_permissions (
        file_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        access TEXT NOT NULL CHECK (access IN ('viewer', 'editor')),
        PRIMARY KEY (file_id, user_id),
        FOREIGN KEY (file_id) REFERENCES files(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_file_permissions_user ON file_permissions(user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        citations_json TEXT NOT NULL DEFAULT '[]',
        scope TEXT,
        knowledge_mode INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vectors (
        id TEXT PRIMARY KEY,
        dims INTEGER NOT NULL,
        embedding BLOB NOT NULL,
        metadata_json TEXT NOT NULL
    )
    "#,
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
