//! Administrative writes: organizations, teams, folders, uploads, grants.
//!
//! These are thin, validated wrappers over [`Store`] used by the CLI. The
//! upload path stores raw bytes under the deterministic object key before
//! the file record is created, so a record never points at a missing
//! object.

use std::path::Path;

use uuid::Uuid;

use marble_core::error::{Error, Result};
use marble_core::models::{
    AccessLevel, FilePermission, FileRecord, FileStatus, Folder, Organization, Team, Visibility,
};
use marble_core::objects::{sanitize_file_name, storage_key, KeyParts, ObjectStore};
use marble_core::store::Store;
use marble_core::visibility::{can_access, AccessMode, Principal};

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "unnamed".to_string()
    } else {
        slug
    }
}

/// Id of the organization's unowned root folder.
pub fn root_folder_id(organization_id: &str) -> String {
    format!("{}-root", organization_id)
}

/// Create an organization together with its read-only root folder.
pub async fn create_organization(store: &dyn Store, name: &str) -> Result<Organization> {
    let name = non_empty(name, "organization name")?;
    let org = Organization {
        id: Uuid::new_v4().to_string(),
        slug: slugify(name),
        name: name.to_string(),
    };
    store.create_organization(&org).await?;
    store
        .create_folder(&Folder {
            id: root_folder_id(&org.id),
            organization_id: org.id.clone(),
            name: org.name.clone(),
            visibility: Visibility::Organization,
            owner_id: None,
            team_id: None,
            deleted: false,
        })
        .await?;
    Ok(org)
}

pub async fn create_team(store: &dyn Store, organization_id: &str, name: &str) -> Result<Team> {
    let name = non_empty(name, "team name")?;
    let team = Team {
        id: Uuid::new_v4().to_string(),
        organization_id: organization_id.to_string(),
        name: name.to_string(),
        slug: slugify(name),
    };
    store.create_team(&team).await?;
    Ok(team)
}

/// Create a folder owned by `principal`. Team folders require membership
/// of that team.
pub async fn create_folder(
    store: &dyn Store,
    principal: &Principal,
    name: &str,
    visibility: Visibility,
    team_id: Option<&str>,
) -> Result<Folder> {
    let name = non_empty(name, "folder name")?;
    let team_id = match visibility {
        Visibility::Team => {
            let team_id =
                team_id.ok_or_else(|| Error::validation("team folders need a team id"))?;
            if !principal.active_team_ids.iter().any(|t| t == team_id) {
                return Err(Error::forbidden(format!(
                    "team {}: only members can create team folders",
                    team_id
                )));
            }
            Some(team_id.to_string())
        }
        _ => None,
    };

    let folder = Folder {
        id: Uuid::new_v4().to_string(),
        organization_id: principal.organization_id.clone(),
        name: name.to_string(),
        visibility,
        owner_id: Some(principal.user_id.clone()),
        team_id,
        deleted: false,
    };
    store.create_folder(&folder).await?;
    Ok(folder)
}

/// Store `bytes` as a new file in `folder_id`; the file inherits the
/// folder's visibility and team. Returns the record in `uploading` state.
pub async fn upload_bytes(
    store: &dyn Store,
    objects: &dyn ObjectStore,
    principal: &Principal,
    folder_id: &str,
    file_name: &str,
    mime_type: &str,
    bytes: Vec<u8>,
) -> Result<FileRecord> {
    let folder = store
        .get_folder(folder_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("folder {}", folder_id)))?;
    can_access((&folder).into(), principal, AccessMode::Write)
        .into_result(&format!("folder {}", folder_id))?;

    let id = Uuid::new_v4().to_string();
    let key = storage_key(
        &KeyParts {
            visibility: folder.visibility,
            organization_id: &folder.organization_id,
            team_id: folder.team_id.as_deref(),
            owner_id: Some(&principal.user_id),
            folder_id: &folder.id,
            file_id: &id,
        },
        file_name,
    );

    let size = bytes.len() as i64;
    objects.put(&key, bytes, mime_type).await?;

    let file = FileRecord {
        id,
        organization_id: folder.organization_id.clone(),
        folder_id: folder.id.clone(),
        owner_id: principal.user_id.clone(),
        team_id: folder.team_id.clone(),
        visibility: folder.visibility,
        name: sanitize_file_name(file_name),
        storage_key: key,
        size,
        mime_type: mime_type.to_string(),
        status: FileStatus::Uploading,
        deleted: false,
        active_generation: 0,
        attempts: 0,
        last_error: None,
    };
    store.create_file(&file).await?;
    Ok(file)
}

/// Read a local file and upload it; the mime type is guessed from the
/// extension.
pub async fn upload_path(
    store: &dyn Store,
    objects: &dyn ObjectStore,
    principal: &Principal,
    folder_id: &str,
    path: &Path,
) -> anyhow::Result<FileRecord> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let mime = detect_content_type(&name);
    Ok(upload_bytes(store, objects, principal, folder_id, &name, mime, bytes).await?)
}

/// Grant `user_id` explicit access to a file. Only the owner may share.
pub async fn grant(
    store: &dyn Store,
    principal: &Principal,
    file_id: &str,
    user_id: &str,
    access: AccessLevel,
) -> Result<FilePermission> {
    let file = store
        .get_file(file_id)
        .await?
        .filter(|f| !f.deleted && f.organization_id == principal.organization_id)
        .ok_or_else(|| Error::not_found(format!("file {}", file_id)))?;
    if file.owner_id != principal.user_id {
        return Err(Error::forbidden(format!(
            "file {}: only the owner can share it",
            file_id
        )));
    }

    let permission = FilePermission {
        file_id: file.id,
        user_id: user_id.to_string(),
        access,
    };
    store.grant_permission(&permission).await?;
    Ok(permission)
}

pub fn detect_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" | "text" | "log" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "xml" => "application/xml",
        "pdf" => crate::convert::MIME_PDF,
        "docx" => crate::convert::MIME_DOCX,
        "pptx" => crate::convert::MIME_PPTX,
        _ => "application/octet-stream",
    }
}

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed)
}
