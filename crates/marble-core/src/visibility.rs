//! Three-tier visibility rules.
//!
//! Pure functions answering "can principal P read/write entity E". Folders,
//! files, and chunks all carry the same governance fields (organization,
//! visibility tier, owner, team, soft-delete flag) and are checked through a
//! borrowed [`EntityRef`].
//!
//! Rules, evaluated in order:
//!
//! 1. Entities of another organization and soft-deleted entities are
//!    reported as not found, never as forbidden.
//! 2. `organization`: readable by everyone in the organization. Writing
//!    requires ownership; the unowned organization root is read-only.
//! 3. `team`: readable by the owner and by members of the entity's team.
//!    Writing requires ownership.
//! 4. `personal`: owner only.
//!
//! Explicit [`FilePermission`] grants layer on top for files only.

use crate::error::{Error, Result};
use crate::models::{AccessLevel, ChunkRecord, FilePermission, FileRecord, Folder, Visibility};

/// The caller, as resolved by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub organization_id: String,
    /// Teams the user is an active member of (at most one in practice).
    pub active_team_ids: Vec<String>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            active_team_ids: Vec::new(),
        }
    }

    pub fn with_teams(mut self, team_ids: impl IntoIterator<Item = String>) -> Self {
        self.active_team_ids = team_ids.into_iter().collect();
        self
    }

    fn is_member_of(&self, team_id: &str) -> bool {
        self.active_team_ids.iter().any(|t| t == team_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NotFound,
    Forbidden(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Convert into the request-path error taxonomy. `what` names the
    /// entity in the message (e.g. `"file f-123"`).
    pub fn into_result(self, what: &str) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(Denial::NotFound) => Err(Error::not_found(what)),
            Decision::Deny(Denial::Forbidden(reason)) => {
                Err(Error::forbidden(format!("{}: {}", what, reason)))
            }
        }
    }
}

/// Borrowed view of the fields every governed entity carries.
#[derive(Debug, Clone, Copy)]
pub struct EntityRef<'a> {
    pub organization_id: &'a str,
    pub visibility: Visibility,
    pub owner_id: Option<&'a str>,
    pub team_id: Option<&'a str>,
    pub deleted: bool,
}

impl<'a> From<&'a Folder> for EntityRef<'a> {
    fn from(f: &'a Folder) -> Self {
        Self {
            organization_id: &f.organization_id,
            visibility: f.visibility,
            owner_id: f.owner_id.as_deref(),
            team_id: f.team_id.as_deref(),
            deleted: f.deleted,
        }
    }
}

impl<'a> From<&'a FileRecord> for EntityRef<'a> {
    fn from(f: &'a FileRecord) -> Self {
        Self {
            organization_id: &f.organization_id,
            visibility: f.visibility,
            owner_id: Some(&f.owner_id),
            team_id: f.team_id.as_deref(),
            deleted: f.deleted,
        }
    }
}

impl<'a> From<&'a ChunkRecord> for EntityRef<'a> {
    fn from(c: &'a ChunkRecord) -> Self {
        Self {
            organization_id: &c.organization_id,
            visibility: c.visibility,
            owner_id: Some(&c.owner_id),
            team_id: c.team_id.as_deref(),
            deleted: false,
        }
    }
}

/// Evaluate the visibility rules for one entity.
pub fn can_access(entity: EntityRef<'_>, principal: &Principal, mode: AccessMode) -> Decision {
    if entity.organization_id != principal.organization_id || entity.deleted {
        return Decision::Deny(Denial::NotFound);
    }

    let is_owner = entity.owner_id == Some(principal.user_id.as_str());

    match (entity.visibility, mode) {
        (Visibility::Organization, AccessMode::Read) => Decision::Allow,
        (Visibility::Organization, AccessMode::Write) => match entity.owner_id {
            None => Decision::Deny(Denial::Forbidden("organization root is read-only")),
            Some(_) if is_owner => Decision::Allow,
            Some(_) => Decision::Deny(Denial::Forbidden("only the owner can modify this")),
        },
        (Visibility::Team, AccessMode::Read) => {
            let member = entity
                .team_id
                .map(|team| principal.is_member_of(team))
                .unwrap_or(false);
            if is_owner || member {
                Decision::Allow
            } else {
                Decision::Deny(Denial::Forbidden("not a member of this team"))
            }
        }
        (Visibility::Team, AccessMode::Write) | (Visibility::Personal, AccessMode::Write) => {
            if is_owner {
                Decision::Allow
            } else {
                Decision::Deny(Denial::Forbidden("only the owner can modify this"))
            }
        }
        (Visibility::Personal, AccessMode::Read) => {
            if is_owner {
                Decision::Allow
            } else {
                Decision::Deny(Denial::Forbidden("personal to its owner"))
            }
        }
    }
}

/// Visibility rules for a file, widened by explicit grants.
///
/// A viewer grant admits reads, an editor grant admits reads and writes.
/// Grants never resurrect deleted or foreign-organization files.
pub fn can_access_file(
    file: &FileRecord,
    principal: &Principal,
    mode: AccessMode,
    grants: &[FilePermission],
) -> Decision {
    let decision = can_access(file.into(), principal, mode);
    if !matches!(decision, Decision::Deny(Denial::Forbidden(_))) {
        return decision;
    }

    let granted = grants.iter().any(|g| {
        g.file_id == file.id
            && g.user_id == principal.user_id
            && match mode {
                AccessMode::Read => true,
                AccessMode::Write => g.access == AccessLevel::Editor,
            }
    });

    if granted {
        Decision::Allow
    } else {
        decision
    }
}

/// The single place the one-active-team invariant is enforced.
///
/// Joining the team the user already belongs to is a no-op; joining a
/// second team is rejected.
pub fn ensure_can_join_team(current_team_ids: &[String], team_id: &str) -> Result<()> {
    match current_team_ids.iter().find(|t| t.as_str() != team_id) {
        Some(existing) => Err(Error::validation(format!(
            "user already belongs to team {}; leave it before joining {}",
            existing, team_id
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(visibility: Visibility, owner: &str, team: Option<&str>) -> FileRecord {
        FileRecord {
            id: "f1".into(),
            organization_id: "org1".into(),
            folder_id: "d1".into(),
            owner_id: owner.into(),
            team_id: team.map(str::to_string),
            visibility,
            name: "notes.txt".into(),
            storage_key: "k".into(),
            size: 1,
            mime_type: "text/plain".into(),
            status: crate::models::FileStatus::Ready,
            deleted: false,
            active_generation: 1,
            attempts: 0,
            last_error: None,
        }
    }

    fn alice() -> Principal {
        Principal::new("alice", "org1")
    }

    fn bob_in(team: &str) -> Principal {
        Principal::new("bob", "org1").with_teams(vec![team.to_string()])
    }

    #[test]
    fn personal_is_owner_only() {
        let f = file(Visibility::Personal, "alice", None);
        assert!(can_access((&f).into(), &alice(), AccessMode::Read).is_allowed());
        assert!(can_access((&f).into(), &alice(), AccessMode::Write).is_allowed());
        for mode in [AccessMode::Read, AccessMode::Write] {
            assert!(matches!(
                can_access((&f).into(), &bob_in("t1"), mode),
                Decision::Deny(Denial::Forbidden(_))
            ));
        }
    }

    #[test]
    fn team_read_requires_matching_membership() {
        let f = file(Visibility::Team, "alice", Some("t1"));
        assert!(can_access((&f).into(), &bob_in("t1"), AccessMode::Read).is_allowed());
        assert!(matches!(
            can_access((&f).into(), &bob_in("t2"), AccessMode::Read),
            Decision::Deny(Denial::Forbidden(_))
        ));
    }

    #[test]
    fn team_write_requires_ownership() {
        let f = file(Visibility::Team, "alice", Some("t1"));
        assert!(matches!(
            can_access((&f).into(), &bob_in("t1"), AccessMode::Write),
            Decision::Deny(Denial::Forbidden(_))
        ));
        assert!(can_access((&f).into(), &alice(), AccessMode::Write).is_allowed());
    }

    #[test]
    fn organization_readable_by_all_members() {
        let f = file(Visibility::Organization, "alice", None);
        assert!(can_access((&f).into(), &bob_in("t9"), AccessMode::Read).is_allowed());
        assert!(!can_access((&f).into(), &bob_in("t9"), AccessMode::Write).is_allowed());
    }

    #[test]
    fn organization_root_is_read_only() {
        let root = Folder {
            id: "root".into(),
            organization_id: "org1".into(),
            name: "Organization".into(),
            visibility: Visibility::Organization,
            owner_id: None,
            team_id: None,
            deleted: false,
        };
        assert!(can_access((&root).into(), &alice(), AccessMode::Read).is_allowed());
        assert_eq!(
            can_access((&root).into(), &alice(), AccessMode::Write),
            Decision::Deny(Denial::Forbidden("organization root is read-only"))
        );
    }

    #[test]
    fn deleted_and_foreign_entities_are_not_found() {
        let mut f = file(Visibility::Organization, "alice", None);
        f.deleted = true;
        assert_eq!(
            can_access((&f).into(), &alice(), AccessMode::Read),
            Decision::Deny(Denial::NotFound)
        );

        let f = file(Visibility::Organization, "alice", None);
        let outsider = Principal::new("alice", "org2");
        assert_eq!(
            can_access((&f).into(), &outsider, AccessMode::Read),
            Decision::Deny(Denial::NotFound)
        );
    }

    #[test]
    fn grants_widen_file_access() {
        let f = file(Visibility::Personal, "alice", None);
        let viewer = vec![FilePermission {
            file_id: "f1".into(),
            user_id: "bob".into(),
            access: AccessLevel::Viewer,
        }];
        let bob = bob_in("t1");
        assert!(can_access_file(&f, &bob, AccessMode::Read, &viewer).is_allowed());
        assert!(!can_access_file(&f, &bob, AccessMode::Write, &viewer).is_allowed());

        let editor = vec![FilePermission {
            access: AccessLevel::Editor,
            ..viewer[0].clone()
        }];
        assert!(can_access_file(&f, &bob, AccessMode::Write, &editor).is_allowed());
    }

    #[test]
    fn decision_maps_onto_error_taxonomy() {
        let err = Decision::Deny(Denial::NotFound).into_result("file f1").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = Decision::Deny(Denial::Forbidden("nope"))
            .into_result("file f1")
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn second_team_join_is_rejected() {
        assert!(ensure_can_join_team(&[], "t1").is_ok());
        assert!(ensure_can_join_team(&["t1".to_string()], "t1").is_ok());
        assert!(matches!(
            ensure_can_join_team(&["t1".to_string()], "t2"),
            Err(Error::Validation(_))
        ));
    }
}
