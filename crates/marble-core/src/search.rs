//! Scope resolution and result merging for multi-namespace retrieval.
//!
//! A question is answered from one or more vector partitions. This module
//! decides which partitions a principal may query for a requested
//! [`Scope`] and merges the per-partition match lists into one ranking.
//!
//! # Merge Algorithm
//!
//! 1. Concatenate the matches of every queried namespace.
//! 2. Keep the best score per chunk id.
//! 3. Sort by score (desc), then chunk id (asc) for a stable order.
//! 4. Truncate to `top_k`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::FileRecord;
use crate::namespace::{Namespace, NamespaceToken};
use crate::vector::VectorMatch;
use crate::visibility::Principal;

/// Which slice of the principal's accessible knowledge to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Personal,
    Team,
    Org,
    #[default]
    All,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Personal => "personal",
            Scope::Team => "team",
            Scope::Org => "org",
            Scope::All => "all",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "personal" => Ok(Scope::Personal),
            "team" => Ok(Scope::Team),
            "org" | "organization" => Ok(Scope::Org),
            "all" => Ok(Scope::All),
            other => Err(Error::validation(format!("unknown scope: {}", other))),
        }
    }
}

/// One partition to query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceQuery {
    pub namespace: Namespace,
    pub token: NamespaceToken,
    /// When set, only matches from these files are admitted. Used for
    /// partitions reached through per-file grants rather than membership.
    pub only_files: Option<BTreeSet<String>>,
}

impl NamespaceQuery {
    pub fn admits(&self, m: &VectorMatch) -> bool {
        self.only_files
            .as_ref()
            .map(|files| files.contains(&m.metadata.file_id))
            .unwrap_or(true)
    }
}

/// Partitions the principal may query for `scope`.
///
/// `granted_files` are files the principal reaches through explicit
/// grants; the caller is expected to have checked them with
/// [`can_access_file`](crate::visibility::can_access_file). They widen the
/// personal scope (and therefore `all`) with file-restricted queries
/// against the partitions those files live in.
///
/// Team scope for a principal without teams resolves to no partitions.
pub fn resolve_namespaces(
    principal: &Principal,
    scope: Scope,
    granted_files: &[FileRecord],
) -> Result<Vec<NamespaceQuery>> {
    let mut open: Vec<Namespace> = Vec::new();
    let mut restricted: HashMap<Namespace, BTreeSet<String>> = HashMap::new();

    if matches!(scope, Scope::Personal | Scope::All) {
        open.push(Namespace::User(principal.user_id.clone()));
        for file in granted_files {
            let ns = Namespace::for_entity(
                file.visibility,
                &file.organization_id,
                &file.owner_id,
                file.team_id.as_deref(),
            )?;
            restricted.entry(ns).or_default().insert(file.id.clone());
        }
    }
    if matches!(scope, Scope::Team | Scope::All) {
        for team in &principal.active_team_ids {
            open.push(Namespace::Team(team.clone()));
        }
    }
    if matches!(scope, Scope::Org | Scope::All) {
        open.push(Namespace::Org(principal.organization_id.clone()));
    }

    let mut out: Vec<NamespaceQuery> = Vec::new();
    for ns in open {
        if out.iter().any(|q| q.namespace == ns) {
            continue;
        }
        restricted.remove(&ns);
        out.push(NamespaceQuery {
            token: ns.encode(),
            namespace: ns,
            only_files: None,
        });
    }

    let mut rest: Vec<(Namespace, BTreeSet<String>)> = restricted.into_iter().collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    for (ns, files) in rest {
        out.push(NamespaceQuery {
            token: ns.encode(),
            namespace: ns,
            only_files: Some(files),
        });
    }

    Ok(out)
}

/// Merge per-namespace match lists into one ranking of at most `top_k`.
pub fn merge_matches(lists: Vec<Vec<VectorMatch>>, top_k: usize) -> Vec<VectorMatch> {
    let mut best: HashMap<String, VectorMatch> = HashMap::new();
    for m in lists.into_iter().flatten() {
        match best.get(&m.id) {
            Some(existing) if existing.score >= m.score => {}
            _ => {
                best.insert(m.id.clone(), m);
            }
        }
    }

    let mut merged: Vec<VectorMatch> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    merged.truncate(top_k);
    merged
}
