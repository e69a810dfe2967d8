//! Namespace tokens partitioning the vector index by visibility scope.
//!
//! Every chunk vector is written into exactly one partition:
//!
//! | Chunk visibility | Namespace | Identifier |
//! |------------------|-----------|------------|
//! | `organization` | `org` | organization id |
//! | `team` | `team` | team id |
//! | `personal` | `user` | owner id |
//!
//! The token handed to the index is the URL-safe, unpadded base64 encoding
//! of `scope:identifier`. It is opaque to the index but reversible, so an
//! index without native namespaces can decode it back into a metadata
//! filter (see [`Namespace::filter`]).

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Visibility;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Org(String),
    Team(String),
    User(String),
}

/// Encoded form of a [`Namespace`], as passed to the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceToken(String);

impl NamespaceToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a raw token received from the index. Validity is checked by
    /// [`Namespace::decode`].
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for NamespaceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conjunction of `field == value` constraints over vector metadata keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, String>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True when every constrained key of `metadata` (a JSON object) holds
    /// the required string value.
    pub fn matches(&self, metadata: &serde_json::Value) -> bool {
        self.0.iter().all(|(field, expected)| {
            metadata
                .get(field)
                .and_then(|v| v.as_str())
                .map(|actual| actual == expected)
                .unwrap_or(false)
        })
    }
}

impl Namespace {
    /// Partition a chunk with the given governance fields belongs to.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when a team-visible entity has no team id.
    pub fn for_entity(
        visibility: Visibility,
        organization_id: &str,
        owner_id: &str,
        team_id: Option<&str>,
    ) -> Result<Self> {
        match visibility {
            Visibility::Organization => Ok(Namespace::Org(organization_id.to_string())),
            Visibility::Personal => Ok(Namespace::User(owner_id.to_string())),
            Visibility::Team => team_id
                .map(|t| Namespace::Team(t.to_string()))
                .ok_or_else(|| Error::validation("team visibility requires a team id")),
        }
    }

    pub fn scope(&self) -> &'static str {
        match self {
            Namespace::Org(_) => "org",
            Namespace::Team(_) => "team",
            Namespace::User(_) => "user",
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Namespace::Org(id) | Namespace::Team(id) | Namespace::User(id) => id,
        }
    }

    pub fn encode(&self) -> NamespaceToken {
        let raw = format!("{}:{}", self.scope(), self.identifier());
        NamespaceToken(URL_SAFE_NO_PAD.encode(raw.as_bytes()))
    }

    pub fn decode(token: &NamespaceToken) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_str())
            .map_err(|e| Error::validation(format!("malformed namespace token: {}", e)))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| Error::validation("namespace token is not UTF-8"))?;
        let (scope, identifier) = raw
            .split_once(':')
            .ok_or_else(|| Error::validation("namespace token is missing its scope"))?;
        if identifier.is_empty() {
            return Err(Error::validation("namespace token has an empty identifier"));
        }
        match scope {
            "org" => Ok(Namespace::Org(identifier.to_string())),
            "team" => Ok(Namespace::Team(identifier.to_string())),
            "user" => Ok(Namespace::User(identifier.to_string())),
            other => Err(Error::validation(format!("unknown namespace scope: {}", other))),
        }
    }

    /// Metadata constraints equivalent to this partition on a global index.
    ///
    /// The visibility tier is always part of the filter: an organization id
    /// alone would also match every personal and team chunk of that
    /// organization.
    pub fn filter(&self) -> MetadataFilter {
        match self {
            Namespace::Org(id) => MetadataFilter::new()
                .with("organizationId", id.as_str())
                .with("visibility", Visibility::Organization.as_str()),
            Namespace::Team(id) => MetadataFilter::new()
                .with("teamId", id.as_str())
                .with("visibility", Visibility::Team.as_str()),
            Namespace::User(id) => MetadataFilter::new()
                .with("ownerId", id.as_str())
                .with("visibility", Visibility::Personal.as_str()),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope(), self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        for ns in [
            Namespace::Org("9b2f6c1e-0d4a-4c1b-8a55-2f0c3e7d9a10".into()),
            Namespace::Team("team/with:odd chars?".into()),
            Namespace::User("ünïcødé-user".into()),
        ] {
            assert_eq!(Namespace::decode(&ns.encode()).unwrap(), ns);
        }
    }

    #[test]
    fn tokens_are_url_safe_and_unpadded() {
        let token = Namespace::User("a?b/c+d".into()).encode();
        assert!(!token.as_str().contains('='));
        assert!(!token.as_str().contains('+'));
        assert!(!token.as_str().contains('/'));
    }

    #[test]
    fn tokens_differ_across_scopes() {
        let org = Namespace::Org("x".into()).encode();
        let team = Namespace::Team("x".into()).encode();
        assert_ne!(org, team);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Namespace::decode(&NamespaceToken::from_raw("!!!")).is_err());
        let no_scope = NamespaceToken::from_raw(URL_SAFE_NO_PAD.encode("plain"));
        assert!(Namespace::decode(&no_scope).is_err());
        let bad_scope = NamespaceToken::from_raw(URL_SAFE_NO_PAD.encode("galaxy:1"));
        assert!(Namespace::decode(&bad_scope).is_err());
    }

    #[test]
    fn entity_partitioning() {
        assert_eq!(
            Namespace::for_entity(Visibility::Organization, "o", "u", None).unwrap(),
            Namespace::Org("o".into())
        );
        assert_eq!(
            Namespace::for_entity(Visibility::Team, "o", "u", Some("t")).unwrap(),
            Namespace::Team("t".into())
        );
        assert_eq!(
            Namespace::for_entity(Visibility::Personal, "o", "u", Some("t")).unwrap(),
            Namespace::User("u".into())
        );
        assert!(Namespace::for_entity(Visibility::Team, "o", "u", None).is_err());
    }

    #[test]
    fn org_filter_excludes_personal_chunks() {
        let filter = Namespace::Org("o".into()).filter();
        let org_chunk = serde_json::json!({"organizationId": "o", "visibility": "organization"});
        let personal_chunk = serde_json::json!({"organizationId": "o", "visibility": "personal"});
        assert!(filter.matches(&org_chunk));
        assert!(!filter.matches(&personal_chunk));
    }
}
