//! Error taxonomy shared by every component of the engine.
//!
//! Request-path callers map these onto HTTP failures; the background
//! ingestion worker uses [`Error::is_retryable`] to decide whether another
//! attempt can succeed.

use std::fmt;

use thiserror::Error;

/// External collaborator that produced an [`Error::Upstream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    RelationalStore,
    ObjectStorage,
    Conversion,
    Embedding,
    VectorIndex,
    CompletionModel,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::RelationalStore => "relational store",
            Service::ObjectStorage => "object storage",
            Service::Conversion => "document conversion",
            Service::Embedding => "embedding model",
            Service::VectorIndex => "vector index",
            Service::CompletionModel => "completion model",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    Validation(String),

    /// `retryable` is false when the collaborator rejected the request
    /// itself (bad credentials, malformed call); repeating it cannot help.
    #[error("{service} failure: {message}")]
    Upstream {
        service: Service,
        message: String,
        retryable: bool,
    },

    #[error("consistency violation: {0}")]
    Consistency(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        Error::Forbidden(why.into())
    }

    pub fn validation(why: impl Into<String>) -> Self {
        Error::Validation(why.into())
    }

    pub fn upstream(service: Service, err: impl fmt::Display) -> Self {
        Error::Upstream {
            service,
            message: err.to_string(),
            retryable: true,
        }
    }

    /// A collaborator refused the request outright.
    pub fn rejected(service: Service, err: impl fmt::Display) -> Self {
        Error::Upstream {
            service,
            message: err.to_string(),
            retryable: false,
        }
    }

    /// Only transient collaborator failures can go away on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Upstream {
                retryable: true,
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
