use std::fmt;
use std::path::{Path, PathBuf};

use crate::reference::ResourceKind;

/// Where a lookup was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Remote,
    Anywhere,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local => f.write_str("locally"),
            Source::Remote => f.write_str("in the registry"),
            Source::Anywhere => f.write_str("locally or in the registry"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{kind} `{id}` not found {source_hint}")]
    NotFound {
        kind: ResourceKind,
        id: String,
        source_hint: Source,
    },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{kind} `{id}` already exists locally")]
    AlreadyExists { kind: ResourceKind, id: String },
    #[error("{0}")]
    InvalidInput(String),
    #[error("invalid registry response: {0}")]
    InvalidResponse(String),
    #[error("filesystem error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn not_found(kind: ResourceKind, id: impl fmt::Display, source_hint: Source) -> Self {
        SyncError::NotFound {
            kind,
            id: id.to_string(),
            source_hint,
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            SyncError::NotFound { .. } => "not-found",
            SyncError::Unauthorized(_) => "unauthorized",
            SyncError::Network(_) => "network",
            SyncError::Conflict(_) => "conflict",
            SyncError::AlreadyExists { .. } => "already-exists",
            SyncError::InvalidInput(_) => "invalid-input",
            SyncError::InvalidResponse(_) => "invalid-response",
            SyncError::Io { .. } => "io",
            SyncError::Internal(_) => "internal",
        }
    }

    /// Transport failures can be retried by re-running the command.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_source() {
        let err = SyncError::not_found(ResourceKind::Environment, "team:prod", Source::Remote);
        assert_eq!(
            err.to_string(),
            "environment `team:prod` not found in the registry"
        );
        assert_eq!(err.code(), "not-found");
        assert!(err.is_not_found());
    }

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(SyncError::Network("timed out".into()).is_retryable());
        assert!(!SyncError::Conflict("stale".into()).is_retryable());
    }
}
