use std::fmt;

use semver::Version;
use serde::Serialize;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    Unsynced,
    LocalOnly,
    RemoteOnly,
    Synced,
    /// Synced version, but the local body changed since.
    Modified,
    Conflicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Push,
    Pull,
}

impl SyncState {
    /// State of an entity given the versions held on each side.
    ///
    /// An unpushed local copy (`0.0.0`) of a name that exists remotely is
    /// conflicted: pushing it would be rejected.
    pub fn derive(local: Option<&Version>, remote: Option<&Version>) -> Self {
        match (local, remote) {
            (None, None) => SyncState::Unsynced,
            (Some(_), None) => SyncState::LocalOnly,
            (None, Some(_)) => SyncState::RemoteOnly,
            (Some(local), Some(remote)) if local == remote => SyncState::Synced,
            (Some(_), Some(_)) => SyncState::Conflicted,
        }
    }

    /// Downgrades `Synced` when the local copy was edited after the last
    /// push or pull.
    pub fn with_local_edits(self, edited: bool) -> Self {
        match self {
            SyncState::Synced if edited => SyncState::Modified,
            other => other,
        }
    }

    /// Transition after `op` finished with `outcome`.
    pub fn after<T>(self, op: Operation, outcome: &SyncResult<T>) -> Self {
        match (op, outcome) {
            (Operation::Create, Ok(_)) => SyncState::LocalOnly,
            (Operation::Push | Operation::Pull, Ok(_)) => SyncState::Synced,
            (_, Err(SyncError::Conflict(_))) => SyncState::Conflicted,
            (_, Err(_)) => self,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SyncState::Unsynced => "unsynced",
            SyncState::LocalOnly => "local-only",
            SyncState::RemoteOnly => "remote-only",
            SyncState::Synced => "synced",
            SyncState::Modified => "modified",
            SyncState::Conflicted => "conflicted",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
