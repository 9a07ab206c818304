//! Per-command decision table.
//!
//! `plan` only looks at what is known about the local and remote copies of
//! the entity a command targets, so every branch is testable without a store
//! or a network.

use crate::error::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    AuthLogin,
    AuthLogout,
    AuthStatus,
    EnvInit,
    EnvInspect,
    EnvAddComponent,
    EnvRemoveComponent,
    EnvSetVar,
    EnvList,
    EnvRun,
    EnvPull,
    EnvPush,
    EnvDelete,
    /// Targets the destination; the source is read like `EnvInspect`.
    EnvCopy,
    EnvEdit,
    ComponentInit,
    ComponentList,
    ComponentPkg,
    ComponentPull,
    ComponentPush,
    ComponentDelete,
}

/// What is known about one side before the command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
    /// Not checked; remote lookups are deferred until an action needs them.
    Unknown,
}

impl Presence {
    pub fn from_exists(exists: bool) -> Self {
        if exists {
            Presence::Present
        } else {
            Presence::Absent
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// `--remote`: the registry is the only target.
    pub remote: bool,
    /// `--no-pull`: never fall back to the registry.
    pub no_pull: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReadLocal,
    WriteLocal,
    DeleteLocal,
    ListLocal,
    FetchRemote,
    PushRemote,
    DeleteRemote,
    ListRemote,
    ValidateRemote,
    ReportLoggedOut,
    FailAlreadyExists,
    FailNotFound(Source),
}

pub fn plan(command: Command, local: Presence, remote: Presence, flags: Flags) -> Vec<Action> {
    use Action::*;
    use Presence::*;

    match command {
        Command::AuthLogin => vec![WriteLocal],
        Command::AuthLogout => match local {
            Absent => vec![],
            _ => vec![DeleteLocal],
        },
        Command::AuthStatus => match local {
            Absent => vec![ReportLoggedOut],
            _ => vec![ReadLocal, ValidateRemote],
        },
        Command::EnvInit | Command::EnvCopy | Command::ComponentInit => match local {
            Present => vec![FailAlreadyExists],
            _ => vec![WriteLocal],
        },
        Command::EnvInspect => match local {
            Absent => vec![FailNotFound(Source::Local)],
            _ => vec![ReadLocal],
        },
        Command::EnvAddComponent | Command::EnvRun => match (local, remote) {
            (Present, _) => vec![ReadLocal],
            _ if flags.no_pull => vec![FailNotFound(Source::Local)],
            (_, Absent) => vec![FailNotFound(Source::Anywhere)],
            _ => vec![FetchRemote, WriteLocal],
        },
        Command::EnvRemoveComponent | Command::EnvSetVar | Command::EnvEdit => match local {
            Absent => vec![FailNotFound(Source::Local)],
            _ => vec![ReadLocal, WriteLocal],
        },
        Command::EnvList => vec![ListLocal, ListRemote],
        Command::ComponentList => vec![ListLocal],
        Command::EnvPull | Command::ComponentPull => match remote {
            Absent => vec![FailNotFound(Source::Remote)],
            _ => vec![FetchRemote, WriteLocal],
        },
        Command::EnvPush => match local {
            Absent => vec![FailNotFound(Source::Local)],
            _ => vec![ReadLocal, PushRemote, WriteLocal],
        },
        Command::ComponentPush => match local {
            Absent => vec![FailNotFound(Source::Local)],
            _ => vec![ReadLocal, PushRemote],
        },
        Command::EnvDelete if flags.remote => match remote {
            Absent => vec![FailNotFound(Source::Remote)],
            _ => vec![DeleteRemote],
        },
        Command::EnvDelete | Command::ComponentDelete => match local {
            Absent => vec![FailNotFound(Source::Local)],
            _ => vec![DeleteLocal],
        },
        Command::ComponentPkg => vec![WriteLocal],
    }
}
