//! Local-first synchronization between the [`LocalStore`] and a [`Registry`].
//!
//! Each operation asks [`plan`] which steps to take given what is known
//! about the local copy, then performs them in order. Registry responses are
//! fully received and validated before anything is written locally.

pub mod plan;
pub mod state;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use semver::Version;
use tracing::{debug, info, warn};

use crate::error::{Source, SyncError, SyncResult};
use crate::host::{ComponentHost, ResolvedEnvironment, RunReport};
use crate::local_store::LocalStore;
use crate::model::{ComponentMetadata, ComponentRecord, Credential, Environment, VarChange};
use crate::reference::{LOCAL_NAMESPACE, ResourceId, ResourceKind, ResourceRef, validate_namespace};
use crate::registry::{PushOutcome, Registry};

pub use plan::{Action, Command, Flags, Presence, plan};
pub use state::{Operation, SyncState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    LoggedOut,
    LoggedIn {
        slug: String,
        namespace: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EnvListEntry {
    pub id: ResourceId,
    pub local_version: Option<Version>,
    pub remote_version: Option<Version>,
    pub state: SyncState,
}

/// Union of local and remote environments. A failed remote listing is kept
/// alongside the local entries instead of failing the whole listing.
#[derive(Debug)]
pub struct EnvListing {
    pub entries: Vec<EnvListEntry>,
    pub remote_error: Option<SyncError>,
}

#[derive(Debug, Clone)]
pub struct AddComponentReport {
    pub environment: Environment,
    pub component: String,
    pub fetched: bool,
}

#[derive(Debug, Clone)]
pub struct PullReport {
    pub environment: Environment,
    /// Components downloaded by this pull.
    pub fetched: Vec<String>,
    /// Components that were already stored locally.
    pub cached: Vec<String>,
    pub state: SyncState,
}

#[derive(Debug, Clone)]
pub struct PushReport {
    pub environment: Environment,
    pub outcome: PushOutcome,
    pub state: SyncState,
}

pub struct SyncOrchestrator<R> {
    store: LocalStore,
    registry: R,
    namespace: String,
}

impl<R: Registry> SyncOrchestrator<R> {
    /// `namespace` qualifies references typed without one. It is also the
    /// WIT namespace of scaffolded components, so it must be kebab-case.
    pub fn new(store: LocalStore, registry: R, namespace: impl Into<String>) -> SyncResult<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self {
            store,
            registry,
            namespace,
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn resolve(&self, reference: &ResourceRef) -> SyncResult<ResourceId> {
        reference.resolve(&self.namespace)
    }

    // auth

    pub fn auth_login(&self, api_key: &str, namespace: Option<&str>) -> SyncResult<Credential> {
        if let Some(namespace) = namespace {
            validate_namespace(namespace)?;
        }
        let credential = Credential::new(api_key, namespace.map(str::to_string))?;
        let command = Command::AuthLogin;
        for action in plan(command, Presence::Unknown, Presence::Unknown, Flags::default()) {
            match action {
                Action::WriteLocal => self.store.write_credential(&credential)?,
                other => return Err(refusal(command, other, ResourceKind::Credential, "api key")),
            }
        }
        info!("stored credential");
        Ok(credential)
    }

    /// Returns whether a credential was removed. Logging out twice is fine.
    pub fn auth_logout(&self) -> SyncResult<bool> {
        let command = Command::AuthLogout;
        let local = Presence::from_exists(self.store.has_credential());
        let mut removed = false;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::DeleteLocal => removed = self.store.delete_credential()?,
                other => return Err(refusal(command, other, ResourceKind::Credential, "api key")),
            }
        }
        Ok(removed)
    }

    pub fn auth_status(&self) -> SyncResult<AuthStatus> {
        let command = Command::AuthStatus;
        let local = Presence::from_exists(self.store.has_credential());
        let mut credential = None;
        let mut status = AuthStatus::LoggedOut;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::ReportLoggedOut => return Ok(AuthStatus::LoggedOut),
                Action::ReadLocal => credential = Some(self.store.read_credential()?),
                Action::ValidateRemote => {
                    let credential = planned(credential.take(), command, action)?;
                    let user = self.registry.validate_credential()?;
                    status = AuthStatus::LoggedIn {
                        slug: user.slug,
                        namespace: credential.namespace,
                    };
                }
                other => return Err(refusal(command, other, ResourceKind::Credential, "api key")),
            }
        }
        Ok(status)
    }

    // environments

    pub fn env_init(&self, reference: &ResourceRef) -> SyncResult<Environment> {
        let id = self.resolve(reference)?;
        let command = Command::EnvInit;
        let local = Presence::from_exists(self.store.has_environment(&id));
        let mut created = None;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::WriteLocal => {
                    let env = Environment::new(&id);
                    self.store.write_environment(&env)?;
                    created = Some(env);
                }
                other => return Err(refusal(command, other, ResourceKind::Environment, &id)),
            }
        }
        let env = planned(created, command, Action::WriteLocal)?;
        let state = SyncState::Unsynced.after(Operation::Create, &Ok::<_, SyncError>(&env));
        debug!(env = %id, %state, "initialized environment");
        Ok(env)
    }

    pub fn env_inspect(&self, reference: &ResourceRef) -> SyncResult<Environment> {
        let id = self.resolve(reference)?;
        let command = Command::EnvInspect;
        let local = Presence::from_exists(self.store.has_environment(&id));
        let mut env = None;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::ReadLocal => env = Some(self.store.read_environment(&id)?),
                other => return Err(refusal(command, other, ResourceKind::Environment, &id)),
            }
        }
        planned(env, command, Action::ReadLocal)
    }

    /// Pins `component` in the environment, pulling it first when it is not
    /// stored locally.
    pub fn env_add_component(
        &self,
        env_ref: &ResourceRef,
        component: &ResourceRef,
        flags: Flags,
    ) -> SyncResult<AddComponentReport> {
        let env_id = self.resolve(env_ref)?;
        let mut env = self.store.read_environment(&env_id)?;
        let component_id = self.resolve(component)?;
        let (record, fetched) = self.resolve_component(
            Command::EnvAddComponent,
            &component_id,
            component.version(),
            flags,
        )?;
        if fetched {
            self.store.write_component(&record, Some(&pulled_from(&record)))?;
        }
        if let Some(previous) = env.add_component(&record.id, &record.version) {
            debug!(component = %record.id, %previous, "replacing pinned version");
        }
        self.store.write_environment(&env)?;
        Ok(AddComponentReport {
            environment: env,
            component: record.reference(),
            fetched,
        })
    }

    pub fn env_remove_component(
        &self,
        env_ref: &ResourceRef,
        component: &ResourceRef,
    ) -> SyncResult<Environment> {
        let env_id = self.resolve(env_ref)?;
        let component_id = self.resolve(component)?;
        self.edit_environment(Command::EnvRemoveComponent, &env_id, |env| {
            if env.remove_component(&component_id) {
                Ok(())
            } else {
                Err(SyncError::InvalidInput(format!(
                    "environment {env_id} does not reference component {component_id}"
                )))
            }
        })
    }

    pub fn env_set_var(
        &self,
        env_ref: &ResourceRef,
        changes: &[VarChange],
    ) -> SyncResult<Environment> {
        if changes.is_empty() {
            return Err(SyncError::InvalidInput(
                "no variables given; use KEY=VALUE (or KEY= to unset)".into(),
            ));
        }
        let env_id = self.resolve(env_ref)?;
        self.edit_environment(Command::EnvSetVar, &env_id, |env| {
            for change in changes {
                if !change.apply(env) {
                    debug!(key = change.key(), "variable unchanged");
                }
            }
            Ok(())
        })
    }

    fn edit_environment(
        &self,
        command: Command,
        id: &ResourceId,
        edit: impl FnOnce(&mut Environment) -> SyncResult<()>,
    ) -> SyncResult<Environment> {
        let local = Presence::from_exists(self.store.has_environment(id));
        let mut env = None;
        let mut edit = Some(edit);
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::ReadLocal => env = Some(self.store.read_environment(id)?),
                Action::WriteLocal => {
                    let current = env.as_mut().ok_or_else(|| unplanned(command, action))?;
                    if let Some(edit) = edit.take() {
                        edit(current)?;
                    }
                    self.store.write_environment(current)?;
                }
                other => return Err(refusal(command, other, ResourceKind::Environment, id)),
            }
        }
        planned(env, command, Action::ReadLocal)
    }

    /// Copies the components and variables of `source` into a new, unpushed
    /// environment `dest`. A bare source name that is not found in the
    /// default namespace is looked up in the `local` namespace.
    pub fn env_copy(&self, source: &ResourceRef, dest: &ResourceRef) -> SyncResult<Environment> {
        let original = self.copy_source(source)?;
        let dest_id = self.resolve(dest)?;
        let command = Command::EnvCopy;
        let local = Presence::from_exists(self.store.has_environment(&dest_id));
        let mut copied = None;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::WriteLocal => {
                    let mut env = Environment::new(&dest_id);
                    env.components = original.components.clone();
                    env.vars = original.vars.clone();
                    self.store.write_environment(&env)?;
                    copied = Some(env);
                }
                other => return Err(refusal(command, other, ResourceKind::Environment, &dest_id)),
            }
        }
        let env = planned(copied, command, Action::WriteLocal)?;
        info!(from = %original.display_ref(), to = %dest_id, "copied environment");
        Ok(env)
    }

    fn copy_source(&self, source: &ResourceRef) -> SyncResult<Environment> {
        let id = self.resolve(source)?;
        if source.namespace().is_none() && !self.store.has_environment(&id) {
            let fallback = source.resolve(LOCAL_NAMESPACE)?;
            if self.store.has_environment(&fallback) {
                debug!(env = %fallback, "copying from the local namespace");
                return self.store.read_environment(&fallback);
            }
        }
        self.env_inspect(source)
    }

    /// Hands a scratch copy of the record to `editor`, then validates what
    /// it left behind before replacing the stored record. Identity and
    /// version cannot be edited; a rejected edit leaves the store unchanged.
    pub fn env_edit(
        &self,
        reference: &ResourceRef,
        editor: impl FnOnce(&Path) -> SyncResult<()>,
    ) -> SyncResult<Environment> {
        let id = self.resolve(reference)?;
        let command = Command::EnvEdit;
        let local = Presence::from_exists(self.store.has_environment(&id));
        let mut editor = Some(editor);
        let mut env = None;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::ReadLocal => env = Some(self.store.read_environment(&id)?),
                Action::WriteLocal => {
                    let current = env.as_mut().ok_or_else(|| unplanned(command, action))?;
                    let edit = editor.take().ok_or_else(|| unplanned(command, action))?;
                    let draft = self.store.environment_draft(current)?;
                    edit(draft.path())?;
                    let edited = self.store.read_environment_file(draft.path())?;
                    check_edit(current, &edited)?;
                    if edited == *current {
                        debug!(env = %id, "environment unchanged");
                    } else {
                        self.store.write_environment(&edited)?;
                        *current = edited;
                    }
                }
                other => return Err(refusal(command, other, ResourceKind::Environment, &id)),
            }
        }
        planned(env, command, Action::ReadLocal)
    }

    pub fn env_list(&self) -> SyncResult<EnvListing> {
        let command = Command::EnvList;
        let mut local = Vec::new();
        let mut remote = Vec::new();
        let mut remote_error = None;
        for action in plan(command, Presence::Unknown, Presence::Unknown, Flags::default()) {
            match action {
                Action::ListLocal => local = self.store.list_environments()?,
                Action::ListRemote => match self.registry.list_environments_remote() {
                    Ok(summaries) => remote = summaries,
                    Err(err) => {
                        warn!("remote environment listing failed: {err}");
                        remote_error = Some(err);
                    }
                },
                other => return Err(unplanned(command, other)),
            }
        }

        let mut merged: BTreeMap<ResourceId, (Option<Version>, Option<Version>, bool)> =
            BTreeMap::new();
        for env in local {
            let id = env.id()?;
            let entry = merged.entry(id).or_default();
            entry.2 = env.has_unsynced_changes();
            entry.0 = Some(env.version);
        }
        for summary in remote {
            merged.entry(summary.id).or_default().1 = Some(summary.latest_version);
        }
        let entries = merged
            .into_iter()
            .map(|(id, (local_version, remote_version, edited))| EnvListEntry {
                state: SyncState::derive(local_version.as_ref(), remote_version.as_ref())
                    .with_local_edits(edited),
                id,
                local_version,
                remote_version,
            })
            .collect();
        Ok(EnvListing {
            entries,
            remote_error,
        })
    }

    /// Resolves the environment and its components local-first, then hands
    /// them to `host`.
    pub fn env_run(
        &self,
        reference: &ResourceRef,
        flags: Flags,
        host: &dyn ComponentHost,
    ) -> SyncResult<RunReport> {
        let id = self.resolve(reference)?;
        let command = Command::EnvRun;
        let local = Presence::from_exists(self.store.has_environment(&id));
        let mut env = None;
        let mut cache_env = false;
        let mut fetched = Vec::new();
        for action in plan(command, local, Presence::Unknown, flags) {
            match action {
                Action::ReadLocal => env = Some(self.store.read_environment(&id)?),
                Action::FetchRemote => {
                    let mut remote = self
                        .registry
                        .fetch_environment(&id, reference.version())
                        .map_err(missing_everywhere)?;
                    remote.mark_synced();
                    fetched.push(remote.display_ref());
                    env = Some(remote);
                }
                // deferred until every component is resolved
                Action::WriteLocal => cache_env = true,
                other => return Err(refusal(command, other, ResourceKind::Environment, &id)),
            }
        }
        let environment = planned(env, command, Action::ReadLocal)?;

        let mut components = Vec::with_capacity(environment.components.len());
        let mut downloads = Vec::new();
        for (component_id, version) in environment.pinned_components()? {
            let (record, was_fetched) =
                self.resolve_component(command, &component_id, Some(&version), flags)?;
            if was_fetched {
                fetched.push(record.reference());
                downloads.push(record.clone());
            }
            components.push(record);
        }
        for record in &downloads {
            self.store.write_component(record, Some(&pulled_from(record)))?;
        }
        if cache_env {
            self.store.write_environment(&environment)?;
            info!(env = %id, "cached environment from registry");
        }

        let resolved = ResolvedEnvironment {
            environment,
            components,
            fetched,
        };
        host.run(&resolved)
    }

    /// Fetches the environment and, unless `manifest_only`, every component
    /// it references. Components are stored before the environment record.
    pub fn env_pull(&self, reference: &ResourceRef, manifest_only: bool) -> SyncResult<PullReport> {
        let id = self.resolve(reference)?;
        let command = Command::EnvPull;
        let had_local = self.store.has_environment(&id);
        let prior = if had_local {
            SyncState::LocalOnly
        } else {
            SyncState::Unsynced
        };
        let mut env = None;
        let mut downloads = Vec::new();
        let mut cached = Vec::new();
        let local = Presence::from_exists(had_local);
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::FetchRemote => {
                    let remote = self.registry.fetch_environment(&id, reference.version());
                    if let Err(err) = &remote {
                        let state = prior.after(Operation::Pull, &remote);
                        debug!(env = %id, %state, "pull failed: {err}");
                    }
                    let mut remote = remote?;
                    remote.mark_synced();
                    if !manifest_only {
                        for (component_id, version) in remote.pinned_components()? {
                            if self.store.has_component(&component_id, Some(&version)) {
                                cached.push(format!("{component_id}@{version}"));
                                continue;
                            }
                            let record =
                                self.registry.fetch_component(&component_id, Some(&version))?;
                            downloads.push(record);
                        }
                    }
                    env = Some(remote);
                }
                Action::WriteLocal => {
                    let remote = env.as_ref().ok_or_else(|| unplanned(command, action))?;
                    for record in &downloads {
                        self.store.write_component(record, Some(&pulled_from(record)))?;
                    }
                    self.store.write_environment(remote)?;
                }
                other => return Err(refusal(command, other, ResourceKind::Environment, &id)),
            }
        }
        let environment = planned(env, command, Action::FetchRemote)?;
        let state = prior.after(Operation::Pull, &Ok::<_, SyncError>(()));
        info!(env = %environment.display_ref(), components = downloads.len(), "pulled environment");
        Ok(PullReport {
            environment,
            fetched: downloads.iter().map(ComponentRecord::reference).collect(),
            cached,
            state,
        })
    }

    /// Pushes the local copy. On success the local record takes the version
    /// the registry assigned; on conflict nothing local changes.
    pub fn env_push(&self, reference: &ResourceRef) -> SyncResult<PushReport> {
        let id = self.resolve(reference)?;
        let command = Command::EnvPush;
        let local = Presence::from_exists(self.store.has_environment(&id));
        let mut env: Option<Environment> = None;
        let mut outcome = None;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::ReadLocal => env = Some(self.store.read_environment(&id)?),
                Action::PushRemote => {
                    let current = env.as_ref().ok_or_else(|| unplanned(command, action))?;
                    let result = self.registry.push_environment(current);
                    if let Err(err) = &result {
                        let prior = if current.is_pushed() {
                            SyncState::Synced.with_local_edits(current.has_unsynced_changes())
                        } else {
                            SyncState::LocalOnly
                        };
                        let state = prior.after(Operation::Push, &result);
                        warn!(env = %id, %state, "push rejected: {err}");
                    }
                    outcome = Some(result?);
                }
                Action::WriteLocal => {
                    let current = env.as_mut().ok_or_else(|| unplanned(command, action))?;
                    let pushed = outcome.as_ref().ok_or_else(|| unplanned(command, action))?;
                    current.version = pushed.version.clone();
                    current.mark_synced();
                    self.store.write_environment(current)?;
                }
                other => return Err(refusal(command, other, ResourceKind::Environment, &id)),
            }
        }
        let environment = planned(env, command, Action::ReadLocal)?;
        let outcome = planned(outcome, command, Action::PushRemote)?;
        Ok(PushReport {
            environment,
            outcome,
            state: SyncState::Synced,
        })
    }

    /// Deletes the local copy, or the registry copy when `flags.remote` is set.
    pub fn env_delete(&self, reference: &ResourceRef, flags: Flags) -> SyncResult<Source> {
        let id = self.resolve(reference)?;
        let command = Command::EnvDelete;
        let local = Presence::from_exists(self.store.has_environment(&id));
        let mut target = Source::Local;
        for action in plan(command, local, Presence::Unknown, flags) {
            match action {
                Action::DeleteLocal => self.store.delete_environment(&id)?,
                Action::DeleteRemote => {
                    self.registry.delete_environment_remote(&id)?;
                    target = Source::Remote;
                }
                other => return Err(refusal(command, other, ResourceKind::Environment, &id)),
            }
        }
        Ok(target)
    }

    // components

    /// Stores a freshly scaffolded component. `package` runs only when no
    /// version of `id` exists locally.
    pub fn component_init(
        &self,
        id: &ResourceId,
        package: impl FnOnce() -> SyncResult<ComponentRecord>,
    ) -> SyncResult<ComponentMetadata> {
        let command = Command::ComponentInit;
        let local = Presence::from_exists(self.store.has_component(id, None));
        let mut package = Some(package);
        let mut stored = None;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::WriteLocal => {
                    let build = package.take().ok_or_else(|| unplanned(command, action))?;
                    let record = build()?;
                    stored = Some(self.store.write_component(&record, None)?);
                }
                other => return Err(refusal(command, other, ResourceKind::Component, id)),
            }
        }
        planned(stored, command, Action::WriteLocal)
    }

    /// Stores a packaged component, replacing the same version if present.
    pub fn component_pkg(&self, record: &ComponentRecord) -> SyncResult<ComponentMetadata> {
        let command = Command::ComponentPkg;
        let mut stored = None;
        for action in plan(command, Presence::Unknown, Presence::Unknown, Flags::default()) {
            match action {
                Action::WriteLocal => stored = Some(self.store.write_component(record, None)?),
                other => {
                    return Err(refusal(command, other, ResourceKind::Component, record.reference()));
                }
            }
        }
        planned(stored, command, Action::WriteLocal)
    }

    pub fn component_list(&self) -> SyncResult<Vec<ComponentMetadata>> {
        let command = Command::ComponentList;
        let mut components = Vec::new();
        for action in plan(command, Presence::Unknown, Presence::Unknown, Flags::default()) {
            match action {
                Action::ListLocal => components = self.store.list_components()?,
                other => return Err(unplanned(command, other)),
            }
        }
        Ok(components)
    }

    pub fn component_pull(&self, reference: &ResourceRef) -> SyncResult<ComponentRecord> {
        let id = self.resolve(reference)?;
        let command = Command::ComponentPull;
        let local = Presence::from_exists(self.store.has_component(&id, reference.version()));
        let mut record = None;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::FetchRemote => {
                    record = Some(self.registry.fetch_component(&id, reference.version())?)
                }
                Action::WriteLocal => {
                    let fetched = record.as_ref().ok_or_else(|| unplanned(command, action))?;
                    self.store.write_component(fetched, Some(&pulled_from(fetched)))?;
                }
                other => return Err(refusal(command, other, ResourceKind::Component, reference)),
            }
        }
        planned(record, command, Action::FetchRemote)
    }

    pub fn component_push(&self, reference: &ResourceRef) -> SyncResult<ComponentRecord> {
        let id = self.resolve(reference)?;
        let command = Command::ComponentPush;
        let local = Presence::from_exists(self.store.has_component(&id, reference.version()));
        let mut record = None;
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::ReadLocal => {
                    record = Some(self.store.read_component(&id, reference.version())?)
                }
                Action::PushRemote => {
                    let local = record.as_ref().ok_or_else(|| unplanned(command, action))?;
                    self.registry.push_component(local)?;
                }
                other => {
                    let shown = display_ref(&id, reference.version());
                    return Err(refusal(command, other, ResourceKind::Component, shown));
                }
            }
        }
        planned(record, command, Action::ReadLocal)
    }

    /// Deletes one version, or all versions when the reference has none.
    pub fn component_delete(&self, reference: &ResourceRef) -> SyncResult<Vec<Version>> {
        let id = self.resolve(reference)?;
        let command = Command::ComponentDelete;
        let local = Presence::from_exists(self.store.has_component(&id, reference.version()));
        let mut deleted = Vec::new();
        for action in plan(command, local, Presence::Unknown, Flags::default()) {
            match action {
                Action::DeleteLocal => {
                    deleted = self.store.delete_component(&id, reference.version())?
                }
                other => {
                    let shown = display_ref(&id, reference.version());
                    return Err(refusal(command, other, ResourceKind::Component, shown));
                }
            }
        }
        Ok(deleted)
    }

    /// Local-first component lookup with registry fallback. Returns the record
    /// and whether it came from the registry; callers store fetched records
    /// once everything they need has been received.
    fn resolve_component(
        &self,
        command: Command,
        id: &ResourceId,
        version: Option<&Version>,
        flags: Flags,
    ) -> SyncResult<(ComponentRecord, bool)> {
        let local = Presence::from_exists(self.store.has_component(id, version));
        let mut record = None;
        let mut fetched = false;
        for action in plan(command, local, Presence::Unknown, flags) {
            match action {
                Action::ReadLocal => record = Some(self.store.read_component(id, version)?),
                Action::FetchRemote => {
                    let remote = self
                        .registry
                        .fetch_component(id, version)
                        .map_err(missing_everywhere)?;
                    record = Some(remote);
                }
                Action::WriteLocal => {
                    if record.is_none() {
                        return Err(unplanned(command, action));
                    }
                    fetched = true;
                }
                other => {
                    return Err(refusal(
                        command,
                        other,
                        ResourceKind::Component,
                        display_ref(id, version),
                    ));
                }
            }
        }
        let record = planned(record, command, Action::ReadLocal)?;
        Ok((record, fetched))
    }
}

fn check_edit(original: &Environment, edited: &Environment) -> SyncResult<()> {
    edited.validate()?;
    if (&edited.namespace, &edited.name) != (&original.namespace, &original.name) {
        return Err(SyncError::InvalidInput(format!(
            "edit renamed {}:{} to {}:{}; use `env cp` to create a new environment",
            original.namespace, original.name, edited.namespace, edited.name
        )));
    }
    if edited.version != original.version || edited.synced_digest != original.synced_digest {
        return Err(SyncError::InvalidInput(format!(
            "edit changed sync metadata of {}; version and synced_digest are managed by push and pull",
            original.display_ref()
        )));
    }
    Ok(())
}

fn pulled_from(record: &ComponentRecord) -> String {
    format!("{}@{}", record.id.repository(), record.version)
}

fn display_ref(id: &ResourceId, version: Option<&Version>) -> String {
    match version {
        Some(version) => format!("{id}@{version}"),
        None => id.to_string(),
    }
}

/// A registry miss during local-first fallback means the entity exists nowhere.
fn missing_everywhere(err: SyncError) -> SyncError {
    match err {
        SyncError::NotFound { kind, id, .. } => SyncError::NotFound {
            kind,
            id,
            source_hint: Source::Anywhere,
        },
        other => other,
    }
}

fn refusal(
    command: Command,
    action: Action,
    kind: ResourceKind,
    id: impl fmt::Display,
) -> SyncError {
    match action {
        Action::FailNotFound(source) => SyncError::not_found(kind, id, source),
        Action::FailAlreadyExists => SyncError::AlreadyExists {
            kind,
            id: id.to_string(),
        },
        other => unplanned(command, other),
    }
}

fn unplanned(command: Command, action: Action) -> SyncError {
    SyncError::Internal(format!("{command:?} cannot perform {action:?} at this point"))
}

fn planned<T>(value: Option<T>, command: Command, action: Action) -> SyncResult<T> {
    value.ok_or_else(|| SyncError::Internal(format!("{command:?} finished without {action:?}")))
}
