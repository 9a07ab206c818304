#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use asterai_cli::error::{Source, SyncError, SyncResult};
use asterai_cli::host::{ComponentHost, ResolvedEnvironment, RunReport};
use asterai_cli::local_store::LocalStore;
use asterai_cli::model::{ComponentRecord, Environment, UNPUSHED_VERSION};
use asterai_cli::reference::{ResourceId, ResourceKind};
use asterai_cli::registry::{PushOutcome, RemoteSummary, Registry, UserInfo};
use asterai_cli::sync::SyncOrchestrator;
use bytes::Bytes;
use semver::Version;
use tempfile::TempDir;

pub const NAMESPACE: &str = "team";

/// In-memory registry that counts calls and can be switched offline.
#[derive(Default)]
pub struct FakeRegistry {
    /// Every pushed version of each environment, oldest first.
    environments: RefCell<BTreeMap<ResourceId, Vec<Environment>>>,
    components: RefCell<BTreeMap<(ResourceId, Version), ComponentRecord>>,
    calls: Cell<usize>,
    offline: Cell<bool>,
}

impl FakeRegistry {
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    /// Stores `env` as a new remote version without the base-version check,
    /// like an edit made from another machine.
    pub fn edit_out_of_band(&self, mut env: Environment) -> Version {
        let id = env.id().unwrap();
        let mut environments = self.environments.borrow_mut();
        let history = environments.entry(id).or_default();
        let version = next_version(history.last().map(|env| &env.version));
        env.version = version.clone();
        history.push(env);
        version
    }

    pub fn seed_component(&self, record: ComponentRecord) {
        self.components
            .borrow_mut()
            .insert((record.id.clone(), record.version.clone()), record);
    }

    fn enter(&self) -> SyncResult<()> {
        self.calls.set(self.calls.get() + 1);
        if self.offline.get() {
            return Err(SyncError::Network("registry unreachable".into()));
        }
        Ok(())
    }
}

fn next_version(latest: Option<&Version>) -> Version {
    match latest {
        Some(latest) => Version::new(latest.major, latest.minor, latest.patch + 1),
        None => Version::new(0, 1, 0),
    }
}

impl Registry for FakeRegistry {
    fn validate_credential(&self) -> SyncResult<UserInfo> {
        self.enter()?;
        Ok(UserInfo {
            slug: "tester".into(),
        })
    }

    fn fetch_environment(
        &self,
        id: &ResourceId,
        version: Option<&Version>,
    ) -> SyncResult<Environment> {
        self.enter()?;
        let environments = self.environments.borrow();
        let history = environments.get(id);
        let found = match version {
            Some(version) => history.and_then(|h| h.iter().find(|env| &env.version == version)),
            None => history.and_then(|h| h.last()),
        };
        found
            .cloned()
            .ok_or_else(|| SyncError::not_found(ResourceKind::Environment, id, Source::Remote))
    }

    fn push_environment(&self, env: &Environment) -> SyncResult<PushOutcome> {
        self.enter()?;
        let id = env.id()?;
        let mut environments = self.environments.borrow_mut();
        let history = environments.entry(id.clone()).or_default();
        let latest = history.last().map(|env| env.version.clone());
        let expected = latest.clone().unwrap_or(UNPUSHED_VERSION);
        if env.version != expected {
            return Err(SyncError::Conflict(format!(
                "{id} is at {expected}, push was based on {}",
                env.version
            )));
        }
        let mut stored = env.clone();
        stored.version = next_version(latest.as_ref());
        let version = stored.version.clone();
        history.push(stored);
        Ok(PushOutcome {
            version,
            previous_version: latest,
            change_type: None,
            change_reason: None,
        })
    }

    fn delete_environment_remote(&self, id: &ResourceId) -> SyncResult<()> {
        self.enter()?;
        self.environments
            .borrow_mut()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SyncError::not_found(ResourceKind::Environment, id, Source::Remote))
    }

    fn list_environments_remote(&self) -> SyncResult<Vec<RemoteSummary>> {
        self.enter()?;
        Ok(self
            .environments
            .borrow()
            .iter()
            .filter_map(|(id, history)| {
                history.last().map(|env| RemoteSummary {
                    id: id.clone(),
                    latest_version: env.version.clone(),
                })
            })
            .collect())
    }

    fn fetch_component(
        &self,
        id: &ResourceId,
        version: Option<&Version>,
    ) -> SyncResult<ComponentRecord> {
        self.enter()?;
        let components = self.components.borrow();
        let found = components
            .iter()
            .filter(|((candidate, candidate_version), _)| {
                candidate == id && version.is_none_or(|version| version == candidate_version)
            })
            .map(|(_, record)| record)
            .last();
        found
            .cloned()
            .ok_or_else(|| SyncError::not_found(ResourceKind::Component, id, Source::Remote))
    }

    fn push_component(&self, record: &ComponentRecord) -> SyncResult<()> {
        self.enter()?;
        self.seed_component(record.clone());
        Ok(())
    }

    fn list_components_remote(&self) -> SyncResult<Vec<RemoteSummary>> {
        self.enter()?;
        let mut latest: BTreeMap<ResourceId, Version> = BTreeMap::new();
        for (id, version) in self.components.borrow().keys() {
            latest.insert(id.clone(), version.clone());
        }
        Ok(latest
            .into_iter()
            .map(|(id, latest_version)| RemoteSummary { id, latest_version })
            .collect())
    }
}

/// Host that records what it was handed instead of decoding packages.
#[derive(Default)]
pub struct RecordingHost {
    pub runs: RefCell<Vec<ResolvedEnvironment>>,
}

impl ComponentHost for RecordingHost {
    fn run(&self, resolved: &ResolvedEnvironment) -> SyncResult<RunReport> {
        self.runs.borrow_mut().push(resolved.clone());
        Ok(RunReport {
            environment: resolved.environment.display_ref(),
            components: Vec::new(),
            vars: Vec::new(),
        })
    }
}

pub struct Harness {
    pub orchestrator: SyncOrchestrator<FakeRegistry>,
    _root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(FakeRegistry::default())
    }

    pub fn with_registry(registry: FakeRegistry) -> Self {
        Self::with_namespace(registry, NAMESPACE)
    }

    pub fn with_namespace(registry: FakeRegistry, namespace: &str) -> Self {
        let root = TempDir::new().unwrap();
        let store = LocalStore::new(root.path().join("artifacts"));
        Self {
            orchestrator: SyncOrchestrator::new(store, registry, namespace).unwrap(),
            _root: root,
        }
    }

    pub fn root(&self) -> &Path {
        self._root.path()
    }

    pub fn store(&self) -> &LocalStore {
        self.orchestrator.store()
    }

    pub fn registry(&self) -> &FakeRegistry {
        self.orchestrator.registry()
    }
}

pub fn component(reference: &str, version: &str, implementation: bool) -> ComponentRecord {
    let id: ResourceId = reference.parse().unwrap();
    let package = Bytes::from(format!("wit package of {reference}@{version}"));
    ComponentRecord {
        id,
        version: Version::parse(version).unwrap(),
        package,
        module: implementation.then(|| Bytes::from_static(b"\0asm component")),
    }
}

/// Every file under `root` with its contents, for byte-for-byte comparisons.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    collect(root, root, &mut files);
    files
}

fn collect(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, files);
        } else {
            let relative = path.strip_prefix(root).unwrap().to_path_buf();
            files.insert(relative, fs::read(&path).unwrap());
        }
    }
}

pub const GREETER_WIT: &str = r#"package acme:greeter@0.2.0;

interface api {
    greet: func(name: string) -> string;
}

world greeter {
    export api;
}
"#;

pub fn write_wit(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("wit").join("package.wit");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    path
}
