//! On-disk store for environments, components and the credential.
//!
//! Every write goes to a temporary file or directory next to its destination
//! and is renamed into place, so readers only ever observe complete records.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use semver::Version;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::error::{Source, SyncError, SyncResult};
use crate::model::{ComponentMetadata, ComponentRecord, Credential, Environment, sha256_digest};
use crate::reference::{ResourceId, ResourceKind};

const CREDENTIAL_FILE: &str = "credential.toml";
const ENVIRONMENTS_DIR: &str = "environments";
const COMPONENTS_DIR: &str = "components";
const METADATA_FILE: &str = "metadata.json";
pub const PACKAGE_FILE: &str = "package.wasm";
pub const COMPONENT_FILE: &str = "component.wasm";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn credential_path(&self) -> PathBuf {
        self.root.join(CREDENTIAL_FILE)
    }

    pub fn environment_path(&self, id: &ResourceId) -> PathBuf {
        self.root
            .join(ENVIRONMENTS_DIR)
            .join(id.namespace())
            .join(format!("{}.toml", id.name()))
    }

    pub fn component_dir(&self, id: &ResourceId, version: &Version) -> PathBuf {
        self.root
            .join(COMPONENTS_DIR)
            .join(id.namespace())
            .join(format!("{}@{}", id.name(), version))
    }

    // environments

    pub fn has_environment(&self, id: &ResourceId) -> bool {
        self.environment_path(id).is_file()
    }

    pub fn read_environment(&self, id: &ResourceId) -> SyncResult<Environment> {
        let path = self.environment_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SyncError::not_found(
                    ResourceKind::Environment,
                    id,
                    Source::Local,
                ));
            }
            Err(err) => return Err(SyncError::io(&path, err)),
        };
        parse_environment(&path, &raw)
    }

    pub fn write_environment(&self, env: &Environment) -> SyncResult<()> {
        let id = env.id()?;
        let path = self.environment_path(&id);
        let raw = toml::to_string_pretty(env)
            .map_err(|err| SyncError::Internal(format!("failed to encode {id}: {err}")))?;
        write_atomic(&path, raw.as_bytes(), None)?;
        debug!(env = %id, version = %env.version, path = %path.display(), "wrote environment");
        Ok(())
    }

    pub fn delete_environment(&self, id: &ResourceId) -> SyncResult<()> {
        let path = self.environment_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(env = %id, "deleted environment");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(SyncError::not_found(
                ResourceKind::Environment,
                id,
                Source::Local,
            )),
            Err(err) => Err(SyncError::io(&path, err)),
        }
    }

    /// Writes `env` to a hidden scratch file next to its record, for editing
    /// outside the store. The file is removed when the handle drops.
    pub fn environment_draft(&self, env: &Environment) -> SyncResult<NamedTempFile> {
        let id = env.id()?;
        let path = self.environment_path(&id);
        let parent = path
            .parent()
            .ok_or_else(|| SyncError::Internal(format!("{} has no parent", path.display())))?;
        fs::create_dir_all(parent).map_err(|err| SyncError::io(parent, err))?;
        let raw = toml::to_string_pretty(env)
            .map_err(|err| SyncError::Internal(format!("failed to encode {id}: {err}")))?;
        let mut draft = tempfile::Builder::new()
            .prefix(&format!(".edit-{}-", id.name()))
            .suffix(".toml")
            .tempfile_in(parent)
            .map_err(|err| SyncError::io(parent, err))?;
        if let Err(err) = draft.write_all(raw.as_bytes()).and_then(|()| draft.flush()) {
            return Err(SyncError::io(draft.path(), err));
        }
        Ok(draft)
    }

    /// Parses an environment record outside the store layout.
    pub fn read_environment_file(&self, path: &Path) -> SyncResult<Environment> {
        let raw = fs::read_to_string(path).map_err(|err| SyncError::io(path, err))?;
        parse_environment(path, &raw)
    }

    /// All readable environments, sorted by namespace and name.
    pub fn list_environments(&self) -> SyncResult<Vec<Environment>> {
        let mut envs = Vec::new();
        for ns_dir in visible_entries(&self.root.join(ENVIRONMENTS_DIR))? {
            if !ns_dir.is_dir() {
                continue;
            }
            for path in visible_entries(&ns_dir)? {
                if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
                    continue;
                }
                let parsed = fs::read_to_string(&path)
                    .map_err(|err| SyncError::io(&path, err))
                    .and_then(|raw| parse_environment(&path, &raw));
                match parsed {
                    Ok(env) => envs.push(env),
                    Err(err) => warn!(path = %path.display(), "skipping environment record: {err}"),
                }
            }
        }
        envs.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(envs)
    }

    // components

    /// Stored versions of `id`, lowest first.
    pub fn component_versions(&self, id: &ResourceId) -> SyncResult<Vec<Version>> {
        let ns_dir = self.root.join(COMPONENTS_DIR).join(id.namespace());
        let mut versions = Vec::new();
        for path in visible_entries(&ns_dir)? {
            let Some((name, version)) = split_component_dir(&path) else {
                continue;
            };
            if name == id.name() && path.join(METADATA_FILE).is_file() {
                versions.push(version);
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Resolves `version`, or the highest stored version when none is given.
    pub fn resolve_component_version(
        &self,
        id: &ResourceId,
        version: Option<&Version>,
    ) -> SyncResult<Version> {
        let versions = self.component_versions(id)?;
        let found = match version {
            Some(wanted) => versions.into_iter().find(|v| v == wanted),
            None => versions.into_iter().next_back(),
        };
        found.ok_or_else(|| {
            SyncError::not_found(ResourceKind::Component, display_ref(id, version), Source::Local)
        })
    }

    pub fn has_component(&self, id: &ResourceId, version: Option<&Version>) -> bool {
        self.resolve_component_version(id, version).is_ok()
    }

    pub fn read_component(
        &self,
        id: &ResourceId,
        version: Option<&Version>,
    ) -> SyncResult<ComponentRecord> {
        let version = self.resolve_component_version(id, version)?;
        let dir = self.component_dir(id, &version);
        let metadata = read_metadata(&dir)?;
        let package = read_bytes(&dir.join(PACKAGE_FILE))?;
        let module_path = dir.join(COMPONENT_FILE);
        let module = if module_path.is_file() {
            Some(read_bytes(&module_path)?)
        } else {
            None
        };
        if sha256_digest(&package) != metadata.package_digest {
            warn!(component = %id, %version, "package digest does not match stored metadata");
        }
        Ok(ComponentRecord {
            id: id.clone(),
            version,
            package,
            module,
        })
    }

    /// Stores `record`, replacing any copy of the same version.
    pub fn write_component(
        &self,
        record: &ComponentRecord,
        pulled_from: Option<&str>,
    ) -> SyncResult<ComponentMetadata> {
        let target = self.component_dir(&record.id, &record.version);
        let parent = target
            .parent()
            .ok_or_else(|| SyncError::Internal(format!("{} has no parent", target.display())))?;
        fs::create_dir_all(parent).map_err(|err| SyncError::io(parent, err))?;

        let metadata = record.metadata(pulled_from.map(str::to_string), now_rfc3339()?);
        let metadata_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|err| SyncError::Internal(format!("failed to encode metadata: {err}")))?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)
            .map_err(|err| SyncError::io(parent, err))?;
        write_file(&staging.path().join(PACKAGE_FILE), &record.package)?;
        if let Some(module) = &record.module {
            write_file(&staging.path().join(COMPONENT_FILE), module)?;
        }
        // metadata last: a directory without it is ignored by readers
        write_file(&staging.path().join(METADATA_FILE), &metadata_json)?;

        replace_dir(staging.path(), &target, parent)?;

        debug!(component = %record.id, version = %record.version, path = %target.display(), "stored component");
        Ok(metadata)
    }

    /// Deletes one version, or every version when none is given.
    pub fn delete_component(
        &self,
        id: &ResourceId,
        version: Option<&Version>,
    ) -> SyncResult<Vec<Version>> {
        let targets = match version {
            Some(version) => vec![self.resolve_component_version(id, Some(version))?],
            None => self.component_versions(id)?,
        };
        if targets.is_empty() {
            return Err(SyncError::not_found(
                ResourceKind::Component,
                id,
                Source::Local,
            ));
        }
        for version in &targets {
            let dir = self.component_dir(id, version);
            fs::remove_dir_all(&dir).map_err(|err| SyncError::io(&dir, err))?;
            debug!(component = %id, %version, "deleted component");
        }
        Ok(targets)
    }

    pub fn read_component_metadata(
        &self,
        id: &ResourceId,
        version: &Version,
    ) -> SyncResult<ComponentMetadata> {
        read_metadata(&self.component_dir(id, version))
    }

    /// Metadata of every stored component version, sorted by reference.
    pub fn list_components(&self) -> SyncResult<Vec<ComponentMetadata>> {
        let mut components = Vec::new();
        for ns_dir in visible_entries(&self.root.join(COMPONENTS_DIR))? {
            if !ns_dir.is_dir() {
                continue;
            }
            for dir in visible_entries(&ns_dir)? {
                if split_component_dir(&dir).is_none() {
                    continue;
                }
                match read_metadata(&dir) {
                    Ok(metadata) => components.push(metadata),
                    Err(err) => warn!(path = %dir.display(), "skipping component: {err}"),
                }
            }
        }
        components.sort_by(|a, b| {
            (&a.namespace, &a.name, &a.version).cmp(&(&b.namespace, &b.name, &b.version))
        });
        Ok(components)
    }

    // credential

    pub fn has_credential(&self) -> bool {
        self.credential_path().is_file()
    }

    pub fn read_credential(&self) -> SyncResult<Credential> {
        let path = self.credential_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SyncError::not_found(
                    ResourceKind::Credential,
                    "api key",
                    Source::Local,
                ));
            }
            Err(err) => return Err(SyncError::io(&path, err)),
        };
        toml::from_str(&raw).map_err(|err| {
            SyncError::InvalidInput(format!("corrupt credential at {}: {err}", path.display()))
        })
    }

    pub fn write_credential(&self, credential: &Credential) -> SyncResult<()> {
        let path = self.credential_path();
        let raw = toml::to_string_pretty(credential)
            .map_err(|err| SyncError::Internal(format!("failed to encode credential: {err}")))?;
        write_atomic(&path, raw.as_bytes(), Some(0o600))
    }

    /// Returns whether a credential was present.
    pub fn delete_credential(&self) -> SyncResult<bool> {
        let path = self.credential_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SyncError::io(&path, err)),
        }
    }
}

/// Moves `staged` onto `target`. An existing `target` is parked in a holder
/// directory under `parent` and put back if the move fails.
fn replace_dir(staged: &Path, target: &Path, parent: &Path) -> SyncResult<()> {
    if !target.exists() {
        return fs::rename(staged, target).map_err(|err| SyncError::io(target, err));
    }
    let holder = tempfile::Builder::new()
        .prefix(".replaced-")
        .tempdir_in(parent)
        .map_err(|err| SyncError::io(parent, err))?;
    let previous = holder.path().join("previous");
    fs::rename(target, &previous).map_err(|err| SyncError::io(target, err))?;
    if let Err(err) = fs::rename(staged, target) {
        if let Err(restore_err) = fs::rename(&previous, target) {
            let kept = holder.keep();
            warn!(
                path = %target.display(),
                kept = %kept.display(),
                "could not restore previous copy: {restore_err}"
            );
        }
        return Err(SyncError::io(target, err));
    }
    Ok(())
}

fn parse_environment(path: &Path, raw: &str) -> SyncResult<Environment> {
    let env: Environment = toml::from_str(raw).map_err(|err| {
        SyncError::InvalidInput(format!("corrupt environment at {}: {err}", path.display()))
    })?;
    env.id()?;
    Ok(env)
}

fn read_metadata(dir: &Path) -> SyncResult<ComponentMetadata> {
    let path = dir.join(METADATA_FILE);
    let raw = fs::read(&path).map_err(|err| SyncError::io(&path, err))?;
    serde_json::from_slice(&raw).map_err(|err| {
        SyncError::InvalidInput(format!("corrupt metadata at {}: {err}", path.display()))
    })
}

fn read_bytes(path: &Path) -> SyncResult<Bytes> {
    fs::read(path)
        .map(Bytes::from)
        .map_err(|err| SyncError::io(path, err))
}

/// Entries of `dir` that are not hidden; a missing dir is empty.
fn visible_entries(dir: &Path) -> SyncResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(SyncError::io(dir, err)),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SyncError::io(dir, err))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn split_component_dir(path: &Path) -> Option<(String, Version)> {
    let file_name = path.file_name()?.to_str()?;
    let (name, version) = file_name.rsplit_once('@')?;
    let version = Version::parse(version).ok()?;
    Some((name.to_string(), version))
}

fn display_ref(id: &ResourceId, version: Option<&Version>) -> String {
    match version {
        Some(version) => format!("{id}@{version}"),
        None => id.to_string(),
    }
}

fn now_rfc3339() -> SyncResult<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| SyncError::Internal(format!("failed to format timestamp: {err}")))
}

fn write_file(path: &Path, contents: &[u8]) -> SyncResult<()> {
    fs::write(path, contents).map_err(|err| SyncError::io(path, err))
}

/// Temp-file-then-rename write; `mode` applies on unix only.
fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> SyncResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| SyncError::Internal(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent).map_err(|err| SyncError::io(parent, err))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|err| SyncError::io(parent, err))?;
    tmp.write_all(contents)
        .map_err(|err| SyncError::io(tmp.path(), err))?;
    tmp.flush().map_err(|err| SyncError::io(tmp.path(), err))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| SyncError::io(tmp.path(), err))?;
    if let Some(mode) = mode {
        restrict_permissions(tmp.as_file(), mode).map_err(|err| SyncError::io(path, err))?;
    }
    tmp.persist(path)
        .map_err(|err| SyncError::io(path, err.error))?;
    Ok(())
}

fn restrict_permissions(file: &fs::File, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))
    }
    #[cfg(not(unix))]
    {
        let _ = (file, mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("artifacts"));
        (dir, store)
    }

    fn id(raw: &str) -> ResourceId {
        raw.parse().unwrap()
    }

    fn component(raw: &str, version: &str, module: bool) -> ComponentRecord {
        ComponentRecord {
            id: id(raw),
            version: Version::parse(version).unwrap(),
            package: Bytes::from_static(b"\0asm-package"),
            module: module.then(|| Bytes::from_static(b"\0asm-impl")),
        }
    }

    #[test]
    fn environment_crud() {
        let (_dir, store) = store();
        let env_id = id("team:prod");
        assert!(store.read_environment(&env_id).unwrap_err().is_not_found());

        let mut env = Environment::new(&env_id);
        env.set_var("REGION", "eu");
        store.write_environment(&env).unwrap();
        assert!(store.has_environment(&env_id));
        assert_eq!(store.read_environment(&env_id).unwrap(), env);

        store.delete_environment(&env_id).unwrap();
        assert!(store.delete_environment(&env_id).unwrap_err().is_not_found());
    }

    #[test]
    fn listing_skips_corrupt_and_hidden_records() {
        let (_dir, store) = store();
        store.write_environment(&Environment::new(&id("b:two"))).unwrap();
        store.write_environment(&Environment::new(&id("a:one"))).unwrap();
        let ns_dir = store.root().join("environments").join("a");
        fs::write(ns_dir.join("broken.toml"), "not = [valid").unwrap();
        fs::write(ns_dir.join(".tmpXYZ"), "partial").unwrap();
        fs::write(ns_dir.join("notes.txt"), "ignored").unwrap();

        let names: Vec<_> = store
            .list_environments()
            .unwrap()
            .into_iter()
            .map(|env| env.display_ref())
            .collect();
        assert_eq!(names, vec!["a:one", "b:two"]);
    }

    #[test]
    fn component_versions_resolve_to_highest() {
        let (_dir, store) = store();
        store.write_component(&component("acme:hello", "0.1.0", false), None).unwrap();
        store
            .write_component(&component("acme:hello", "0.10.0", true), Some("registry.test"))
            .unwrap();
        store.write_component(&component("acme:hello", "0.2.0", false), None).unwrap();

        let latest = store.read_component(&id("acme:hello"), None).unwrap();
        assert_eq!(latest.version, Version::new(0, 10, 0));
        assert!(!latest.is_interface_only());

        let pinned = store
            .read_component(&id("acme:hello"), Some(&Version::new(0, 1, 0)))
            .unwrap();
        assert!(pinned.is_interface_only());

        let metadata = store
            .read_component_metadata(&id("acme:hello"), &Version::new(0, 10, 0))
            .unwrap();
        assert_eq!(metadata.pulled_from.as_deref(), Some("registry.test"));
        assert_eq!(metadata.package_digest, sha256_digest(b"\0asm-package"));
    }

    #[test]
    fn rewriting_a_component_replaces_files() {
        let (_dir, store) = store();
        store.write_component(&component("acme:hello", "1.0.0", true), None).unwrap();
        store.write_component(&component("acme:hello", "1.0.0", false), None).unwrap();

        let stored = store.read_component(&id("acme:hello"), None).unwrap();
        assert!(stored.is_interface_only());
        let leftovers: Vec<_> = fs::read_dir(store.root().join("components").join("acme"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec!["hello@1.0.0".to_string()]);
    }

    #[test]
    fn failed_replace_restores_previous_copy() {
        let (dir, store) = store();
        store.write_component(&component("acme:hello", "1.0.0", true), None).unwrap();
        let target = store.component_dir(&id("acme:hello"), &Version::new(1, 0, 0));
        let parent = target.parent().unwrap().to_path_buf();

        let missing = dir.path().join("never-staged");
        let err = replace_dir(&missing, &target, &parent).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }), "{err:?}");

        let stored = store.read_component(&id("acme:hello"), None).unwrap();
        assert_eq!(stored, component("acme:hello", "1.0.0", true));
        let entries: Vec<_> = fs::read_dir(&parent)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["hello@1.0.0".to_string()]);
    }

    #[test]
    fn environment_draft_is_hidden_and_parses_back() {
        let (_dir, store) = store();
        let mut env = Environment::new(&id("team:prod"));
        env.set_var("REGION", "eu");
        store.write_environment(&env).unwrap();

        let draft = store.environment_draft(&env).unwrap();
        let file_name = draft.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with(".edit-prod-") && file_name.ends_with(".toml"));
        assert_eq!(store.read_environment_file(draft.path()).unwrap(), env);
        assert_eq!(store.list_environments().unwrap().len(), 1);

        let path = draft.path().to_path_buf();
        drop(draft);
        assert!(!path.exists());
    }

    #[test]
    fn deleting_components_twice_is_not_found() {
        let (_dir, store) = store();
        store.write_component(&component("acme:hello", "0.1.0", false), None).unwrap();
        store.write_component(&component("acme:hello", "0.2.0", false), None).unwrap();
        store.write_component(&component("acme:other", "0.1.0", false), None).unwrap();

        let removed = store.delete_component(&id("acme:hello"), None).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.delete_component(&id("acme:hello"), None).unwrap_err().is_not_found());

        let remaining: Vec<_> = store
            .list_components()
            .unwrap()
            .iter()
            .map(ComponentMetadata::reference)
            .collect();
        assert_eq!(remaining, vec!["acme:other@0.1.0".to_string()]);
    }

    #[test]
    fn credential_roundtrip_and_idempotent_delete() {
        let (_dir, store) = store();
        assert!(store.read_credential().unwrap_err().is_not_found());
        let credential = Credential::new("sk-test-key", Some("team".into())).unwrap();
        store.write_credential(&credential).unwrap();
        assert_eq!(store.read_credential().unwrap(), credential);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.credential_path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        assert!(store.delete_credential().unwrap());
        assert!(!store.delete_credential().unwrap());
    }
}
