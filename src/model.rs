use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SyncError;
use crate::reference::{ResourceId, ResourceKind, parse_pinned};

/// Version carried by environments that were never pushed.
pub const UNPUSHED_VERSION: Version = Version::new(0, 0, 0);

/// Environment manifest: the deployable unit.
///
/// `version` is the registry version this copy was last synchronized with,
/// or [`UNPUSHED_VERSION`] for environments that only exist locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub namespace: String,
    pub name: String,
    pub version: Version,
    /// [`Environment::content_digest`] as of the last push or pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_digest: Option<String>,
    /// `namespace:name` -> pinned version.
    #[serde(default)]
    pub components: BTreeMap<String, Version>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(id: &ResourceId) -> Self {
        Self {
            namespace: id.namespace().to_string(),
            name: id.name().to_string(),
            version: UNPUSHED_VERSION,
            synced_digest: None,
            components: BTreeMap::new(),
            vars: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Result<ResourceId, SyncError> {
        ResourceId::new(self.namespace.as_str(), self.name.as_str())
    }

    pub fn is_pushed(&self) -> bool {
        self.version != UNPUSHED_VERSION
    }

    /// `namespace:name@version`, or `namespace:name` when never pushed.
    pub fn display_ref(&self) -> String {
        if self.is_pushed() {
            format!("{}:{}@{}", self.namespace, self.name, self.version)
        } else {
            format!("{}:{}", self.namespace, self.name)
        }
    }

    /// Digest of the pinned components and variables.
    pub fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (id, version) in &self.components {
            hasher.update(format!("component {id}@{version}\n"));
        }
        for (key, value) in &self.vars {
            hasher.update(format!("var {key} {}:{value}\n", value.len()));
        }
        format!("sha256:{:x}", hasher.finalize())
    }

    /// Records the current body as the one the registry holds.
    pub fn mark_synced(&mut self) {
        self.synced_digest = Some(self.content_digest());
    }

    /// Whether a pushed copy changed locally since its last push or pull.
    /// Records without a digest are assumed unchanged.
    pub fn has_unsynced_changes(&self) -> bool {
        self.is_pushed()
            && self
                .synced_digest
                .as_ref()
                .is_some_and(|digest| *digest != self.content_digest())
    }

    /// Checks what a hand-edited record could get wrong.
    pub fn validate(&self) -> Result<(), SyncError> {
        self.id()?;
        self.pinned_components()?;
        for key in self.vars.keys() {
            validate_var_name(key)?;
        }
        Ok(())
    }

    /// Records `id@version`, replacing any other version of the same component.
    pub fn add_component(&mut self, id: &ResourceId, version: &Version) -> Option<Version> {
        self.components.insert(id.to_string(), version.clone())
    }

    pub fn remove_component(&mut self, id: &ResourceId) -> bool {
        self.components.remove(&id.to_string()).is_some()
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn unset_var(&mut self, key: &str) -> bool {
        self.vars.remove(key).is_some()
    }

    /// Component references in wire form (`namespace:name@version`).
    pub fn component_refs(&self) -> Vec<String> {
        self.components
            .iter()
            .map(|(id, version)| format!("{id}@{version}"))
            .collect()
    }

    pub fn pinned_components(&self) -> Result<Vec<(ResourceId, Version)>, SyncError> {
        self.components
            .iter()
            .map(|(id, version)| Ok((id.parse::<ResourceId>()?, version.clone())))
            .collect()
    }

    /// Builds an environment from wire-form component references.
    pub fn from_parts(
        id: &ResourceId,
        version: Version,
        component_refs: &[String],
        vars: BTreeMap<String, String>,
    ) -> Result<Self, SyncError> {
        let mut env = Environment::new(id);
        env.version = version;
        env.vars = vars;
        for raw in component_refs {
            let (component, version) = parse_pinned(raw)?;
            env.add_component(&component, &version);
        }
        Ok(env)
    }
}

/// One `KEY=VALUE` assignment from the command line; an empty value unsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarChange {
    Set { key: String, value: String },
    Unset { key: String },
}

impl VarChange {
    pub fn key(&self) -> &str {
        match self {
            VarChange::Set { key, .. } | VarChange::Unset { key } => key,
        }
    }

    /// Applies the change; returns whether the environment changed.
    pub fn apply(&self, env: &mut Environment) -> bool {
        match self {
            VarChange::Set { key, value } => {
                let previous = env.vars.insert(key.clone(), value.clone());
                previous.as_deref() != Some(value.as_str())
            }
            VarChange::Unset { key } => env.unset_var(key),
        }
    }
}

impl FromStr for VarChange {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s.split_once('=').ok_or_else(|| {
            SyncError::InvalidInput(format!("invalid assignment `{s}`: expected KEY=VALUE"))
        })?;
        let key = key.trim();
        validate_var_name(key)?;
        if value.is_empty() {
            Ok(VarChange::Unset { key: key.to_string() })
        } else {
            Ok(VarChange::Set {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
    }
}

pub fn validate_var_name(key: &str) -> Result<(), SyncError> {
    let mut chars = key.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SyncError::InvalidInput(format!(
            "invalid variable name `{key}`: must start with a letter or '_' and contain only letters, digits and '_'"
        )));
    }
    Ok(())
}

/// A packaged component: WIT package plus optional implementation.
#[derive(Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    pub id: ResourceId,
    pub version: Version,
    /// Encoded WIT package (`package.wasm`).
    pub package: Bytes,
    /// Component implementation (`component.wasm`); absent for interface-only components.
    pub module: Option<Bytes>,
}

impl ComponentRecord {
    pub fn reference(&self) -> String {
        format!("{}@{}", self.id, self.version)
    }

    pub fn is_interface_only(&self) -> bool {
        self.module.is_none()
    }

    pub fn metadata(&self, pulled_from: Option<String>, stored_at: String) -> ComponentMetadata {
        ComponentMetadata {
            kind: ResourceKind::Component,
            namespace: self.id.namespace().to_string(),
            name: self.id.name().to_string(),
            version: self.version.clone(),
            package_digest: sha256_digest(&self.package),
            component_digest: self.module.as_deref().map(sha256_digest),
            pulled_from,
            stored_at,
        }
    }
}

impl fmt::Debug for ComponentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRecord")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("package_len", &self.package.len())
            .field("module_len", &self.module.as_ref().map(Bytes::len))
            .finish()
    }
}

/// Contents of `metadata.json` next to a stored component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub version: Version,
    pub package_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulled_from: Option<String>,
    pub stored_at: String,
}

impl ComponentMetadata {
    pub fn reference(&self) -> String {
        format!("{}:{}@{}", self.namespace, self.name, self.version)
    }
}

/// API key plus the namespace it acts in.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Credential {
    pub fn new(api_key: &str, namespace: Option<String>) -> Result<Self, SyncError> {
        let trimmed = api_key.trim();
        if trimmed.len() < 3 {
            return Err(SyncError::InvalidInput("invalid api key (too short)".into()));
        }
        Ok(Self {
            api_key: trimmed.to_string(),
            namespace,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &mask_secret(&self.api_key))
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// OCI-style digest string (`sha256:<hex>`).
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

/// Shows the first four characters of long secrets, stars for short ones.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        format!("{}...", chars[..4].iter().collect::<String>())
    }
}
