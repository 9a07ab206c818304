//! Parsing of `namespace:name[@version]` references.

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Namespace used when neither the credential nor the config names one.
pub const LOCAL_NAMESPACE: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Environment,
    Component,
    Credential,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::Environment => "environment",
            ResourceKind::Component => "component",
            ResourceKind::Credential => "credential",
        };
        f.write_str(label)
    }
}

/// Fully qualified identity of an environment or component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    namespace: String,
    name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, SyncError> {
        let namespace = namespace.into();
        let name = name.into();
        validate_segment("namespace", &namespace)?;
        validate_segment("name", &name)?;
        Ok(Self { namespace, name })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OCI repository name (`namespace/name`).
    pub fn repository(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = split_namespace(s).ok_or_else(|| {
            SyncError::InvalidInput(format!("invalid reference `{s}`: expected namespace:name"))
        })?;
        ResourceId::new(namespace, name)
    }
}

/// A reference as typed on the command line: the namespace and version are optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    namespace: Option<String>,
    name: String,
    version: Option<Version>,
}

impl ResourceRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn resolve(&self, fallback_namespace: &str) -> Result<ResourceId, SyncError> {
        let namespace = self.namespace.as_deref().unwrap_or(fallback_namespace);
        ResourceId::new(namespace, self.name.as_str())
    }

    /// Like [`ResourceRef::resolve`] but rejects references without a namespace.
    pub fn require_namespace(&self) -> Result<ResourceId, SyncError> {
        match &self.namespace {
            Some(namespace) => ResourceId::new(namespace.as_str(), self.name.as_str()),
            None => Err(SyncError::InvalidInput(format!(
                "reference `{}` needs a namespace (namespace:name)",
                self.name
            ))),
        }
    }
}

impl FromStr for ResourceRef {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (id_part, version) = match trimmed.split_once('@') {
            Some((id, raw)) => {
                let version = Version::parse(raw).map_err(|err| {
                    SyncError::InvalidInput(format!("invalid version `{raw}` in `{s}`: {err}"))
                })?;
                (id, Some(version))
            }
            None => (trimmed, None),
        };
        let (namespace, name) = match split_namespace(id_part) {
            Some((namespace, name)) => {
                validate_segment("namespace", namespace)?;
                (Some(namespace.to_string()), name)
            }
            None => (None, id_part),
        };
        validate_segment("name", name)?;
        Ok(Self {
            namespace,
            name: name.to_string(),
            version,
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}:")?;
        }
        f.write_str(&self.name)?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

/// Parses `namespace:name@version` where every part is mandatory.
pub fn parse_pinned(s: &str) -> Result<(ResourceId, Version), SyncError> {
    let reference: ResourceRef = s.parse()?;
    let id = reference.require_namespace()?;
    let version = reference.version.ok_or_else(|| {
        SyncError::InvalidInput(format!("reference `{s}` is missing a version"))
    })?;
    Ok((id, version))
}

/// Namespaces double as WIT package namespaces, so the default namespace
/// must be a WIT identifier for scaffolded components to resolve.
pub fn validate_namespace(namespace: &str) -> Result<(), SyncError> {
    validate_segment("namespace", namespace)?;
    check_wit_identifier(namespace).map_err(|reason| {
        SyncError::InvalidInput(format!("invalid namespace `{namespace}`: {reason}"))
    })
}

/// WIT identifiers: lowercase words of letters and digits joined by single
/// hyphens, each word starting with a letter.
pub fn check_wit_identifier(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("cannot be empty");
    }
    for word in value.split('-') {
        let Some(first) = word.chars().next() else {
            return Err("hyphens must separate non-empty words");
        };
        if !first.is_ascii_lowercase() {
            return Err("each word must start with a lowercase letter");
        }
        if !word
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err("use lowercase letters, digits and hyphens (kebab-case)");
        }
    }
    Ok(())
}

fn split_namespace(s: &str) -> Option<(&str, &str)> {
    s.split_once(':').or_else(|| s.split_once('/'))
}

fn validate_segment(label: &str, value: &str) -> Result<(), SyncError> {
    if value.is_empty() {
        return Err(SyncError::InvalidInput(format!("{label} cannot be empty")));
    }
    if value == "." || value == ".." || value.starts_with('.') {
        return Err(SyncError::InvalidInput(format!(
            "{label} `{value}` cannot start with a dot"
        )));
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(SyncError::InvalidInput(format!(
            "{label} `{value}` may only contain letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(())
}
