use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use toml_edit::{DocumentMut, Item, Table, Value};

use crate::reference::validate_namespace;

use crate::registry::{
    DEFAULT_API_URL, DEFAULT_REGISTRY_URL, RegistryEndpoints, STAGING_API_URL,
    STAGING_REGISTRY_URL,
};

pub const CONFIG_ENV: &str = "ASTERAI_CONFIG";
pub const HOME_ENV: &str = "ASTERAI_HOME";

#[derive(Debug, Default, Deserialize)]
pub struct AsteraiConfig {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegistrySection {
    pub api_url: Option<String>,
    pub registry_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreSection {
    /// Artifacts root; `$ASTERAI_HOME` takes precedence.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DefaultsSection {
    /// Namespace for bare references when the credential names none.
    pub namespace: Option<String>,
}

/// Endpoint choices made on the command line.
#[derive(Debug, Default, Clone)]
pub struct EndpointOverrides {
    pub api_url: Option<String>,
    pub registry_url: Option<String>,
    pub staging: bool,
}

impl AsteraiConfig {
    /// CLI flags, then `--staging`, then the config file, then the public registry.
    pub fn endpoints(&self, overrides: &EndpointOverrides) -> RegistryEndpoints {
        let (default_api, default_registry) = if overrides.staging {
            (STAGING_API_URL, STAGING_REGISTRY_URL)
        } else {
            (
                self.registry.api_url.as_deref().unwrap_or(DEFAULT_API_URL),
                self.registry
                    .registry_url
                    .as_deref()
                    .unwrap_or(DEFAULT_REGISTRY_URL),
            )
        };
        let api_url = overrides.api_url.as_deref().unwrap_or(default_api);
        let registry_url = overrides.registry_url.as_deref().unwrap_or(default_registry);
        let endpoints = RegistryEndpoints::new(api_url, registry_url);
        match self.registry.timeout_secs {
            Some(secs) => endpoints.with_timeout(Duration::from_secs(secs)),
            None => endpoints,
        }
    }

    pub fn store_root(&self) -> Result<PathBuf> {
        let home_override = std::env::var(HOME_ENV).ok();
        self.store_root_from(home_override.as_deref())
    }

    pub fn store_root_from(&self, home_override: Option<&str>) -> Result<PathBuf> {
        if let Some(raw) = home_override.filter(|raw| !raw.trim().is_empty()) {
            return Ok(PathBuf::from(raw));
        }
        if let Some(root) = &self.store.root {
            return Ok(root.clone());
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("asterai").join("artifacts"))
            .ok_or_else(|| anyhow!("cannot locate a data directory; set {HOME_ENV}"))
    }
}

pub fn load() -> Result<AsteraiConfig> {
    let path_override = std::env::var(CONFIG_ENV).ok();
    load_from(path_override.as_deref())
}

pub fn load_from(path_override: Option<&str>) -> Result<AsteraiConfig> {
    let Some(path) = config_path_override(path_override) else {
        return Ok(AsteraiConfig::default());
    };

    if !path.exists() {
        return Ok(AsteraiConfig::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: AsteraiConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    Ok(config)
}

fn config_path_override(path_override: Option<&str>) -> Option<PathBuf> {
    if let Some(raw) = path_override {
        return Some(PathBuf::from(raw));
    }
    default_config_path()
}

/// `$ASTERAI_CONFIG`, else `<config dir>/asterai/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    let path_override = std::env::var(CONFIG_ENV).ok();
    config_path_override(path_override.as_deref())
}

/// `file` when given, else [`config_path`].
pub fn resolve_config_path(file: Option<&Path>) -> Result<PathBuf> {
    match file {
        Some(path) => Ok(path.to_path_buf()),
        None => config_path()
            .ok_or_else(|| anyhow!("cannot locate a config directory; set {CONFIG_ENV}")),
    }
}

/// Sets the dotted `key` in the config file at `path`, creating it if
/// needed. Comments and unrelated entries are preserved; integers and
/// booleans keep their TOML type.
pub fn set_value(path: &Path, key: &str, raw: &str) -> Result<()> {
    if key == "defaults.namespace" {
        validate_namespace(raw)?;
    }
    let mut doc = read_document(path)?;
    set_key(&mut doc, key, raw)?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, doc.to_string())
        .with_context(|| format!("failed to write {}", path.display()))
}

fn read_document(path: &Path) -> Result<DocumentMut> {
    if !path.exists() {
        return Ok(DocumentMut::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    raw.parse::<DocumentMut>()
        .with_context(|| format!("failed to parse config at {}", path.display()))
}

fn set_key(doc: &mut DocumentMut, key: &str, raw: &str) -> Result<()> {
    let segments: Vec<&str> = key.split('.').filter(|segment| !segment.is_empty()).collect();
    let Some((leaf, tables)) = segments.split_last() else {
        bail!("config key cannot be empty");
    };

    let mut table = doc.as_table_mut();
    for segment in tables {
        table = table
            .entry(segment)
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .ok_or_else(|| anyhow!("`{segment}` in `{key}` is not a table"))?;
    }
    table.insert(leaf, Item::Value(toml_value(raw)));
    Ok(())
}

fn toml_value(raw: &str) -> Value {
    if let Ok(number) = raw.parse::<i64>() {
        return Value::from(number);
    }
    match raw {
        "true" => Value::from(true),
        "false" => Value::from(false),
        _ => Value::from(raw),
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut dir| {
        dir.push("asterai");
        dir.push("config.toml");
        dir
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nope.toml");
        let config = load_from(path.to_str()).unwrap();
        let endpoints = config.endpoints(&EndpointOverrides::default());
        assert_eq!(endpoints.api_url, DEFAULT_API_URL);
        assert_eq!(endpoints.registry_url, DEFAULT_REGISTRY_URL);
    }

    #[test]
    fn file_values_and_flag_precedence() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
[registry]
api_url = "http://api.internal"
registry_url = "http://oci.internal"
timeout_secs = 5

[store]
root = "/srv/asterai"

[defaults]
namespace = "team"
"#,
        )
        .unwrap();
        let config = load_from(path.to_str()).unwrap();
        assert_eq!(config.defaults.namespace.as_deref(), Some("team"));

        let from_file = config.endpoints(&EndpointOverrides::default());
        assert_eq!(from_file.api_url, "http://api.internal");
        assert_eq!(from_file.timeout, Duration::from_secs(5));

        let staging = config.endpoints(&EndpointOverrides {
            staging: true,
            ..EndpointOverrides::default()
        });
        assert_eq!(staging.registry_url, STAGING_REGISTRY_URL);

        let flagged = config.endpoints(&EndpointOverrides {
            api_url: Some("http://localhost:3000".into()),
            registry_url: None,
            staging: true,
        });
        assert_eq!(flagged.api_url, "http://localhost:3000");
        assert_eq!(flagged.registry_url, STAGING_REGISTRY_URL);
    }

    #[test]
    fn store_root_precedence() {
        let mut config = AsteraiConfig::default();
        config.store.root = Some(PathBuf::from("/from/config"));
        assert_eq!(
            config.store_root_from(Some("/from/env")).unwrap(),
            PathBuf::from("/from/env")
        );
        assert_eq!(
            config.store_root_from(None).unwrap(),
            PathBuf::from("/from/config")
        );
        assert_eq!(
            config.store_root_from(Some("  ")).unwrap(),
            PathBuf::from("/from/config")
        );
    }

    #[test]
    fn explicit_config_file_wins() {
        let explicit = Path::new("/tmp/explicit.toml");
        assert_eq!(resolve_config_path(Some(explicit)).unwrap(), explicit);
    }

    #[test]
    fn set_value_creates_file_and_reloads() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        set_value(&path, "defaults.namespace", "acme").unwrap();
        set_value(&path, "registry.timeout_secs", "5").unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("[defaults]"));
        assert!(written.contains("timeout_secs = 5"));
        let loaded = load_from(path.to_str()).unwrap();
        assert_eq!(loaded.defaults.namespace.as_deref(), Some("acme"));
        assert_eq!(loaded.registry.timeout_secs, Some(5));
    }

    #[test]
    fn set_value_keeps_comments_and_other_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "# registry overrides\n[registry]\napi_url = \"http://localhost:3003\"\n",
        )
        .unwrap();
        set_value(&path, "registry.registry_url", "http://localhost:5000").unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("# registry overrides"));
        let loaded = load_from(path.to_str()).unwrap();
        assert_eq!(loaded.registry.api_url.as_deref(), Some("http://localhost:3003"));
        assert_eq!(
            loaded.registry.registry_url.as_deref(),
            Some("http://localhost:5000")
        );
    }

    #[test]
    fn set_value_rejects_bad_keys_and_namespaces() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        assert!(set_value(&path, "..", "x").is_err());
        assert!(set_value(&path, "defaults.namespace", "my_team").is_err());
        assert!(!path.exists());

        set_value(&path, "defaults.namespace", "team").unwrap();
        let err = set_value(&path, "defaults.namespace.inner", "x").unwrap_err();
        assert!(err.to_string().contains("is not a table"), "{err}");
    }

    #[test]
    fn rejects_malformed_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[registry]\ntimeout_secs = \"soon\"\n").unwrap();
        assert!(load_from(path.to_str()).is_err());
    }
}
