pub mod auth;
pub mod component;
pub mod config;
pub mod env;

use std::io::{self, BufRead, Write};

use anyhow::{Context as _, Result};
use asterai_cli::cli::GlobalArgs;
use asterai_cli::config::{self as asterai_config, AsteraiConfig, EndpointOverrides};
use asterai_cli::local_store::LocalStore;
use asterai_cli::reference::{LOCAL_NAMESPACE, ResourceRef};
use asterai_cli::registry::{HttpRegistryClient, RegistryEndpoints};
use asterai_cli::sync::SyncOrchestrator;
use tracing::debug;

/// Everything a command needs, resolved once from flags, environment and config.
pub struct Context {
    pub store: LocalStore,
    pub endpoints: RegistryEndpoints,
    default_namespace: Option<String>,
}

impl Context {
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let config = asterai_config::load()?;
        Self::from_config(&config, global)
    }

    pub fn from_config(config: &AsteraiConfig, global: &GlobalArgs) -> Result<Self> {
        let root = config.store_root()?;
        let endpoints = config.endpoints(&EndpointOverrides {
            api_url: global.endpoint.clone(),
            registry_url: global.registry.clone(),
            staging: global.staging,
        });
        debug!(root = %root.display(), api = %endpoints.api_url, "resolved context");
        Ok(Self {
            store: LocalStore::new(root),
            endpoints,
            default_namespace: config.defaults.namespace.clone(),
        })
    }

    /// Orchestrator wired to the registry with the stored API key, if any.
    pub fn orchestrator(&self) -> Result<SyncOrchestrator<HttpRegistryClient>> {
        let credential = match self.store.read_credential() {
            Ok(credential) => Some(credential),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };
        let namespace = credential
            .as_ref()
            .and_then(|credential| credential.namespace.clone())
            .or_else(|| self.default_namespace.clone())
            .unwrap_or_else(|| LOCAL_NAMESPACE.to_string());
        let api_key = credential.map(|credential| credential.api_key);
        let registry = HttpRegistryClient::new(self.endpoints.clone(), api_key)?;
        let orchestrator = SyncOrchestrator::new(self.store.clone(), registry, namespace.as_str())
            .with_context(|| {
                format!(
                    "default namespace `{namespace}` is unusable; log in again with --namespace or run `asterai config set defaults.namespace <kebab-name>`"
                )
            })?;
        Ok(orchestrator)
    }
}

pub fn parse_ref(raw: &str) -> Result<ResourceRef> {
    raw.parse::<ResourceRef>()
        .with_context(|| format!("invalid reference `{raw}`"))
}

/// Asks the user to type `expected`; anything else declines.
pub fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    print!("{prompt}\ntype `{expected}` to confirm: ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(answer.trim() == expected)
}
