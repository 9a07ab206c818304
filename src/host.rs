//! Hand-off point between `env run` and whatever executes components.

use serde::Serialize;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::model::{ComponentRecord, Environment, mask_secret};
use crate::wit_pkg;

/// An environment with every component it references loaded.
#[derive(Debug, Clone)]
pub struct ResolvedEnvironment {
    pub environment: Environment,
    pub components: Vec<ComponentRecord>,
    /// References that had to be pulled from the registry for this run.
    pub fetched: Vec<String>,
}

/// Executes a resolved environment.
pub trait ComponentHost {
    fn run(&self, resolved: &ResolvedEnvironment) -> SyncResult<RunReport>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub environment: String,
    pub components: Vec<ComponentReport>,
    /// `KEY=masked` pairs handed to the components.
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentReport {
    pub reference: String,
    pub package: String,
    pub interfaces: Vec<String>,
    pub worlds: Vec<String>,
    pub has_implementation: bool,
}

/// Host that decodes every component's WIT package and reports what it
/// would instantiate, without executing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportingHost;

impl ComponentHost for ReportingHost {
    fn run(&self, resolved: &ResolvedEnvironment) -> SyncResult<RunReport> {
        let env = &resolved.environment;
        let mut components = Vec::with_capacity(resolved.components.len());
        for record in &resolved.components {
            let summary = wit_pkg::describe_package(&record.package).map_err(|err| {
                SyncError::InvalidInput(format!(
                    "component {} has an unreadable WIT package: {err}",
                    record.reference()
                ))
            })?;
            debug!(component = %record.reference(), package = %summary.name, "component ready");
            components.push(ComponentReport {
                reference: record.reference(),
                package: summary.name,
                interfaces: summary.interfaces,
                worlds: summary.worlds,
                has_implementation: !record.is_interface_only(),
            });
        }
        let vars = env
            .vars
            .iter()
            .map(|(key, value)| format!("{key}={}", mask_secret(value)))
            .collect();
        Ok(RunReport {
            environment: env.display_ref(),
            components,
            vars,
        })
    }
}
