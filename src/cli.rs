use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "asterai")]
#[command(version)]
#[command(about = "Manage asterai environments and WASI components")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// API base URL (overrides config and --staging)
    #[arg(long = "endpoint", short = 'e', global = true, value_name = "URL")]
    pub endpoint: Option<String>,
    /// OCI registry base URL
    #[arg(long = "registry", global = true, value_name = "URL")]
    pub registry: Option<String>,
    /// Use the staging API and registry
    #[arg(long = "staging", short = 's', global = true)]
    pub staging: bool,
    /// More logging on stderr (-v info, -vv debug)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in, log out and check the stored API key
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Create, edit, sync and run environments
    #[command(subcommand)]
    Env(EnvCommand),
    /// Scaffold, package and sync components
    #[command(subcommand)]
    Component(ComponentCommand),
    /// Manage asterai configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Store an API key locally
    Login(LoginArgs),
    /// Remove the stored API key
    Logout,
    /// Show whether an API key is stored and who it belongs to
    Status,
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// API key from the asterai dashboard
    pub api_key: String,
    /// Namespace used for references typed without one
    #[arg(long = "namespace", short = 'n')]
    pub namespace: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum EnvCommand {
    /// Create an empty local environment
    Init(EnvRefArgs),
    /// Show an environment's components and variables
    Inspect(EnvInspectArgs),
    /// Pin a component in an environment (pulls it if needed)
    AddComponent(EnvComponentArgs),
    /// Remove a component from an environment
    RemoveComponent(EnvComponentArgs),
    /// Set (KEY=VALUE) or unset (KEY=) environment variables
    SetVar(EnvSetVarArgs),
    /// List local and registry environments with their sync state
    List(JsonArgs),
    /// Resolve an environment and its components, then run it
    Run(EnvRunArgs),
    /// Download an environment (and its components) from the registry
    Pull(EnvPullArgs),
    /// Upload a local environment to the registry
    Push(EnvRefArgs),
    /// Delete an environment locally or, with --remote, from the registry
    Delete(EnvDeleteArgs),
    /// Copy an environment's components and variables to a new local environment
    Cp(EnvCopyArgs),
    /// Open an environment record in $VISUAL or $EDITOR
    Edit(EnvRefArgs),
}

#[derive(Args, Debug)]
pub struct EnvCopyArgs {
    /// Environment to copy (bare names also match the `local` namespace)
    pub source: String,
    /// New environment (name, namespace:name)
    pub dest: String,
}

#[derive(Args, Debug)]
pub struct EnvRefArgs {
    /// Environment reference (name, namespace:name)
    pub env: String,
}

#[derive(Args, Debug)]
pub struct EnvInspectArgs {
    pub env: String,
    /// Emit JSON instead of text
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct EnvComponentArgs {
    pub env: String,
    /// Component reference (namespace:name[@version])
    pub component: String,
}

#[derive(Args, Debug)]
pub struct EnvSetVarArgs {
    pub env: String,
    /// KEY=VALUE assignments; KEY= unsets
    #[arg(value_name = "KEY=VALUE")]
    pub assignments: Vec<String>,
    /// Additional assignment (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

#[derive(Args, Debug)]
pub struct EnvRunArgs {
    pub env: String,
    /// Only use locally stored environments and components
    #[arg(long = "no-pull")]
    pub no_pull: bool,
}

#[derive(Args, Debug)]
pub struct EnvPullArgs {
    /// Environment reference (namespace:name[@version])
    pub env: String,
    /// Skip downloading the referenced components
    #[arg(long = "manifest-only")]
    pub manifest_only: bool,
}

#[derive(Args, Debug)]
pub struct EnvDeleteArgs {
    pub env: String,
    /// Delete the registry copy instead of the local one
    #[arg(long = "remote")]
    pub remote: bool,
    /// Skip the confirmation prompt
    #[arg(long = "force", short = 'f')]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct JsonArgs {
    /// Emit JSON instead of text
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ComponentCommand {
    /// Scaffold a component project and store its interface locally
    Init(ComponentInitArgs),
    /// List locally stored components
    List(JsonArgs),
    /// Encode a WIT package and store the component locally
    Pkg(ComponentPkgArgs),
    /// Download a component from the registry
    Pull(ComponentRefArgs),
    /// Upload a stored component to the registry
    Push(ComponentRefArgs),
    /// Delete a stored component (all versions unless one is given)
    Delete(ComponentDeleteArgs),
}

#[derive(Args, Debug)]
pub struct ComponentInitArgs {
    /// Component name (kebab-case)
    pub name: String,
    /// Target directory (defaults to ./<name>)
    #[arg(long = "dir")]
    pub dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ComponentPkgArgs {
    /// WIT file or directory (default: wit/package.wit)
    pub wit: Option<PathBuf>,
    /// Component implementation to store alongside the package
    #[arg(long = "component")]
    pub component: Option<PathBuf>,
    /// Where to write the encoded package (default: package.wasm next to the WIT)
    #[arg(long = "output", short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ComponentRefArgs {
    /// Component reference (namespace:name[@version])
    pub component: String,
}

#[derive(Args, Debug)]
pub struct ComponentDeleteArgs {
    pub component: String,
    /// Skip the confirmation prompt
    #[arg(long = "force", short = 'f')]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Set a key in the asterai config (e.g. defaults.namespace)
    Set(ConfigSetArgs),
    /// Print the config file location
    Path,
}

#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    /// Config key path (e.g. registry.api_url)
    pub key: String,
    /// Value to assign; integers and booleans keep their type
    pub value: String,
    /// Override config file path (default: $ASTERAI_CONFIG or <config dir>/asterai/config.toml)
    #[arg(long = "file")]
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "asterai", "env", "run", "team:prod", "--no-pull", "-s", "-vv",
        ])
        .unwrap();
        assert!(cli.global.staging);
        assert_eq!(cli.global.verbose, 2);
        match cli.command {
            Command::Env(EnvCommand::Run(args)) => {
                assert_eq!(args.env, "team:prod");
                assert!(args.no_pull);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn copy_takes_source_and_destination() {
        let cli = Cli::try_parse_from(["asterai", "env", "cp", "prod", "team:staging"]).unwrap();
        match cli.command {
            Command::Env(EnvCommand::Cp(args)) => {
                assert_eq!(args.source, "prod");
                assert_eq!(args.dest, "team:staging");
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["asterai", "env", "cp", "prod"]).is_err());
    }

    #[test]
    fn set_var_accepts_positional_and_flag_assignments() {
        let cli = Cli::try_parse_from([
            "asterai", "env", "set-var", "prod", "A=1", "B=", "--var", "C=3",
        ])
        .unwrap();
        match cli.command {
            Command::Env(EnvCommand::SetVar(args)) => {
                assert_eq!(args.assignments, vec!["A=1", "B="]);
                assert_eq!(args.vars, vec!["C=3"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
