use std::path::Path;
use std::process::Command;

use anyhow::{Result, bail};
use asterai_cli::cli::{EnvCommand, EnvCopyArgs, EnvDeleteArgs, EnvSetVarArgs};
use asterai_cli::error::{Source, SyncError, SyncResult};
use asterai_cli::host::{ReportingHost, RunReport};
use asterai_cli::model::{Environment, VarChange, mask_secret};
use asterai_cli::registry::HttpRegistryClient;
use asterai_cli::sync::{EnvListing, Flags, SyncOrchestrator};
use serde_json::json;

use super::{Context, confirm, parse_ref};

type Orchestrator = SyncOrchestrator<HttpRegistryClient>;

pub fn run(ctx: &Context, command: EnvCommand) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    match command {
        EnvCommand::Init(args) => {
            let env = orchestrator.env_init(&parse_ref(&args.env)?)?;
            println!("created environment {}", env.display_ref());
        }
        EnvCommand::Inspect(args) => {
            let env = orchestrator.env_inspect(&parse_ref(&args.env)?)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&env_json(&env))?);
            } else {
                print_environment(&env);
            }
        }
        EnvCommand::AddComponent(args) => {
            let report = orchestrator.env_add_component(
                &parse_ref(&args.env)?,
                &parse_ref(&args.component)?,
                Flags::default(),
            )?;
            if report.fetched {
                println!("pulled {}", report.component);
            }
            println!(
                "added {} to {}",
                report.component,
                report.environment.display_ref()
            );
        }
        EnvCommand::RemoveComponent(args) => {
            let env = orchestrator
                .env_remove_component(&parse_ref(&args.env)?, &parse_ref(&args.component)?)?;
            println!("removed {} from {}", args.component, env.display_ref());
        }
        EnvCommand::SetVar(args) => set_vars(&orchestrator, &args)?,
        EnvCommand::List(args) => {
            let listing = orchestrator.env_list()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&listing_json(&listing))?);
            } else {
                print_listing(&listing);
            }
        }
        EnvCommand::Run(args) => {
            let flags = Flags {
                no_pull: args.no_pull,
                ..Flags::default()
            };
            let report = orchestrator.env_run(&parse_ref(&args.env)?, flags, &ReportingHost)?;
            print_run_report(&report);
        }
        EnvCommand::Pull(args) => {
            let report = orchestrator.env_pull(&parse_ref(&args.env)?, args.manifest_only)?;
            for reference in &report.fetched {
                println!("  pulled {reference}");
            }
            for reference in &report.cached {
                println!("  {reference} (cached)");
            }
            println!(
                "pulled environment {} ({})",
                report.environment.display_ref(),
                report.state
            );
        }
        EnvCommand::Push(args) => {
            let report = orchestrator.env_push(&parse_ref(&args.env)?)?;
            let outcome = &report.outcome;
            match &outcome.previous_version {
                Some(previous) => {
                    println!(
                        "updated {} (was {previous})",
                        report.environment.display_ref()
                    );
                    if let Some(change_type) = &outcome.change_type {
                        match &outcome.change_reason {
                            Some(reason) => println!("  change: {change_type} ({reason})"),
                            None => println!("  change: {change_type}"),
                        }
                    }
                }
                None => println!("created {}", report.environment.display_ref()),
            }
        }
        EnvCommand::Delete(args) => delete(&orchestrator, &args)?,
        EnvCommand::Cp(args) => copy(&orchestrator, &args)?,
        EnvCommand::Edit(args) => {
            let env = orchestrator.env_edit(&parse_ref(&args.env)?, open_in_editor)?;
            println!("saved {}", env.display_ref());
        }
    }
    Ok(())
}

fn copy(orchestrator: &Orchestrator, args: &EnvCopyArgs) -> Result<()> {
    let dest = parse_ref(&args.dest)?;
    match orchestrator.env_copy(&parse_ref(&args.source)?, &dest) {
        Ok(env) => {
            println!("copied {} -> {}", args.source, env.display_ref());
            Ok(())
        }
        Err(err @ SyncError::AlreadyExists { .. }) => {
            let id = orchestrator.resolve(&dest)?;
            bail!("{err}\nhint: delete it first with: asterai env delete {id}")
        }
        Err(err) => Err(err.into()),
    }
}

/// `$VISUAL`, then `$EDITOR`, then the platform default. The value may carry
/// arguments (`code --wait`).
fn open_in_editor(path: &Path) -> SyncResult<()> {
    let editor = std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .ok()
        .filter(|editor| !editor.trim().is_empty())
        .unwrap_or_else(|| (if cfg!(windows) { "notepad" } else { "vi" }).to_string());
    let mut words = editor.split_whitespace();
    let program = words
        .next()
        .ok_or_else(|| SyncError::InvalidInput("editor command is empty".into()))?;
    let status = Command::new(program)
        .args(words)
        .arg(path)
        .status()
        .map_err(|err| SyncError::InvalidInput(format!("failed to launch editor `{editor}`: {err}")))?;
    if !status.success() {
        return Err(SyncError::InvalidInput(format!(
            "editor `{editor}` exited with {status}; environment left unchanged"
        )));
    }
    Ok(())
}

fn set_vars(orchestrator: &Orchestrator, args: &EnvSetVarArgs) -> Result<()> {
    let changes = args
        .assignments
        .iter()
        .chain(args.vars.iter())
        .map(|raw| raw.parse::<VarChange>())
        .collect::<Result<Vec<_>, _>>()?;
    let env = orchestrator.env_set_var(&parse_ref(&args.env)?, &changes)?;
    for change in &changes {
        match change {
            VarChange::Set { key, .. } => println!("set {key}"),
            VarChange::Unset { key } => println!("unset {key}"),
        }
    }
    println!("updated {}", env.display_ref());
    Ok(())
}

fn delete(orchestrator: &Orchestrator, args: &EnvDeleteArgs) -> Result<()> {
    let reference = parse_ref(&args.env)?;
    let id = orchestrator.resolve(&reference)?;
    let target = if args.remote {
        "from the registry"
    } else {
        "locally"
    };
    if !args.force {
        let confirmed = confirm(&format!("delete environment {id} {target}?"), id.name())?;
        if !confirmed {
            println!("aborted");
            return Ok(());
        }
    }
    let flags = Flags {
        remote: args.remote,
        ..Flags::default()
    };
    match orchestrator.env_delete(&reference, flags)? {
        Source::Remote => println!("deleted {id} from the registry"),
        _ => println!("deleted {id}"),
    }
    Ok(())
}

fn print_environment(env: &Environment) {
    println!("{}", env.display_ref());
    if !env.is_pushed() {
        println!("  (never pushed)");
    }
    if env.components.is_empty() {
        println!("components: none");
    } else {
        println!("components:");
        for reference in env.component_refs() {
            println!("  {reference}");
        }
    }
    if env.vars.is_empty() {
        println!("vars: none");
    } else {
        println!("vars:");
        for (key, value) in &env.vars {
            println!("  {key}={}", mask_secret(value));
        }
    }
}

fn env_json(env: &Environment) -> serde_json::Value {
    let vars: serde_json::Map<String, serde_json::Value> = env
        .vars
        .iter()
        .map(|(key, value)| (key.clone(), json!(mask_secret(value))))
        .collect();
    json!({
        "namespace": env.namespace,
        "name": env.name,
        "version": env.version.to_string(),
        "components": env.component_refs(),
        "vars": vars,
    })
}

fn print_listing(listing: &EnvListing) {
    if listing.entries.is_empty() {
        println!("no environments");
    }
    for entry in &listing.entries {
        let version = entry
            .local_version
            .as_ref()
            .or(entry.remote_version.as_ref())
            .map(|version| version.to_string())
            .unwrap_or_default();
        println!("{:<40} {:<10} {}", entry.id.to_string(), version, entry.state);
    }
    if let Some(err) = &listing.remote_error {
        println!();
        println!("registry listing unavailable: {err}");
    }
}

fn listing_json(listing: &EnvListing) -> serde_json::Value {
    let entries: Vec<_> = listing
        .entries
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id.to_string(),
                "localVersion": entry.local_version.as_ref().map(ToString::to_string),
                "remoteVersion": entry.remote_version.as_ref().map(ToString::to_string),
                "state": entry.state,
            })
        })
        .collect();
    json!({
        "environments": entries,
        "remoteError": listing.remote_error.as_ref().map(ToString::to_string),
    })
}

fn print_run_report(report: &RunReport) {
    println!("environment {}", report.environment);
    for component in &report.components {
        let kind = if component.has_implementation {
            "component"
        } else {
            "interface only"
        };
        println!("  {} [{kind}]", component.reference);
        for interface in &component.interfaces {
            println!("    export {interface}");
        }
    }
    for var in &report.vars {
        println!("  var {var}");
    }
    println!("resolved {} component(s)", report.components.len());
}
