use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use asterai_cli::cli::{ComponentCommand, ComponentDeleteArgs, ComponentInitArgs, ComponentPkgArgs};
use asterai_cli::local_store::PACKAGE_FILE;
use asterai_cli::model::{ComponentMetadata, ComponentRecord};
use asterai_cli::reference::ResourceId;
use asterai_cli::registry::HttpRegistryClient;
use asterai_cli::scaffold::{TemplateContext, WIT_FILE, scaffold_component};
use asterai_cli::sync::SyncOrchestrator;
use asterai_cli::wit_pkg;
use bytes::Bytes;

use super::{Context, confirm, parse_ref};

type Orchestrator = SyncOrchestrator<HttpRegistryClient>;

pub fn run(ctx: &Context, command: ComponentCommand) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    match command {
        ComponentCommand::Init(args) => init(&orchestrator, &args),
        ComponentCommand::List(args) => {
            let components = orchestrator.component_list()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&components)?);
            } else {
                print_components(&components);
            }
            Ok(())
        }
        ComponentCommand::Pkg(args) => pkg(&orchestrator, &args),
        ComponentCommand::Pull(args) => {
            let record = orchestrator.component_pull(&parse_ref(&args.component)?)?;
            println!("pulled {}", record.reference());
            Ok(())
        }
        ComponentCommand::Push(args) => {
            let record = orchestrator.component_push(&parse_ref(&args.component)?)?;
            println!("pushed {}", record.reference());
            Ok(())
        }
        ComponentCommand::Delete(args) => delete(&orchestrator, &args),
    }
}

fn init(orchestrator: &Orchestrator, args: &ComponentInitArgs) -> Result<()> {
    let context = TemplateContext::new(&args.name, orchestrator.namespace())?;
    let id = ResourceId::new(context.namespace.as_str(), context.component_kebab.as_str())?;
    let dir = args
        .dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&context.component_kebab));

    let metadata = orchestrator.component_init(&id, || {
        let scaffold = scaffold_component(&dir, &context)?;
        let encoded = wit_pkg::encode_package(&scaffold.wit_path)?;
        Ok(ComponentRecord {
            id: encoded.id,
            version: encoded.version,
            package: Bytes::from(encoded.bytes),
            module: None,
        })
    })?;
    println!("created component project at {}", dir.display());
    println!("stored {} (interface only)", metadata.reference());
    Ok(())
}

fn pkg(orchestrator: &Orchestrator, args: &ComponentPkgArgs) -> Result<()> {
    let wit_path = args
        .wit
        .clone()
        .unwrap_or_else(|| PathBuf::from(WIT_FILE));
    let encoded = wit_pkg::encode_package(&wit_path)?;

    let module = match &args.component {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            wit_pkg::check_component(&bytes)
                .with_context(|| format!("{} is not a usable component", path.display()))?;
            Some(Bytes::from(bytes))
        }
        None => None,
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&wit_path));
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&output, &encoded.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("package written to {}", output.display());

    let record = ComponentRecord {
        id: encoded.id,
        version: encoded.version,
        package: Bytes::from(encoded.bytes),
        module,
    };
    let metadata = orchestrator.component_pkg(&record)?;
    let kind = if record.is_interface_only() {
        "interface only"
    } else {
        "with implementation"
    };
    println!("stored {} ({kind})", metadata.reference());
    Ok(())
}

fn default_output(wit_path: &Path) -> PathBuf {
    if wit_path.is_dir() {
        return wit_path.join(PACKAGE_FILE);
    }
    match wit_path.parent() {
        Some(parent) => parent.join(PACKAGE_FILE),
        None => PathBuf::from(PACKAGE_FILE),
    }
}

fn delete(orchestrator: &Orchestrator, args: &ComponentDeleteArgs) -> Result<()> {
    let reference = parse_ref(&args.component)?;
    let id = orchestrator.resolve(&reference)?;
    if !args.force {
        let scope = match reference.version() {
            Some(version) => format!("version {version} of"),
            None => "every stored version of".to_string(),
        };
        if !confirm(&format!("delete {scope} component {id}?"), id.name())? {
            println!("aborted");
            return Ok(());
        }
    }
    for version in orchestrator.component_delete(&reference)? {
        println!("deleted {id}@{version}");
    }
    Ok(())
}

fn print_components(components: &[ComponentMetadata]) {
    if components.is_empty() {
        println!("no components");
        return;
    }
    for component in components {
        let kind = if component.component_digest.is_some() {
            "component"
        } else {
            "interface"
        };
        let origin = component.pulled_from.as_deref().unwrap_or("local");
        println!("{:<40} {:<10} {origin}", component.reference(), kind);
    }
}
