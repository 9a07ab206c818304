//! Component project templates.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use convert_case::{Case, Casing};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::reference::{check_wit_identifier, validate_namespace};

const TEMPLATE_CARGO: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/component/Cargo.toml.in"
));
const TEMPLATE_SRC_LIB: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/component/src/lib.rs"
));
const TEMPLATE_WIT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/component/wit/package.wit"
));
const TEMPLATE_README: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/component/README.md"
));

pub const WIT_FILE: &str = "wit/package.wit";

#[derive(Debug)]
pub struct TemplateContext {
    pub component_kebab: String,
    pub namespace: String,
    placeholders: BTreeMap<&'static str, String>,
}

impl TemplateContext {
    pub fn new(name: &str, namespace: &str) -> SyncResult<Self> {
        let name = name.trim();
        validate_component_name(name)?;
        let namespace = namespace.trim().to_string();
        validate_namespace(&namespace)?;

        let mut placeholders = BTreeMap::new();
        placeholders.insert("component_kebab", name.to_string());
        placeholders.insert(
            "component_snake",
            name.from_case(Case::Kebab).to_case(Case::Snake),
        );
        placeholders.insert("namespace", namespace.clone());
        placeholders.insert(
            "namespace_snake",
            namespace.from_case(Case::Kebab).to_case(Case::Snake),
        );
        Ok(Self {
            component_kebab: name.to_string(),
            namespace,
            placeholders,
        })
    }

    pub fn render(&self, template: &str) -> String {
        let mut output = template.to_owned();
        for (key, value) in &self.placeholders {
            let token = format!("{{{{{key}}}}}");
            output = output.replace(&token, value);
        }
        output
    }
}

#[derive(Debug)]
pub struct Scaffold {
    pub dir: PathBuf,
    pub wit_path: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Writes a new component project into `dir`, which must not exist yet
/// (an empty directory is accepted).
pub fn scaffold_component(dir: &Path, context: &TemplateContext) -> SyncResult<Scaffold> {
    if dir.exists() {
        let mut entries = fs::read_dir(dir).map_err(|err| SyncError::io(dir, err))?;
        if entries.next().is_some() {
            return Err(SyncError::InvalidInput(format!(
                "directory {} already exists and is not empty",
                dir.display()
            )));
        }
    }

    let files = [
        ("Cargo.toml", TEMPLATE_CARGO),
        ("README.md", TEMPLATE_README),
        ("src/lib.rs", TEMPLATE_SRC_LIB),
        (WIT_FILE, TEMPLATE_WIT),
    ];
    let mut written = Vec::with_capacity(files.len());
    for (relative, template) in files {
        let path = dir.join(relative);
        write_template(&path, template, context)?;
        written.push(path);
    }
    debug!(dir = %dir.display(), files = written.len(), "scaffolded component");
    Ok(Scaffold {
        dir: dir.to_path_buf(),
        wit_path: dir.join(WIT_FILE),
        files: written,
    })
}

fn write_template(path: &Path, template: &str, context: &TemplateContext) -> SyncResult<()> {
    if path.exists() {
        return Err(SyncError::InvalidInput(format!(
            "file `{}` already exists",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| SyncError::io(parent, err))?;
    }
    fs::write(path, context.render(template)).map_err(|err| SyncError::io(path, err))
}

pub fn validate_component_name(name: &str) -> SyncResult<()> {
    check_wit_identifier(name).map_err(|reason| {
        SyncError::InvalidInput(format!("invalid component name `{name}`: {reason}"))
    })
}
