use std::path::Path;

use semver::Version;
use wit_component::DecodedWasm;
use wit_parser::Resolve;

use crate::error::{SyncError, SyncResult};
use crate::reference::ResourceId;

/// WIT package encoded as a wasm binary, with the identity it declares.
#[derive(Debug, Clone)]
pub struct EncodedPackage {
    pub id: ResourceId,
    pub version: Version,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    pub name: String,
    pub interfaces: Vec<String>,
    pub worlds: Vec<String>,
}

/// Parses the WIT file or directory at `path` and encodes its package.
pub fn encode_package(path: &Path) -> SyncResult<EncodedPackage> {
    if !path.exists() {
        return Err(SyncError::InvalidInput(format!(
            "WIT path {} does not exist",
            path.display()
        )));
    }
    let mut resolve = Resolve::default();
    let (pkg_id, _) = resolve.push_path(path).map_err(|err| {
        SyncError::InvalidInput(format!("failed to parse WIT at {}: {err:#}", path.display()))
    })?;
    let name = resolve.packages[pkg_id].name.clone();
    let version = name.version.clone().ok_or_else(|| {
        SyncError::InvalidInput(format!(
            "WIT package `{}:{}` needs a version (package {}:{}@0.1.0;)",
            name.namespace, name.name, name.namespace, name.name
        ))
    })?;
    let id = ResourceId::new(name.namespace.as_str(), name.name.as_str())?;
    let bytes = wit_component::encode(&resolve, pkg_id).map_err(|err| {
        SyncError::InvalidInput(format!("failed to encode WIT package {id}: {err:#}"))
    })?;
    Ok(EncodedPackage { id, version, bytes })
}

/// Names the package, interfaces and worlds inside an encoded WIT package.
pub fn describe_package(bytes: &[u8]) -> SyncResult<PackageSummary> {
    let decoded = wit_component::decode(bytes)
        .map_err(|err| SyncError::InvalidInput(format!("failed to decode package: {err:#}")))?;
    let (resolve, pkg_id) = match decoded {
        DecodedWasm::WitPackage(resolve, pkg_id) => (resolve, pkg_id),
        DecodedWasm::Component(..) => {
            return Err(SyncError::InvalidInput(
                "expected a WIT package but found a component".into(),
            ));
        }
    };
    let package = &resolve.packages[pkg_id];
    Ok(PackageSummary {
        name: package.name.to_string(),
        interfaces: package.interfaces.keys().cloned().collect(),
        worlds: package.worlds.keys().cloned().collect(),
    })
}

/// Rejects anything that is not a wasm component (plain modules, WIT packages).
pub fn check_component(bytes: &[u8]) -> SyncResult<()> {
    match wit_component::decode(bytes) {
        Ok(DecodedWasm::Component(..)) => Ok(()),
        Ok(DecodedWasm::WitPackage(..)) => Err(SyncError::InvalidInput(
            "expected a component implementation but found a WIT package".into(),
        )),
        Err(err) => Err(SyncError::InvalidInput(format!(
            "not a wasm component: {err:#}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const WIT: &str = r#"
package acme:greeter@0.2.0;

interface api {
    greet: func(name: string) -> string;
}

world component {
    export api;
}
"#;

    #[test]
    fn encodes_and_describes_package() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("package.wit");
        fs::write(&path, WIT).unwrap();

        let encoded = encode_package(&path).unwrap();
        assert_eq!(encoded.id.to_string(), "acme:greeter");
        assert_eq!(encoded.version, Version::new(0, 2, 0));

        let summary = describe_package(&encoded.bytes).unwrap();
        assert_eq!(summary.name, "acme:greeter@0.2.0");
        assert_eq!(summary.interfaces, vec!["api".to_string()]);
        assert_eq!(summary.worlds, vec!["component".to_string()]);

        assert!(check_component(&encoded.bytes).is_err());
    }

    #[test]
    fn unversioned_package_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("package.wit");
        fs::write(&path, WIT.replace("@0.2.0", "")).unwrap();
        let err = encode_package(&path).unwrap_err();
        assert!(err.to_string().contains("needs a version"));
    }

    #[test]
    fn garbage_is_not_a_package() {
        assert!(describe_package(b"not wasm").is_err());
        assert!(encode_package(Path::new("/definitely/missing.wit")).is_err());
    }
}
