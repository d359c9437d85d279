//! JSON module-graph manifests
//!
//! A manifest describes an installed module set for offline weaving:
//!
//! ```json
//! {
//!   "platform": { "java/lang/Object": "platform/Object.spwc" },
//!   "modules": [
//!     {
//!       "name": "app",
//!       "version": "1.0.0",
//!       "require_capability": "osgi.extender;filter:=\"(osgi.extender=osgi.serviceloader.processor)\"",
//!       "wires": { "zoo.api": "zoo@1.0.0" },
//!       "classes": { "app/Parser": "app/Parser.spwc" }
//!     }
//!   ]
//! }
//! ```
//!
//! Class paths are relative to the manifest's directory.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use spiweave_engine::{ModuleId, ModuleInfo, StaticModuleGraph};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One module entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// Symbolic name
    pub name: String,
    /// Version
    #[serde(default = "default_version")]
    pub version: String,
    /// Requirement header text
    #[serde(default)]
    pub require_capability: Option<String>,
    /// Imported package → providing module (`name@version`)
    #[serde(default)]
    pub wires: BTreeMap<String, String>,
    /// Internal class name → class file path
    #[serde(default)]
    pub classes: BTreeMap<String, PathBuf>,
}

impl ModuleEntry {
    /// Identity of this module
    pub fn id(&self) -> ModuleId {
        ModuleId::new(&self.name, &self.version)
    }
}

fn default_version() -> String {
    "0.0.0".to_string()
}

/// A module-graph manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Platform classes: internal name → class file path
    #[serde(default)]
    pub platform: BTreeMap<String, PathBuf>,
    /// Installed modules
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Manifest {
    /// Read a manifest from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest: Manifest = serde_json::from_str(&text)
            .with_context(|| format!("Invalid manifest {}", path.display()))?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(manifest)
    }

    /// Look up a module entry by `name` or `name@version`
    pub fn module(&self, name: &str) -> Result<&ModuleEntry> {
        let wanted = ModuleId::parse(name);
        let has_version = name.contains('@');
        let found = self
            .modules
            .iter()
            .find(|entry| entry.name == wanted.name && (!has_version || entry.version == wanted.version));
        match found {
            Some(entry) => Ok(entry),
            None => bail!("Module {} is not in the manifest", name),
        }
    }

    /// Lifecycle descriptions of every module
    pub fn module_infos(&self) -> Vec<ModuleInfo> {
        self.modules
            .iter()
            .map(|entry| ModuleInfo::new(entry.id(), entry.require_capability.as_deref()))
            .collect()
    }

    /// Build the in-memory graph, reading every class file
    pub fn build_graph(&self) -> Result<StaticModuleGraph> {
        let graph = StaticModuleGraph::new();
        for (name, path) in &self.platform {
            graph.add_platform_class(name, self.read(path)?);
        }
        for entry in &self.modules {
            let id = entry.id();
            graph.add_module(id.clone());
            for (name, path) in &entry.classes {
                graph.add_class(&id, name, self.read(path)?);
            }
        }
        for entry in &self.modules {
            let id = entry.id();
            for (package, provider) in &entry.wires {
                let provider = self.module(provider).with_context(|| {
                    format!("Module {} wires {} to an unknown module", id, package)
                })?;
                graph.wire(&id, package, &provider.id());
            }
        }
        Ok(graph)
    }

    /// Path of a class file, resolved against the manifest's directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        std::fs::read(&full).with_context(|| format!("Failed to read class {}", full.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiweave_engine::{ClassFile, ModuleGraph, ROOT_TYPE};

    #[test]
    fn test_manifest_builds_graph() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Object.spwc"), ClassFile::new(ROOT_TYPE, None).encode()).unwrap();
        std::fs::write(
            dir.path().join("Dog.spwc"),
            ClassFile::new("zoo/api/Dog", Some(ROOT_TYPE)).encode(),
        )
        .unwrap();
        let json = r#"{
            "platform": { "java/lang/Object": "Object.spwc" },
            "modules": [
                { "name": "app", "version": "1.0.0", "wires": { "zoo.api": "zoo" } },
                { "name": "zoo", "version": "2.0.0", "classes": { "zoo/api/Dog": "Dog.spwc" } }
            ]
        }"#;
        let path = dir.path().join("graph.json");
        std::fs::write(&path, json).unwrap();

        let manifest = Manifest::from_file(&path).unwrap();
        assert_eq!(manifest.module("zoo@2.0.0").unwrap().name, "zoo");
        assert!(manifest.module("zoo@9").is_err());

        let graph = manifest.build_graph().unwrap();
        let app = ModuleId::new("app", "1.0.0");
        assert!(graph.class_resource(&app, "zoo/api/Dog.class").is_some());
        assert!(graph.class_resource(&app, "java/lang/Object.class").is_some());
    }

    #[test]
    fn test_unknown_wire_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(&path, r#"{ "modules": [ { "name": "app", "wires": { "x": "ghost" } } ] }"#).unwrap();
        let manifest = Manifest::from_file(&path).unwrap();
        assert_eq!(manifest.modules[0].version, "0.0.0");
        assert!(manifest.build_graph().is_err());
    }
}
