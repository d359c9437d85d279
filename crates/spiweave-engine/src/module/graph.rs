//! In-memory module graph

use super::{ModuleGraph, ModuleId, PackageWire};
use crate::classfile::package_of;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
struct ModuleEntry {
    wires: Vec<PackageWire>,
    /// Resource path (`a/b/C.class`) to bytes
    classes: HashMap<String, Arc<[u8]>>,
}

#[derive(Debug, Default)]
struct GraphState {
    modules: HashMap<ModuleId, ModuleEntry>,
    platform: HashMap<String, Arc<[u8]>>,
}

/// A module graph held in memory
///
/// Class lookups from a module follow the same delegation a module class
/// space does: a wired package is answered by its provider, otherwise by the
/// module itself, and finally by the platform class space.
#[derive(Debug, Default)]
pub struct StaticModuleGraph {
    state: RwLock<GraphState>,
}

impl StaticModuleGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a module (no-op if already present)
    pub fn add_module(&self, id: ModuleId) {
        self.state.write().modules.entry(id).or_default();
    }

    /// Uninstall a module and every wire pointing at it
    pub fn remove_module(&self, id: &ModuleId) -> bool {
        let mut state = self.state.write();
        let removed = state.modules.remove(id).is_some();
        for entry in state.modules.values_mut() {
            entry.wires.retain(|wire| &wire.provider != id);
        }
        removed
    }

    /// Wire `package` imported by `consumer` to `provider`
    ///
    /// Both modules are installed if missing. Re-wiring a package replaces
    /// the previous provider.
    pub fn wire(&self, consumer: &ModuleId, package: &str, provider: &ModuleId) {
        let mut state = self.state.write();
        state.modules.entry(provider.clone()).or_default();
        let entry = state.modules.entry(consumer.clone()).or_default();
        entry.wires.retain(|wire| wire.package != package);
        entry.wires.push(PackageWire {
            package: package.to_string(),
            provider: provider.clone(),
        });
    }

    /// Add a class owned by `module`, keyed by internal name
    pub fn add_class(&self, module: &ModuleId, internal_name: &str, bytes: impl Into<Arc<[u8]>>) {
        let mut state = self.state.write();
        state
            .modules
            .entry(module.clone())
            .or_default()
            .classes
            .insert(format!("{}.class", internal_name), bytes.into());
    }

    /// Add a class visible from every module
    pub fn add_platform_class(&self, internal_name: &str, bytes: impl Into<Arc<[u8]>>) {
        self.state
            .write()
            .platform
            .insert(format!("{}.class", internal_name), bytes.into());
    }

    /// Installed modules, sorted
    pub fn modules(&self) -> Vec<ModuleId> {
        let mut modules: Vec<_> = self.state.read().modules.keys().cloned().collect();
        modules.sort();
        modules
    }

    /// Whether a module is installed
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.state.read().modules.contains_key(id)
    }
}

impl ModuleGraph for StaticModuleGraph {
    fn package_wires(&self, module: &ModuleId) -> Vec<PackageWire> {
        self.state
            .read()
            .modules
            .get(module)
            .map(|entry| entry.wires.clone())
            .unwrap_or_default()
    }

    fn class_resource(&self, module: &ModuleId, resource: &str) -> Option<Arc<[u8]>> {
        let state = self.state.read();
        let entry = state.modules.get(module)?;

        let internal = resource.strip_suffix(".class").unwrap_or(resource);
        let package = package_of(internal);
        let wired = entry
            .wires
            .iter()
            .find(|wire| wire.package == package)
            .and_then(|wire| state.modules.get(&wire.provider));

        let found = match wired {
            Some(provider) => provider.classes.get(resource),
            None => entry.classes.get(resource),
        };
        found.or_else(|| state.platform.get(resource)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(tag: u8) -> Arc<[u8]> {
        Arc::from(vec![tag])
    }

    #[test]
    fn test_class_lookup_follows_wiring() {
        let graph = StaticModuleGraph::new();
        let app = ModuleId::new("app", "1.0");
        let lib = ModuleId::new("lib", "2.0");
        graph.add_class(&app, "app/Main", bytes(1));
        graph.add_class(&lib, "lib/api/Base", bytes(2));
        graph.add_platform_class("java/lang/Object", bytes(3));

        assert!(graph.class_resource(&app, "lib/api/Base.class").is_none());

        graph.wire(&app, "lib.api", &lib);
        assert_eq!(graph.provider_of(&app, "lib.api"), Some(lib.clone()));
        assert_eq!(graph.class_resource(&app, "lib/api/Base.class"), Some(bytes(2)));
        assert_eq!(graph.class_resource(&app, "app/Main.class"), Some(bytes(1)));
        assert_eq!(graph.class_resource(&lib, "java/lang/Object.class"), Some(bytes(3)));
    }

    #[test]
    fn test_rewire_and_remove() {
        let graph = StaticModuleGraph::new();
        let app = ModuleId::new("app", "1.0");
        let old = ModuleId::new("lib", "1.0");
        let new = ModuleId::new("lib", "2.0");

        graph.wire(&app, "lib.api", &old);
        graph.wire(&app, "lib.api", &new);
        assert_eq!(graph.package_wires(&app).len(), 1);
        assert_eq!(graph.provider_of(&app, "lib.api"), Some(new.clone()));

        assert!(graph.remove_module(&new));
        assert!(graph.package_wires(&app).is_empty());
        assert!(!graph.contains(&new));
        assert_eq!(graph.modules(), vec![app, old]);
    }

    #[test]
    fn test_unknown_module_sees_nothing() {
        let graph = StaticModuleGraph::new();
        graph.add_platform_class("java/lang/Object", bytes(3));
        let ghost = ModuleId::new("ghost", "0");
        assert!(graph.class_resource(&ghost, "java/lang/Object.class").is_none());
    }
}
