//! Live module and service state
//!
//! The locator asks three questions of the running system: which module owns
//! a calling class, which modules currently publish a given service type, and
//! what a module's loader context is. [`ModuleRuntime`] is that interface;
//! [`StaticModuleRuntime`] answers it from in-memory registrations.

use crate::context::LoaderContext;
use parking_lot::RwLock;
use spiweave_engine::ModuleId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Service query failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The consuming module is not installed
    #[error("Unknown module: {0}")]
    UnknownModule(ModuleId),

    /// The consumer may not see services of this type
    #[error("Module {module} may not obtain {service_type} services")]
    Denied {
        /// Consumer
        module: ModuleId,
        /// Requested service type
        service_type: String,
    },

    /// Any other failure of the host's service registry
    #[error("Service query failed: {0}")]
    Query(String),
}

/// A module publishing a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProvider {
    /// Publishing module
    pub module: ModuleId,
    /// Service registration properties
    pub properties: BTreeMap<String, String>,
}

impl ServiceProvider {
    /// A provider without properties
    pub fn new(module: ModuleId) -> Self {
        Self {
            module,
            properties: BTreeMap::new(),
        }
    }

    /// Add a registration property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Read-only view of the live module system
///
/// Implementations must be safe for concurrent reads.
pub trait ModuleRuntime: Send + Sync {
    /// Module that defined a class, by internal name
    fn module_of(&self, class: &str) -> Option<ModuleId>;

    /// Providers of `service_type` visible to `consumer`, in registration order
    fn providers(
        &self,
        consumer: &ModuleId,
        service_type: &str,
    ) -> Result<Vec<ServiceProvider>, ServiceError>;

    /// Loader context of a module
    fn loader_context(&self, module: &ModuleId) -> Option<Arc<dyn LoaderContext>>;
}

struct Registration {
    service_type: String,
    provider: ServiceProvider,
}

#[derive(Default)]
struct RuntimeState {
    loaders: HashMap<ModuleId, Arc<dyn LoaderContext>>,
    class_owners: HashMap<String, ModuleId>,
    registrations: Vec<Registration>,
}

/// In-memory module runtime
#[derive(Default)]
pub struct StaticModuleRuntime {
    state: RwLock<RuntimeState>,
}

impl StaticModuleRuntime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a module with its loader context
    pub fn add_module(&self, id: ModuleId, loader: Arc<dyn LoaderContext>) {
        self.state.write().loaders.insert(id, loader);
    }

    /// Uninstall a module, its classes and its services
    pub fn remove_module(&self, id: &ModuleId) -> bool {
        let mut state = self.state.write();
        let removed = state.loaders.remove(id).is_some();
        state.class_owners.retain(|_, owner| owner != id);
        state
            .registrations
            .retain(|registration| &registration.provider.module != id);
        removed
    }

    /// Record that `module` defined a class (internal name)
    pub fn define_class(&self, module: &ModuleId, class: &str) {
        self.state
            .write()
            .class_owners
            .insert(class.to_string(), module.clone());
    }

    /// Publish a service
    pub fn register_service(&self, service_type: &str, provider: ServiceProvider) {
        self.state.write().registrations.push(Registration {
            service_type: service_type.to_string(),
            provider,
        });
    }

    /// Withdraw every service a module published; returns how many
    pub fn unregister_services(&self, module: &ModuleId) -> usize {
        let mut state = self.state.write();
        let before = state.registrations.len();
        state
            .registrations
            .retain(|registration| &registration.provider.module != module);
        before - state.registrations.len()
    }
}

impl ModuleRuntime for StaticModuleRuntime {
    fn module_of(&self, class: &str) -> Option<ModuleId> {
        self.state.read().class_owners.get(class).cloned()
    }

    fn providers(
        &self,
        consumer: &ModuleId,
        service_type: &str,
    ) -> Result<Vec<ServiceProvider>, ServiceError> {
        let state = self.state.read();
        if !state.loaders.contains_key(consumer) {
            return Err(ServiceError::UnknownModule(consumer.clone()));
        }
        Ok(state
            .registrations
            .iter()
            .filter(|registration| registration.service_type == service_type)
            .map(|registration| registration.provider.clone())
            .collect())
    }

    fn loader_context(&self, module: &ModuleId) -> Option<Arc<dyn LoaderContext>> {
        self.state.read().loaders.get(module).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ModuleLoaderContext;
    use spiweave_engine::StaticModuleGraph;

    fn runtime() -> StaticModuleRuntime {
        let graph = Arc::new(StaticModuleGraph::new());
        let runtime = StaticModuleRuntime::new();
        for name in ["app", "woodstox", "aalto"] {
            let id = ModuleId::new(name, "1.0");
            runtime.add_module(id.clone(), Arc::new(ModuleLoaderContext::new(id, graph.clone())));
        }
        runtime
    }

    #[test]
    fn test_providers_in_registration_order() {
        let runtime = runtime();
        let app = ModuleId::new("app", "1.0");
        runtime.register_service("javax.xml.stream.XMLInputFactory", ServiceProvider::new(ModuleId::new("woodstox", "1.0")));
        runtime.register_service("javax.xml.stream.XMLOutputFactory", ServiceProvider::new(ModuleId::new("woodstox", "1.0")));
        runtime.register_service("javax.xml.stream.XMLInputFactory", ServiceProvider::new(ModuleId::new("aalto", "1.0")));

        let providers = runtime.providers(&app, "javax.xml.stream.XMLInputFactory").unwrap();
        let names: Vec<_> = providers.iter().map(|p| p.module.name.as_str()).collect();
        assert_eq!(names, ["woodstox", "aalto"]);
        assert!(runtime.providers(&app, "javax.xml.stream.XMLEventFactory").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_consumer() {
        let runtime = runtime();
        let ghost = ModuleId::new("ghost", "1.0");
        assert_eq!(
            runtime.providers(&ghost, "x"),
            Err(ServiceError::UnknownModule(ghost))
        );
    }

    #[test]
    fn test_remove_module_withdraws_everything() {
        let runtime = runtime();
        let app = ModuleId::new("app", "1.0");
        let woodstox = ModuleId::new("woodstox", "1.0");
        runtime.define_class(&woodstox, "com/ctc/wstx/stax/WstxInputFactory");
        runtime.register_service("javax.xml.stream.XMLInputFactory", ServiceProvider::new(woodstox.clone()));

        assert_eq!(runtime.module_of("com/ctc/wstx/stax/WstxInputFactory"), Some(woodstox.clone()));
        assert!(runtime.remove_module(&woodstox));
        assert_eq!(runtime.module_of("com/ctc/wstx/stax/WstxInputFactory"), None);
        assert!(runtime.loader_context(&woodstox).is_none());
        assert!(runtime.providers(&app, "javax.xml.stream.XMLInputFactory").unwrap().is_empty());
    }

    #[test]
    fn test_unregister_services() {
        let runtime = runtime();
        let aalto = ModuleId::new("aalto", "1.0");
        runtime.register_service("a", ServiceProvider::new(aalto.clone()));
        runtime.register_service("b", ServiceProvider::new(aalto.clone()).with_property("vendor", "fasterxml"));
        assert_eq!(runtime.unregister_services(&aalto), 2);
        assert_eq!(runtime.unregister_services(&aalto), 0);
    }
}
