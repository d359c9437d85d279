//! Common-ancestor resolution without class loading
//!
//! Frame computation needs the nearest common superclass of two types. The
//! usual answer comes from loading both classes, which must not happen while a
//! class is being defined: it would re-enter the weaving hook and resolve
//! through the wrong class space. Instead, each type's superclass chain is
//! read from class headers, following the module graph's package wiring to
//! find the module that provides each package along the way.

use crate::classfile::{class_resource, package_of, ClassError, ClassHeader, CommonSuperclass, ROOT_TYPE};
use crate::module::{ModuleGraph, ModuleId};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Ancestry resolution failures
///
/// None of these abort weaving; they degrade the merged type to the root.
#[derive(Debug, Error)]
pub enum AncestorError {
    /// No class resource for the type in the module currently consulted
    #[error("Class {class} not visible from module {module}")]
    ClassNotFound {
        /// Internal class name
        class: String,
        /// Module consulted
        module: ModuleId,
    },

    /// The resource exists but its header cannot be read
    #[error("Unreadable header for class {class}: {source}")]
    Header {
        /// Internal class name
        class: String,
        /// Underlying error
        #[source]
        source: ClassError,
    },

    /// A type other than the root declares no superclass
    #[error("Class {0} has no superclass")]
    MissingSuperclass(String),

    /// The superclass chain loops
    #[error("Superclass cycle through {0}")]
    Cycle(String),
}

/// Resolves common ancestors from the point of view of one module
pub struct AncestorResolver<'a> {
    graph: &'a dyn ModuleGraph,
    starting_module: ModuleId,
}

impl<'a> AncestorResolver<'a> {
    /// Create a resolver rooted at `starting_module`'s wiring
    pub fn new(graph: &'a dyn ModuleGraph, starting_module: ModuleId) -> Self {
        Self {
            graph,
            starting_module,
        }
    }

    /// Module whose wiring lookups start from
    pub fn starting_module(&self) -> &ModuleId {
        &self.starting_module
    }

    /// Nearest common ancestor of two internal type names
    pub fn common_ancestor(&self, a: &str, b: &str) -> Result<String, AncestorError> {
        if a == b {
            return Ok(a.to_string());
        }
        if a == ROOT_TYPE || b == ROOT_TYPE {
            return Ok(ROOT_TYPE.to_string());
        }

        let chain_a = self.superclass_chain(a)?;
        let chain_b = self.superclass_chain(b)?;

        // Both chains start at the root, so at least one element matches
        let shared = chain_a
            .iter()
            .zip(&chain_b)
            .take_while(|(x, y)| x == y)
            .last()
            .map(|(x, _)| x.clone());
        Ok(shared.unwrap_or_else(|| ROOT_TYPE.to_string()))
    }

    /// Chain from the root type down to `class` itself
    pub fn superclass_chain(&self, class: &str) -> Result<Vec<String>, AncestorError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut module = self.starting_module.clone();
        let mut package: Option<String> = None;
        let mut current = class.to_string();

        loop {
            if !seen.insert(current.clone()) {
                return Err(AncestorError::Cycle(current));
            }
            chain.push(current.clone());
            if current == ROOT_TYPE {
                break;
            }

            let next_package = package_of(&current);
            if package.as_deref() != Some(next_package.as_str()) {
                // Package changed: the provider may be another module
                if let Some(provider) = self.graph.provider_of(&module, &next_package) {
                    module = provider;
                }
                package = Some(next_package);
            }

            let super_name = self.read_superclass(&module, &current)?;
            current = super_name;
        }

        chain.reverse();
        Ok(chain)
    }

    fn read_superclass(&self, module: &ModuleId, class: &str) -> Result<String, AncestorError> {
        let bytes = self
            .graph
            .class_resource(module, &class_resource(class))
            .ok_or_else(|| AncestorError::ClassNotFound {
                class: class.to_string(),
                module: module.clone(),
            })?;
        let header = ClassHeader::read(&bytes).map_err(|source| AncestorError::Header {
            class: class.to_string(),
            source,
        })?;
        header
            .super_name
            .ok_or_else(|| AncestorError::MissingSuperclass(class.to_string()))
    }
}

impl CommonSuperclass for AncestorResolver<'_> {
    fn common_super_class(&self, a: &str, b: &str) -> Option<String> {
        match self.common_ancestor(a, b) {
            Ok(ancestor) => Some(ancestor),
            Err(err) => {
                debug!(
                    module = %self.starting_module,
                    a,
                    b,
                    error = %err,
                    "common ancestor unknown"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::ClassFile;
    use crate::module::StaticModuleGraph;

    fn class(name: &str, super_name: Option<&str>) -> Vec<u8> {
        ClassFile::new(name, super_name).encode()
    }

    /// app imports `zoo.api` from `zoo`; `zoo` holds a hierarchy under Animal
    fn zoo_graph() -> (StaticModuleGraph, ModuleId) {
        let graph = StaticModuleGraph::new();
        let app = ModuleId::new("app", "1.0");
        let zoo = ModuleId::new("zoo", "1.0");

        graph.add_platform_class(ROOT_TYPE, class(ROOT_TYPE, None));
        graph.add_class(&zoo, "zoo/api/Animal", class("zoo/api/Animal", Some(ROOT_TYPE)));
        graph.add_class(&zoo, "zoo/api/Dog", class("zoo/api/Dog", Some("zoo/api/Animal")));
        graph.add_class(&zoo, "zoo/api/Puppy", class("zoo/api/Puppy", Some("zoo/api/Dog")));
        graph.add_class(&zoo, "zoo/api/Cat", class("zoo/api/Cat", Some("zoo/api/Animal")));
        graph.add_class(&app, "app/Robot", class("app/Robot", Some(ROOT_TYPE)));
        graph.add_class(&app, "app/Pet", class("app/Pet", Some("zoo/api/Dog")));
        graph.wire(&app, "zoo.api", &zoo);
        (graph, app)
    }

    #[test]
    fn test_common_ancestor_across_modules() {
        let (graph, app) = zoo_graph();
        let resolver = AncestorResolver::new(&graph, app);

        assert_eq!(resolver.common_ancestor("zoo/api/Dog", "zoo/api/Cat").unwrap(), "zoo/api/Animal");
        assert_eq!(resolver.common_ancestor("zoo/api/Puppy", "zoo/api/Dog").unwrap(), "zoo/api/Dog");
        assert_eq!(resolver.common_ancestor("app/Pet", "zoo/api/Cat").unwrap(), "zoo/api/Animal");
        assert_eq!(resolver.common_ancestor("app/Robot", "zoo/api/Cat").unwrap(), ROOT_TYPE);
    }

    #[test]
    fn test_symmetry_and_identity() {
        let (graph, app) = zoo_graph();
        let resolver = AncestorResolver::new(&graph, app);
        let names = ["zoo/api/Dog", "zoo/api/Cat", "zoo/api/Puppy", "app/Pet", "app/Robot", ROOT_TYPE];
        for a in names {
            assert_eq!(resolver.common_ancestor(a, a).unwrap(), a);
            for b in names {
                assert_eq!(
                    resolver.common_ancestor(a, b).unwrap(),
                    resolver.common_ancestor(b, a).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_chain_switches_module_on_package_change() {
        let (graph, app) = zoo_graph();
        let resolver = AncestorResolver::new(&graph, app);
        assert_eq!(
            resolver.superclass_chain("app/Pet").unwrap(),
            vec![ROOT_TYPE, "zoo/api/Animal", "zoo/api/Dog", "app/Pet"]
        );
    }

    #[test]
    fn test_unwired_class_is_unknown() {
        let (graph, _) = zoo_graph();
        let loner = ModuleId::new("loner", "1.0");
        graph.add_module(loner.clone());
        let resolver = AncestorResolver::new(&graph, loner);

        assert!(matches!(
            resolver.common_ancestor("zoo/api/Dog", "zoo/api/Cat"),
            Err(AncestorError::ClassNotFound { .. })
        ));
        assert_eq!(resolver.common_super_class("zoo/api/Dog", "zoo/api/Cat"), None);
        // The root fast path needs no lookup at all
        assert_eq!(
            resolver.common_super_class("zoo/api/Dog", ROOT_TYPE),
            Some(ROOT_TYPE.to_string())
        );
    }

    #[test]
    fn test_garbage_resource_is_unknown() {
        let graph = StaticModuleGraph::new();
        let app = ModuleId::new("app", "1.0");
        graph.add_class(&app, "app/A", vec![1u8, 2, 3]);
        graph.add_class(&app, "app/B", class("app/B", Some(ROOT_TYPE)));
        let resolver = AncestorResolver::new(&graph, app);
        assert!(matches!(
            resolver.common_ancestor("app/A", "app/B"),
            Err(AncestorError::Header { .. })
        ));
    }

    #[test]
    fn test_superclass_cycle() {
        let graph = StaticModuleGraph::new();
        let app = ModuleId::new("app", "1.0");
        graph.add_class(&app, "app/A", class("app/A", Some("app/B")));
        graph.add_class(&app, "app/B", class("app/B", Some("app/A")));
        let resolver = AncestorResolver::new(&graph, app);
        assert!(matches!(
            resolver.superclass_chain("app/A"),
            Err(AncestorError::Cycle(_))
        ));
    }
}
