//! Module view
//!
//! The weaver never loads classes. Everything it knows about the running
//! module system comes through a [`ModuleGraph`]: which module provides each
//! package a module imports, and the raw bytes of classes visible through a
//! module's class space.

pub mod filter;
pub mod graph;
pub mod header;

pub use filter::{Filter, FilterError};
pub use graph::StaticModuleGraph;
pub use header::{Clause, HeaderError, Parameters};

use std::fmt;
use std::sync::Arc;

/// Identity of an installed module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    /// Symbolic name
    pub name: String,
    /// Version string
    pub version: String,
}

impl ModuleId {
    /// Create a module identity
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse `name@version`; a missing version defaults to `0.0.0`
    pub fn parse(text: &str) -> Self {
        match text.split_once('@') {
            Some((name, version)) => Self::new(name.trim(), version.trim()),
            None => Self::new(text.trim(), "0.0.0"),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A resolved package import: `package` is provided by `provider`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageWire {
    /// Dotted package name
    pub package: String,
    /// Module exporting the package
    pub provider: ModuleId,
}

/// Read-only view of the wired module graph
///
/// Implementations must be safe for concurrent reads; the weaver queries the
/// graph from whichever threads define classes.
pub trait ModuleGraph: Send + Sync {
    /// Resolved package imports of `module`, in wiring order
    fn package_wires(&self, module: &ModuleId) -> Vec<PackageWire>;

    /// Bytes of a class resource (`a/b/C.class`) as visible from `module`
    ///
    /// Platform classes are visible from every module.
    fn class_resource(&self, module: &ModuleId, resource: &str) -> Option<Arc<[u8]>>;

    /// Module providing `package` to `module`, if it is wired
    fn provider_of(&self, module: &ModuleId, package: &str) -> Option<ModuleId> {
        self.package_wires(module)
            .into_iter()
            .find(|wire| wire.package == package)
            .map(|wire| wire.provider)
    }
}

impl<G: ModuleGraph + ?Sized> ModuleGraph for Arc<G> {
    fn package_wires(&self, module: &ModuleId) -> Vec<PackageWire> {
        (**self).package_wires(module)
    }

    fn class_resource(&self, module: &ModuleId, resource: &str) -> Option<Arc<[u8]>> {
        (**self).class_resource(module, resource)
    }
}
