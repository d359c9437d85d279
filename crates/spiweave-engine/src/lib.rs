//! Spiweave Engine
//!
//! Build-time half of the service-loader weaver. Classes of consuming modules
//! have their static XML factory calls redirected to locator routines that
//! pick the right provider module at run time.
//!
//! - **Class container**: binary format, editable code, frame computation (`classfile` module)
//! - **Module view**: wiring graph, header and filter languages (`module` module)
//! - **Weaving**: rules, ancestry, rewriting, lifecycle tracking (`weaving` module)
//! - **Configuration**: auto-consumer patterns (`config` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use spiweave_engine::{ModuleInfo, ModuleTracker, WeavingHook, WovenClass};
//!
//! let tracker = Arc::new(ModuleTracker::new(WeaverConfig::from_env()?));
//! tracker.added(&ModuleInfo::new(app.clone(), Some(header)));
//!
//! let hook = WeavingHook::new(tracker, graph);
//! let mut class = WovenClass::new("app.Reader", app, bytes);
//! let outcome = hook.weave(&mut class);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Modules
// ============================================================================

/// Class container format
pub mod classfile;

/// Process-wide configuration
pub mod config;

/// Module graph view and declarative header languages
pub mod module;

/// Call-site weaving
pub mod weaving;

// ============================================================================
// Re-exports
// ============================================================================

pub use classfile::{ClassFile, ClassHeader, CommonSuperclass, ROOT_TYPE};
pub use config::{ConfigError, WeaverConfig, AUTO_CONSUMERS_ENV, AUTO_CONSUMER_HEADER};
pub use module::{ModuleGraph, ModuleId, PackageWire, StaticModuleGraph};
pub use weaving::{
    AncestorResolver, CallSiteRewriter, FactoryCall, FactoryMethod, FactoryShape, FactoryType,
    ModuleEvent, ModuleInfo, ModuleRuleSet, ModuleTracker, RewriteOutcome, WeavingHook,
    WovenClass,
};
