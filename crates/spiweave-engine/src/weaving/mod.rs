//! Instrumentation
//!
//! Build-time side of the weaver, leaves first:
//!
//! - [`catalog`]: the closed set of rewritable factory calls and locator names
//! - [`rules`]: consumer headers to per-module rule sets
//! - [`ancestor`]: common superclasses from module wiring, without loading
//! - [`rewriter`]: call-site replacement and frame recomputation
//! - [`tracker`]: module lifecycle → rule set map
//! - [`hook`]: per-class entry point

pub mod ancestor;
pub mod catalog;
pub mod hook;
pub mod rewriter;
pub mod rules;
pub mod tracker;

pub use ancestor::{AncestorError, AncestorResolver};
pub use catalog::{
    locator_name, FactoryCall, FactoryMethod, FactoryShape, FactoryType, LOCATOR_OWNER,
    LOCATOR_PACKAGE, LOCATOR_PREFIX,
};
pub use hook::{WeavingHook, WovenClass};
pub use rewriter::{CallSiteRewriter, RewriteError, RewriteOutcome};
pub use rules::{
    build_rules, build_rules_from_text, ModuleRuleSet, ProviderDescriptor, RewriteRule, RuleError,
    EXTENDER_NAMESPACE, SERVICELOADER_NAMESPACE,
};
pub use tracker::{ModuleEvent, ModuleInfo, ModuleTracker, TrackedModule};
