//! Class-definition entry point
//!
//! The host calls [`WeavingHook::weave`] once for every class it is about to
//! define, from whichever thread defines it.

use super::ancestor::AncestorResolver;
use super::rewriter::{CallSiteRewriter, RewriteOutcome};
use super::tracker::ModuleTracker;
use crate::module::{ModuleGraph, ModuleId};
use std::sync::Arc;
use tracing::debug;

/// A class on its way to being defined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WovenClass {
    /// Dotted class name
    pub class_name: String,
    /// Owning module
    pub module: ModuleId,
    /// Class bytes; replaced when the class is rewritten
    pub bytes: Vec<u8>,
    /// Packages the class must be able to import dynamically
    pub dynamic_imports: Vec<String>,
}

impl WovenClass {
    /// Wrap class bytes about to be defined in `module`
    pub fn new(class_name: impl Into<String>, module: ModuleId, bytes: Vec<u8>) -> Self {
        Self {
            class_name: class_name.into(),
            module,
            bytes,
            dynamic_imports: Vec::new(),
        }
    }
}

/// Weaves classes of modules that have rules
#[derive(Clone)]
pub struct WeavingHook {
    tracker: Arc<ModuleTracker>,
    graph: Arc<dyn ModuleGraph>,
}

impl WeavingHook {
    /// Create a hook over a tracker and the module graph
    pub fn new(tracker: Arc<ModuleTracker>, graph: Arc<dyn ModuleGraph>) -> Self {
        Self { tracker, graph }
    }

    /// The tracker rules are looked up in
    pub fn tracker(&self) -> &Arc<ModuleTracker> {
        &self.tracker
    }

    /// Weave one class in place
    ///
    /// Classes of modules without rules pass through untouched. A class that
    /// fails to rewrite is also left untouched.
    pub fn weave(&self, class: &mut WovenClass) -> RewriteOutcome {
        let Some(rules) = self.tracker.rules_for(&class.module) else {
            return RewriteOutcome::default();
        };

        let resolver = AncestorResolver::new(self.graph.as_ref(), class.module.clone());
        let rewriter = CallSiteRewriter::new(&rules, &resolver);
        let (bytes, outcome) = rewriter.rewrite(&class.class_name, &class.bytes, &class.module);

        if let Some(bytes) = bytes {
            class.bytes = bytes;
            for import in &outcome.extra_imports {
                if !class.dynamic_imports.contains(import) {
                    class.dynamic_imports.push(import.clone());
                }
            }
            debug!(
                class = %class.class_name,
                module = %class.module,
                calls = outcome.rewritten_calls,
                "woven"
            );
        }
        outcome
    }
}
