//! Loader contexts and the ambient (thread-scoped) context
//!
//! A loader context is the scope implementation classes of an abstract factory
//! are looked up in. Factory calls consult the ambient context of the calling
//! thread; the locator swaps it for the duration of one call.

use spiweave_engine::classfile::{class_resource, internal_name};
use spiweave_engine::{ModuleGraph, ModuleId};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

/// A class found through a loader context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedClass {
    /// Dotted class name
    pub name: String,
    /// Description of the context that found it
    pub loader: String,
    /// Class bytes
    pub bytes: Arc<[u8]>,
}

/// A class and resource lookup scope
pub trait LoaderContext: Send + Sync {
    /// Find a class by dotted name
    fn load_class(&self, name: &str) -> Option<LoadedClass>;

    /// Find a resource by path
    fn resource(&self, path: &str) -> Option<Arc<[u8]>>;

    /// Human-readable identity
    fn describe(&self) -> String;
}

impl fmt::Debug for dyn LoaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// ===== Module context =====

/// The class space of one module
pub struct ModuleLoaderContext {
    module: ModuleId,
    graph: Arc<dyn ModuleGraph>,
}

impl ModuleLoaderContext {
    /// Context over `module`'s class space in `graph`
    pub fn new(module: ModuleId, graph: Arc<dyn ModuleGraph>) -> Self {
        Self { module, graph }
    }

    /// The module this context belongs to
    pub fn module(&self) -> &ModuleId {
        &self.module
    }
}

impl LoaderContext for ModuleLoaderContext {
    fn load_class(&self, name: &str) -> Option<LoadedClass> {
        let bytes = self.resource(&class_resource(&internal_name(name)))?;
        Some(LoadedClass {
            name: name.to_string(),
            loader: self.describe(),
            bytes,
        })
    }

    fn resource(&self, path: &str) -> Option<Arc<[u8]>> {
        self.graph.class_resource(&self.module, path)
    }

    fn describe(&self) -> String {
        self.module.to_string()
    }
}

// ===== Composite context =====

/// Delegates to several contexts in order; the first hit wins
pub struct CompositeLoaderContext {
    delegates: Vec<Arc<dyn LoaderContext>>,
}

impl CompositeLoaderContext {
    /// Compose contexts, consulted in the given order
    pub fn new(delegates: Vec<Arc<dyn LoaderContext>>) -> Self {
        Self { delegates }
    }

    /// Delegates in lookup order
    pub fn delegates(&self) -> &[Arc<dyn LoaderContext>] {
        &self.delegates
    }
}

impl LoaderContext for CompositeLoaderContext {
    fn load_class(&self, name: &str) -> Option<LoadedClass> {
        self.delegates
            .iter()
            .find_map(|delegate| delegate.load_class(name))
    }

    fn resource(&self, path: &str) -> Option<Arc<[u8]>> {
        self.delegates
            .iter()
            .find_map(|delegate| delegate.resource(path))
    }

    fn describe(&self) -> String {
        let names: Vec<String> = self.delegates.iter().map(|d| d.describe()).collect();
        format!("composite[{}]", names.join(", "))
    }
}

// ===== Wrapper context =====

/// The loader a caller specified, backed by a provider context
///
/// Lookups go to the specified loader first. Only what it cannot find is
/// looked up in the provider context.
pub struct WrapperLoaderContext {
    specified: Option<Arc<dyn LoaderContext>>,
    provider: Arc<dyn LoaderContext>,
}

impl WrapperLoaderContext {
    /// Wrap `specified` (which may be absent) around `provider`
    pub fn new(specified: Option<Arc<dyn LoaderContext>>, provider: Arc<dyn LoaderContext>) -> Self {
        Self {
            specified,
            provider,
        }
    }
}

impl LoaderContext for WrapperLoaderContext {
    fn load_class(&self, name: &str) -> Option<LoadedClass> {
        self.specified
            .as_ref()
            .and_then(|specified| specified.load_class(name))
            .or_else(|| self.provider.load_class(name))
    }

    fn resource(&self, path: &str) -> Option<Arc<[u8]>> {
        self.specified
            .as_ref()
            .and_then(|specified| specified.resource(path))
            .or_else(|| self.provider.resource(path))
    }

    fn describe(&self) -> String {
        match &self.specified {
            Some(specified) => format!("wrapper[{} -> {}]", specified.describe(), self.provider.describe()),
            None => format!("wrapper[{}]", self.provider.describe()),
        }
    }
}

// ===== Ambient context =====

thread_local! {
    static AMBIENT: RefCell<Option<Arc<dyn LoaderContext>>> = RefCell::new(None);
}

/// The calling thread's ambient context
pub fn current() -> Option<Arc<dyn LoaderContext>> {
    AMBIENT.with(|slot| slot.borrow().clone())
}

/// Replace the calling thread's ambient context, returning the previous one
pub fn replace(context: Option<Arc<dyn LoaderContext>>) -> Option<Arc<dyn LoaderContext>> {
    AMBIENT.with(|slot| slot.replace(context))
}

/// Restores the previous ambient context when dropped
struct Restore(Option<Arc<dyn LoaderContext>>);

impl Drop for Restore {
    fn drop(&mut self) {
        replace(self.0.take());
    }
}

/// Run `f` with `context` as the ambient context
///
/// The previous context is restored afterwards, also when `f` panics.
pub fn with_context<R>(context: Arc<dyn LoaderContext>, f: impl FnOnce() -> R) -> R {
    let _restore = Restore(replace(Some(context)));
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiweave_engine::StaticModuleGraph;

    fn graph() -> Arc<StaticModuleGraph> {
        let graph = Arc::new(StaticModuleGraph::new());
        let a = ModuleId::new("a", "1.0");
        let b = ModuleId::new("b", "1.0");
        graph.add_class(&a, "impl/Shared", vec![1u8]);
        graph.add_class(&a, "impl/OnlyA", vec![2u8]);
        graph.add_class(&b, "impl/Shared", vec![3u8]);
        graph.add_class(&b, "impl/OnlyB", vec![4u8]);
        graph
    }

    fn module(graph: &Arc<StaticModuleGraph>, name: &str) -> Arc<dyn LoaderContext> {
        Arc::new(ModuleLoaderContext::new(ModuleId::new(name, "1.0"), graph.clone()))
    }

    #[test]
    fn test_module_context_loads_own_classes() {
        let graph = graph();
        let a = module(&graph, "a");
        let class = a.load_class("impl.OnlyA").unwrap();
        assert_eq!(&*class.bytes, &[2]);
        assert_eq!(class.loader, "a@1.0");
        assert!(a.load_class("impl.OnlyB").is_none());
    }

    #[test]
    fn test_composite_order() {
        let graph = graph();
        let composite = CompositeLoaderContext::new(vec![module(&graph, "b"), module(&graph, "a")]);
        assert_eq!(&*composite.load_class("impl.Shared").unwrap().bytes, &[3]);
        assert!(composite.load_class("impl.OnlyA").is_some());
        assert!(composite.load_class("impl.OnlyB").is_some());
        assert!(composite.load_class("impl.Missing").is_none());
        assert_eq!(composite.describe(), "composite[b@1.0, a@1.0]");
    }

    #[test]
    fn test_wrapper_prefers_specified() {
        let graph = graph();
        let wrapper = WrapperLoaderContext::new(Some(module(&graph, "a")), module(&graph, "b"));
        assert_eq!(&*wrapper.load_class("impl.Shared").unwrap().bytes, &[1]);
        assert_eq!(&*wrapper.load_class("impl.OnlyB").unwrap().bytes, &[4]);

        let bare = WrapperLoaderContext::new(None, module(&graph, "b"));
        assert_eq!(&*bare.load_class("impl.Shared").unwrap().bytes, &[3]);
        assert_eq!(bare.describe(), "wrapper[b@1.0]");
    }

    #[test]
    fn test_with_context_restores_previous() {
        let graph = graph();
        assert!(current().is_none());

        let inner = with_context(module(&graph, "a"), || {
            let seen = current().map(|c| c.describe());
            let nested = with_context(module(&graph, "b"), || current().map(|c| c.describe()));
            assert_eq!(current().map(|c| c.describe()), seen);
            nested
        });
        assert_eq!(inner.as_deref(), Some("b@1.0"));
        assert!(current().is_none());
    }

    #[test]
    fn test_with_context_restores_after_panic() {
        let graph = graph();
        let context = module(&graph, "a");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_context(context, || panic!("factory blew up"))
        }));
        assert!(result.is_err());
        assert!(current().is_none());
    }

    #[test]
    fn test_ambient_is_per_thread() {
        let graph = graph();
        with_context(module(&graph, "a"), || {
            let other = std::thread::spawn(|| current().is_none()).join().unwrap();
            assert!(other);
        });
    }
}
