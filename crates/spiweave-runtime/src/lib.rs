//! Spiweave Runtime
//!
//! Execution-time half of the service-loader weaver. Woven call sites invoke
//! the routines here with their own class as an extra argument; the
//! [`Locator`] finds the modules publishing the factory's service type and
//! makes their class space visible to the original factory call.
//!
//! - **Loader contexts**: module, composite and wrapper lookup scopes plus the
//!   thread-scoped ambient context (`context` module)
//! - **Services**: the live module and service query (`services` module)
//! - **Locator**: provider selection, context switching and routine dispatch
//!   (`locator` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use spiweave_runtime::{Locator, StaticModuleRuntime};
//!
//! let locator = Locator::new(runtime).with_policy(tracker);
//! let factory = locator.locate(call, "app/Parser", || platform.new_input_factory());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Loader contexts and the ambient context
pub mod context;

/// Provider selection
pub mod locator;

/// Live module and service state
pub mod services;

pub use context::{
    current, with_context, CompositeLoaderContext, LoadedClass, LoaderContext,
    ModuleLoaderContext, WrapperLoaderContext,
};
pub use locator::{
    resolve_routine, AllowAll, FactoryInvocation, Locator, LocatorArgs, LocatorError, ProviderPolicy,
};
pub use services::{ModuleRuntime, ServiceError, ServiceProvider, StaticModuleRuntime};
