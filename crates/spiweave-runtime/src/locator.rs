//! Locator routines
//!
//! Woven call sites land here instead of calling the platform factory
//! directly. The locator finds the modules publishing the factory's service
//! type, makes their loader context visible to the factory call, and then
//! performs the original call:
//!
//! | Providers | No-arg shape                    | `(id, loader)` shape                   |
//! |-----------|---------------------------------|----------------------------------------|
//! | 0         | plain call                      | plain call with the specified loader   |
//! | 1         | ambient context = provider      | specified loader wrapped over provider |
//! | n         | ambient context = composite     | specified loader wrapped over composite|
//!
//! Whatever the factory returns or panics with reaches the caller unchanged.
//!
//! A woven class names its routine through a method reference on
//! [`LOCATOR_OWNER`]; [`resolve_routine`] maps that reference back to its
//! catalog entry and [`Locator::invoke`] serves it by name.

use crate::context::{with_context, CompositeLoaderContext, LoaderContext, WrapperLoaderContext};
use crate::services::{ModuleRuntime, ServiceError, ServiceProvider};
use spiweave_engine::classfile::descriptor::DescriptorError;
use spiweave_engine::classfile::{MethodDescriptor, MethodRef};
use spiweave_engine::weaving::{LOCATOR_OWNER, SERVICELOADER_NAMESPACE};
use spiweave_engine::{FactoryCall, FactoryType, ModuleId, ModuleTracker};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Locator routine lookup failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocatorError {
    /// The method is not declared on the locator type
    #[error("{0} does not declare locator routines")]
    ForeignOwner(String),

    /// The routine descriptor does not parse
    #[error("Invalid routine descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// No catalog entry has this routine name and arity
    #[error("No locator routine {name} taking {arity} argument(s)")]
    UnknownRoutine {
        /// Routine name
        name: String,
        /// Argument count, caller included
        arity: usize,
    },
}

/// Catalog entry a woven method reference dispatches to
pub fn resolve_routine(method: &MethodRef) -> Result<FactoryCall, LocatorError> {
    if method.owner != LOCATOR_OWNER {
        return Err(LocatorError::ForeignOwner(method.owner.clone()));
    }
    let arity = MethodDescriptor::parse(&method.descriptor)?.params.len();
    lookup(&method.name, arity)
}

fn lookup(routine: &str, arity: usize) -> Result<FactoryCall, LocatorError> {
    FactoryCall::from_locator_name(routine, arity).ok_or_else(|| LocatorError::UnknownRoutine {
        name: routine.to_string(),
        arity,
    })
}

/// Arguments a woven call site passes to its locator routine
#[derive(Clone)]
pub enum LocatorArgs {
    /// `locate_..(caller)`
    NoArg {
        /// Internal name of the calling class
        caller: String,
    },
    /// `locate_..(factory_id, loader, caller)`
    WithLoader {
        /// Factory id the call site passed
        factory_id: String,
        /// Loader the call site passed
        loader: Option<Arc<dyn LoaderContext>>,
        /// Internal name of the calling class
        caller: String,
    },
}

impl LocatorArgs {
    /// Routine arity for these arguments
    pub fn arity(&self) -> usize {
        match self {
            Self::NoArg { .. } => 1,
            Self::WithLoader { .. } => 3,
        }
    }
}

/// The platform factory call a routine ends in
pub struct FactoryInvocation {
    /// Catalog entry being served
    pub call: FactoryCall,
    /// Type the routine hands back to its call site
    pub returns: FactoryType,
    /// Factory id, two-argument shape only
    pub factory_id: Option<String>,
    /// Loader to pass on, two-argument shape only
    pub loader: Option<Arc<dyn LoaderContext>>,
}

/// Decides which providers a consumer accepts
pub trait ProviderPolicy: Send + Sync {
    /// Whether `consumer` accepts `provider`
    fn permits(&self, consumer: &ModuleId, provider: &ServiceProvider) -> bool;
}

/// Accepts every provider
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ProviderPolicy for AllowAll {
    fn permits(&self, _consumer: &ModuleId, _provider: &ServiceProvider) -> bool {
        true
    }
}

/// Providers are narrowed by the consumer's `osgi.serviceloader` filters
impl ProviderPolicy for ModuleTracker {
    fn permits(&self, consumer: &ModuleId, provider: &ServiceProvider) -> bool {
        self.rules_for(consumer)
            .map_or(true, |rules| rules.permits(&provider.properties))
    }
}

/// Runs factory calls under the right provider context
#[derive(Clone)]
pub struct Locator {
    runtime: Arc<dyn ModuleRuntime>,
    policy: Arc<dyn ProviderPolicy>,
}

impl Locator {
    /// Locator accepting every provider
    pub fn new(runtime: Arc<dyn ModuleRuntime>) -> Self {
        Self {
            runtime,
            policy: Arc::new(AllowAll),
        }
    }

    /// Replace the provider policy
    pub fn with_policy(mut self, policy: Arc<dyn ProviderPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Serve a locator routine by name
    ///
    /// The routine name and the argument shape select the catalog entry. The
    /// no-arg shape runs `factory` under the provider context; the
    /// two-argument shape hands it the wrapped loader.
    pub fn invoke<R>(
        &self,
        routine: &str,
        args: LocatorArgs,
        factory: impl FnOnce(FactoryInvocation) -> R,
    ) -> Result<R, LocatorError> {
        let call = lookup(routine, args.arity())?;
        let returns = call.declared_return_type();
        let result = match args {
            LocatorArgs::NoArg { caller } => self.locate(call, &caller, || {
                factory(FactoryInvocation {
                    call,
                    returns,
                    factory_id: None,
                    loader: None,
                })
            }),
            LocatorArgs::WithLoader {
                factory_id,
                loader,
                caller,
            } => self.locate_with_loader(call, &factory_id, loader, &caller, |id, loader| {
                factory(FactoryInvocation {
                    call,
                    returns,
                    factory_id: Some(id.to_string()),
                    loader,
                })
            }),
        };
        Ok(result)
    }

    /// No-arg shape: run `factory` with the provider context as ambient context
    ///
    /// `caller` is the internal name of the class the call was woven into.
    pub fn locate<R>(&self, call: FactoryCall, caller: &str, factory: impl FnOnce() -> R) -> R {
        let Some(consumer) = self.runtime.module_of(caller) else {
            debug!(caller, "caller is not in a module");
            return factory();
        };
        let service_type = call.factory.class_name();
        match self.provider_context(&consumer, service_type, service_type) {
            Some(context) => {
                debug!(%call, module = %consumer, context = %context.describe(), "switching ambient context");
                with_context(context, factory)
            }
            None => factory(),
        }
    }

    /// `(id, loader)` shape: pass the provider context behind the specified loader
    ///
    /// Providers of `factory_id` count as well as providers of the factory
    /// type itself.
    pub fn locate_with_loader<R>(
        &self,
        call: FactoryCall,
        factory_id: &str,
        specified: Option<Arc<dyn LoaderContext>>,
        caller: &str,
        factory: impl FnOnce(&str, Option<Arc<dyn LoaderContext>>) -> R,
    ) -> R {
        let Some(consumer) = self.runtime.module_of(caller) else {
            debug!(caller, "caller is not in a module");
            return factory(factory_id, specified);
        };
        match self.provider_context(&consumer, call.factory.class_name(), factory_id) {
            Some(provider) => {
                let wrapped: Arc<dyn LoaderContext> =
                    Arc::new(WrapperLoaderContext::new(specified, provider));
                debug!(%call, module = %consumer, context = %wrapped.describe(), "wrapping specified loader");
                factory(factory_id, Some(wrapped))
            }
            None => factory(factory_id, specified),
        }
    }

    /// Loader context covering every provider `consumer` should see
    ///
    /// `None` when there are no providers. Query failures are logged and
    /// count as no providers.
    pub fn provider_context(
        &self,
        consumer: &ModuleId,
        service_type: &str,
        requested: &str,
    ) -> Option<Arc<dyn LoaderContext>> {
        let providers = match self.providers(consumer, service_type, requested) {
            Ok(providers) => providers,
            Err(err) => {
                error!(module = %consumer, service_type, error = %err, "service query failed");
                return None;
            }
        };
        debug!(
            module = %consumer,
            service_type,
            providers = ?providers.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "found providers"
        );

        let mut contexts: Vec<Arc<dyn LoaderContext>> = providers
            .iter()
            .filter_map(|module| {
                let context = self.runtime.loader_context(module);
                if context.is_none() {
                    debug!(module = %module, "provider has no loader context");
                }
                context
            })
            .collect();

        match contexts.len() {
            0 => None,
            1 => contexts.pop(),
            _ => Some(Arc::new(CompositeLoaderContext::new(contexts))),
        }
    }

    /// Provider modules of both types, deduplicated, in registration order
    fn providers(
        &self,
        consumer: &ModuleId,
        service_type: &str,
        requested: &str,
    ) -> Result<Vec<ModuleId>, ServiceError> {
        let mut found = tagged(self.runtime.providers(consumer, service_type)?, service_type);
        if requested != service_type {
            found.extend(tagged(self.runtime.providers(consumer, requested)?, requested));
        }

        let mut modules: Vec<ModuleId> = Vec::new();
        for provider in found {
            if modules.contains(&provider.module) || !self.policy.permits(consumer, &provider) {
                continue;
            }
            modules.push(provider.module);
        }
        Ok(modules)
    }
}

/// Providers advertise the service type they were found under
fn tagged(providers: Vec<ServiceProvider>, service_type: &str) -> Vec<ServiceProvider> {
    providers
        .into_iter()
        .map(|mut provider| {
            provider
                .properties
                .entry(SERVICELOADER_NAMESPACE.to_string())
                .or_insert_with(|| service_type.to_string());
            provider
        })
        .collect()
}
