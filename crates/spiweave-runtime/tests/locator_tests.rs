use spiweave_engine::classfile::{access, ClassFile, Code, Instruction, MethodDef, MethodRef};
use spiweave_engine::weaving::LOCATOR_OWNER;
use spiweave_engine::{
    FactoryCall, FactoryMethod, FactoryShape, FactoryType, ModuleEvent, ModuleId, ModuleInfo,
    ModuleTracker, StaticModuleGraph, WeaverConfig, WeavingHook, WovenClass, ROOT_TYPE,
};
use spiweave_runtime::{
    current, resolve_routine, with_context, LoaderContext, Locator, LocatorArgs,
    ModuleLoaderContext, ServiceProvider, StaticModuleRuntime,
};
use std::sync::{Arc, Once};

const INPUT: &str = "javax.xml.stream.XMLInputFactory";

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Fixtures
// ============================================================================

struct System {
    graph: Arc<StaticModuleGraph>,
    runtime: Arc<StaticModuleRuntime>,
    tracker: Arc<ModuleTracker>,
    consumer: ModuleId,
}

/// `m` opts in; every name in `providers` publishes the input factory service
fn system(providers: &[&str]) -> System {
    init_tracing();
    let graph = Arc::new(StaticModuleGraph::new());
    let runtime = Arc::new(StaticModuleRuntime::new());
    let tracker = Arc::new(ModuleTracker::default());
    let consumer = ModuleId::new("m", "1.0.0");

    graph.add_module(consumer.clone());
    runtime.add_module(consumer.clone(), loader(&graph, &consumer));
    runtime.define_class(&consumer, "m/Parser");
    tracker.handle(ModuleEvent::Added(ModuleInfo::new(
        consumer.clone(),
        Some("osgi.extender;filter:=\"(osgi.extender=osgi.serviceloader.processor)\""),
    )));

    for name in providers {
        let id = ModuleId::new(*name, "1.0.0");
        let implementation = format!("{}/stax/InputFactoryImpl", name);
        graph.add_class(&id, &implementation, ClassFile::new(&implementation, Some(ROOT_TYPE)).encode());
        runtime.add_module(id.clone(), loader(&graph, &id));
        runtime.register_service(INPUT, ServiceProvider::new(id));
    }

    System {
        graph,
        runtime,
        tracker,
        consumer,
    }
}

fn loader(graph: &Arc<StaticModuleGraph>, id: &ModuleId) -> Arc<dyn LoaderContext> {
    Arc::new(ModuleLoaderContext::new(id.clone(), graph.clone()))
}

fn no_arg_input() -> FactoryCall {
    FactoryCall::new(FactoryType::XmlInputFactory, FactoryMethod::NewInstance, FactoryShape::NoArg)
}

fn ambient() -> Option<String> {
    current().map(|context| context.describe())
}

/// `m` calls `XMLInputFactory.newInstance()` from `m/Parser`
fn woven_parser(system: &System) -> ClassFile {
    let mut class = ClassFile::new("m/Parser", Some(ROOT_TYPE));
    let target = class.constants.add_method_ref(&MethodRef::new(
        "javax/xml/stream/XMLInputFactory",
        "newInstance",
        "()Ljavax/xml/stream/XMLInputFactory;",
    ));
    let mut method = MethodDef::new(access::STATIC, "parse", "()Ljava/lang/Object;");
    Code::new(vec![Instruction::InvokeStatic(target), Instruction::AReturn])
        .write_to(&mut method)
        .unwrap();
    class.methods.push(method);

    let hook = WeavingHook::new(system.tracker.clone(), system.graph.clone());
    let mut woven = WovenClass::new("m.Parser", system.consumer.clone(), class.encode());
    assert!(hook.weave(&mut woven).modified);
    ClassFile::decode(&woven.bytes).unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_woven_call_resolves_single_provider() {
    let system = system(&["p"]);

    let rewritten = woven_parser(&system);

    // The woven call names the locator routine for this catalog entry
    let locator_ref = rewritten
        .constants
        .method_refs
        .iter()
        .find(|method| method.owner == LOCATOR_OWNER)
        .unwrap();
    assert_eq!(FactoryCall::from_locator_name(&locator_ref.name, 1), Some(no_arg_input()));
    assert_eq!(resolve_routine(locator_ref), Ok(no_arg_input()));

    // At run time the provider's context is ambient during the call only
    let locator = Locator::new(system.runtime.clone()).with_policy(system.tracker.clone());
    let seen = locator.locate(no_arg_input(), "m/Parser", || {
        let context = current().unwrap();
        assert!(context.load_class("p.stax.InputFactoryImpl").is_some());
        context.describe()
    });
    assert_eq!(seen, "p@1.0.0");
    assert_eq!(ambient(), None);
}

#[test]
fn test_previous_context_restored_after_failure() {
    let system = system(&["p"]);
    let locator = Locator::new(system.runtime.clone());
    let previous = loader(&system.graph, &system.consumer);

    with_context(previous, || {
        let result: Result<(), String> = locator.locate(no_arg_input(), "m/Parser", || {
            assert_eq!(ambient().as_deref(), Some("p@1.0.0"));
            Err("no implementation".to_string())
        });
        assert_eq!(result, Err("no implementation".to_string()));
        assert_eq!(ambient().as_deref(), Some("m@1.0.0"));

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            locator.locate(no_arg_input(), "m/Parser", || panic!("factory failed"))
        }));
        assert!(panicked.is_err());
        assert_eq!(ambient().as_deref(), Some("m@1.0.0"));
    });
}

#[test]
fn test_zero_providers_leave_context_alone() {
    let system = system(&[]);
    let locator = Locator::new(system.runtime.clone());
    let previous = loader(&system.graph, &system.consumer);

    with_context(previous, || {
        let seen = locator.locate(no_arg_input(), "m/Parser", ambient);
        assert_eq!(seen.as_deref(), Some("m@1.0.0"));
    });
}

#[test]
fn test_two_providers_resolve_deterministically() {
    let system = system(&["p", "q"]);
    let locator = Locator::new(system.runtime.clone());

    let first = locator.locate(no_arg_input(), "m/Parser", || {
        let context = current().unwrap();
        assert!(context.load_class("p.stax.InputFactoryImpl").is_some());
        assert!(context.load_class("q.stax.InputFactoryImpl").is_some());
        context.describe()
    });
    assert_eq!(first, "composite[p@1.0.0, q@1.0.0]");
    for _ in 0..10 {
        let again = locator.locate(no_arg_input(), "m/Parser", ambient);
        assert_eq!(again.as_deref(), Some(first.as_str()));
    }
}

#[test]
fn test_withdrawn_provider_no_longer_found() {
    let system = system(&["p", "q"]);
    let locator = Locator::new(system.runtime.clone());
    system.runtime.unregister_services(&ModuleId::new("q", "1.0.0"));

    let seen = locator.locate(no_arg_input(), "m/Parser", ambient);
    assert_eq!(seen.as_deref(), Some("p@1.0.0"));
}

#[test]
fn test_concurrent_locates_keep_threads_apart() {
    let system = system(&["p"]);
    let locator = Locator::new(system.runtime.clone());

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let locator = locator.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let seen = locator.locate(no_arg_input(), "m/Parser", ambient);
                    assert_eq!(seen.as_deref(), Some("p@1.0.0"));
                    assert_eq!(ambient(), None);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_woven_routine_dispatches_through_locator() {
    let system = system(&["p"]);
    let rewritten = woven_parser(&system);
    let routine = rewritten
        .constants
        .method_refs
        .iter()
        .find(|method| method.owner == LOCATOR_OWNER)
        .unwrap();

    let locator = Locator::new(system.runtime.clone()).with_policy(system.tracker.clone());
    let args = LocatorArgs::NoArg {
        caller: rewritten.header.name.clone(),
    };
    let (call, returns, seen) = locator
        .invoke(&routine.name, args, |invocation| {
            (invocation.call, invocation.returns, ambient())
        })
        .unwrap();
    assert_eq!(call, resolve_routine(routine).unwrap());
    assert_eq!(returns, FactoryType::XmlInputFactory);
    assert_eq!(seen.as_deref(), Some("p@1.0.0"));
    assert_eq!(ambient(), None);
}

#[test]
fn test_auto_consumer_sees_registered_provider() {
    init_tracing();
    let graph = Arc::new(StaticModuleGraph::new());
    let runtime = Arc::new(StaticModuleRuntime::new());
    let tracker = Arc::new(ModuleTracker::new(WeaverConfig::from_value("com.acme.*").unwrap()));
    let app = ModuleId::new("com.acme.app", "1.0");
    let p = ModuleId::new("p", "1.0");

    for id in [&app, &p] {
        graph.add_module(id.clone());
        runtime.add_module(id.clone(), loader(&graph, id));
    }
    runtime.define_class(&app, "com/acme/app/Parser");
    runtime.register_service(INPUT, ServiceProvider::new(p));
    tracker.handle(ModuleEvent::Added(ModuleInfo::new(app.clone(), None)));
    assert!(tracker.rules_for(&app).is_some());

    let locator = Locator::new(runtime).with_policy(tracker);
    let seen = locator.locate(no_arg_input(), "com/acme/app/Parser", ambient);
    assert_eq!(seen.as_deref(), Some("p@1.0"));
}
