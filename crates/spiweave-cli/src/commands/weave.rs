//! `spiweave weave`: Weave one class the way the hook does at definition time.

use crate::manifest::Manifest;
use anyhow::Context;
use serde::Serialize;
use spiweave_engine::classfile::dotted_name;
use spiweave_engine::{
    ClassHeader, ModuleEvent, ModuleTracker, WeaverConfig, WeavingHook, WovenClass,
};
use std::path::PathBuf;
use std::sync::Arc;

pub struct WeaveOptions {
    pub graph: PathBuf,
    pub module: String,
    pub class: PathBuf,
    pub output: Option<PathBuf>,
    pub auto_consumers: Vec<String>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct WeaveReport {
    class: String,
    module: String,
    modified: bool,
    rewritten_calls: usize,
    dynamic_imports: Vec<String>,
    output: Option<PathBuf>,
}

pub fn execute(options: WeaveOptions) -> anyhow::Result<()> {
    let manifest = Manifest::from_file(&options.graph)?;
    let graph = Arc::new(manifest.build_graph()?);

    let mut config = WeaverConfig::from_env()?;
    for pattern in &options.auto_consumers {
        config = config.with_auto_consumer(pattern)?;
    }
    let tracker = Arc::new(ModuleTracker::new(config));
    for info in manifest.module_infos() {
        tracker.handle(ModuleEvent::Added(info));
    }

    let module = manifest.module(&options.module)?.id();
    let bytes = std::fs::read(&options.class)
        .with_context(|| format!("Failed to read {}", options.class.display()))?;
    let header = ClassHeader::read(&bytes)
        .with_context(|| format!("Invalid class {}", options.class.display()))?;

    let hook = WeavingHook::new(tracker, graph);
    let mut woven = WovenClass::new(dotted_name(&header.name), module, bytes);
    let outcome = hook.weave(&mut woven);

    if let Some(output) = &options.output {
        std::fs::write(output, &woven.bytes)
            .with_context(|| format!("Failed to write {}", output.display()))?;
    }

    let report = WeaveReport {
        class: woven.class_name,
        module: woven.module.to_string(),
        modified: outcome.modified,
        rewritten_calls: outcome.rewritten_calls,
        dynamic_imports: woven.dynamic_imports,
        output: options.output,
    };
    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.modified {
        println!(
            "Wove {} in {}: {} call(s) rewritten",
            report.class, report.module, report.rewritten_calls
        );
        if !report.dynamic_imports.is_empty() {
            println!("Dynamic imports: {}", report.dynamic_imports.join(", "));
        }
    } else {
        println!("{} in {}: unchanged", report.class, report.module);
    }
    Ok(())
}
