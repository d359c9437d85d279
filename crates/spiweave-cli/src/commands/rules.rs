//! `spiweave rules`: Show the rewrite rules a requirement header produces.

use crate::manifest::Manifest;
use anyhow::bail;
use spiweave_engine::weaving::{build_rules_from_text, RewriteRule};
use spiweave_engine::{ModuleEvent, ModuleId, ModuleRuleSet, ModuleTracker, WeaverConfig};
use std::path::Path;

pub fn execute(header: Option<&str>, graph: Option<&Path>, module: Option<&str>) -> anyhow::Result<()> {
    let (id, rules) = match (header, graph, module) {
        (Some(text), _, module) => {
            let id = ModuleId::parse(module.unwrap_or("cli@0.0.0"));
            let rules = build_rules_from_text(text, &id)?;
            (id, rules)
        }
        (None, Some(graph), Some(module)) => {
            let manifest = Manifest::from_file(graph)?;
            let id = manifest.module(module)?.id();
            let tracker = ModuleTracker::new(WeaverConfig::from_env()?);
            for info in manifest.module_infos() {
                tracker.handle(ModuleEvent::Added(info));
            }
            let rules = tracker.rules_for(&id).map(|rules| ModuleRuleSet::clone(&rules));
            (id, rules)
        }
        _ => bail!("Pass either --header or --graph with --module"),
    };

    match rules {
        None => println!("{}: no rules (module does not opt in)", id),
        Some(rules) => {
            println!("{}: {} rule(s)", id, rules.len());
            let mut lines: Vec<String> = rules.iter().map(describe).collect();
            lines.sort();
            for line in lines {
                println!("  {}", line);
            }
        }
    }
    Ok(())
}

fn describe(rule: &RewriteRule) -> String {
    let args = match &rule.arg_classes {
        Some(args) => args.join(", "),
        None => "..".to_string(),
    };
    let providers = match &rule.allowed_providers {
        None => "any provider".to_string(),
        Some(allowed) => allowed
            .iter()
            .map(|descriptor| descriptor.filter.to_string())
            .collect::<Vec<_>>()
            .join(" | "),
    };
    format!("{}.{}({}) -> {}", rule.owner, rule.method, args, providers)
}
