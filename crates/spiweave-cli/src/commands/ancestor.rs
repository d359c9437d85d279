//! `spiweave ancestor`: Nearest common superclass across a module graph.

use crate::manifest::Manifest;
use spiweave_engine::classfile::internal_name;
use spiweave_engine::AncestorResolver;
use std::path::Path;

pub fn execute(graph: &Path, module: &str, first: &str, second: &str) -> anyhow::Result<()> {
    let manifest = Manifest::from_file(graph)?;
    let module = manifest.module(module)?.id();
    let graph = manifest.build_graph()?;

    let resolver = AncestorResolver::new(&graph, module);
    let ancestor = resolver.common_ancestor(&internal_name(first), &internal_name(second))?;
    println!("{}", ancestor);
    Ok(())
}
