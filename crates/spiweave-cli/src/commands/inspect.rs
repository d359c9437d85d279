//! `spiweave inspect`: Dump a class container.

use anyhow::Context;
use spiweave_engine::classfile::{verify_class, Code, Instruction, MethodDescriptor, RootOnly};
use spiweave_engine::weaving::LOCATOR_OWNER;
use spiweave_engine::{ClassFile, FactoryCall};
use std::path::Path;

pub fn execute(path: &Path, verify: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let class = ClassFile::decode(&bytes).with_context(|| format!("Invalid class {}", path.display()))?;

    let header = &class.header;
    match &header.super_name {
        Some(parent) => println!("class {} extends {}", header.name, parent),
        None => println!("class {}", header.name),
    }
    println!("  access:     0x{:04x}", header.access);
    if !header.interfaces.is_empty() {
        println!("  interfaces: {}", header.interfaces.join(", "));
    }
    if let Some(source) = &class.source_file {
        println!("  source:     {}", source);
    }

    for method in &class.methods {
        println!();
        println!(
            "method {} (access 0x{:04x}, max_stack {}, max_locals {})",
            method.signature(),
            method.access,
            method.max_stack,
            method.max_locals
        );
        if !method.has_code() {
            continue;
        }
        let code = Code::from_method(method)
            .with_context(|| format!("Failed to decode {}", method.signature()))?;
        let offsets = code.offsets();
        for (index, instruction) in code.instructions.iter().enumerate() {
            let note = annotate(&class, instruction).map(|n| format!("  ; {}", n)).unwrap_or_default();
            println!("  L{:<3} {:>5}: {}{}", index, offsets[index], instruction, note);
        }
        for handler in &code.handlers {
            println!(
                "  catch {} L{}..L{} -> L{}",
                handler.catch_type.as_deref().unwrap_or("any"),
                handler.start,
                handler.end,
                handler.handler
            );
        }
        for frame in &method.stack_map {
            println!("  frame {}", frame);
        }
    }

    if verify {
        verify_class(&class, &RootOnly).with_context(|| format!("{} failed verification", header.name))?;
        println!();
        println!("verified: {} method(s)", class.methods.len());
    }
    Ok(())
}

/// Describe what a constant-pool operand refers to
fn annotate(class: &ClassFile, instruction: &Instruction) -> Option<String> {
    match instruction {
        Instruction::InvokeStatic(index) | Instruction::InvokeVirtual(index) => {
            let target = class.constants.get_method_ref(*index)?;
            let mut note = format!("{}.{}{}", target.owner, target.name, target.descriptor);
            if target.owner == LOCATOR_OWNER {
                let arity = MethodDescriptor::parse(&target.descriptor).ok()?.params.len();
                if let Some(call) = FactoryCall::from_locator_name(&target.name, arity) {
                    note.push_str(&format!(" [locates {}]", call));
                }
            }
            Some(note)
        }
        Instruction::LdcClass(index) | Instruction::New(index) | Instruction::CheckCast(index) => {
            class.constants.get_class(*index).map(str::to_owned)
        }
        Instruction::Ldc(index) => class.constants.get_string(*index).map(|s| format!("{:?}", s)),
        _ => None,
    }
}
