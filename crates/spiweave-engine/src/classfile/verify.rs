//! Class verification
//!
//! Structural checks that a class is loadable: every method body decodes,
//! references resolve, control never falls off the end, and the stored
//! stack-map table covers every branch target and handler entry with the
//! right stack height.

use super::analyzer::{compute_frames, AnalyzeError, CommonSuperclass};
use super::class::{ClassFile, MethodDef};
use super::code::{Code, CodeError, Instruction};
use std::collections::HashMap;

/// Class verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Body failed to decode
    #[error("{method}: {source}")]
    Code {
        /// Method signature
        method: String,
        /// Underlying error
        #[source]
        source: CodeError,
    },

    /// Invalid constant pool reference
    #[error("{method}: invalid constant pool reference #{index} at offset {offset}")]
    InvalidConstantRef {
        /// Method signature
        method: String,
        /// Pool index
        index: u32,
        /// Instruction offset
        offset: u32,
    },

    /// Local slot past `max_locals`
    #[error("{method}: local {index} out of range (max {max}) at offset {offset}")]
    InvalidLocalRef {
        /// Method signature
        method: String,
        /// Slot
        index: u16,
        /// Declared local count
        max: u16,
        /// Instruction offset
        offset: u32,
    },

    /// Execution falls off end
    #[error("{method}: execution falls off end of method at offset {offset}")]
    FallOffEnd {
        /// Method signature
        method: String,
        /// Offset of the last instruction
        offset: u32,
    },

    /// Dataflow analysis rejected the body
    #[error("{method}: {source}")]
    Analysis {
        /// Method signature
        method: String,
        /// Underlying error
        #[source]
        source: AnalyzeError,
    },

    /// A branch target or handler has no frame
    #[error("{method}: missing stack-map frame at offset {offset}")]
    MissingFrame {
        /// Method signature
        method: String,
        /// Target offset
        offset: u32,
    },

    /// A stored frame disagrees with the code
    #[error("{method}: stack-map frame at offset {offset} has stack height {found}, expected {expected}")]
    FrameHeight {
        /// Method signature
        method: String,
        /// Frame offset
        offset: u32,
        /// Computed height
        expected: usize,
        /// Stored height
        found: usize,
    },

    /// Declared limits are too small
    #[error("{method}: declared max_stack {declared} below required {required}")]
    StackLimit {
        /// Method signature
        method: String,
        /// Stored value
        declared: u16,
        /// Computed value
        required: u16,
    },
}

/// Verify every method of a class
pub fn verify_class(class: &ClassFile, hierarchy: &dyn CommonSuperclass) -> Result<(), VerifyError> {
    for method in &class.methods {
        verify_method(class, method, hierarchy)?;
    }
    Ok(())
}

/// Verify a single method body
pub fn verify_method(
    class: &ClassFile,
    method: &MethodDef,
    hierarchy: &dyn CommonSuperclass,
) -> Result<(), VerifyError> {
    // Abstract methods carry no body
    if !method.has_code() {
        return Ok(());
    }

    let signature = method.signature();
    let code = Code::from_method(method).map_err(|source| VerifyError::Code {
        method: signature.clone(),
        source,
    })?;
    let offsets = code.offsets();

    verify_refs(class, method, &code, &offsets, &signature)?;

    if let Some(last) = code.instructions.last() {
        if !last.opcode().is_terminator() {
            return Err(VerifyError::FallOffEnd {
                method: signature,
                offset: offsets[code.instructions.len() - 1],
            });
        }
    }

    let computed =
        compute_frames(class, method, &code, hierarchy).map_err(|source| VerifyError::Analysis {
            method: signature.clone(),
            source,
        })?;

    if method.max_stack < computed.max_stack {
        return Err(VerifyError::StackLimit {
            method: signature,
            declared: method.max_stack,
            required: computed.max_stack,
        });
    }

    let stored: HashMap<u32, usize> = method
        .stack_map
        .iter()
        .map(|frame| (frame.offset, frame.stack.len()))
        .collect();
    for frame in &computed.frames {
        match stored.get(&frame.offset) {
            None => {
                return Err(VerifyError::MissingFrame {
                    method: signature,
                    offset: frame.offset,
                })
            }
            Some(&height) if height != frame.stack.len() => {
                return Err(VerifyError::FrameHeight {
                    method: signature,
                    offset: frame.offset,
                    expected: frame.stack.len(),
                    found: height,
                })
            }
            Some(_) => {}
        }
    }

    Ok(())
}

fn verify_refs(
    class: &ClassFile,
    method: &MethodDef,
    code: &Code,
    offsets: &[u32],
    signature: &str,
) -> Result<(), VerifyError> {
    let pool = &class.constants;
    for (index, instruction) in code.instructions.iter().enumerate() {
        let offset = offsets[index];
        let bad_constant = |pool_index: u32| VerifyError::InvalidConstantRef {
            method: signature.to_string(),
            index: pool_index,
            offset,
        };
        match instruction {
            Instruction::Ldc(i) => {
                pool.get_string(*i).ok_or_else(|| bad_constant(*i))?;
            }
            Instruction::LdcClass(i)
            | Instruction::New(i)
            | Instruction::CheckCast(i)
            | Instruction::InstanceOf(i) => {
                pool.get_class(*i).ok_or_else(|| bad_constant(*i))?;
            }
            Instruction::InvokeStatic(i) | Instruction::InvokeVirtual(i) => {
                pool.get_method_ref(*i).ok_or_else(|| bad_constant(*i))?;
            }
            Instruction::Iload(slot)
            | Instruction::Istore(slot)
            | Instruction::Aload(slot)
            | Instruction::Astore(slot) => {
                if *slot >= method.max_locals {
                    return Err(VerifyError::InvalidLocalRef {
                        method: signature.to_string(),
                        index: *slot,
                        max: method.max_locals,
                        offset,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}
