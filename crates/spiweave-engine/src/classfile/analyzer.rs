//! Stack-map frame computation
//!
//! Runs a forward dataflow pass over a method body and derives the
//! verification types of every local slot and stack entry at each branch
//! target and exception handler entry. Where two control-flow paths meet with
//! different reference types, the merged type is their nearest common
//! superclass, which is answered by a [`CommonSuperclass`] implementation.
//!
//! Every value occupies exactly one local slot and one stack entry.

use super::class::{ClassFile, MethodDef};
use super::code::{Code, CodeError, Instruction};
use super::descriptor::{DescriptorError, FieldType, MethodDescriptor};
use super::frames::{StackMapFrame, VerificationType, ROOT_TYPE};
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;

/// Type pushed for a handler that catches everything
pub const THROWABLE_TYPE: &str = "java/lang/Throwable";

const STRING_TYPE: &str = "java/lang/String";
const CLASS_TYPE: &str = "java/lang/Class";

/// Answers "what is the nearest common superclass of these two types"
///
/// Names are internal (`a/b/C`). `None` means the answer is unknown, in which
/// case the universal root type is used.
pub trait CommonSuperclass {
    /// Nearest common superclass of `a` and `b`
    fn common_super_class(&self, a: &str, b: &str) -> Option<String>;
}

impl<F> CommonSuperclass for F
where
    F: Fn(&str, &str) -> Option<String>,
{
    fn common_super_class(&self, a: &str, b: &str) -> Option<String> {
        self(a, b)
    }
}

/// A hierarchy that knows nothing: every merge goes to the root type
#[derive(Debug, Clone, Copy, Default)]
pub struct RootOnly;

impl CommonSuperclass for RootOnly {
    fn common_super_class(&self, _a: &str, _b: &str) -> Option<String> {
        None
    }
}

/// Frame computation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalyzeError {
    /// Body could not be decoded or re-encoded
    #[error("Code error: {0}")]
    Code(#[from] CodeError),

    /// Malformed descriptor
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Pop from an empty operand stack
    #[error("Stack underflow at offset {0}")]
    StackUnderflow(u32),

    /// Operand of the wrong kind
    #[error("Type mismatch at offset {offset}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Instruction offset
        offset: u32,
        /// Expected kind
        expected: &'static str,
        /// Actual type
        found: VerificationType,
    },

    /// Two paths reach an instruction with incompatible stacks
    #[error("Incompatible frames at offset {offset}: {detail}")]
    FrameMismatch {
        /// Instruction offset
        offset: u32,
        /// What differed
        detail: String,
    },

    /// Execution can run past the last instruction
    #[error("Control falls off the end of the body after offset {0}")]
    FallsOffEnd(u32),

    /// Constant pool index does not resolve
    #[error("Unknown constant #{index} at offset {offset}")]
    UnknownConstant {
        /// Instruction offset
        offset: u32,
        /// Pool index
        index: u32,
    },

    /// Local slot outside the frame
    #[error("Local slot {slot} out of range at offset {offset}")]
    LocalOutOfRange {
        /// Instruction offset
        offset: u32,
        /// Slot index
        slot: u16,
    },

    /// A computed limit does not fit the container's 16-bit field
    #[error("{limit} of {required} exceeds 65535")]
    LimitExceeded {
        /// `max_stack` or `max_locals`
        limit: &'static str,
        /// Computed value
        required: usize,
    },

    /// Error inside a specific method
    #[error("In method {method}: {source}")]
    InMethod {
        /// Method name and descriptor
        method: String,
        /// Underlying error
        #[source]
        source: Box<AnalyzeError>,
    },
}

/// Frames and limits for one method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameResult {
    /// Frames at every branch target and handler entry, by offset
    pub frames: Vec<StackMapFrame>,
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local slots
    pub max_locals: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct State {
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
}

/// Compute the stack-map table of one method body
pub fn compute_frames(
    class: &ClassFile,
    method: &MethodDef,
    code: &Code,
    hierarchy: &dyn CommonSuperclass,
) -> Result<FrameResult, AnalyzeError> {
    let descriptor = MethodDescriptor::parse(&method.descriptor)?;
    let offsets = code.offsets();
    let len = code.instructions.len();

    let labels = code
        .instructions
        .iter()
        .filter_map(|insn| insn.jump_target().map(|label| label.0))
        .chain(code.handlers.iter().map(|handler| handler.handler));
    for label in labels {
        if label >= len {
            return Err(CodeError::InvalidLabel(label).into());
        }
    }

    let mut entry_locals = Vec::new();
    if !method.is_static() {
        entry_locals.push(VerificationType::Object(class.name().to_string()));
    }
    entry_locals.extend(descriptor.params.iter().map(VerificationType::from_field));

    let used_slots = code
        .instructions
        .iter()
        .filter_map(|insn| match insn {
            Instruction::Iload(slot)
            | Instruction::Istore(slot)
            | Instruction::Aload(slot)
            | Instruction::Astore(slot) => Some(*slot as usize + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    let max_locals = entry_locals
        .len()
        .max(used_slots)
        .max(method.max_locals as usize);
    entry_locals.resize(max_locals, VerificationType::Top);

    let mut states: Vec<Option<State>> = vec![None; len];
    let mut max_stack = 0usize;

    if len > 0 {
        states[0] = Some(State {
            locals: entry_locals,
            stack: Vec::new(),
        });
    }

    let mut worklist: VecDeque<usize> = VecDeque::new();
    let mut queued = vec![false; len];
    if len > 0 {
        worklist.push_back(0);
        queued[0] = true;
    }

    while let Some(index) = worklist.pop_front() {
        queued[index] = false;
        let Some(before) = states[index].clone() else {
            continue;
        };
        let offset = offsets[index];
        let instruction = &code.instructions[index];

        let mut after = before.clone();
        step(class, instruction, &mut after, offset)?;
        max_stack = max_stack.max(before.stack.len()).max(after.stack.len());

        let mut successors = Vec::new();
        if let Some(target) = instruction.jump_target() {
            successors.push((target.0, after.clone()));
        }
        if !instruction.opcode().is_terminator() {
            if index + 1 >= len {
                return Err(AnalyzeError::FallsOffEnd(offset));
            }
            successors.push((index + 1, after));
        }
        for handler in &code.handlers {
            if handler.start <= index && index < handler.end {
                let catch_type = handler.catch_type.as_deref().unwrap_or(THROWABLE_TYPE);
                successors.push((
                    handler.handler,
                    State {
                        locals: before.locals.clone(),
                        stack: vec![VerificationType::Object(catch_type.to_string())],
                    },
                ));
                max_stack = max_stack.max(1);
            }
        }

        for (successor, incoming) in successors {
            let changed = match states[successor].as_mut() {
                Some(existing) => merge_into(existing, &incoming, hierarchy, offsets[successor])?,
                None => {
                    states[successor] = Some(incoming);
                    true
                }
            };
            if changed && !queued[successor] {
                queued[successor] = true;
                worklist.push_back(successor);
            }
        }
    }

    let targets: BTreeSet<usize> = code
        .instructions
        .iter()
        .filter_map(|insn| insn.jump_target().map(|label| label.0))
        .chain(code.handlers.iter().map(|handler| handler.handler))
        .collect();

    let frames = targets
        .into_iter()
        .map(|index| {
            let (mut locals, stack) = match &states[index] {
                Some(state) => (state.locals.clone(), state.stack.clone()),
                None => (Vec::new(), Vec::new()),
            };
            while locals.last() == Some(&VerificationType::Top) {
                locals.pop();
            }
            StackMapFrame {
                offset: offsets[index],
                locals,
                stack,
            }
        })
        .collect();

    Ok(FrameResult {
        frames,
        max_stack: limit("max_stack", max_stack)?,
        max_locals: limit("max_locals", max_locals)?,
    })
}

fn limit(name: &'static str, value: usize) -> Result<u16, AnalyzeError> {
    u16::try_from(value).map_err(|_| AnalyzeError::LimitExceeded {
        limit: name,
        required: value,
    })
}

/// Recompute frames and limits for every method with a body
pub fn recompute_class(
    class: &mut ClassFile,
    hierarchy: &dyn CommonSuperclass,
) -> Result<(), AnalyzeError> {
    let mut results = Vec::with_capacity(class.methods.len());
    for method in &class.methods {
        if !method.has_code() {
            results.push(None);
            continue;
        }
        let result = Code::from_method(method)
            .map_err(AnalyzeError::from)
            .and_then(|code| compute_frames(class, method, &code, hierarchy))
            .map_err(|source| AnalyzeError::InMethod {
                method: method.signature(),
                source: Box::new(source),
            })?;
        results.push(Some(result));
    }

    for (method, result) in class.methods.iter_mut().zip(results) {
        if let Some(result) = result {
            method.stack_map = result.frames;
            method.max_stack = result.max_stack;
            method.max_locals = result.max_locals;
        }
    }
    Ok(())
}

/// Apply one instruction's effect to `state`
fn step(
    class: &ClassFile,
    instruction: &Instruction,
    state: &mut State,
    offset: u32,
) -> Result<(), AnalyzeError> {
    let stack = &mut state.stack;
    match instruction {
        Instruction::Nop | Instruction::Goto(_) | Instruction::Return => {}
        Instruction::Pop => {
            pop(stack, offset)?;
        }
        Instruction::Dup => {
            let top = pop(stack, offset)?;
            stack.push(top.clone());
            stack.push(top);
        }
        Instruction::Swap => {
            let b = pop(stack, offset)?;
            let a = pop(stack, offset)?;
            stack.push(b);
            stack.push(a);
        }
        Instruction::AconstNull => stack.push(VerificationType::Null),
        Instruction::Iconst(_) => stack.push(VerificationType::Integer),
        Instruction::Ldc(index) => {
            class
                .constants
                .get_string(*index)
                .ok_or(AnalyzeError::UnknownConstant {
                    offset,
                    index: *index,
                })?;
            stack.push(VerificationType::Object(STRING_TYPE.to_string()));
        }
        Instruction::LdcClass(index) => {
            class_constant(class, *index, offset)?;
            stack.push(VerificationType::Object(CLASS_TYPE.to_string()));
        }
        Instruction::Iload(slot) => {
            let value = local(&state.locals, *slot, offset)?;
            expect_int(value, offset)?;
            state.stack.push(VerificationType::Integer);
        }
        Instruction::Aload(slot) => {
            let value = local(&state.locals, *slot, offset)?;
            expect_reference(value, offset)?;
            let value = value.clone();
            state.stack.push(value);
        }
        Instruction::Istore(slot) => {
            let value = pop(stack, offset)?;
            expect_int(&value, offset)?;
            store(&mut state.locals, *slot, value, offset)?;
        }
        Instruction::Astore(slot) => {
            let value = pop(stack, offset)?;
            expect_reference(&value, offset)?;
            store(&mut state.locals, *slot, value, offset)?;
        }
        Instruction::Iadd | Instruction::Isub | Instruction::Imul => {
            expect_int(&pop(stack, offset)?, offset)?;
            expect_int(&pop(stack, offset)?, offset)?;
            stack.push(VerificationType::Integer);
        }
        Instruction::IfEq(_) | Instruction::IfNe(_) | Instruction::IReturn => {
            expect_int(&pop(stack, offset)?, offset)?;
        }
        Instruction::IfNull(_)
        | Instruction::IfNonNull(_)
        | Instruction::AReturn
        | Instruction::AThrow => {
            expect_reference(&pop(stack, offset)?, offset)?;
        }
        Instruction::InvokeStatic(index) | Instruction::InvokeVirtual(index) => {
            let method_ref =
                class
                    .constants
                    .get_method_ref(*index)
                    .ok_or(AnalyzeError::UnknownConstant {
                        offset,
                        index: *index,
                    })?;
            let descriptor = MethodDescriptor::parse(&method_ref.descriptor)?;
            for param in descriptor.params.iter().rev() {
                expect_field(&pop(stack, offset)?, param, offset)?;
            }
            if matches!(instruction, Instruction::InvokeVirtual(_)) {
                expect_reference(&pop(stack, offset)?, offset)?;
            }
            if let Some(ret) = &descriptor.ret {
                stack.push(VerificationType::from_field(ret));
            }
        }
        Instruction::New(index) => {
            let name = class_constant(class, *index, offset)?;
            stack.push(VerificationType::Object(name.to_string()));
        }
        Instruction::CheckCast(index) => {
            let name = class_constant(class, *index, offset)?;
            expect_reference(&pop(stack, offset)?, offset)?;
            stack.push(VerificationType::Object(name.to_string()));
        }
        Instruction::InstanceOf(index) => {
            class_constant(class, *index, offset)?;
            expect_reference(&pop(stack, offset)?, offset)?;
            stack.push(VerificationType::Integer);
        }
    }
    Ok(())
}

fn pop(stack: &mut Vec<VerificationType>, offset: u32) -> Result<VerificationType, AnalyzeError> {
    stack.pop().ok_or(AnalyzeError::StackUnderflow(offset))
}

fn local(
    locals: &[VerificationType],
    slot: u16,
    offset: u32,
) -> Result<&VerificationType, AnalyzeError> {
    locals
        .get(slot as usize)
        .ok_or(AnalyzeError::LocalOutOfRange { offset, slot })
}

fn store(
    locals: &mut [VerificationType],
    slot: u16,
    value: VerificationType,
    offset: u32,
) -> Result<(), AnalyzeError> {
    let target = locals
        .get_mut(slot as usize)
        .ok_or(AnalyzeError::LocalOutOfRange { offset, slot })?;
    *target = value;
    Ok(())
}

fn class_constant(class: &ClassFile, index: u32, offset: u32) -> Result<&str, AnalyzeError> {
    class
        .constants
        .get_class(index)
        .ok_or(AnalyzeError::UnknownConstant { offset, index })
}

fn expect_int(value: &VerificationType, offset: u32) -> Result<(), AnalyzeError> {
    if *value == VerificationType::Integer {
        Ok(())
    } else {
        Err(AnalyzeError::TypeMismatch {
            offset,
            expected: "int",
            found: value.clone(),
        })
    }
}

fn expect_reference(value: &VerificationType, offset: u32) -> Result<(), AnalyzeError> {
    if value.is_reference() {
        Ok(())
    } else {
        Err(AnalyzeError::TypeMismatch {
            offset,
            expected: "reference",
            found: value.clone(),
        })
    }
}

fn expect_field(
    value: &VerificationType,
    expected: &FieldType,
    offset: u32,
) -> Result<(), AnalyzeError> {
    if expected.is_reference() {
        return expect_reference(value, offset);
    }
    let wanted = VerificationType::from_field(expected);
    if *value == wanted {
        Ok(())
    } else {
        Err(AnalyzeError::TypeMismatch {
            offset,
            expected: "primitive argument",
            found: value.clone(),
        })
    }
}

/// Merge `incoming` into `existing`, returning whether anything changed
fn merge_into(
    existing: &mut State,
    incoming: &State,
    hierarchy: &dyn CommonSuperclass,
    offset: u32,
) -> Result<bool, AnalyzeError> {
    if existing.stack.len() != incoming.stack.len() {
        return Err(AnalyzeError::FrameMismatch {
            offset,
            detail: format!(
                "stack height {} vs {}",
                existing.stack.len(),
                incoming.stack.len()
            ),
        });
    }

    let mut changed = false;
    for (current, other) in existing.stack.iter_mut().zip(&incoming.stack) {
        let merged = merge_type(current, other, hierarchy);
        if merged == VerificationType::Top {
            return Err(AnalyzeError::FrameMismatch {
                offset,
                detail: format!("stack entry {} vs {}", current, other),
            });
        }
        if merged != *current {
            *current = merged;
            changed = true;
        }
    }
    for (current, other) in existing.locals.iter_mut().zip(&incoming.locals) {
        let merged = merge_type(current, other, hierarchy);
        if merged != *current {
            *current = merged;
            changed = true;
        }
    }
    Ok(changed)
}

fn merge_type(
    a: &VerificationType,
    b: &VerificationType,
    hierarchy: &dyn CommonSuperclass,
) -> VerificationType {
    match (a, b) {
        _ if a == b => a.clone(),
        (VerificationType::Null, VerificationType::Object(_)) => b.clone(),
        (VerificationType::Object(_), VerificationType::Null) => a.clone(),
        (VerificationType::Object(x), VerificationType::Object(y)) => {
            if x.starts_with('[') || y.starts_with('[') {
                return VerificationType::Object(ROOT_TYPE.to_string());
            }
            VerificationType::Object(
                hierarchy
                    .common_super_class(x, y)
                    .unwrap_or_else(|| ROOT_TYPE.to_string()),
            )
        }
        _ => VerificationType::Top,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::class::access;
    use crate::classfile::code::{Handler, Label};
    use crate::classfile::constants::MethodRef;

    fn object(name: &str) -> VerificationType {
        VerificationType::Object(name.to_string())
    }

    /// `static Object pick(int flag)`: returns a `Dog` or a `Cat`
    fn diamond() -> (ClassFile, MethodDef, Code) {
        let mut class = ClassFile::new("zoo/Keeper", Some(ROOT_TYPE));
        let dog = class.constants.add_class("zoo/Dog");
        let cat = class.constants.add_class("zoo/Cat");
        let method = MethodDef::new(access::STATIC, "pick", "(I)Ljava/lang/Object;");
        let code = Code::new(vec![
            Instruction::Iload(0),
            Instruction::IfEq(Label(4)),
            Instruction::New(dog),
            Instruction::Goto(Label(5)),
            Instruction::New(cat),
            Instruction::AReturn,
        ]);
        (class, method, code)
    }

    #[test]
    fn test_merge_uses_hierarchy() {
        let (class, method, code) = diamond();
        let hierarchy = |a: &str, b: &str| {
            let mut pair = [a, b];
            pair.sort_unstable();
            assert_eq!(pair, ["zoo/Cat", "zoo/Dog"]);
            Some("zoo/Animal".to_string())
        };
        let result = compute_frames(&class, &method, &code, &hierarchy).unwrap();

        assert_eq!(result.max_stack, 1);
        assert_eq!(result.max_locals, 1);
        assert_eq!(result.frames.len(), 2);
        let offsets = code.offsets();
        assert_eq!(
            result.frames[0],
            StackMapFrame {
                offset: offsets[4],
                locals: vec![VerificationType::Integer],
                stack: vec![],
            }
        );
        assert_eq!(
            result.frames[1],
            StackMapFrame {
                offset: offsets[5],
                locals: vec![VerificationType::Integer],
                stack: vec![object("zoo/Animal")],
            }
        );
    }

    #[test]
    fn test_unknown_ancestor_falls_back_to_root() {
        let (class, method, code) = diamond();
        let result = compute_frames(&class, &method, &code, &RootOnly).unwrap();
        assert_eq!(result.frames[1].stack, vec![object(ROOT_TYPE)]);
    }

    #[test]
    fn test_instance_method_entry_has_this() {
        let mut class = ClassFile::new("a/Thing", Some(ROOT_TYPE));
        let target = class
            .constants
            .add_method_ref(&MethodRef::new("a/Util", "touch", "(La/Thing;)V"));
        let method = MethodDef::new(access::PUBLIC, "run", "(Ljava/lang/String;)V");
        let code = Code {
            instructions: vec![
                Instruction::Aload(0),
                Instruction::InvokeStatic(target),
                Instruction::Return,
                Instruction::Astore(1),
                Instruction::Return,
            ],
            handlers: vec![Handler {
                start: 0,
                end: 2,
                handler: 3,
                catch_type: None,
            }],
        };
        let result = compute_frames(&class, &method, &code, &RootOnly).unwrap();
        assert_eq!(result.max_locals, 2);
        assert_eq!(
            result.frames,
            vec![StackMapFrame {
                offset: code.offsets()[3],
                locals: vec![object("a/Thing"), object("java/lang/String")],
                stack: vec![object(THROWABLE_TYPE)],
            }]
        );
    }

    #[test]
    fn test_stack_height_mismatch() {
        let class = ClassFile::new("a/B", Some(ROOT_TYPE));
        let method = MethodDef::new(access::STATIC, "bad", "(I)V");
        let code = Code::new(vec![
            Instruction::Iload(0),
            Instruction::IfEq(Label(3)),
            Instruction::Iconst(1),
            Instruction::Return,
        ]);
        let err = compute_frames(&class, &method, &code, &RootOnly).unwrap_err();
        assert!(matches!(err, AnalyzeError::FrameMismatch { .. }));
    }

    #[test]
    fn test_stack_underflow_and_fall_through() {
        let class = ClassFile::new("a/B", Some(ROOT_TYPE));
        let method = MethodDef::new(access::STATIC, "bad", "()V");

        let code = Code::new(vec![Instruction::Pop, Instruction::Return]);
        assert_eq!(
            compute_frames(&class, &method, &code, &RootOnly),
            Err(AnalyzeError::StackUnderflow(0))
        );

        let code = Code::new(vec![Instruction::Nop]);
        assert_eq!(
            compute_frames(&class, &method, &code, &RootOnly),
            Err(AnalyzeError::FallsOffEnd(0))
        );
    }

    #[test]
    fn test_merged_local_becomes_top() {
        let class = ClassFile::new("a/B", Some(ROOT_TYPE));
        let method = MethodDef::new(access::STATIC, "m", "(I)V");
        let code = Code::new(vec![
            Instruction::Iload(0),
            Instruction::IfEq(Label(4)),
            Instruction::AconstNull,
            Instruction::Astore(0),
            Instruction::Return,
        ]);
        let result = compute_frames(&class, &method, &code, &RootOnly).unwrap();
        // int and null meet at the return: the slot is unusable there
        assert_eq!(result.frames[0].locals, vec![]);
    }

    #[test]
    fn test_recompute_class_names_method_on_error() {
        let mut class = ClassFile::new("a/B", Some(ROOT_TYPE));
        let mut method = MethodDef::new(access::STATIC, "broken", "()V");
        Code::new(vec![Instruction::Pop, Instruction::Return])
            .write_to(&mut method)
            .unwrap();
        class.methods.push(method);

        let err = recompute_class(&mut class, &RootOnly).unwrap_err();
        assert!(err.to_string().contains("broken()V"));
    }

    #[test]
    fn test_locals_past_u16_are_an_error() {
        let class = ClassFile::new("a/B", Some(ROOT_TYPE));
        let method = MethodDef::new(access::STATIC, "wide", "()V");

        let code = Code::new(vec![Instruction::Iconst(0), Instruction::Istore(u16::MAX), Instruction::Return]);
        assert_eq!(
            compute_frames(&class, &method, &code, &RootOnly),
            Err(AnalyzeError::LimitExceeded {
                limit: "max_locals",
                required: u16::MAX as usize + 1,
            })
        );
    }

    #[test]
    fn test_largest_slot_fits() {
        let class = ClassFile::new("a/B", Some(ROOT_TYPE));
        let method = MethodDef::new(access::STATIC, "edge", "()V");
        let code = Code::new(vec![Instruction::Iconst(0), Instruction::Istore(u16::MAX - 1), Instruction::Return]);
        let result = compute_frames(&class, &method, &code, &RootOnly).unwrap();
        assert_eq!(result.max_locals, u16::MAX);
    }
}
