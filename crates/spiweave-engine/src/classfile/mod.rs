//! Class container format
//!
//! Classes are stored in a compact binary container: a checksummed header
//! naming the class and its supertypes, a constant pool, and method bodies
//! with exception tables and stack-map frames.
//!
//! - [`class`]: container layout, header-only reads
//! - [`code`]: editable instruction lists
//! - [`analyzer`]: stack-map frame computation
//! - [`verify`]: structural verification

pub mod analyzer;
pub mod class;
pub mod code;
pub mod constants;
pub mod descriptor;
pub mod encoder;
pub mod frames;
pub mod opcode;
pub mod verify;

pub use analyzer::{compute_frames, recompute_class, CommonSuperclass, FrameResult, RootOnly};
pub use class::{access, ClassError, ClassFile, ClassHeader, ExceptionHandler, MethodDef};
pub use code::{Code, CodeError, Handler, Instruction, Label};
pub use constants::{ConstantPool, MethodRef};
pub use descriptor::{FieldType, MethodDescriptor};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use frames::{StackMapFrame, VerificationType, ROOT_TYPE};
pub use opcode::Opcode;
pub use verify::{verify_class, VerifyError};

/// Convert a dotted class name (`a.b.C`) to its internal form (`a/b/C`)
pub fn internal_name(dotted: &str) -> String {
    dotted.replace('.', "/")
}

/// Convert an internal class name (`a/b/C`) to its dotted form (`a.b.C`)
pub fn dotted_name(internal: &str) -> String {
    internal.replace('/', ".")
}

/// Package of an internal class name, dotted; `""` for the default package
pub fn package_of(internal: &str) -> String {
    match internal.rfind('/') {
        Some(pos) => dotted_name(&internal[..pos]),
        None => String::new(),
    }
}

/// Resource path holding a class (`a/b/C.class`)
pub fn class_resource(internal: &str) -> String {
    format!("{}.class", internal)
}
