//! Stack-map frames
//!
//! A frame records the verification type of every local slot and operand
//! stack entry at an instruction that can be reached from more than one
//! place (branch targets and exception handlers). The table must be kept
//! consistent with the code after any instruction-level edit.

use super::descriptor::FieldType;
use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use std::fmt;

/// Internal name of the universal root type
pub const ROOT_TYPE: &str = "java/lang/Object";

/// Verification type of a local slot or stack entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    /// Unusable / unassigned slot
    Top,
    /// 32-bit integer (also booleans, bytes, chars, shorts)
    Integer,
    /// Float
    Float,
    /// Long
    Long,
    /// Double
    Double,
    /// The null reference
    Null,
    /// Reference to an instance of the named type (internal name or array descriptor)
    Object(String),
}

impl VerificationType {
    /// Verification type for a value of the given field type
    pub fn from_field(ty: &FieldType) -> Self {
        match ty {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Boolean
            | FieldType::Int => Self::Integer,
            FieldType::Float => Self::Float,
            FieldType::Long => Self::Long,
            FieldType::Double => Self::Double,
            FieldType::Object(name) => Self::Object(name.clone()),
            array @ FieldType::Array(_) => Self::Object(array.to_string()),
        }
    }

    /// Whether the value is a reference (including null)
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Null | Self::Object(_))
    }

    fn tag(&self) -> u8 {
        match self {
            Self::Top => 0,
            Self::Integer => 1,
            Self::Float => 2,
            Self::Long => 3,
            Self::Double => 4,
            Self::Null => 5,
            Self::Object(_) => 6,
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u8(self.tag());
        if let Self::Object(name) = self {
            writer.emit_string(name);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let ty = match reader.read_u8()? {
            0 => Self::Top,
            1 => Self::Integer,
            2 => Self::Float,
            3 => Self::Long,
            4 => Self::Double,
            5 => Self::Null,
            6 => Self::Object(reader.read_string()?),
            tag => return Err(DecodeError::InvalidTag(tag, offset)),
        };
        Ok(ty)
    }
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Top => write!(f, "top"),
            Self::Integer => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Long => write!(f, "long"),
            Self::Double => write!(f, "double"),
            Self::Null => write!(f, "null"),
            Self::Object(name) => write!(f, "{}", name),
        }
    }
}

/// A full stack-map frame at a bytecode offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    /// Bytecode offset of the instruction this frame describes
    pub offset: u32,
    /// Local slot types (trailing `Top` slots omitted)
    pub locals: Vec<VerificationType>,
    /// Operand stack types, bottom first
    pub stack: Vec<VerificationType>,
}

impl StackMapFrame {
    /// Encode a frame
    pub(crate) fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.offset);
        writer.emit_u32(self.locals.len() as u32);
        for local in &self.locals {
            local.encode(writer);
        }
        writer.emit_u32(self.stack.len() as u32);
        for entry in &self.stack {
            entry.encode(writer);
        }
    }

    /// Decode a frame
    pub(crate) fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.read_u32()?;
        let local_count = reader.read_u32()? as usize;
        let mut locals = Vec::with_capacity(local_count);
        for _ in 0..local_count {
            locals.push(VerificationType::decode(reader)?);
        }
        let stack_count = reader.read_u32()? as usize;
        let mut stack = Vec::with_capacity(stack_count);
        for _ in 0..stack_count {
            stack.push(VerificationType::decode(reader)?);
        }
        Ok(Self {
            offset,
            locals,
            stack,
        })
    }
}

impl fmt::Display for StackMapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[VerificationType]| {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "@{} locals=[{}] stack=[{}]",
            self.offset,
            join(&self.locals),
            join(&self.stack)
        )
    }
}
