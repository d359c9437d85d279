//! Instruction-level view of a method body
//!
//! Raw method bytes carry relative branch offsets, which makes in-place edits
//! awkward. [`Code`] decodes a body into a list of [`Instruction`]s whose
//! branch targets are instruction indices ([`Label`]s), so instructions can be
//! inserted or replaced and the body re-encoded with all offsets fixed up.

use super::class::{ExceptionHandler, MethodDef};
use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use super::opcode::Opcode;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Method body errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodeError {
    /// Truncated or malformed operand
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Unknown opcode byte
    #[error("Invalid opcode {opcode:#x} at offset {offset}")]
    InvalidOpcode {
        /// Opcode byte
        opcode: u8,
        /// Bytecode offset
        offset: usize,
    },

    /// Branch lands outside the body or in the middle of an instruction
    #[error("Invalid jump target {target} from offset {offset}")]
    InvalidJumpTarget {
        /// Computed target offset
        target: i64,
        /// Offset of the branch instruction
        offset: usize,
    },

    /// Exception table entry does not line up with instruction boundaries
    #[error("Invalid exception handler range {start}..{end} -> {handler}")]
    InvalidHandlerRange {
        /// Range start offset
        start: u32,
        /// Range end offset
        end: u32,
        /// Handler offset
        handler: u32,
    },

    /// Label refers past the end of the instruction list
    #[error("Label {0} out of bounds")]
    InvalidLabel(usize),
}

/// A branch target, expressed as an instruction index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub usize);

/// A decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `nop`
    Nop,
    /// `pop`
    Pop,
    /// `dup`
    Dup,
    /// `swap`
    Swap,
    /// `aconst_null`
    AconstNull,
    /// `iconst`
    Iconst(i32),
    /// `ldc` string index
    Ldc(u32),
    /// `ldc_class` class index
    LdcClass(u32),
    /// `iload` slot
    Iload(u16),
    /// `istore` slot
    Istore(u16),
    /// `aload` slot
    Aload(u16),
    /// `astore` slot
    Astore(u16),
    /// `iadd`
    Iadd,
    /// `isub`
    Isub,
    /// `imul`
    Imul,
    /// `ifeq`
    IfEq(Label),
    /// `ifne`
    IfNe(Label),
    /// `ifnull`
    IfNull(Label),
    /// `ifnonnull`
    IfNonNull(Label),
    /// `goto`
    Goto(Label),
    /// `invokestatic` method reference index
    InvokeStatic(u32),
    /// `invokevirtual` method reference index
    InvokeVirtual(u32),
    /// `new` class index
    New(u32),
    /// `checkcast` class index
    CheckCast(u32),
    /// `instanceof` class index
    InstanceOf(u32),
    /// `return`
    Return,
    /// `ireturn`
    IReturn,
    /// `areturn`
    AReturn,
    /// `athrow`
    AThrow,
}

impl Instruction {
    /// The instruction's opcode
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Nop => Opcode::Nop,
            Self::Pop => Opcode::Pop,
            Self::Dup => Opcode::Dup,
            Self::Swap => Opcode::Swap,
            Self::AconstNull => Opcode::AconstNull,
            Self::Iconst(_) => Opcode::Iconst,
            Self::Ldc(_) => Opcode::Ldc,
            Self::LdcClass(_) => Opcode::LdcClass,
            Self::Iload(_) => Opcode::Iload,
            Self::Istore(_) => Opcode::Istore,
            Self::Aload(_) => Opcode::Aload,
            Self::Astore(_) => Opcode::Astore,
            Self::Iadd => Opcode::Iadd,
            Self::Isub => Opcode::Isub,
            Self::Imul => Opcode::Imul,
            Self::IfEq(_) => Opcode::IfEq,
            Self::IfNe(_) => Opcode::IfNe,
            Self::IfNull(_) => Opcode::IfNull,
            Self::IfNonNull(_) => Opcode::IfNonNull,
            Self::Goto(_) => Opcode::Goto,
            Self::InvokeStatic(_) => Opcode::InvokeStatic,
            Self::InvokeVirtual(_) => Opcode::InvokeVirtual,
            Self::New(_) => Opcode::New,
            Self::CheckCast(_) => Opcode::CheckCast,
            Self::InstanceOf(_) => Opcode::InstanceOf,
            Self::Return => Opcode::Return,
            Self::IReturn => Opcode::IReturn,
            Self::AReturn => Opcode::AReturn,
            Self::AThrow => Opcode::AThrow,
        }
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        1 + self.opcode().operand_size()
    }

    /// Branch target, if this is a jump
    pub fn jump_target(&self) -> Option<Label> {
        match self {
            Self::IfEq(label)
            | Self::IfNe(label)
            | Self::IfNull(label)
            | Self::IfNonNull(label)
            | Self::Goto(label) => Some(*label),
            _ => None,
        }
    }

    fn jump_target_mut(&mut self) -> Option<&mut Label> {
        match self {
            Self::IfEq(label)
            | Self::IfNe(label)
            | Self::IfNull(label)
            | Self::IfNonNull(label)
            | Self::Goto(label) => Some(label),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().name();
        match self {
            Self::Iconst(value) => write!(f, "{} {}", name, value),
            Self::Ldc(index)
            | Self::LdcClass(index)
            | Self::InvokeStatic(index)
            | Self::InvokeVirtual(index)
            | Self::New(index)
            | Self::CheckCast(index)
            | Self::InstanceOf(index) => write!(f, "{} #{}", name, index),
            Self::Iload(slot) | Self::Istore(slot) | Self::Aload(slot) | Self::Astore(slot) => {
                write!(f, "{} {}", name, slot)
            }
            Self::IfEq(label)
            | Self::IfNe(label)
            | Self::IfNull(label)
            | Self::IfNonNull(label)
            | Self::Goto(label) => write!(f, "{} L{}", name, label.0),
            _ => write!(f, "{}", name),
        }
    }
}

/// An exception handler over instruction indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    /// First covered instruction
    pub start: usize,
    /// End of the covered range (exclusive)
    pub end: usize,
    /// Handler entry instruction
    pub handler: usize,
    /// Caught type; `None` catches everything
    pub catch_type: Option<String>,
}

/// Re-encoded method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCode {
    /// Instruction bytes
    pub bytes: Vec<u8>,
    /// Exception table in bytecode offsets
    pub exception_table: Vec<ExceptionHandler>,
    /// Bytecode offset of each instruction, plus the end offset
    pub offsets: Vec<u32>,
}

/// A method body as an editable instruction list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Code {
    /// Instructions in order
    pub instructions: Vec<Instruction>,
    /// Exception handlers
    pub handlers: Vec<Handler>,
}

impl Code {
    /// Create a body from instructions, with no handlers
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            handlers: Vec::new(),
        }
    }

    /// Decode a method's body
    pub fn from_method(method: &MethodDef) -> Result<Self, CodeError> {
        Self::decode(&method.code, &method.exception_table)
    }

    /// Decode raw instruction bytes and an exception table
    pub fn decode(bytes: &[u8], table: &[ExceptionHandler]) -> Result<Self, CodeError> {
        let mut reader = BytecodeReader::new(bytes);
        // (offset, opcode, raw operand) for the first pass
        let mut raw = Vec::new();
        let mut index_of: HashMap<usize, usize> = HashMap::new();

        while reader.has_more() {
            let offset = reader.position();
            let byte = reader.read_u8()?;
            let opcode = Opcode::from_u8(byte).ok_or(CodeError::InvalidOpcode {
                opcode: byte,
                offset,
            })?;
            let operand = match opcode.operand_size() {
                2 => reader.read_u16()? as i64,
                4 if opcode == Opcode::Iconst || opcode.is_jump() => reader.read_i32()? as i64,
                4 => reader.read_u32()? as i64,
                _ => 0,
            };
            index_of.insert(offset, raw.len());
            raw.push((offset, opcode, operand));
        }
        let end_index = raw.len();
        index_of.insert(bytes.len(), end_index);

        let mut instructions = Vec::with_capacity(raw.len());
        for &(offset, opcode, operand) in &raw {
            let label = || -> Result<Label, CodeError> {
                let target = offset as i64 + opcode.operand_size() as i64 + 1 + operand;
                usize::try_from(target)
                    .ok()
                    .and_then(|t| index_of.get(&t).copied())
                    .filter(|&index| index < end_index)
                    .map(Label)
                    .ok_or(CodeError::InvalidJumpTarget { target, offset })
            };
            let instruction = match opcode {
                Opcode::Nop => Instruction::Nop,
                Opcode::Pop => Instruction::Pop,
                Opcode::Dup => Instruction::Dup,
                Opcode::Swap => Instruction::Swap,
                Opcode::AconstNull => Instruction::AconstNull,
                Opcode::Iconst => Instruction::Iconst(operand as i32),
                Opcode::Ldc => Instruction::Ldc(operand as u32),
                Opcode::LdcClass => Instruction::LdcClass(operand as u32),
                Opcode::Iload => Instruction::Iload(operand as u16),
                Opcode::Istore => Instruction::Istore(operand as u16),
                Opcode::Aload => Instruction::Aload(operand as u16),
                Opcode::Astore => Instruction::Astore(operand as u16),
                Opcode::Iadd => Instruction::Iadd,
                Opcode::Isub => Instruction::Isub,
                Opcode::Imul => Instruction::Imul,
                Opcode::IfEq => Instruction::IfEq(label()?),
                Opcode::IfNe => Instruction::IfNe(label()?),
                Opcode::IfNull => Instruction::IfNull(label()?),
                Opcode::IfNonNull => Instruction::IfNonNull(label()?),
                Opcode::Goto => Instruction::Goto(label()?),
                Opcode::InvokeStatic => Instruction::InvokeStatic(operand as u32),
                Opcode::InvokeVirtual => Instruction::InvokeVirtual(operand as u32),
                Opcode::New => Instruction::New(operand as u32),
                Opcode::CheckCast => Instruction::CheckCast(operand as u32),
                Opcode::InstanceOf => Instruction::InstanceOf(operand as u32),
                Opcode::Return => Instruction::Return,
                Opcode::IReturn => Instruction::IReturn,
                Opcode::AReturn => Instruction::AReturn,
                Opcode::AThrow => Instruction::AThrow,
            };
            instructions.push(instruction);
        }

        let mut handlers = Vec::with_capacity(table.len());
        for entry in table {
            let bad_range = || CodeError::InvalidHandlerRange {
                start: entry.start,
                end: entry.end,
                handler: entry.handler,
            };
            let lookup = |offset: u32| index_of.get(&(offset as usize)).copied();
            let start = lookup(entry.start).ok_or_else(bad_range)?;
            let end = lookup(entry.end).ok_or_else(bad_range)?;
            let handler = lookup(entry.handler)
                .filter(|&index| index < end_index)
                .ok_or_else(bad_range)?;
            if start >= end {
                return Err(bad_range());
            }
            handlers.push(Handler {
                start,
                end,
                handler,
                catch_type: entry.catch_type.clone(),
            });
        }

        Ok(Self {
            instructions,
            handlers,
        })
    }

    /// Bytecode offset of every instruction, plus the end offset
    pub fn offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut offset = 0u32;
        for instruction in &self.instructions {
            offsets.push(offset);
            offset += instruction.size() as u32;
        }
        offsets.push(offset);
        offsets
    }

    /// Encode the body back into bytes and an offset-based exception table
    pub fn encode(&self) -> Result<EncodedCode, CodeError> {
        let offsets = self.offsets();
        let len = self.instructions.len();
        let offset_of = |index: usize| {
            offsets
                .get(index)
                .copied()
                .ok_or(CodeError::InvalidLabel(index))
        };

        let mut writer = BytecodeWriter::with_capacity(offsets[len] as usize);
        for (index, instruction) in self.instructions.iter().enumerate() {
            writer.emit_opcode(instruction.opcode());
            match instruction {
                Instruction::Iconst(value) => writer.emit_i32(*value),
                Instruction::Ldc(pool_index)
                | Instruction::LdcClass(pool_index)
                | Instruction::InvokeStatic(pool_index)
                | Instruction::InvokeVirtual(pool_index)
                | Instruction::New(pool_index)
                | Instruction::CheckCast(pool_index)
                | Instruction::InstanceOf(pool_index) => writer.emit_u32(*pool_index),
                Instruction::Iload(slot)
                | Instruction::Istore(slot)
                | Instruction::Aload(slot)
                | Instruction::Astore(slot) => writer.emit_u16(*slot),
                Instruction::IfEq(label)
                | Instruction::IfNe(label)
                | Instruction::IfNull(label)
                | Instruction::IfNonNull(label)
                | Instruction::Goto(label) => {
                    if label.0 >= len {
                        return Err(CodeError::InvalidLabel(label.0));
                    }
                    let next = offsets[index + 1] as i64;
                    writer.emit_i32((offset_of(label.0)? as i64 - next) as i32);
                }
                _ => {}
            }
        }

        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            if handler.handler >= len {
                return Err(CodeError::InvalidLabel(handler.handler));
            }
            exception_table.push(ExceptionHandler {
                start: offset_of(handler.start)?,
                end: offset_of(handler.end)?,
                handler: offset_of(handler.handler)?,
                catch_type: handler.catch_type.clone(),
            });
        }

        Ok(EncodedCode {
            bytes: writer.into_bytes(),
            exception_table,
            offsets,
        })
    }

    /// Store the encoded body into `method`
    ///
    /// The stack-map table is left untouched; callers recompute it.
    pub fn write_to(&self, method: &mut MethodDef) -> Result<EncodedCode, CodeError> {
        let encoded = self.encode()?;
        method.code = encoded.bytes.clone();
        method.exception_table = encoded.exception_table.clone();
        Ok(encoded)
    }

    /// Insert `instruction` so that it executes immediately before the
    /// instruction currently at `index`
    ///
    /// Branches and handlers that pointed at `index` now reach the inserted
    /// instruction first. Anything after `index` shifts by one.
    pub fn insert_before(&mut self, index: usize, instruction: Instruction) {
        let shift = |target: &mut usize| {
            if *target > index {
                *target += 1;
            }
        };
        for existing in &mut self.instructions {
            if let Some(label) = existing.jump_target_mut() {
                shift(&mut label.0);
            }
        }
        for handler in &mut self.handlers {
            shift(&mut handler.start);
            shift(&mut handler.end);
            shift(&mut handler.handler);
        }
        self.instructions.insert(index, instruction);
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let offsets = self.offsets();
        for (index, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "  L{:<3} {:>5}: {}", index, offsets[index], instruction)?;
        }
        for handler in &self.handlers {
            writeln!(
                f,
                "  catch {} L{}..L{} -> L{}",
                handler.catch_type.as_deref().unwrap_or("any"),
                handler.start,
                handler.end,
                handler.handler
            )?;
        }
        Ok(())
    }
}
