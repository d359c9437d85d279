//! Class container format

use super::code::CodeError;
use super::constants::ConstantPool;
use super::descriptor::DescriptorError;
use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use super::frames::StackMapFrame;
use thiserror::Error;

/// Magic number for class containers: "SPWC"
pub const MAGIC: [u8; 4] = *b"SPWC";

/// Current container version
pub const VERSION: u32 = 1;

/// Size of the fixed prefix: magic + version + checksum
const PREFIX_LEN: usize = 12;

/// Class encoding/decoding errors
#[derive(Debug, Error)]
pub enum ClassError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected SPWC, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Checksum of the payload
        actual: u32,
    },

    /// Malformed descriptor
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Malformed method body
    #[error("Code error in {method}: {source}")]
    Code {
        /// Method name and descriptor
        method: String,
        /// Underlying error
        #[source]
        source: CodeError,
    },
}

/// Access flags for classes and methods
pub mod access {
    /// Visible everywhere
    pub const PUBLIC: u32 = 0x0001;
    /// Visible to the declaring type only
    pub const PRIVATE: u32 = 0x0002;
    /// Class-level member
    pub const STATIC: u32 = 0x0008;
    /// Cannot be overridden / subclassed
    pub const FINAL: u32 = 0x0010;
    /// Interface type
    pub const INTERFACE: u32 = 0x0200;
    /// No body
    pub const ABSTRACT: u32 = 0x0400;
}

/// The header of a class: identity and supertypes
///
/// This is everything the ancestry resolver needs, and it can be read without
/// decoding the constant pool or any method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    /// Access flags
    pub access: u32,
    /// Internal name (`a/b/C`)
    pub name: String,
    /// Internal name of the superclass; `None` only for the root type
    pub super_name: Option<String>,
    /// Internal names of implemented interfaces
    pub interfaces: Vec<String>,
}

impl ClassHeader {
    /// Read only the header of an encoded class
    ///
    /// Verifies magic and version but skips the checksum pass.
    pub fn read(data: &[u8]) -> Result<Self, ClassError> {
        let mut reader = BytecodeReader::new(data);
        read_prefix(&mut reader)?;
        Self::decode(&mut reader)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.access);
        writer.emit_string(&self.name);
        writer.emit_opt_string(self.super_name.as_deref());
        writer.emit_u32(self.interfaces.len() as u32);
        for interface in &self.interfaces {
            writer.emit_string(interface);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, ClassError> {
        let access = reader.read_u32()?;
        let name = reader.read_string()?;
        let super_name = reader.read_opt_string()?;
        let interface_count = reader.read_u32()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(reader.read_string()?);
        }
        Ok(Self {
            access,
            name,
            super_name,
            interfaces,
        })
    }
}

/// An exception table entry, in bytecode offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First covered offset (inclusive)
    pub start: u32,
    /// End of the covered range (exclusive)
    pub end: u32,
    /// Handler entry offset
    pub handler: u32,
    /// Caught type; `None` catches everything
    pub catch_type: Option<String>,
}

/// Method definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    /// Access flags
    pub access: u32,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local slots
    pub max_locals: u16,
    /// Encoded instructions (empty for abstract methods)
    pub code: Vec<u8>,
    /// Exception table
    pub exception_table: Vec<ExceptionHandler>,
    /// Stack-map table
    pub stack_map: Vec<StackMapFrame>,
}

impl MethodDef {
    /// Create a method with no body
    pub fn new(access: u32, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            max_stack: 0,
            max_locals: 0,
            code: Vec::new(),
            exception_table: Vec::new(),
            stack_map: Vec::new(),
        }
    }

    /// Whether the method is static
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Whether the method has a body
    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    /// `name` + `descriptor`, used in diagnostics
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.access);
        writer.emit_string(&self.name);
        writer.emit_string(&self.descriptor);
        writer.emit_u16(self.max_stack);
        writer.emit_u16(self.max_locals);

        writer.emit_u32(self.code.len() as u32);
        writer.emit_bytes(&self.code);

        writer.emit_u32(self.exception_table.len() as u32);
        for entry in &self.exception_table {
            writer.emit_u32(entry.start);
            writer.emit_u32(entry.end);
            writer.emit_u32(entry.handler);
            writer.emit_opt_string(entry.catch_type.as_deref());
        }

        writer.emit_u32(self.stack_map.len() as u32);
        for frame in &self.stack_map {
            frame.encode(writer);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let access = reader.read_u32()?;
        let name = reader.read_string()?;
        let descriptor = reader.read_string()?;
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;

        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;

        let handler_count = reader.read_u32()? as usize;
        let mut exception_table = Vec::with_capacity(handler_count);
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler {
                start: reader.read_u32()?,
                end: reader.read_u32()?,
                handler: reader.read_u32()?,
                catch_type: reader.read_opt_string()?,
            });
        }

        let frame_count = reader.read_u32()? as usize;
        let mut stack_map = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            stack_map.push(StackMapFrame::decode(reader)?);
        }

        Ok(Self {
            access,
            name,
            descriptor,
            max_stack,
            max_locals,
            code,
            exception_table,
            stack_map,
        })
    }
}

/// A compiled class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    /// Identity and supertypes
    pub header: ClassHeader,
    /// Constant pool
    pub constants: ConstantPool,
    /// Method definitions
    pub methods: Vec<MethodDef>,
    /// Source file name, if recorded
    pub source_file: Option<String>,
}

impl ClassFile {
    /// Create an empty public class
    pub fn new(name: impl Into<String>, super_name: Option<&str>) -> Self {
        Self {
            header: ClassHeader {
                access: access::PUBLIC,
                name: name.into(),
                super_name: super_name.map(str::to_owned),
                interfaces: Vec::new(),
            },
            constants: ConstantPool::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    /// Internal name of the class
    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Encode the class
    ///
    /// Format:
    /// - Prefix: magic (4 bytes) + version (u32) + checksum (u32)
    /// - Header: access, name, superclass, interfaces
    /// - Constant pool
    /// - Method table
    /// - Source file (optional)
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        writer.emit_bytes(&MAGIC);
        writer.emit_u32(VERSION);
        let checksum_offset = writer.offset();
        writer.emit_u32(0);

        self.header.encode(&mut writer);
        self.constants.encode(&mut writer);

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        writer.emit_opt_string(self.source_file.as_deref());

        let checksum = crc32fast::hash(&writer.buffer()[PREFIX_LEN..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a class, verifying the checksum
    pub fn decode(data: &[u8]) -> Result<Self, ClassError> {
        let mut reader = BytecodeReader::new(data);
        let stored_checksum = read_prefix(&mut reader)?;

        let actual = crc32fast::hash(&data[PREFIX_LEN..]);
        if stored_checksum != actual {
            return Err(ClassError::ChecksumMismatch {
                expected: stored_checksum,
                actual,
            });
        }

        let header = ClassHeader::decode(&mut reader)?;
        let constants = ConstantPool::decode(&mut reader)?;

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(1024));
        for _ in 0..method_count {
            methods.push(MethodDef::decode(&mut reader)?);
        }

        let source_file = reader.read_opt_string()?;

        Ok(Self {
            header,
            constants,
            methods,
            source_file,
        })
    }
}

/// Read and check the fixed prefix, returning the stored checksum
fn read_prefix(reader: &mut BytecodeReader<'_>) -> Result<u32, ClassError> {
    let magic: [u8; 4] = reader
        .read_bytes(4)?
        .try_into()
        .map_err(|_| DecodeError::UnexpectedEnd(0))?;
    if magic != MAGIC {
        return Err(ClassError::InvalidMagic(magic));
    }

    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(ClassError::UnsupportedVersion(version));
    }

    Ok(reader.read_u32()?)
}
