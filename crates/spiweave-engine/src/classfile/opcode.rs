//! Instruction opcodes for the class container format
//!
//! Opcodes are single bytes. Operands follow the opcode byte:
//! - `u16` local slot indices
//! - `u32` constant pool indices
//! - `i32` immediates and branch offsets (relative to the next instruction)
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Local variables
//! - 0x20-0x2F: Integer arithmetic
//! - 0x30-0x3F: Control flow
//! - 0x40-0x4F: Invocation
//! - 0x50-0x5F: Object operations
//! - 0x60-0x6F: Method exit

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Swap top two stack values
    Swap = 0x03,
    /// Push null reference
    AconstNull = 0x04,
    /// Push 32-bit integer immediate (operand: i32)
    Iconst = 0x05,
    /// Push string literal from pool (operand: u32 string index)
    Ldc = 0x06,
    /// Push class literal from pool (operand: u32 class index)
    LdcClass = 0x07,

    // ===== Local Variables (0x10-0x1F) =====
    /// Load integer local (operand: u16 slot)
    Iload = 0x10,
    /// Store integer local (operand: u16 slot)
    Istore = 0x11,
    /// Load reference local (operand: u16 slot)
    Aload = 0x12,
    /// Store reference local (operand: u16 slot)
    Astore = 0x13,

    // ===== Integer Arithmetic (0x20-0x2F) =====
    /// Integer addition: pop b, pop a, push a + b
    Iadd = 0x20,
    /// Integer subtraction: pop b, pop a, push a - b
    Isub = 0x21,
    /// Integer multiplication: pop b, pop a, push a * b
    Imul = 0x22,

    // ===== Control Flow (0x30-0x3F) =====
    /// Branch if integer is zero (operand: i32 offset)
    IfEq = 0x30,
    /// Branch if integer is non-zero (operand: i32 offset)
    IfNe = 0x31,
    /// Branch if reference is null (operand: i32 offset)
    IfNull = 0x32,
    /// Branch if reference is non-null (operand: i32 offset)
    IfNonNull = 0x33,
    /// Unconditional branch (operand: i32 offset)
    Goto = 0x34,

    // ===== Invocation (0x40-0x4F) =====
    /// Invoke a static method (operand: u32 method reference index)
    InvokeStatic = 0x40,
    /// Invoke an instance method (operand: u32 method reference index)
    InvokeVirtual = 0x41,

    // ===== Object Operations (0x50-0x5F) =====
    /// Allocate an initialized instance (operand: u32 class index)
    New = 0x50,
    /// Checked reference cast (operand: u32 class index)
    CheckCast = 0x51,
    /// Type test, pushes an integer (operand: u32 class index)
    InstanceOf = 0x52,

    // ===== Method Exit (0x60-0x6F) =====
    /// Return from a void method
    Return = 0x60,
    /// Return an integer
    IReturn = 0x61,
    /// Return a reference
    AReturn = 0x62,
    /// Throw the reference on top of the stack
    AThrow = 0x63,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        let opcode = match byte {
            0x00 => Self::Nop,
            0x01 => Self::Pop,
            0x02 => Self::Dup,
            0x03 => Self::Swap,
            0x04 => Self::AconstNull,
            0x05 => Self::Iconst,
            0x06 => Self::Ldc,
            0x07 => Self::LdcClass,
            0x10 => Self::Iload,
            0x11 => Self::Istore,
            0x12 => Self::Aload,
            0x13 => Self::Astore,
            0x20 => Self::Iadd,
            0x21 => Self::Isub,
            0x22 => Self::Imul,
            0x30 => Self::IfEq,
            0x31 => Self::IfNe,
            0x32 => Self::IfNull,
            0x33 => Self::IfNonNull,
            0x34 => Self::Goto,
            0x40 => Self::InvokeStatic,
            0x41 => Self::InvokeVirtual,
            0x50 => Self::New,
            0x51 => Self::CheckCast,
            0x52 => Self::InstanceOf,
            0x60 => Self::Return,
            0x61 => Self::IReturn,
            0x62 => Self::AReturn,
            0x63 => Self::AThrow,
            _ => return None,
        };
        Some(opcode)
    }

    /// Convert the opcode to its byte value
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Size in bytes of the operands following this opcode
    pub fn operand_size(self) -> usize {
        match self {
            Self::Iload | Self::Istore | Self::Aload | Self::Astore => 2,
            Self::Iconst
            | Self::Ldc
            | Self::LdcClass
            | Self::IfEq
            | Self::IfNe
            | Self::IfNull
            | Self::IfNonNull
            | Self::Goto
            | Self::InvokeStatic
            | Self::InvokeVirtual
            | Self::New
            | Self::CheckCast
            | Self::InstanceOf => 4,
            _ => 0,
        }
    }

    /// Whether this opcode carries a branch offset
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::IfEq | Self::IfNe | Self::IfNull | Self::IfNonNull | Self::Goto
        )
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Goto | Self::Return | Self::IReturn | Self::AReturn | Self::AThrow
        )
    }

    /// Mnemonic used by disassembly output
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Swap => "swap",
            Self::AconstNull => "aconst_null",
            Self::Iconst => "iconst",
            Self::Ldc => "ldc",
            Self::LdcClass => "ldc_class",
            Self::Iload => "iload",
            Self::Istore => "istore",
            Self::Aload => "aload",
            Self::Astore => "astore",
            Self::Iadd => "iadd",
            Self::Isub => "isub",
            Self::Imul => "imul",
            Self::IfEq => "ifeq",
            Self::IfNe => "ifne",
            Self::IfNull => "ifnull",
            Self::IfNonNull => "ifnonnull",
            Self::Goto => "goto",
            Self::InvokeStatic => "invokestatic",
            Self::InvokeVirtual => "invokevirtual",
            Self::New => "new",
            Self::CheckCast => "checkcast",
            Self::InstanceOf => "instanceof",
            Self::Return => "return",
            Self::IReturn => "ireturn",
            Self::AReturn => "areturn",
            Self::AThrow => "athrow",
        }
    }
}
