//! Field and method descriptors
//!
//! Descriptors use the familiar compact grammar: `I`, `J`, `F`, `D`, `Z`, `B`,
//! `C`, `S`, `V`, `La/b/C;` for references and `[` prefixes for arrays.

use std::fmt;
use thiserror::Error;

/// Descriptor parse errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// Descriptor ended early
    #[error("Truncated descriptor: {0}")]
    Truncated(String),

    /// Unexpected character
    #[error("Unexpected '{found}' at position {position} in descriptor {descriptor}")]
    Unexpected {
        /// Full descriptor text
        descriptor: String,
        /// Offending character
        found: char,
        /// Character position
        position: usize,
    },
}

/// A field (value) type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `La/b/C;` (internal name)
    Object(String),
    /// `[T`
    Array(Box<FieldType>),
}

impl FieldType {
    /// Dotted class name as written in source, e.g. `java.lang.String` or `int[]`
    pub fn class_name(&self) -> String {
        match self {
            Self::Byte => "byte".to_string(),
            Self::Char => "char".to_string(),
            Self::Double => "double".to_string(),
            Self::Float => "float".to_string(),
            Self::Int => "int".to_string(),
            Self::Long => "long".to_string(),
            Self::Short => "short".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Object(name) => name.replace('/', "."),
            Self::Array(component) => format!("{}[]", component.class_name()),
        }
    }

    /// Whether values of this type are references
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    /// Parse a standalone field descriptor
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let chars: Vec<char> = descriptor.chars().collect();
        let mut pos = 0;
        let ty = parse_field(descriptor, &chars, &mut pos)?;
        if pos != chars.len() {
            return Err(DescriptorError::Unexpected {
                descriptor: descriptor.to_string(),
                found: chars[pos],
                position: pos,
            });
        }
        Ok(ty)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte => write!(f, "B"),
            Self::Char => write!(f, "C"),
            Self::Double => write!(f, "D"),
            Self::Float => write!(f, "F"),
            Self::Int => write!(f, "I"),
            Self::Long => write!(f, "J"),
            Self::Short => write!(f, "S"),
            Self::Boolean => write!(f, "Z"),
            Self::Object(name) => write!(f, "L{};", name),
            Self::Array(component) => write!(f, "[{}", component),
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<FieldType>,
    /// Return type, `None` for `V`
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Create a descriptor from parts
    pub fn new(params: Vec<FieldType>, ret: Option<FieldType>) -> Self {
        Self { params, ret }
    }

    /// Parse `(params)ret`
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let chars: Vec<char> = descriptor.chars().collect();
        let unexpected = |pos: usize| match chars.get(pos) {
            Some(&found) => DescriptorError::Unexpected {
                descriptor: descriptor.to_string(),
                found,
                position: pos,
            },
            None => DescriptorError::Truncated(descriptor.to_string()),
        };

        if chars.first() != Some(&'(') {
            return Err(unexpected(0));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        while chars.get(pos) != Some(&')') {
            if pos >= chars.len() {
                return Err(DescriptorError::Truncated(descriptor.to_string()));
            }
            params.push(parse_field(descriptor, &chars, &mut pos)?);
        }
        pos += 1;

        let ret = if chars.get(pos) == Some(&'V') {
            pos += 1;
            None
        } else {
            Some(parse_field(descriptor, &chars, &mut pos)?)
        };
        if pos != chars.len() {
            return Err(unexpected(pos));
        }
        Ok(Self { params, ret })
    }

    /// Dotted class names of the parameters
    pub fn param_class_names(&self) -> Vec<String> {
        self.params.iter().map(FieldType::class_name).collect()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        write!(f, ")")?;
        match &self.ret {
            Some(ret) => write!(f, "{}", ret),
            None => write!(f, "V"),
        }
    }
}

fn parse_field(
    descriptor: &str,
    chars: &[char],
    pos: &mut usize,
) -> Result<FieldType, DescriptorError> {
    let c = *chars
        .get(*pos)
        .ok_or_else(|| DescriptorError::Truncated(descriptor.to_string()))?;
    let start = *pos;
    *pos += 1;
    let ty = match c {
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'D' => FieldType::Double,
        'F' => FieldType::Float,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'S' => FieldType::Short,
        'Z' => FieldType::Boolean,
        '[' => FieldType::Array(Box::new(parse_field(descriptor, chars, pos)?)),
        'L' => {
            let end = chars[*pos..]
                .iter()
                .position(|&ch| ch == ';')
                .map(|offset| *pos + offset)
                .ok_or_else(|| DescriptorError::Truncated(descriptor.to_string()))?;
            if end == *pos {
                return Err(DescriptorError::Unexpected {
                    descriptor: descriptor.to_string(),
                    found: ';',
                    position: end,
                });
            }
            let name: String = chars[*pos..end].iter().collect();
            *pos = end + 1;
            FieldType::Object(name)
        }
        other => {
            return Err(DescriptorError::Unexpected {
                descriptor: descriptor.to_string(),
                found: other,
                position: start,
            })
        }
    };
    Ok(ty)
}
