//! Constant pool for class containers

use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};

/// A reference to a method: owner internal name, method name and descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Internal name of the declaring type (`a/b/C`)
    pub owner: String,
    /// Method name
    pub name: String,
    /// Method descriptor (`(Ljava/lang/String;)V`)
    pub descriptor: String,
}

impl MethodRef {
    /// Create a method reference
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// Constant pool containing literal values and symbolic references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantPool {
    /// String literals
    pub strings: Vec<String>,
    /// Class references (internal names)
    pub classes: Vec<String>,
    /// Method references
    pub method_refs: Vec<MethodRef>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string constant, reusing an existing equal entry
    pub fn add_string(&mut self, s: &str) -> u32 {
        intern(&mut self.strings, s, |existing| existing == s, str::to_owned)
    }

    /// Add a class reference, reusing an existing equal entry
    pub fn add_class(&mut self, internal_name: &str) -> u32 {
        intern(
            &mut self.classes,
            internal_name,
            |existing| existing == internal_name,
            str::to_owned,
        )
    }

    /// Add a method reference, reusing an existing equal entry
    pub fn add_method_ref(&mut self, method: &MethodRef) -> u32 {
        intern(
            &mut self.method_refs,
            method,
            |existing| existing == method,
            MethodRef::clone,
        )
    }

    /// Get a string constant by index
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    /// Get a class reference by index
    pub fn get_class(&self, index: u32) -> Option<&str> {
        self.classes.get(index as usize).map(String::as_str)
    }

    /// Get a method reference by index
    pub fn get_method_ref(&self, index: u32) -> Option<&MethodRef> {
        self.method_refs.get(index as usize)
    }

    /// Encode the constant pool
    ///
    /// Format:
    /// - String count (u32), then each string
    /// - Class count (u32), then each internal name
    /// - Method reference count (u32), then owner, name, descriptor for each
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_string(s);
        }

        writer.emit_u32(self.classes.len() as u32);
        for class in &self.classes {
            writer.emit_string(class);
        }

        writer.emit_u32(self.method_refs.len() as u32);
        for method in &self.method_refs {
            writer.emit_string(&method.owner);
            writer.emit_string(&method.name);
            writer.emit_string(&method.descriptor);
        }
    }

    /// Decode the constant pool
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let mut pool = ConstantPool::new();

        let string_count = reader.read_u32()? as usize;
        for _ in 0..string_count {
            pool.strings.push(reader.read_string()?);
        }

        let class_count = reader.read_u32()? as usize;
        for _ in 0..class_count {
            pool.classes.push(reader.read_string()?);
        }

        let method_count = reader.read_u32()? as usize;
        for _ in 0..method_count {
            let owner = reader.read_string()?;
            let name = reader.read_string()?;
            let descriptor = reader.read_string()?;
            pool.method_refs.push(MethodRef {
                owner,
                name,
                descriptor,
            });
        }

        Ok(pool)
    }
}

fn intern<T, Q: ?Sized>(
    entries: &mut Vec<T>,
    value: &Q,
    matches: impl Fn(&T) -> bool,
    to_owned: impl Fn(&Q) -> T,
) -> u32 {
    if let Some(index) = entries.iter().position(matches) {
        return index as u32;
    }
    entries.push(to_owned(value));
    (entries.len() - 1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pool_dedup() {
        let mut pool = ConstantPool::new();

        let a = pool.add_class("java/lang/String");
        let b = pool.add_class("java/lang/Object");
        let c = pool.add_class("java/lang/String");
        assert_eq!(a, c);
        assert_ne!(a, b);

        let m = MethodRef::new("a/B", "run", "()V");
        let first = pool.add_method_ref(&m);
        assert_eq!(pool.add_method_ref(&m), first);
        assert_eq!(pool.get_method_ref(first), Some(&m));
    }

    #[test]
    fn test_constant_pool_encoding() {
        let mut pool = ConstantPool::new();
        pool.add_string("hello");
        pool.add_class("a/b/C");
        pool.add_method_ref(&MethodRef::new("a/b/C", "make", "()La/b/C;"));

        let mut writer = BytecodeWriter::new();
        pool.encode(&mut writer);
        let bytes = writer.into_bytes();

        let decoded = ConstantPool::decode(&mut BytecodeReader::new(&bytes)).unwrap();
        assert_eq!(decoded, pool);
        assert_eq!(decoded.get_string(0), Some("hello"));
        assert_eq!(decoded.get_class(0), Some("a/b/C"));
        assert_eq!(decoded.get_class(1), None);
    }
}
