//! The closed catalog of rewritable factory calls
//!
//! Three streaming-XML factory types, two factory methods each, and two call
//! shapes per method. Every combination maps to exactly one locator routine
//! whose name is derived mechanically from the factory type and method:
//! `XMLInputFactory.newInstance(..)` becomes
//! `Locators.locate_newXMLInputFactoryInstance(..)`.

use crate::classfile::{internal_name, FieldType, MethodDescriptor};
use std::fmt;

/// Internal name of the type holding every locator routine
pub const LOCATOR_OWNER: &str = "spiweave/runtime/Locators";

/// Package a rewritten class needs to resolve at run time
pub const LOCATOR_PACKAGE: &str = "spiweave.runtime";

/// Prefix of every locator routine name
pub const LOCATOR_PREFIX: &str = "locate_";

const STRING_CLASS: &str = "java.lang.String";
const LOADER_CLASS: &str = "java.lang.ClassLoader";
const CLASS_CLASS: &str = "java.lang.Class";

/// Factory types whose static factory calls get rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactoryType {
    /// `javax.xml.stream.XMLInputFactory`
    XmlInputFactory,
    /// `javax.xml.stream.XMLOutputFactory`
    XmlOutputFactory,
    /// `javax.xml.stream.XMLEventFactory`
    XmlEventFactory,
}

impl FactoryType {
    /// Every factory type
    pub const ALL: [FactoryType; 3] = [
        FactoryType::XmlInputFactory,
        FactoryType::XmlOutputFactory,
        FactoryType::XmlEventFactory,
    ];

    /// Dotted class name, also the service type providers register under
    pub fn class_name(self) -> &'static str {
        match self {
            Self::XmlInputFactory => "javax.xml.stream.XMLInputFactory",
            Self::XmlOutputFactory => "javax.xml.stream.XMLOutputFactory",
            Self::XmlEventFactory => "javax.xml.stream.XMLEventFactory",
        }
    }

    /// Unqualified class name
    pub fn simple_name(self) -> &'static str {
        let name = self.class_name();
        &name[name.rfind('.').map_or(0, |pos| pos + 1)..]
    }

    /// Internal class name
    pub fn internal_name(self) -> String {
        internal_name(self.class_name())
    }

    /// Look up a factory type by dotted class name
    pub fn from_class_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.class_name() == name)
    }
}

impl fmt::Display for FactoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

/// Static factory methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactoryMethod {
    /// `newInstance`
    NewInstance,
    /// `newFactory`
    NewFactory,
}

impl FactoryMethod {
    /// Every factory method
    pub const ALL: [FactoryMethod; 2] = [FactoryMethod::NewFactory, FactoryMethod::NewInstance];

    /// Method name
    pub fn name(self) -> &'static str {
        match self {
            Self::NewInstance => "newInstance",
            Self::NewFactory => "newFactory",
        }
    }

    /// Look up a method by name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.name() == name)
    }
}

/// Argument shape of a factory call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactoryShape {
    /// `()`
    NoArg,
    /// `(String factoryId, ClassLoader loader)`
    StringAndContext,
}

impl FactoryShape {
    /// Every shape
    pub const ALL: [FactoryShape; 2] = [FactoryShape::StringAndContext, FactoryShape::NoArg];

    /// Dotted argument class names of the original call
    pub fn arg_classes(self) -> Vec<String> {
        match self {
            Self::NoArg => Vec::new(),
            Self::StringAndContext => vec![STRING_CLASS.to_string(), LOADER_CLASS.to_string()],
        }
    }

    /// Shape of a call with the given number of arguments
    pub fn for_arity(arity: usize) -> Self {
        if arity == 0 {
            Self::NoArg
        } else {
            Self::StringAndContext
        }
    }

    /// Locator descriptor for a call of this shape returning `ret`
    pub fn locator_descriptor(self, ret: Option<FieldType>) -> String {
        MethodDescriptor::new(self.locator_params(), ret).to_string()
    }

    /// Parameters of the locator routine: original arguments, then the caller
    fn locator_params(self) -> Vec<FieldType> {
        let mut params: Vec<FieldType> = self
            .arg_classes()
            .iter()
            .map(|name| FieldType::Object(internal_name(name)))
            .collect();
        params.push(FieldType::Object(internal_name(CLASS_CLASS)));
        params
    }
}

/// One entry of the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactoryCall {
    /// Factory type
    pub factory: FactoryType,
    /// Factory method
    pub method: FactoryMethod,
    /// Call shape
    pub shape: FactoryShape,
}

impl FactoryCall {
    /// Create a catalog entry
    pub fn new(factory: FactoryType, method: FactoryMethod, shape: FactoryShape) -> Self {
        Self {
            factory,
            method,
            shape,
        }
    }

    /// Every catalog entry, in a fixed order
    pub fn all() -> impl Iterator<Item = FactoryCall> {
        FactoryShape::ALL.into_iter().flat_map(|shape| {
            FactoryMethod::ALL.into_iter().flat_map(move |method| {
                FactoryType::ALL
                    .into_iter()
                    .map(move |factory| FactoryCall::new(factory, method, shape))
            })
        })
    }

    /// Locator routine name, e.g. `locate_newXMLEventFactoryFactory`
    pub fn locator_name(&self) -> String {
        locator_name(self.factory.class_name(), self.method.name())
    }

    /// Locator descriptor for a call site whose original descriptor returned `ret`
    ///
    /// The locator keeps the call site's own return type so the surrounding
    /// code is unaffected.
    pub fn locator_descriptor(&self, ret: Option<FieldType>) -> String {
        self.shape.locator_descriptor(ret)
    }

    /// Return type the runtime routine for this entry is declared with
    ///
    /// Matches the factory type except for the two-argument
    /// `XMLOutputFactory.newInstance`, whose routine is declared to return an
    /// `XMLInputFactory`, as the platform's own method of that shape does.
    pub fn declared_return_type(&self) -> FactoryType {
        match (self.factory, self.method, self.shape) {
            (FactoryType::XmlOutputFactory, FactoryMethod::NewInstance, FactoryShape::StringAndContext) => {
                FactoryType::XmlInputFactory
            }
            (factory, _, _) => factory,
        }
    }

    /// Recover the catalog entry from a locator routine name and its arity
    pub fn from_locator_name(name: &str, arity: usize) -> Option<Self> {
        let shape = match arity {
            1 => FactoryShape::NoArg,
            3 => FactoryShape::StringAndContext,
            _ => return None,
        };
        Self::all().find(|call| call.shape == shape && call.locator_name() == name)
    }
}

impl fmt::Display for FactoryCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.factory.class_name(),
            self.method.name(),
            self.shape.arg_classes().join(", ")
        )
    }
}

/// Derive a locator routine name from a dotted owner type and method name
///
/// The leading `new` of the method name is dropped and the owner's simple
/// name spliced in: (`a.b.TypeX`, `newInstance`) gives
/// `locate_newTypeXInstance`.
pub fn locator_name(owner: &str, method: &str) -> String {
    let simple = &owner[owner.rfind('.').map_or(0, |pos| pos + 1)..];
    let suffix = method.strip_prefix("new").unwrap_or(method);
    format!("{}new{}{}", LOCATOR_PREFIX, simple, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_twelve_entries() {
        let all: Vec<_> = FactoryCall::all().collect();
        assert_eq!(all.len(), 12);
        let mut unique = all.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn test_locator_names() {
        let call = FactoryCall::new(
            FactoryType::XmlInputFactory,
            FactoryMethod::NewInstance,
            FactoryShape::NoArg,
        );
        assert_eq!(call.locator_name(), "locate_newXMLInputFactoryInstance");
        assert_eq!(
            locator_name("javax.xml.stream.XMLEventFactory", "newFactory"),
            "locate_newXMLEventFactoryFactory"
        );
        assert_eq!(locator_name("TypeX", "newInstance"), "locate_newTypeXInstance");
    }

    #[test]
    fn test_locator_descriptors() {
        let ret = Some(FieldType::Object("javax/xml/stream/XMLOutputFactory".into()));
        let no_arg = FactoryCall::new(
            FactoryType::XmlOutputFactory,
            FactoryMethod::NewFactory,
            FactoryShape::NoArg,
        );
        assert_eq!(
            no_arg.locator_descriptor(ret.clone()),
            "(Ljava/lang/Class;)Ljavax/xml/stream/XMLOutputFactory;"
        );

        let two_arg = FactoryCall {
            shape: FactoryShape::StringAndContext,
            ..no_arg
        };
        assert_eq!(
            two_arg.locator_descriptor(ret),
            "(Ljava/lang/String;Ljava/lang/ClassLoader;Ljava/lang/Class;)Ljavax/xml/stream/XMLOutputFactory;"
        );
    }

    #[test]
    fn test_output_instance_declares_input_return() {
        let call = FactoryCall::new(
            FactoryType::XmlOutputFactory,
            FactoryMethod::NewInstance,
            FactoryShape::StringAndContext,
        );
        assert_eq!(call.declared_return_type(), FactoryType::XmlInputFactory);
        assert_eq!(call.locator_name(), "locate_newXMLOutputFactoryInstance");

        let no_arg = FactoryCall {
            shape: FactoryShape::NoArg,
            ..call
        };
        assert_eq!(no_arg.declared_return_type(), FactoryType::XmlOutputFactory);
    }

    #[test]
    fn test_from_locator_name() {
        for call in FactoryCall::all() {
            let arity = call.shape.arg_classes().len() + 1;
            assert_eq!(FactoryCall::from_locator_name(&call.locator_name(), arity), Some(call));
        }
        assert_eq!(FactoryCall::from_locator_name("locate_newXMLInputFactoryInstance", 2), None);
        assert_eq!(FactoryCall::from_locator_name("newXMLInputFactoryInstance", 1), None);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(
            FactoryType::from_class_name("javax.xml.stream.XMLEventFactory"),
            Some(FactoryType::XmlEventFactory)
        );
        assert_eq!(FactoryType::XmlEventFactory.simple_name(), "XMLEventFactory");
        assert_eq!(FactoryMethod::from_name("newFactory"), Some(FactoryMethod::NewFactory));
        assert_eq!(FactoryShape::for_arity(2), FactoryShape::StringAndContext);
    }
}
