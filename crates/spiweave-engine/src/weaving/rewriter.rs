//! Call-site rewriting
//!
//! Every `invokestatic` whose target matches a rule of the consuming module is
//! replaced by a call to the corresponding locator routine, with the calling
//! class pushed as an extra trailing argument:
//!
//! ```text
//! invokestatic javax/xml/stream/XMLInputFactory.newInstance()
//! ```
//!
//! becomes
//!
//! ```text
//! ldc_class    a/b/Caller
//! invokestatic spiweave/runtime/Locators.locate_newXMLInputFactoryInstance(Ljava/lang/Class;)
//! ```
//!
//! Classes without a matching call are never re-encoded and their frames are
//! never recomputed.

use super::catalog::{locator_name, FactoryShape, LOCATOR_OWNER, LOCATOR_PACKAGE};
use super::rules::ModuleRuleSet;
use crate::classfile::analyzer::AnalyzeError;
use crate::classfile::descriptor::DescriptorError;
use crate::classfile::{
    dotted_name, recompute_class, ClassError, ClassFile, Code, CodeError, CommonSuperclass,
    ConstantPool, Instruction, MethodDescriptor, MethodRef,
};
use crate::module::ModuleId;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Failures while rewriting one class
#[derive(Debug, Error)]
pub enum RewriteError {
    /// The class bytes could not be decoded
    #[error("Cannot decode class: {0}")]
    Class(#[from] ClassError),

    /// A method body could not be decoded or re-encoded
    #[error("Bad code in {method}: {source}")]
    Code {
        /// Method signature
        method: String,
        /// Underlying error
        #[source]
        source: CodeError,
    },

    /// A call's method reference is missing from the constant pool
    #[error("Unknown method reference #{index} in {method}")]
    UnknownMethodRef {
        /// Method signature
        method: String,
        /// Constant pool index
        index: u32,
    },

    /// A call's descriptor is malformed
    #[error("Bad call descriptor in {method}: {source}")]
    Descriptor {
        /// Method signature
        method: String,
        /// Underlying error
        #[source]
        source: DescriptorError,
    },

    /// Frames could not be recomputed after the edit
    #[error("Cannot recompute frames: {0}")]
    Frames(#[from] AnalyzeError),
}

/// What rewriting did to one class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Whether any call site was replaced
    pub modified: bool,
    /// Packages the rewritten class now needs resolvable at run time
    pub extra_imports: BTreeSet<String>,
    /// Number of call sites replaced
    pub rewritten_calls: usize,
}

/// Rewrites matching static calls of one module's classes
pub struct CallSiteRewriter<'a> {
    rules: &'a ModuleRuleSet,
    hierarchy: &'a dyn CommonSuperclass,
}

impl<'a> CallSiteRewriter<'a> {
    /// Create a rewriter for one module's rules
    ///
    /// `hierarchy` answers common-superclass queries during frame
    /// recomputation.
    pub fn new(rules: &'a ModuleRuleSet, hierarchy: &'a dyn CommonSuperclass) -> Self {
        Self { rules, hierarchy }
    }

    /// Rewrite one class, never failing
    ///
    /// Returns the new bytes when something changed. On error the failure is
    /// logged and the class is reported unmodified.
    pub fn rewrite(
        &self,
        class_name: &str,
        bytes: &[u8],
        module: &ModuleId,
    ) -> (Option<Vec<u8>>, RewriteOutcome) {
        match self.try_rewrite(bytes) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    class = class_name,
                    module = %module,
                    error = %err,
                    "failed to rewrite class, leaving it unmodified"
                );
                (None, RewriteOutcome::default())
            }
        }
    }

    /// Rewrite one class, reporting failures
    pub fn try_rewrite(
        &self,
        bytes: &[u8],
    ) -> Result<(Option<Vec<u8>>, RewriteOutcome), RewriteError> {
        let mut class = ClassFile::decode(bytes)?;
        let this_class = class.name().to_string();
        let mut rewritten_calls = 0;

        for index in 0..class.methods.len() {
            let method = &class.methods[index];
            if !method.has_code() {
                continue;
            }
            let signature = method.signature();
            let mut code = Code::from_method(method).map_err(|source| RewriteError::Code {
                method: signature.clone(),
                source,
            })?;

            let count =
                self.rewrite_code(&mut code, &mut class.constants, &this_class, &signature)?;
            if count > 0 {
                code.write_to(&mut class.methods[index])
                    .map_err(|source| RewriteError::Code {
                        method: signature,
                        source,
                    })?;
                rewritten_calls += count;
            }
        }

        if rewritten_calls == 0 {
            return Ok((None, RewriteOutcome::default()));
        }

        recompute_class(&mut class, self.hierarchy)?;
        debug!(class = %this_class, calls = rewritten_calls, "rewrote factory calls");

        let outcome = RewriteOutcome {
            modified: true,
            extra_imports: BTreeSet::from([LOCATOR_PACKAGE.to_string()]),
            rewritten_calls,
        };
        Ok((Some(class.encode()), outcome))
    }

    /// Replace matching calls in one body; returns how many were replaced
    fn rewrite_code(
        &self,
        code: &mut Code,
        constants: &mut ConstantPool,
        this_class: &str,
        method: &str,
    ) -> Result<usize, RewriteError> {
        let mut count = 0;
        let mut index = 0;

        while index < code.instructions.len() {
            let Instruction::InvokeStatic(ref_index) = code.instructions[index] else {
                index += 1;
                continue;
            };
            let target = constants
                .get_method_ref(ref_index)
                .ok_or_else(|| RewriteError::UnknownMethodRef {
                    method: method.to_string(),
                    index: ref_index,
                })?
                .clone();
            let descriptor =
                MethodDescriptor::parse(&target.descriptor).map_err(|source| {
                    RewriteError::Descriptor {
                        method: method.to_string(),
                        source,
                    }
                })?;

            let owner = dotted_name(&target.owner);
            let args = descriptor.param_class_names();
            let Some(rule) = self.rules.find(&owner, &target.name, &args) else {
                index += 1;
                continue;
            };

            let shape = FactoryShape::for_arity(args.len());
            let locator = MethodRef::new(
                LOCATOR_OWNER,
                locator_name(&owner, &target.name),
                shape.locator_descriptor(descriptor.ret),
            );
            debug!(
                class = this_class,
                method,
                call = %format_args!("{}.{}", owner, target.name),
                locator = %locator.name,
                restricted = rule.allowed_providers.is_some(),
                "rewriting call site"
            );

            let caller = constants.add_class(this_class);
            code.instructions[index] = Instruction::InvokeStatic(constants.add_method_ref(&locator));
            code.insert_before(index, Instruction::LdcClass(caller));
            index += 2;
            count += 1;
        }

        Ok(count)
    }
}
