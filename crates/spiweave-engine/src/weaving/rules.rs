//! Rewrite rules built from consumer requirement headers
//!
//! A module opts in by requiring the service-loader processor extender:
//!
//! ```text
//! osgi.extender;filter:="(osgi.extender=osgi.serviceloader.processor)",
//! osgi.serviceloader;filter:="(vendor=acme)"
//! ```
//!
//! Each `osgi.serviceloader` requirement filter narrows the providers the
//! module will accept. A recognized header yields one rule per catalog entry.

use super::catalog::{FactoryCall, FactoryShape};
use crate::module::{Filter, FilterError, HeaderError, ModuleId, Parameters};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Extender namespace
pub const EXTENDER_NAMESPACE: &str = "osgi.extender";

/// Service-loader namespace
pub const SERVICELOADER_NAMESPACE: &str = "osgi.serviceloader";

/// Extender capability the consumer requirement must be satisfied by
pub const PROCESSOR_EXTENDER: &str = "osgi.serviceloader.processor";

/// Version of the processor extender capability
pub const PROCESSOR_VERSION: &str = "1.0.0";

const FILTER_DIRECTIVE: &str = "filter";

/// Rule building errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    /// Header text could not be parsed
    #[error("Malformed header: {0}")]
    Header(#[from] HeaderError),

    /// A requirement filter could not be parsed
    #[error("Malformed filter in {namespace} requirement '{filter}': {source}")]
    Filter {
        /// Requirement namespace
        namespace: String,
        /// Filter text
        filter: String,
        /// Underlying error
        #[source]
        source: FilterError,
    },
}

/// A provider the consumer accepts, described by a filter over the provider's
/// service properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    /// Property filter
    pub filter: Filter,
}

impl ProviderDescriptor {
    /// Whether a provider with these properties is acceptable
    pub fn matches(&self, properties: &BTreeMap<String, String>) -> bool {
        self.filter.matches(properties)
    }
}

/// A single rewrite rule
///
/// Identity is (owner, method, argument classes); the provider allow-list
/// rides along.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    /// Dotted owner type name
    pub owner: String,
    /// Method name
    pub method: String,
    /// Dotted argument class names; `None` matches any arity
    pub arg_classes: Option<Vec<String>>,
    /// Accepted providers; `None` accepts every provider
    pub allowed_providers: Option<Arc<[ProviderDescriptor]>>,
}

impl RewriteRule {
    /// Whether this rule accepts a call with these argument classes
    pub fn matches_args(&self, args: &[String]) -> bool {
        match &self.arg_classes {
            Some(expected) => expected.as_slice() == args,
            None => true,
        }
    }
}

impl PartialEq for RewriteRule {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.method == other.method && self.arg_classes == other.arg_classes
    }
}

impl Eq for RewriteRule {}

impl Hash for RewriteRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.method.hash(state);
        self.arg_classes.hash(state);
    }
}

/// Rules of one consuming module, indexed by (owner, method)
#[derive(Debug, Clone, Default)]
pub struct ModuleRuleSet {
    rules: HashMap<(String, String), Vec<RewriteRule>>,
}

impl ModuleRuleSet {
    /// Build an indexed set; duplicate rules collapse
    pub fn new(rules: impl IntoIterator<Item = RewriteRule>) -> Self {
        let unique: HashSet<RewriteRule> = rules.into_iter().collect();
        let mut set = Self::default();
        for rule in unique {
            set.rules
                .entry((rule.owner.clone(), rule.method.clone()))
                .or_default()
                .push(rule);
        }
        // Exact signatures before any-arity rules
        for bucket in set.rules.values_mut() {
            bucket.sort_by_key(|rule| rule.arg_classes.is_none());
        }
        set
    }

    /// Find the rule for a static call
    ///
    /// `owner` is dotted, `args` are the call's dotted argument class names.
    pub fn find(&self, owner: &str, method: &str, args: &[String]) -> Option<&RewriteRule> {
        self.rules
            .get(&(owner.to_string(), method.to_string()))?
            .iter()
            .find(|rule| rule.matches_args(args))
    }

    /// Whether a provider with these properties is accepted by any rule
    pub fn permits(&self, properties: &BTreeMap<String, String>) -> bool {
        self.iter().any(|rule| match &rule.allowed_providers {
            None => true,
            Some(allowed) => allowed.iter().any(|d| d.matches(properties)),
        })
    }

    /// All rules
    pub fn iter(&self) -> impl Iterator<Item = &RewriteRule> {
        self.rules.values().flatten()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Whether there are no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Build the rule set for a consumer from its parsed requirement header
///
/// Returns `Ok(None)` when the header does not opt in; an empty set is never
/// returned.
pub fn build_rules(
    header: &Parameters,
    consumer: &ModuleId,
) -> Result<Option<ModuleRuleSet>, RuleError> {
    if !requires_processor(header)? {
        return Ok(None);
    }

    let mut allowed = Vec::new();
    for clause in header.named(SERVICELOADER_NAMESPACE) {
        if let Some(text) = clause.directive(FILTER_DIRECTIVE) {
            allowed.push(ProviderDescriptor {
                filter: parse_filter(SERVICELOADER_NAMESPACE, text)?,
            });
        }
    }
    let allowed: Option<Arc<[ProviderDescriptor]>> = if allowed.is_empty() {
        None
    } else {
        Some(allowed.into())
    };

    let rules = FactoryCall::all().map(|call| RewriteRule {
        owner: call.factory.class_name().to_string(),
        method: call.method.name().to_string(),
        arg_classes: match call.shape {
            FactoryShape::NoArg => None,
            FactoryShape::StringAndContext => Some(call.shape.arg_classes()),
        },
        allowed_providers: allowed.clone(),
    });
    let set = ModuleRuleSet::new(rules);

    debug!(
        module = %consumer,
        rules = set.len(),
        restricted = allowed.is_some(),
        "built rewrite rules"
    );
    Ok(Some(set).filter(|set| !set.is_empty()))
}

/// Parse header text and build rules from it
pub fn build_rules_from_text(
    text: &str,
    consumer: &ModuleId,
) -> Result<Option<ModuleRuleSet>, RuleError> {
    build_rules(&Parameters::parse(text)?, consumer)
}

/// Whether some extender requirement is satisfied by the processor capability
fn requires_processor(header: &Parameters) -> Result<bool, RuleError> {
    let capability: BTreeMap<String, String> = [
        (EXTENDER_NAMESPACE.to_string(), PROCESSOR_EXTENDER.to_string()),
        ("version".to_string(), PROCESSOR_VERSION.to_string()),
    ]
    .into_iter()
    .collect();

    for clause in header.named(EXTENDER_NAMESPACE) {
        if let Some(text) = clause.directive(FILTER_DIRECTIVE) {
            if parse_filter(EXTENDER_NAMESPACE, text)?.matches(&capability) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn parse_filter(namespace: &str, text: &str) -> Result<Filter, RuleError> {
    Filter::parse(text).map_err(|source| RuleError::Filter {
        namespace: namespace.to_string(),
        filter: text.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSUMER: &str = "osgi.extender;filter:='(osgi.extender=osgi.serviceloader.processor)'";

    fn consumer() -> ModuleId {
        ModuleId::new("com.acme.app", "1.0.0")
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_consumer_header_yields_twelve_rules() {
        let rules = build_rules_from_text(CONSUMER, &consumer()).unwrap().unwrap();
        assert_eq!(rules.len(), 12);

        let two_arg = rules
            .find(
                "javax.xml.stream.XMLInputFactory",
                "newFactory",
                &strings(&["java.lang.String", "java.lang.ClassLoader"]),
            )
            .unwrap();
        assert!(two_arg.arg_classes.is_some());
        assert!(two_arg.allowed_providers.is_none());

        let no_arg = rules
            .find("javax.xml.stream.XMLEventFactory", "newInstance", &[])
            .unwrap();
        assert!(no_arg.arg_classes.is_none());
    }

    #[test]
    fn test_unrelated_calls_do_not_match() {
        let rules = build_rules_from_text(CONSUMER, &consumer()).unwrap().unwrap();
        assert!(rules.find("javax.xml.stream.XMLInputFactory", "createReader", &[]).is_none());
        assert!(rules.find("com.acme.Factory", "newInstance", &[]).is_none());
    }

    #[test]
    fn test_header_without_processor_yields_nothing() {
        assert!(build_rules_from_text("", &consumer()).unwrap().is_none());
        assert!(build_rules_from_text(
            "osgi.extender;filter:='(osgi.extender=osgi.serviceloader.registrar)'",
            &consumer()
        )
        .unwrap()
        .is_none());
        // namespace present but no filter
        assert!(build_rules_from_text("osgi.extender", &consumer()).unwrap().is_none());
    }

    #[test]
    fn test_version_range_filter() {
        let header = "osgi.extender;filter:='(&(osgi.extender=osgi.serviceloader.processor)(version>=1.0)(!(version>=2.0)))'";
        assert!(build_rules_from_text(header, &consumer()).unwrap().is_some());

        let too_new = "osgi.extender;filter:='(&(osgi.extender=osgi.serviceloader.processor)(version>=2.0))'";
        assert!(build_rules_from_text(too_new, &consumer()).unwrap().is_none());
    }

    #[test]
    fn test_allowed_providers() {
        let header = format!(
            "{},osgi.serviceloader;filter:='(vendor=acme)',osgi.serviceloader;filter:='(vendor=initech)'",
            CONSUMER
        );
        let rules = build_rules_from_text(&header, &consumer()).unwrap().unwrap();
        let rule = rules.iter().next().unwrap();
        assert_eq!(rule.allowed_providers.as_ref().map(|a| a.len()), Some(2));

        let acme: BTreeMap<_, _> = [("vendor".to_string(), "acme".to_string())].into_iter().collect();
        let other: BTreeMap<_, _> = [("vendor".to_string(), "globex".to_string())].into_iter().collect();
        assert!(rules.permits(&acme));
        assert!(!rules.permits(&other));
    }

    #[test]
    fn test_malformed_filter_fails_build() {
        let err = build_rules_from_text("osgi.extender;filter:='(osgi.extender=oops'", &consumer())
            .unwrap_err();
        assert!(matches!(err, RuleError::Filter { .. }));

        let header = format!("{},osgi.serviceloader;filter:='vendor=acme'", CONSUMER);
        assert!(build_rules_from_text(&header, &consumer()).is_err());
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build_rules_from_text(CONSUMER, &consumer()).unwrap().unwrap();
        let b = build_rules_from_text(CONSUMER, &consumer()).unwrap().unwrap();
        let set_a: HashSet<_> = a.iter().cloned().collect();
        let set_b: HashSet<_> = b.iter().cloned().collect();
        assert_eq!(set_a, set_b);
    }

    #[test]
    fn test_exact_rule_preferred_over_any_arity() {
        let any = RewriteRule {
            owner: "a.F".into(),
            method: "newInstance".into(),
            arg_classes: None,
            allowed_providers: None,
        };
        let exact = RewriteRule {
            arg_classes: Some(strings(&["java.lang.String"])),
            ..any.clone()
        };
        let set = ModuleRuleSet::new([any, exact.clone()]);
        assert_eq!(
            set.find("a.F", "newInstance", &strings(&["java.lang.String"])),
            Some(&exact)
        );
        assert!(set.find("a.F", "newInstance", &[]).unwrap().arg_classes.is_none());
    }
}
