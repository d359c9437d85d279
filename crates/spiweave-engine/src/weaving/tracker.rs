//! Module lifecycle tracking
//!
//! Mirrors the live module set: every module that appears gets its rule set
//! built once and stored under its identity, and is evicted when it goes away.
//! Lookups sit on the class-definition hot path, so the map is a sharded
//! [`DashMap`] and rule sets are shared through [`Arc`].

use super::rules::{build_rules, ModuleRuleSet, RuleError};
use crate::config::{WeaverConfig, AUTO_CONSUMER_HEADER};
use crate::module::{ModuleId, Parameters};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the tracker knows about a module
#[derive(Debug, Clone)]
pub enum TrackedModule {
    /// Seen, but nothing to weave
    NoRules,
    /// Seen, with rules
    Rules(Arc<ModuleRuleSet>),
}

impl TrackedModule {
    /// Rules, if any
    pub fn rules(&self) -> Option<&Arc<ModuleRuleSet>> {
        match self {
            Self::NoRules => None,
            Self::Rules(rules) => Some(rules),
        }
    }
}

/// A module as announced by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Module identity
    pub id: ModuleId,
    /// Raw requirement header text, if the module declares one
    pub require_capability: Option<String>,
}

impl ModuleInfo {
    /// Describe a module
    pub fn new(id: ModuleId, require_capability: Option<&str>) -> Self {
        Self {
            id,
            require_capability: require_capability.map(str::to_owned),
        }
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    /// A module was installed and resolved
    Added(ModuleInfo),
    /// A module was updated in place
    Modified(ModuleInfo),
    /// A module was uninstalled
    Removed(ModuleId),
}

/// Module identity → rule set map
pub struct ModuleTracker {
    modules: DashMap<ModuleId, TrackedModule>,
    config: WeaverConfig,
}

impl ModuleTracker {
    /// Create an empty tracker
    pub fn new(config: WeaverConfig) -> Self {
        Self {
            modules: DashMap::new(),
            config,
        }
    }

    /// Apply one lifecycle notification
    pub fn handle(&self, event: ModuleEvent) {
        match event {
            ModuleEvent::Added(info) => {
                self.added(&info);
            }
            ModuleEvent::Modified(info) => self.modified(&info),
            ModuleEvent::Removed(id) => {
                self.removed(&id);
            }
        }
    }

    /// Track a new module
    ///
    /// Returns `false` when the module is already tracked; the existing entry
    /// is kept.
    pub fn added(&self, info: &ModuleInfo) -> bool {
        if self.modules.contains_key(&info.id) {
            debug!(module = %info.id, "module already tracked");
            return false;
        }
        let tracked = self.build(info);
        // A concurrent add may have won the race; keep whichever came first
        let mut inserted = false;
        self.modules.entry(info.id.clone()).or_insert_with(|| {
            inserted = true;
            tracked
        });
        inserted
    }

    /// Rebuild a module's entry from its new header
    ///
    /// Readers see either the old entry or the new one.
    pub fn modified(&self, info: &ModuleInfo) {
        let tracked = self.build(info);
        self.modules.insert(info.id.clone(), tracked);
    }

    /// Stop tracking a module; returns whether it was tracked
    pub fn removed(&self, id: &ModuleId) -> bool {
        let removed = self.modules.remove(id).is_some();
        if removed {
            debug!(module = %id, "module untracked");
        }
        removed
    }

    /// Rules of a module; `None` for untracked modules and modules without rules
    pub fn rules_for(&self, id: &ModuleId) -> Option<Arc<ModuleRuleSet>> {
        self.modules
            .get(id)
            .and_then(|entry| entry.rules().cloned())
    }

    /// Tracked entry of a module
    pub fn get(&self, id: &ModuleId) -> Option<TrackedModule> {
        self.modules.get(id).map(|entry| entry.clone())
    }

    /// Whether a module is tracked
    pub fn is_tracked(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    /// Number of tracked modules
    pub fn count(&self) -> usize {
        self.modules.len()
    }

    /// Identities of tracked modules that have rules, sorted
    pub fn consumers(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self
            .modules
            .iter()
            .filter(|entry| entry.rules().is_some())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// The configuration rules are built with
    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    fn build(&self, info: &ModuleInfo) -> TrackedModule {
        match self.build_rules(info) {
            Ok(Some(rules)) => TrackedModule::Rules(Arc::new(rules)),
            Ok(None) => TrackedModule::NoRules,
            Err(err) => {
                warn!(module = %info.id, error = %err, "ignoring malformed consumer header");
                TrackedModule::NoRules
            }
        }
    }

    fn build_rules(&self, info: &ModuleInfo) -> Result<Option<ModuleRuleSet>, RuleError> {
        let mut header = match info.require_capability.as_deref() {
            Some(text) => Parameters::parse(text)?,
            None => Parameters::default(),
        };
        if self.config.is_auto_consumer(&info.id.name) {
            debug!(module = %info.id, "auto-consumer");
            header.extend(Parameters::parse(AUTO_CONSUMER_HEADER)?);
        }
        build_rules(&header, &info.id)
    }
}

impl Default for ModuleTracker {
    fn default() -> Self {
        Self::new(WeaverConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSUMER_HEADER: &str =
        "osgi.extender;filter:=\"(osgi.extender=osgi.serviceloader.processor)\"";

    fn consumer(name: &str) -> ModuleInfo {
        ModuleInfo::new(ModuleId::new(name, "1.0"), Some(CONSUMER_HEADER))
    }

    #[test]
    fn test_tracker_creation() {
        let tracker = ModuleTracker::default();
        assert_eq!(tracker.count(), 0);
        assert!(tracker.rules_for(&ModuleId::new("app", "1.0")).is_none());
    }

    #[test]
    fn test_add_and_remove() {
        let tracker = ModuleTracker::default();
        let info = consumer("app");

        tracker.handle(ModuleEvent::Added(info.clone()));
        assert_eq!(tracker.rules_for(&info.id).map(|rules| rules.len()), Some(12));

        tracker.handle(ModuleEvent::Removed(info.id.clone()));
        assert!(tracker.rules_for(&info.id).is_none());
        assert!(!tracker.is_tracked(&info.id));
    }

    #[test]
    fn test_module_without_header_has_no_rules() {
        let tracker = ModuleTracker::default();
        let info = ModuleInfo::new(ModuleId::new("plain", "1.0"), None);
        assert!(tracker.added(&info));
        assert!(tracker.is_tracked(&info.id));
        assert!(matches!(tracker.get(&info.id), Some(TrackedModule::NoRules)));
        assert!(tracker.rules_for(&info.id).is_none());
    }

    #[test]
    fn test_duplicate_add_keeps_first_entry() {
        let tracker = ModuleTracker::default();
        let info = consumer("app");
        assert!(tracker.added(&info));
        let first = tracker.rules_for(&info.id).unwrap();

        assert!(!tracker.added(&ModuleInfo::new(info.id.clone(), None)));
        let second = tracker.rules_for(&info.id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_modified_replaces_rules() {
        let tracker = ModuleTracker::default();
        let info = consumer("app");
        tracker.added(&info);

        tracker.handle(ModuleEvent::Modified(ModuleInfo::new(info.id.clone(), None)));
        assert!(tracker.rules_for(&info.id).is_none());
        assert!(tracker.is_tracked(&info.id));
    }

    #[test]
    fn test_malformed_header_yields_no_rules() {
        let tracker = ModuleTracker::default();
        let info = ModuleInfo::new(
            ModuleId::new("broken", "1.0"),
            Some("osgi.extender;filter:=\"(osgi.extender=\""),
        );
        assert!(tracker.added(&info));
        assert!(tracker.rules_for(&info.id).is_none());
    }

    #[test]
    fn test_auto_consumer_gets_rules() {
        let config = WeaverConfig::from_value("com.acme.*").unwrap();
        let tracker = ModuleTracker::new(config);
        let acme = ModuleInfo::new(ModuleId::new("com.acme.parser", "2.0"), None);
        let other = ModuleInfo::new(ModuleId::new("org.other", "2.0"), None);
        tracker.added(&acme);
        tracker.added(&other);

        let rules = tracker.rules_for(&acme.id).unwrap();
        assert_eq!(rules.len(), 12);
        assert!(tracker.rules_for(&other.id).is_none());
        assert_eq!(tracker.consumers(), vec![acme.id]);
    }

    #[test]
    fn test_concurrent_lookups_during_updates() {
        let tracker = Arc::new(ModuleTracker::default());
        let info = consumer("app");
        tracker.added(&info);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                let id = info.id.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(rules) = tracker.rules_for(&id) {
                            assert_eq!(rules.len(), 12);
                        }
                    }
                })
            })
            .collect();
        for _ in 0..100 {
            tracker.modified(&info);
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
