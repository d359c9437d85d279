//! Process-wide weaver configuration
//!
//! The only setting is the list of auto-consumer module name patterns, read
//! from `SPIWEAVE_AUTO_CONSUMERS`. The value uses the header syntax; each
//! clause key is a glob over module symbolic names:
//!
//! ```text
//! SPIWEAVE_AUTO_CONSUMERS="com.acme.*,org.example.legacy"
//! ```

use crate::module::{HeaderError, Parameters};
use glob::Pattern;
use thiserror::Error;

/// Environment variable listing auto-consumer patterns
pub const AUTO_CONSUMERS_ENV: &str = "SPIWEAVE_AUTO_CONSUMERS";

/// Requirement header given to auto-consumer modules
pub const AUTO_CONSUMER_HEADER: &str = "osgi.extender;filter:='(osgi.extender=osgi.serviceloader.processor)',osgi.serviceloader;filter:='(osgi.serviceloader=*)'";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The pattern list is not valid header syntax
    #[error("Invalid {AUTO_CONSUMERS_ENV} value: {0}")]
    Header(#[from] HeaderError),

    /// A pattern is not a valid glob
    #[error("Invalid auto-consumer pattern '{pattern}': {source}")]
    Pattern {
        /// Offending pattern
        pattern: String,
        /// Underlying error
        #[source]
        source: glob::PatternError,
    },
}

/// Weaver settings
#[derive(Debug, Clone, Default)]
pub struct WeaverConfig {
    auto_consumers: Vec<Pattern>,
}

impl WeaverConfig {
    /// Configuration with no auto-consumers
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `SPIWEAVE_AUTO_CONSUMERS`; unset means no auto-consumers
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(AUTO_CONSUMERS_ENV) {
            Ok(value) => Self::from_value(&value),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Parse a pattern list in header syntax
    pub fn from_value(value: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for clause in &Parameters::parse(value)? {
            config = config.with_auto_consumer(clause.name())?;
        }
        Ok(config)
    }

    /// Add one auto-consumer glob
    pub fn with_auto_consumer(mut self, pattern: &str) -> Result<Self, ConfigError> {
        let pattern = pattern.trim();
        let compiled = Pattern::new(pattern).map_err(|source| ConfigError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.auto_consumers.push(compiled);
        Ok(self)
    }

    /// Whether a module with this symbolic name is woven without opting in
    pub fn is_auto_consumer(&self, module_name: &str) -> bool {
        self.auto_consumers
            .iter()
            .any(|pattern| pattern.matches(module_name))
    }

    /// Configured patterns, in order
    pub fn auto_consumer_patterns(&self) -> impl Iterator<Item = &str> {
        self.auto_consumers.iter().map(Pattern::as_str)
    }
}
