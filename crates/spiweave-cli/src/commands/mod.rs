//! Subcommand implementations

pub mod ancestor;
pub mod inspect;
pub mod rules;
pub mod weave;
