//! Subcommand implementations.

pub mod diff;
pub mod merge;
pub mod repo;
