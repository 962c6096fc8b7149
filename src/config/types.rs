//! Configuration types for tabletree-rs.
//!
//! This module defines the structures used to represent application configuration
//! as parsed from an INI-format config file.

use std::path::PathBuf;

use crate::merge::FastForwardMode;

// =============================================================================
// Config Sections
// =============================================================================

/// [user] section - identity recorded on new commits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserConfig {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UserConfig {
    /// The commit author string, `Name <email>`, if a name or email is set.
    pub fn author(&self) -> Option<String> {
        match (&self.name, &self.email) {
            (Some(name), Some(email)) => Some(format!("{} <{}>", name, email)),
            (Some(name), None) => Some(name.clone()),
            (None, Some(email)) => Some(format!("<{}>", email)),
            (None, None) => None,
        }
    }
}

/// [cache] section - in-process object cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub no_cache: bool,
    /// Maximum number of objects held by the cache.
    pub max_objects: usize,
}

/// [log] section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// A `tracing` filter directive, used when `RUST_LOG` is unset.
    pub level: Option<String>,
}

/// [merge] section - defaults for `tt merge`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeConfig {
    pub ff: FastForwardMode,
}

/// [repository] section - where the repository lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub path: PathBuf,
}

// =============================================================================
// Top-Level Config
// =============================================================================

/// Complete application configuration as parsed from config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub user: UserConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
    pub merge: MergeConfig,
    pub repository: RepositoryConfig,
}
