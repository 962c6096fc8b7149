//! Configuration file reading and parsing.
//!
//! This module handles locating, reading, and parsing INI-format configuration files,
//! with support for layered overrides.

use std::env;
use std::path::{Path, PathBuf};

use configparser::ini::Ini;
use thiserror::Error;

use super::{CacheConfig, Config, LogConfig, MergeConfig, RepositoryConfig, UserConfig};
use crate::merge::FastForwardMode;

// =============================================================================
// Constants - Default Values
// =============================================================================

const DEFAULT_CACHE_NO_CACHE: bool = false;
const DEFAULT_CACHE_MAX_OBJECTS: usize = 10_000;
const DEFAULT_REPOSITORY_PATH: &str = ".";

const ENV_CONFIG_FILE: &str = "TT_CONFIG_FILE";
const DEFAULT_CONFIG_FILENAME: &str = ".ttconfig";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid integer '{value}': {source}")]
    InvalidInteger {
        value: String,
        source: std::num::ParseIntError,
    },

    #[error("invalid boolean '{value}' for key '{key}'")]
    InvalidBoolean { key: String, value: String },

    #[error("invalid value '{value}' for key '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("invalid override key '{key}': {message}")]
    InvalidOverrideKey { key: String, message: String },
}

/// Result type for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// =============================================================================
// ConfigSource
// =============================================================================

/// Specifies how to locate and layer configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    /// Explicit config file path from CLI. If specified and doesn't exist, error.
    /// If None, fall back to TT_CONFIG_FILE env var, then ~/.ttconfig.
    pub config_file: Option<PathBuf>,

    /// Additional override config file (layered on top of base config).
    pub override_file: Option<PathBuf>,

    /// Individual key=value overrides (applied last).
    /// Keys use dot-notation: "user.name", "merge.ff"
    pub overrides: Vec<(String, String)>,
}

// =============================================================================
// Value Parsing
// =============================================================================

fn parse_bool_value(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBoolean {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_usize_value(value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidInteger {
            value: value.to_string(),
            source: e,
        })
}

fn parse_ff_value(key: &str, value: &str) -> Result<FastForwardMode> {
    FastForwardMode::parse(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// =============================================================================
// Config File Resolution
// =============================================================================

/// Information about how the config file was resolved.
#[derive(Debug)]
struct ResolvedConfigFile {
    /// The path to the config file, if one was found.
    path: Option<PathBuf>,
    /// Warning message if env var pointed to nonexistent file.
    warning: Option<String>,
}

/// Resolve which config file to use based on the ConfigSource and environment.
fn resolve_config_file(source: &ConfigSource) -> Result<ResolvedConfigFile> {
    // If explicit path provided, it must exist
    if let Some(ref path) = source.config_file {
        if path.exists() {
            return Ok(ResolvedConfigFile {
                path: Some(path.clone()),
                warning: None,
            });
        }
        return Err(ConfigError::FileNotFound(path.clone()));
    }

    if let Ok(env_path) = env::var(ENV_CONFIG_FILE) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(ResolvedConfigFile {
                path: Some(path),
                warning: None,
            });
        }
        // Warn but continue with defaults
        return Ok(ResolvedConfigFile {
            path: None,
            warning: Some(format!(
                "config file specified by {} does not exist: {}",
                ENV_CONFIG_FILE, env_path
            )),
        });
    }

    if let Some(home) = home_dir() {
        let default_path = home.join(DEFAULT_CONFIG_FILENAME);
        if default_path.exists() {
            return Ok(ResolvedConfigFile {
                path: Some(default_path),
                warning: None,
            });
        }
    }

    Ok(ResolvedConfigFile {
        path: None,
        warning: None,
    })
}

/// Get the user's home directory.
fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

// =============================================================================
// Default Config
// =============================================================================

/// Create a Config with all default values.
fn default_config() -> Config {
    Config {
        user: UserConfig::default(),
        cache: CacheConfig {
            no_cache: DEFAULT_CACHE_NO_CACHE,
            max_objects: DEFAULT_CACHE_MAX_OBJECTS,
        },
        log: LogConfig::default(),
        merge: MergeConfig::default(),
        repository: RepositoryConfig {
            path: PathBuf::from(DEFAULT_REPOSITORY_PATH),
        },
    }
}

// =============================================================================
// INI Parsing
// =============================================================================

/// The keys each section accepts, as `(section, key)` pairs. The INI file
/// and the dot-notation overrides share this table.
const KNOWN_KEYS: &[(&str, &str)] = &[
    ("user", "name"),
    ("user", "email"),
    ("cache", "no-cache"),
    ("cache", "max_objects"),
    ("log", "level"),
    ("merge", "ff"),
    ("repository", "path"),
];

/// Set one key on the config. Unknown keys are reported to the caller.
fn set_value(config: &mut Config, section: &str, key: &str, value: &str) -> Result<bool> {
    let full_key = format!("{}.{}", section, key);
    match (section, key) {
        ("user", "name") => config.user.name = Some(value.to_string()),
        ("user", "email") => config.user.email = Some(value.to_string()),
        ("cache", "no-cache") | ("cache", "no_cache") => {
            config.cache.no_cache = parse_bool_value(&full_key, value)?
        }
        ("cache", "max_objects") => config.cache.max_objects = parse_usize_value(value)?,
        ("log", "level") => config.log.level = Some(value.to_string()),
        ("merge", "ff") => config.merge.ff = parse_ff_value(&full_key, value)?,
        ("repository", "path") => config.repository.path = PathBuf::from(value),
        _ => return Ok(false),
    }
    Ok(true)
}

/// Apply an INI file's contents to a Config, layering on top of existing values.
///
/// Keys outside the known sections are ignored.
fn apply_ini_to_config(config: &mut Config, ini: &Ini) -> Result<()> {
    for (section, key) in KNOWN_KEYS {
        if let Some(value) = ini.get(section, key) {
            set_value(config, section, key, &value)?;
        }
    }
    Ok(())
}

/// Load and parse an INI file.
fn load_ini(path: &Path) -> Result<Ini> {
    let mut ini = Ini::new();
    ini.load(path).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e,
    })?;
    Ok(ini)
}

// =============================================================================
// Override Application
// =============================================================================

/// Apply a single key=value override to the config.
fn apply_override(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let invalid = |message: &str| ConfigError::InvalidOverrideKey {
        key: key.to_string(),
        message: message.to_string(),
    };
    let Some((section, param)) = key.split_once('.') else {
        return Err(invalid("expected section.key"));
    };
    if set_value(config, section, param, value)? {
        Ok(())
    } else {
        Err(invalid("unrecognized key"))
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

/// Result of reading configuration.
#[derive(Debug)]
pub struct ConfigResult {
    /// The parsed configuration.
    pub config: Config,
    /// Any warnings generated during config loading.
    pub warnings: Vec<String>,
}

/// Read and parse configuration from the specified sources.
///
/// Configuration is layered in this order:
/// 1. Built-in defaults
/// 2. Base config file (from CLI, env var, or ~/.ttconfig)
/// 3. Override config file (if specified)
/// 4. Individual overrides (applied last)
pub fn read_config(source: &ConfigSource) -> Result<ConfigResult> {
    let mut warnings = Vec::new();

    let mut config = default_config();

    let resolved = resolve_config_file(source)?;
    if let Some(warning) = resolved.warning {
        warnings.push(warning);
    }
    if let Some(ref path) = resolved.path {
        let ini = load_ini(path)?;
        apply_ini_to_config(&mut config, &ini)?;
    }

    if let Some(ref override_path) = source.override_file {
        if !override_path.exists() {
            return Err(ConfigError::FileNotFound(override_path.clone()));
        }
        let ini = load_ini(override_path)?;
        apply_ini_to_config(&mut config, &ini)?;
    }

    for (key, value) in &source.overrides {
        apply_override(&mut config, key, value)?;
    }

    Ok(ConfigResult { config, warnings })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert_eq!(config.repository.path, PathBuf::from("."));
        assert!(!config.cache.no_cache);
        assert_eq!(config.cache.max_objects, 10_000);
        assert_eq!(config.merge.ff, FastForwardMode::Allow);
        assert_eq!(config.user.author(), None);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = default_config();
        apply_override(&mut config, "user.name", "Ada").unwrap();
        apply_override(&mut config, "user.email", "ada@example.com").unwrap();
        apply_override(&mut config, "merge.ff", "only").unwrap();
        apply_override(&mut config, "cache.no_cache", "true").unwrap();
        assert_eq!(config.user.author().as_deref(), Some("Ada <ada@example.com>"));
        assert_eq!(config.merge.ff, FastForwardMode::Only);
        assert!(config.cache.no_cache);

        assert!(matches!(
            apply_override(&mut config, "merge.ff", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            apply_override(&mut config, "cache.max_objects", "lots"),
            Err(ConfigError::InvalidInteger { .. })
        ));
        assert!(matches!(
            apply_override(&mut config, "nosection", "x"),
            Err(ConfigError::InvalidOverrideKey { .. })
        ));
        assert!(matches!(
            apply_override(&mut config, "user.shoe_size", "9"),
            Err(ConfigError::InvalidOverrideKey { .. })
        ));
    }

    #[test]
    fn test_parse_ini_config() {
        let mut ini = Ini::new();
        ini.read(
            r#"
[user]
name = Ada

[cache]
no-cache = yes
max_objects = 50

[log]
level = debug

[merge]
ff = false
"#
            .to_string(),
        )
        .unwrap();

        let mut config = default_config();
        apply_ini_to_config(&mut config, &ini).unwrap();

        assert_eq!(config.user.name.as_deref(), Some("Ada"));
        assert!(config.cache.no_cache);
        assert_eq!(config.cache.max_objects, 50);
        assert_eq!(config.log.level.as_deref(), Some("debug"));
        assert_eq!(config.merge.ff, FastForwardMode::Never);
    }

    #[test]
    fn test_read_config_layers() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base.ini");
        std::fs::write(&base, "[user]\nname = Base\nemail = base@example.com\n").unwrap();
        let over = dir.path().join("override.ini");
        std::fs::write(&over, "[user]\nname = Override\n").unwrap();

        let source = ConfigSource {
            config_file: Some(base),
            override_file: Some(over),
            overrides: vec![("repository.path".to_string(), "/data/repo".to_string())],
        };
        let result = read_config(&source).unwrap();
        assert_eq!(result.config.user.name.as_deref(), Some("Override"));
        assert_eq!(result.config.user.email.as_deref(), Some("base@example.com"));
        assert_eq!(result.config.repository.path, PathBuf::from("/data/repo"));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_explicit_file() {
        let source = ConfigSource {
            config_file: Some(PathBuf::from("/nonexistent/ttconfig")),
            ..Default::default()
        };
        assert!(matches!(read_config(&source), Err(ConfigError::FileNotFound(_))));
    }
}
