//! Command context for CLI commands.
//!
//! Resolves configuration, installs logging, and opens the repository the
//! command operates on.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::backend::FsBackend;
use crate::caches::{LruRepoCache, NoopCache, RepoCache};
use crate::cli::{CliError, GlobalArgs, Result};
use crate::config::{Config, read_config};
use crate::repo::Repo;

/// The directory inside a repository that holds its objects and references.
pub const REPO_DIR: &str = ".tabletree";

const DEFAULT_LOG_LEVEL: &str = "warn";

/// Install the global `tracing` subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config_level: Option<&str>) {
    let filter = if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(config_level.unwrap_or(DEFAULT_LOG_LEVEL))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolved command context.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Resolved configuration.
    pub config: Config,
    /// Format output as JSON.
    pub json: bool,
    /// The repository's working directory.
    pub repo_path: PathBuf,
    no_cache: bool,
}

impl CommandContext {
    /// Read configuration and install logging.
    pub fn new(global: &GlobalArgs) -> Result<Self> {
        let result = read_config(&global.to_config_source())?;
        init_logging(result.config.log.level.as_deref());
        for warning in &result.warnings {
            warn!("{}", warning);
        }

        let repo_path = global
            .repo
            .clone()
            .unwrap_or_else(|| result.config.repository.path.clone());
        Ok(Self {
            no_cache: global.no_cache || result.config.cache.no_cache,
            json: global.json,
            repo_path,
            config: result.config,
        })
    }

    /// The directory holding the repository's objects and references.
    pub fn store_path(&self) -> PathBuf {
        self.repo_path.join(REPO_DIR)
    }

    /// A handle on the repository storage, initialized or not.
    pub fn repo_handle(&self) -> Arc<Repo> {
        let cache: Arc<dyn RepoCache> = if self.no_cache {
            Arc::new(NoopCache)
        } else {
            Arc::new(LruRepoCache::new(self.config.cache.max_objects))
        };
        Arc::new(Repo::from_dyn(Arc::new(FsBackend::new(self.store_path())), cache))
    }

    /// Open an initialized repository.
    pub async fn open_repo(&self) -> Result<Arc<Repo>> {
        let repo = self.repo_handle();
        if !repo.is_initialized().await? {
            return Err(CliError::NotARepository(self.repo_path.clone()));
        }
        Ok(repo)
    }

    /// The author recorded on new commits.
    pub fn author(&self) -> Option<String> {
        self.config.user.author()
    }
}
