//! Layered configuration.
//!
//! Settings are merged with figment, later layers winning:
//!
//! 1. built-in defaults
//! 2. a TOML file: `--config <PATH>`, or `cowdupe/config.toml` in the
//!    platform config directory
//! 3. `COWDUPE_*` environment variables (`COWDUPE_IO_THREADS=8`)
//! 4. command-line flags
//!
//! ```toml
//! min_size = 4096
//! skip_hidden = true
//! ignore_patterns = ["*.tmp", "node_modules/"]
//! io_threads = 8
//! hash_algorithm = "blake3"
//! ```

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::dedup::{DedupConfig, DEFAULT_IO_THREADS};
use crate::scanner::{HashAlgorithm, WalkerConfig};

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "COWDUPE_";

/// Errors raised while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// A layer could not be parsed or has a value of the wrong type.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Invalid(Box::new(err))
    }
}

/// Effective settings of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Skip files smaller than this many bytes.
    pub min_size: Option<u64>,
    /// Skip files larger than this many bytes.
    pub max_size: Option<u64>,
    /// Skip hidden files and directories.
    pub skip_hidden: bool,
    /// Follow symbolic links.
    pub follow_symlinks: bool,
    /// Gitignore-style exclusion patterns.
    pub ignore_patterns: Vec<String>,
    /// Hashing threads.
    pub io_threads: usize,
    /// Content hash algorithm.
    pub hash_algorithm: HashAlgorithm,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_size: None,
            max_size: None,
            skip_hidden: false,
            follow_symlinks: false,
            ignore_patterns: Vec::new(),
            io_threads: DEFAULT_IO_THREADS,
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

impl Config {
    /// Platform location of the implicit config file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "cowdupe").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Defaults, then `file` if given, then the environment.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load the file and environment layers.
    ///
    /// An explicit file must exist and parse. A malformed implicit file is
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing or malformed explicit file, or
    /// a malformed environment variable.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            log::debug!("Loading config from {}", path.display());
            return Ok(Self::figment(Some(path)).extract()?);
        }

        let implicit = Self::default_path().filter(|p| p.is_file());
        match Self::figment(implicit.as_deref()).extract() {
            Ok(config) => Ok(config),
            Err(e) => match implicit {
                Some(path) => {
                    log::warn!("Ignoring config file {}: {}", path.display(), e);
                    Ok(Self::figment(None).extract()?)
                }
                None => Err(e.into()),
            },
        }
    }

    /// Apply command-line flags on top of the loaded layers.
    #[must_use]
    pub fn with_cli_overrides(mut self, cli: &Cli) -> Self {
        if cli.min_size.is_some() {
            self.min_size = cli.min_size;
        }
        if cli.max_size.is_some() {
            self.max_size = cli.max_size;
        }
        self.skip_hidden |= cli.skip_hidden;
        self.follow_symlinks |= cli.follow_symlinks;
        self.ignore_patterns
            .extend(cli.ignore_patterns.iter().cloned());
        if let Some(threads) = cli.io_threads {
            self.io_threads = threads;
        }
        if let Some(algorithm) = cli.hash_algorithm {
            self.hash_algorithm = algorithm;
        }
        self
    }

    /// Walker settings.
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig::new(
            self.follow_symlinks,
            self.skip_hidden,
            self.min_size,
            self.max_size,
            self.ignore_patterns.clone(),
        )
    }

    /// Deduplicator settings; shutdown and progress are wired by the caller.
    #[must_use]
    pub fn dedup_config(&self) -> DedupConfig {
        DedupConfig::default()
            .with_io_threads(self.io_threads)
            .with_hash_algorithm(self.hash_algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_extract() {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .extract()
            .unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.io_threads, 4);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "cowdupe",
            "--min-size",
            "1KB",
            "--skip-hidden",
            "-i",
            "*.log",
            "--hash",
            "blake3",
            ".",
        ])
        .unwrap();

        let base = Config {
            ignore_patterns: vec!["*.tmp".to_string()],
            max_size: Some(10),
            ..Default::default()
        };
        let config = base.with_cli_overrides(&cli);

        assert_eq!(config.min_size, Some(1_000));
        assert_eq!(config.max_size, Some(10));
        assert!(config.skip_hidden);
        assert!(!config.follow_symlinks);
        assert_eq!(config.ignore_patterns, vec!["*.tmp", "*.log"]);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Blake3);
        assert_eq!(config.io_threads, 4);
    }

    #[test]
    fn test_walker_and_dedup_config() {
        let config = Config {
            min_size: Some(1),
            follow_symlinks: true,
            io_threads: 2,
            ..Default::default()
        };

        let walker = config.walker_config();
        assert_eq!(walker.min_size, Some(1));
        assert!(walker.follow_symlinks);

        let dedup = config.dedup_config();
        assert_eq!(dedup.io_threads, 2);
        assert!(!dedup.dry_run);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/cowdupe.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
