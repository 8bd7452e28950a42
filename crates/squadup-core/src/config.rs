// Configuration loading and validation (squadup.toml).

use std::num::{NonZeroU32, NonZeroUsize};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::session::DEFAULT_RETENTION;
use crate::solver::{SolverOptions, DEFAULT_ATTEMPTS, DEFAULT_SHORTLIST};

pub const CONFIG_FILE_NAME: &str = "squadup.toml";
const DEFAULT_DB_FILE_NAME: &str = "squadup.db";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Assembled config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub solver: SolverConfig,
    /// Sessions kept per guild.
    pub retention: usize,
    pub db_path: String,
    /// File the config was read from; `None` for built-in defaults.
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub attempts: u32,
    pub shortlist: usize,
    /// Fixed RNG seed. Unset means a fresh seed per roll.
    pub seed: Option<u64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            attempts: DEFAULT_ATTEMPTS,
            shortlist: DEFAULT_SHORTLIST,
            seed: None,
        }
    }
}

impl SolverConfig {
    /// Solver options for one roll. Zero values were rejected by
    /// validation; they fall back to one here.
    pub fn options(&self, desired_groups: Option<usize>) -> SolverOptions {
        SolverOptions {
            desired_groups,
            attempts: NonZeroU32::new(self.attempts).unwrap_or(NonZeroU32::MIN),
            shortlist: NonZeroUsize::new(self.shortlist).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            solver: SolverConfig::default(),
            retention: DEFAULT_RETENTION,
            db_path: default_db_path(),
            source: None,
        }
    }
}

// ---------------------------------------------------------------------------
// squadup.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the whole file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    solver: SolverConfig,
    sessions: SessionsSection,
    storage: StorageSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SessionsSection {
    retention: usize,
}

impl Default for SessionsSection {
    fn default() -> Self {
        SessionsSection {
            retention: DEFAULT_RETENTION,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct StorageSection {
    database: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate the config file at `path`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let text = read_file(path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = Config {
        solver: file.solver,
        retention: file.sessions.retention,
        db_path: file.storage.database.unwrap_or_else(default_db_path),
        source: Some(path.to_path_buf()),
    };

    validate(&config)?;

    Ok(config)
}

/// Load the config from `explicit` if given (it must exist). Otherwise try
/// `./squadup.toml`, then the platform config directory, then fall back to
/// built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = explicit {
        return load_config_from(path);
    }

    let candidates = [
        std::env::current_dir().ok().map(|d| d.join(CONFIG_FILE_NAME)),
        project_dirs().map(|d| d.config_dir().join(CONFIG_FILE_NAME)),
    ];
    match candidates.into_iter().flatten().find(|p| p.is_file()) {
        Some(path) => load_config_from(&path),
        None => Ok(Config::default()),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "squadup")
}

/// `squadup.db` in the platform data directory, or the working directory
/// when there is no home directory to speak of.
fn default_db_path() -> String {
    project_dirs()
        .map(|d| d.data_dir().join(DEFAULT_DB_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE_NAME))
        .to_string_lossy()
        .into_owned()
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.solver.attempts == 0 {
        return Err(ConfigError::ValidationError {
            field: "solver.attempts".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.solver.shortlist == 0 {
        return Err(ConfigError::ValidationError {
            field: "solver.shortlist".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.retention == 0 {
        return Err(ConfigError::ValidationError {
            field: "sessions.retention".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "storage.database".into(),
            message: "must not be empty".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
