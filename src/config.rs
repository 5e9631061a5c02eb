use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::analysis::Kind;
use crate::graph::GraphConfig;
use crate::remix::RemixConfig;

/// Out-of-range tuning values. Raised before any work starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Percentile must be within [0, 100], got {0}")]
    InvalidThreshold(f64),
    #[error("Jump probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),
    #[error("Timbre coefficient count must be within 1..={max}, got {got}")]
    InvalidCoefficients { got: usize, max: usize },
    #[error("Neighbour count must be at least 1")]
    InvalidNeighbourCount,
    #[error("Minimum jump gap must be at least 1 node")]
    InvalidMinGap,
    #[error("Cannot build a jump graph over {0} nodes; they carry no segment timbre")]
    UnsupportedKind(Kind),
}

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom cache database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Worker threads for distance computation. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Jump graph construction.
    pub graph: GraphConfig,
    /// Runtime jump selection.
    pub remix: RemixConfig,
}

impl AppConfig {
    /// Load config from `~/.config/everloop/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::from_toml(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default cache database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("everloop.db")
    } else {
        PathBuf::from("everloop.db")
    }
}
