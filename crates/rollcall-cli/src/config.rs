use rollcall_core::enroll::{DEFAULT_MAX_FRAMES, DEFAULT_MIN_SAMPLES};
use rollcall_core::session::{DEFAULT_EMBEDDING_DIM, DEFAULT_FRAME_INTERVAL};
use rollcall_core::{EnrollConfig, SessionConfig, DEFAULT_TOLERANCE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration: defaults, then the TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    /// Samples an enrollment must collect.
    pub min_samples: usize,
    /// Frames an enrollment may read before giving up.
    pub enroll_frames: usize,
    /// Dimensionality of the face encoder's embeddings.
    pub embedding_dim: usize,
    /// Upper bound in milliseconds on each frame read.
    pub frame_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("attendance.db"),
            tolerance: DEFAULT_TOLERANCE,
            min_samples: DEFAULT_MIN_SAMPLES,
            enroll_frames: DEFAULT_MAX_FRAMES,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL.as_millis() as u64,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicitly given file must exist; the default location
    /// (`$XDG_CONFIG_HOME/rollcall/config.toml`) is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = config_dir().join("config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from environment variables. Unparsable values are
    /// ignored with a warning.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        override_parsed(&lookup, "ROLLCALL_TOLERANCE", &mut self.tolerance);
        override_parsed(&lookup, "ROLLCALL_MIN_SAMPLES", &mut self.min_samples);
        override_parsed(&lookup, "ROLLCALL_ENROLL_FRAMES", &mut self.enroll_frames);
        override_parsed(&lookup, "ROLLCALL_EMBEDDING_DIM", &mut self.embedding_dim);
        override_parsed(&lookup, "ROLLCALL_FRAME_INTERVAL_MS", &mut self.frame_interval_ms);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a positive number, got {}",
                self.tolerance
            )));
        }
        if self.min_samples == 0 {
            return Err(ConfigError::Invalid("min_samples must be at least 1".into()));
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be at least 1".into()));
        }
        if self.enroll_frames < self.min_samples {
            return Err(ConfigError::Invalid(format!(
                "enroll_frames ({}) must be at least min_samples ({})",
                self.enroll_frames, self.min_samples
            )));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tolerance: self.tolerance,
            embedding_dim: self.embedding_dim,
            frame_interval: self.frame_interval(),
        }
    }

    pub fn enroll_config(&self) -> EnrollConfig {
        EnrollConfig {
            minimum_samples: self.min_samples,
            max_frames: self.enroll_frames,
            frame_timeout: self.frame_interval(),
            expected_dim: Some(self.embedding_dim),
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
        }
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("rollcall")
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rollcall")
}
