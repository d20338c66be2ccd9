//! Configuration for ndbsig.
//!
//! ```toml
//! [pool]
//! segments = 16384
//!
//! [fragment]
//! max_fragment_words = 240   # at least one segment
//! max_assemblies = 1024
//! retry_delay_millis = 10
//!
//! [cleanup]
//! work_units = 16
//! ```
//!
//! Every key can be overridden as `NDBSIG_<SECTION>__<KEY>`, e.g.
//! `NDBSIG_FRAGMENT__MAX_FRAGMENT_WORDS=120`. Unparsable values are
//! ignored. The file is `$NDBSIG_CONFIG`, else `ndbsig/config.toml` under
//! `$XDG_CONFIG_HOME` or `~/.config`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::pool::DATA_LENGTH;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NdbsigConfig {
    pub pool: PoolConfig,
    pub fragment: FragmentConfig,
    pub cleanup: CleanupConfig,
    pub logging: LoggingConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Segments in the shared pool. Fixed for the life of the process.
    pub segments: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    /// Section words carried per physical fragment.
    pub max_fragment_words: usize,
    /// Concurrent reassemblies per context. Exceeding it is fatal.
    pub max_assemblies: usize,
    /// Back-off before retrying a send to an overloaded receiver.
    pub retry_delay_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Elements examined per node-failure cleanup step.
    pub work_units: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when RUST_LOG is unset.
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub nodes: u16,
    /// Messages node 1 sends to node 2.
    pub messages: usize,
    pub max_message_words: usize,
    /// Run-queue tick interval.
    pub tick_micros: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for PoolConfig {
    fn default() -> Self {
        Self { segments: 16_384 }
    }
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            max_fragment_words: 240,
            max_assemblies: 1024,
            retry_delay_millis: 10,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { work_units: 16 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            nodes: 2,
            messages: 8,
            max_message_words: 4000,
            tick_micros: 200,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ndbsig")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl NdbsigConfig {
    /// Read the file if there is one, apply env overrides, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            NdbsigConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("NDBSIG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write the defaults if no file exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&NdbsigConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject values the pool and fragment protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let at_least = |key: &'static str, value: usize, min: usize| {
            if value < min {
                Err(ConfigError::Invalid {
                    key,
                    reason: format!("{value} is below the minimum of {min}"),
                })
            } else {
                Ok(())
            }
        };
        at_least("pool.segments", self.pool.segments, 1)?;
        // Non-final fragments carry whole segments
        at_least("fragment.max_fragment_words", self.fragment.max_fragment_words, DATA_LENGTH)?;
        at_least("fragment.max_assemblies", self.fragment.max_assemblies, 1)?;
        at_least("cleanup.work_units", self.cleanup.work_units, 1)?;
        Ok(())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn set<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) {
            if let Some(v) = lookup(key).and_then(|v| v.parse().ok()) {
                *field = v;
            }
        }
        set(&lookup, "NDBSIG_POOL__SEGMENTS", &mut self.pool.segments);
        set(&lookup, "NDBSIG_FRAGMENT__MAX_FRAGMENT_WORDS", &mut self.fragment.max_fragment_words);
        set(&lookup, "NDBSIG_FRAGMENT__MAX_ASSEMBLIES", &mut self.fragment.max_assemblies);
        set(&lookup, "NDBSIG_FRAGMENT__RETRY_DELAY_MILLIS", &mut self.fragment.retry_delay_millis);
        set(&lookup, "NDBSIG_CLEANUP__WORK_UNITS", &mut self.cleanup.work_units);
        set(&lookup, "NDBSIG_LOGGING__FILTER", &mut self.logging.filter);
        set(&lookup, "NDBSIG_DAEMON__NODES", &mut self.daemon.nodes);
        set(&lookup, "NDBSIG_DAEMON__MESSAGES", &mut self.daemon.messages);
        set(&lookup, "NDBSIG_DAEMON__MAX_MESSAGE_WORDS", &mut self.daemon.max_message_words);
        set(&lookup, "NDBSIG_DAEMON__TICK_MICROS", &mut self.daemon.tick_micros);
    }
}
