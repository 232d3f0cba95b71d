//! # Feed Configuration
//!
//! The timing of every feed, loaded from a JSON5 document so deployments can
//! tune poll intervals and cache lifetimes without rebuilding:
//!
//! ```json5
//! {
//!   updatesCapacity: 256,
//!   feeds: {
//!     notifications:   { pollIntervalMs: 30000, cacheLifetimeMs: 15000 },
//!     "kids-progress": { pollIntervalMs: 60000, cacheLifetimeMs: 30000 },
//!   },
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::feed::{FeedConfig, FeedId};
use crate::core::sync_core::DEFAULT_UPDATES_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON5 config: {0}")]
    Parse(#[from] json5::Error),

    #[error("feed {feed}: {reason}")]
    InvalidFeed { feed: String, reason: String },

    #[error("feed {0} is not configured")]
    MissingFeed(String),
}

/// Timing of one feed, in milliseconds as written in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedTiming {
    pub poll_interval_ms: u64,
    pub cache_lifetime_ms: u64,
}

impl From<FeedTiming> for FeedConfig {
    fn from(timing: FeedTiming) -> Self {
        FeedConfig::new(
            Duration::from_millis(timing.poll_interval_ms),
            Duration::from_millis(timing.cache_lifetime_ms),
        )
    }
}

fn default_updates_capacity() -> usize {
    DEFAULT_UPDATES_CAPACITY
}

/// # Sync Configuration
///
/// Channel sizing plus the timing table, keyed by feed name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_updates_capacity")]
    pub updates_capacity: usize,
    #[serde(default)]
    pub feeds: BTreeMap<String, FeedTiming>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            updates_capacity: DEFAULT_UPDATES_CAPACITY,
            feeds: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Parses and validates a JSON5 document.
    pub fn from_json5_str(text: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = json5::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON5 file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json5_str(&text)?;
        tracing::debug!(path = %path.display(), feeds = config.feeds.len(), "feed config loaded");
        Ok(config)
    }

    /// Rejects zero poll intervals and empty feed names. Cache lifetimes longer
    /// than the poll interval are allowed but logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, timing) in &self.feeds {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidFeed {
                    feed: name.clone(),
                    reason: "feed name is empty".to_string(),
                });
            }
            if timing.poll_interval_ms == 0 {
                return Err(ConfigError::InvalidFeed {
                    feed: name.clone(),
                    reason: "pollIntervalMs must be greater than zero".to_string(),
                });
            }
            if timing.cache_lifetime_ms > timing.poll_interval_ms {
                tracing::warn!(
                    feed = %name,
                    poll_interval_ms = timing.poll_interval_ms,
                    cache_lifetime_ms = timing.cache_lifetime_ms,
                    "cache lifetime exceeds poll interval"
                );
            }
        }
        Ok(())
    }

    /// The timing of `name`.
    pub fn feed_config(&self, name: &str) -> Result<FeedConfig, ConfigError> {
        self.feeds
            .get(name)
            .copied()
            .map(FeedConfig::from)
            .ok_or_else(|| ConfigError::MissingFeed(name.to_string()))
    }

    /// Configured feeds, sorted by name.
    pub fn feed_names(&self) -> Vec<FeedId> {
        self.feeds.keys().map(FeedId::new).collect()
    }
}
