//! # Feed Identity and Timing
//!
//! Every live data stream the engine multiplexes is addressed by a [`FeedId`]
//! and carries a [`FeedConfig`] fixed at registration time. The engine never
//! knows which concrete feeds exist; hosts register them at startup.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Payload of a feed. The engine never inspects it; the `Arc` lets one fetched
/// value fan out to every subscriber without copying.
pub type FeedValue = Arc<serde_json::Value>;

/// # Feed Identifier
///
/// An opaque, cheap-to-clone name for one logical live-data stream
/// (e.g. `"notifications"`, `"kids-progress"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(Arc<str>);

impl FeedId {
    /// Creates a feed identifier from any string-like name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The feed name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeedId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FeedId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&FeedId> for FeedId {
    fn from(feed: &FeedId) -> Self {
        feed.clone()
    }
}

/// # Feed Timing
///
/// The two per-feed constants the engine schedules and caches by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    /// How often an active feed is re-checked while the page is active.
    pub poll_interval: Duration,
    /// How long a fetched value is served without a new fetch.
    pub cache_lifetime: Duration,
}

impl FeedConfig {
    /// Creates a feed timing from a poll interval and a cache lifetime.
    pub fn new(poll_interval: Duration, cache_lifetime: Duration) -> Self {
        Self {
            poll_interval,
            cache_lifetime,
        }
    }

    /// True when cached values outlive the poll interval. Ticks then serve the
    /// cached value instead of fetching until it expires.
    pub fn lifetime_exceeds_interval(&self) -> bool {
        self.cache_lifetime > self.poll_interval
    }
}

/// # Feed Update Event
///
/// The single event type delivered to subscriber callbacks and to
/// [`updates`](crate::core::SyncCore::updates) listeners.
#[derive(Debug, Clone)]
pub struct FeedUpdated {
    /// The feed the value belongs to.
    pub feed: FeedId,
    /// The delivered value.
    pub value: FeedValue,
    /// Set when a re-subscriber is served a retained value that is past its
    /// cache lifetime while a fresh fetch runs.
    pub stale: bool,
}
