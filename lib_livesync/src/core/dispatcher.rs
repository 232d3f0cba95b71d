//! # Fetch Dispatcher
//!
//! The registration table that maps every feed to the external, asynchronous
//! function that retrieves its data. Feed modules register their adapters once
//! at startup; the sync core then reaches them only through
//! [`FetchDispatcher::prepare`], so it has no compile-time knowledge of which
//! feeds exist.
//!
//! ## Contract
//!
//! The dispatcher invokes the adapter, awaits it, and reports either the value
//! or a [`SyncError::FetchFailure`]. It does not retry, rate-limit or reshape
//! data; callers own those concerns. Asking for a feed that was never
//! registered is a programming error and fails immediately with
//! [`SyncError::UnknownFeed`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::core::errors::SyncError;
use crate::core::feed::{FeedConfig, FeedId};

/// # Feed Fetch Adapter
///
/// Retrieves the current value of one feed. `force_refresh` tells adapters with
/// their own caching layer to bypass it. Failures are reported as
/// `anyhow::Error` so adapters can attach context freely.
///
/// Any `Fn(bool) -> impl Future<Output = anyhow::Result<Value>>` closure is an
/// adapter.
pub trait FeedFetcher: Send + Sync + 'static {
    /// Starts one retrieval.
    fn fetch(&self, force_refresh: bool) -> BoxFuture<'static, anyhow::Result<serde_json::Value>>;
}

impl<F, Fut> FeedFetcher for F
where
    F: Fn(bool) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    fn fetch(&self, force_refresh: bool) -> BoxFuture<'static, anyhow::Result<serde_json::Value>> {
        self(force_refresh).boxed()
    }
}

struct FeedRegistration {
    config: FeedConfig,
    fetcher: Arc<dyn FeedFetcher>,
}

/// A fetch that has been resolved against the table but not started yet.
///
/// Separating lookup from invocation lets the core resolve feeds while it holds
/// its state lock and run the adapter after releasing it.
pub struct PendingFetch {
    feed: FeedId,
    force_refresh: bool,
    fetcher: Arc<dyn FeedFetcher>,
}

impl PendingFetch {
    /// The feed this fetch retrieves.
    pub fn feed(&self) -> &FeedId {
        &self.feed
    }

    /// Invokes the adapter and awaits its result.
    pub async fn run(self) -> Result<serde_json::Value, SyncError> {
        tracing::debug!(feed = %self.feed, force = self.force_refresh, "dispatching fetch");
        self.fetcher
            .fetch(self.force_refresh)
            .await
            .map_err(|err| SyncError::FetchFailure {
                feed: self.feed,
                message: format!("{err:#}"),
            })
    }
}

/// # Fetch Dispatcher
///
/// Fixed mapping from feed to timing and fetch adapter.
#[derive(Default)]
pub struct FetchDispatcher {
    feeds: HashMap<FeedId, FeedRegistration>,
}

impl FetchDispatcher {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the adapter and timing of `feed`.
    pub fn register(
        &mut self,
        feed: FeedId,
        config: FeedConfig,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Result<(), SyncError> {
        if self.feeds.contains_key(&feed) {
            return Err(SyncError::DuplicateFeed { feed });
        }
        if config.lifetime_exceeds_interval() {
            tracing::warn!(
                feed = %feed,
                poll_interval_ms = config.poll_interval.as_millis() as u64,
                cache_lifetime_ms = config.cache_lifetime.as_millis() as u64,
                "cache lifetime exceeds poll interval; ticks will serve cached values"
            );
        }
        self.feeds.insert(feed, FeedRegistration { config, fetcher });
        Ok(())
    }

    /// Whether `feed` has a registered adapter.
    pub fn contains(&self, feed: &FeedId) -> bool {
        self.feeds.contains_key(feed)
    }

    /// The timing of `feed`.
    pub fn config(&self, feed: &FeedId) -> Result<FeedConfig, SyncError> {
        self.feeds
            .get(feed)
            .map(|registration| registration.config)
            .ok_or_else(|| SyncError::UnknownFeed { feed: feed.clone() })
    }

    /// All registered feeds, sorted by name.
    pub fn feeds(&self) -> Vec<FeedId> {
        let mut feeds: Vec<FeedId> = self.feeds.keys().cloned().collect();
        feeds.sort();
        feeds
    }

    /// Resolves `feed` to a fetch ready to run.
    pub fn prepare(&self, feed: &FeedId, force_refresh: bool) -> Result<PendingFetch, SyncError> {
        let registration = self
            .feeds
            .get(feed)
            .ok_or_else(|| SyncError::UnknownFeed { feed: feed.clone() })?;
        Ok(PendingFetch {
            feed: feed.clone(),
            force_refresh,
            fetcher: Arc::clone(&registration.fetcher),
        })
    }
}
