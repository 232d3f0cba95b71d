//! # Cache Store
//!
//! One entry per feed that has ever been requested: the last fetched value,
//! when it was fetched, and the ids of the subscribers interested in the feed.
//! Reads through [`CacheStore::get`] never return a value older than the
//! feed's cache lifetime; [`CacheStore::peek`] is the explicit opt-in to the
//! retained value regardless of age.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use crate::core::feed::{FeedId, FeedValue};
use crate::core::registry::SubscriberId;

/// Cached state of one feed.
#[derive(Debug, Default)]
pub struct CacheEntry {
    value: Option<FeedValue>,
    fetched_at: Option<Instant>,
    interested: BTreeSet<SubscriberId>,
}

impl CacheEntry {
    /// When the current value was fetched, if there is one.
    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    /// Subscribers currently interested in the feed, in subscription order.
    pub fn interested(&self) -> impl Iterator<Item = SubscriberId> + '_ {
        self.interested.iter().copied()
    }

    fn fresh_value(&self, lifetime: Duration, now: Instant) -> Option<&FeedValue> {
        let fetched_at = self.fetched_at?;
        if now.saturating_duration_since(fetched_at) < lifetime {
            self.value.as_ref()
        } else {
            None
        }
    }
}

/// Per-feed cache of last-known values and interest sets.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: HashMap<FeedId, CacheEntry>,
}

impl CacheStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached value when `now - fetched_at < lifetime`, otherwise `None`.
    pub fn get(&self, feed: &FeedId, lifetime: Duration, now: Instant) -> Option<FeedValue> {
        self.entries
            .get(feed)
            .and_then(|entry| entry.fresh_value(lifetime, now))
            .cloned()
    }

    /// The retained value regardless of age.
    pub fn peek(&self, feed: &FeedId) -> Option<FeedValue> {
        self.entries.get(feed).and_then(|entry| entry.value.clone())
    }

    /// Overwrites the value and stamps it with `now`. Last writer wins.
    pub fn put(&mut self, feed: &FeedId, value: FeedValue, now: Instant) {
        let entry = self.entries.entry(feed.clone()).or_default();
        entry.value = Some(value);
        entry.fetched_at = Some(now);
    }

    /// Drops the cached value of one feed, or of all feeds when `feed` is `None`.
    /// Interest sets are subscription state and survive.
    pub fn clear(&mut self, feed: Option<&FeedId>) {
        match feed {
            Some(feed) => {
                if let Some(entry) = self.entries.get_mut(feed) {
                    entry.value = None;
                    entry.fetched_at = None;
                }
            }
            None => {
                for entry in self.entries.values_mut() {
                    entry.value = None;
                    entry.fetched_at = None;
                }
            }
        }
    }

    /// Records interest, creating the entry on first use. Returns true when
    /// this is the feed's first interested subscriber.
    pub fn add_interest(&mut self, feed: &FeedId, subscriber: SubscriberId) -> bool {
        let entry = self.entries.entry(feed.clone()).or_default();
        let was_empty = entry.interested.is_empty();
        entry.interested.insert(subscriber);
        was_empty
    }

    /// Withdraws interest. Returns true when the feed has no interested
    /// subscribers left. The entry and its value are kept.
    pub fn remove_interest(&mut self, feed: &FeedId, subscriber: SubscriberId) -> bool {
        match self.entries.get_mut(feed) {
            Some(entry) => {
                entry.interested.remove(&subscriber);
                entry.interested.is_empty()
            }
            None => true,
        }
    }

    /// Subscribers interested in `feed`.
    pub fn interested(&self, feed: &FeedId) -> Vec<SubscriberId> {
        self.entries
            .get(feed)
            .map(|entry| entry.interested().collect())
            .unwrap_or_default()
    }

    /// The entry of `feed`, if it was ever requested.
    pub fn entry(&self, feed: &FeedId) -> Option<&CacheEntry> {
        self.entries.get(feed)
    }

    /// Drops every entry, interest sets included.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
