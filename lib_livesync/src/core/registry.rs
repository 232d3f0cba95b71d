//! # Subscription Registry
//!
//! Holds one record per live subscriber: which feed it follows, its callback,
//! its optional cadence override and whether it asked for an immediate fetch.
//! Ids are allocated monotonically and never reused, so a stale id handed to
//! `unsubscribe` can never hit a newer subscriber.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::feed::{FeedId, FeedUpdated};

/// Callback invoked with every update of the subscribed feed.
pub type FeedCallback = Arc<dyn Fn(&FeedUpdated) + Send + Sync>;

/// Handle returned by `subscribe`; keep it to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// # Subscribe Options
///
/// Defaults: no cadence override, fetch immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Requested poll cadence. The feed polls at the shortest cadence any of
    /// its subscribers (or its own configuration) asks for.
    pub interval: Option<Duration>,
    /// Run a fetch-or-serve-cached cycle right away.
    pub immediate: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            interval: None,
            immediate: true,
        }
    }
}

impl SubscribeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a poll cadence for this subscriber.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Enables or disables the immediate fetch on subscribe.
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }
}

pub(crate) struct Subscriber {
    pub(crate) feed: FeedId,
    pub(crate) callback: FeedCallback,
    pub(crate) cadence_override: Option<Duration>,
    pub(crate) fetch_immediately: bool,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: u64,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

impl SubscriptionRegistry {
    pub(crate) fn insert(
        &mut self,
        feed: FeedId,
        callback: FeedCallback,
        options: &SubscribeOptions,
    ) -> SubscriberId {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        self.subscribers.insert(
            id,
            Subscriber {
                feed,
                callback,
                cadence_override: options.interval,
                fetch_immediately: options.immediate,
            },
        );
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriberId) -> Option<Subscriber> {
        self.subscribers.remove(&id)
    }

    pub(crate) fn get(&self, id: SubscriberId) -> Option<&Subscriber> {
        self.subscribers.get(&id)
    }

    /// Callbacks for `ids`, skipping ids that are no longer registered.
    pub(crate) fn callbacks(
        &self,
        ids: impl IntoIterator<Item = SubscriberId>,
    ) -> Vec<(SubscriberId, FeedCallback)> {
        ids.into_iter()
            .filter_map(|id| {
                self.subscribers
                    .get(&id)
                    .map(|sub| (id, Arc::clone(&sub.callback)))
            })
            .collect()
    }

    /// Shortest cadence override among the subscribers of `feed`.
    pub(crate) fn min_interval(&self, feed: &FeedId) -> Option<Duration> {
        self.subscribers
            .values()
            .filter(|sub| &sub.feed == feed)
            .filter_map(|sub| sub.cadence_override)
            .min()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn clear(&mut self) -> Vec<Subscriber> {
        self.subscribers.drain().map(|(_, sub)| sub).collect()
    }
}
