//! # Synchronization Core
//!
//! The orchestrator that ties the registry, cache, dispatcher, scheduler and
//! visibility monitor into one engine, and the only writer of their state.
//!
//! ## Flow
//!
//! 1.  **Subscribe**: the subscriber is recorded, its id joins the feed's
//!     interest set, the feed's poll timer is started (or re-timed), and an
//!     immediate fetch-or-serve-cached cycle runs for that feed only.
//! 2.  **Refresh**: a fresh cached value is returned and broadcast without
//!     fetching. Otherwise the feed's adapter runs; on success the value is
//!     written through the cache and broadcast, on failure the error goes to
//!     the caller and subscribers keep the last good value.
//! 3.  **Broadcast**: every subscriber callback of the feed is invoked in turn.
//!     A panicking callback is caught and logged; the rest still receive the
//!     value. The same [`FeedUpdated`] event is then published on the
//!     [`updates`](SyncCore::updates) channel.
//! 4.  **Unsubscribe**: the last subscriber leaving cancels the feed's timer.
//!     The cached value is retained for the next subscriber.
//!
//! ## At Most One Fetch In Flight
//!
//! Every fetch runs in its own task and is published in the in-flight table as
//! a shared future. A refresh that finds an entry attaches to it and receives
//! the same outcome, so N simultaneous subscribers cost one adapter call. The
//! task outlives any caller that gives up waiting, which means a started fetch
//! always lands in the cache.
//!
//! ## Locking
//!
//! All state sits behind one `std::sync::Mutex`. It is never held across an
//! `.await`, and no adapter or callback runs while it is held.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "configs")]
use crate::configs::config_feeds::SyncConfig;
use crate::core::cache::CacheStore;
use crate::core::dispatcher::{FeedFetcher, FetchDispatcher};
use crate::core::errors::SyncError;
use crate::core::feed::{FeedConfig, FeedId, FeedUpdated, FeedValue};
use crate::core::registry::{FeedCallback, SubscribeOptions, SubscriberId, SubscriptionRegistry};
use crate::core::scheduler::{PollScheduler, PollTick};
use crate::core::visibility::{PageState, VisibilityMonitor};

/// Default buffer of the [`updates`](SyncCore::updates) channel.
pub const DEFAULT_UPDATES_CAPACITY: usize = 256;

type InFlight = Shared<BoxFuture<'static, Result<FeedValue, SyncError>>>;

/// Snapshot returned by [`SyncCore::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Feeds with a running poll timer, sorted by name.
    pub active_polling: Vec<FeedId>,
    /// Number of live subscribers across all feeds.
    pub subscriber_count: usize,
    /// Feeds with a fetch currently outstanding, sorted by name.
    pub in_flight: Vec<FeedId>,
    /// Current visibility/focus signals.
    pub page: PageState,
}

struct SyncState {
    dispatcher: FetchDispatcher,
    cache: CacheStore,
    registry: SubscriptionRegistry,
    scheduler: PollScheduler,
    in_flight: HashMap<FeedId, InFlight>,
    // Bumped by cleanup(); completions from an older epoch are discarded.
    epoch: u64,
}

struct Inner {
    state: Mutex<SyncState>,
    monitor: VisibilityMonitor,
    updates: broadcast::Sender<FeedUpdated>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum RefreshStep {
    Ready(FeedValue),
    Pending(InFlight),
}

/// # Sync Core
///
/// Handle to the engine. Cloning is cheap and every clone drives the same
/// engine; construct one per process and pass it to whoever needs it.
///
/// Must be created inside a Tokio runtime: construction spawns the task that
/// watches the [`VisibilityMonitor`].
#[derive(Clone)]
pub struct SyncCore {
    inner: Arc<Inner>,
}

impl SyncCore {
    /// Creates an engine gated by `monitor`.
    pub fn new(monitor: VisibilityMonitor) -> Self {
        Self::with_capacity(monitor, DEFAULT_UPDATES_CAPACITY)
    }

    /// Creates an engine sized by `config`. Feeds still have to be registered
    /// with their adapters; [`SyncConfig::feed_config`] supplies their timing.
    #[cfg(feature = "configs")]
    pub fn with_config(monitor: VisibilityMonitor, config: &SyncConfig) -> Self {
        Self::with_capacity(monitor, config.updates_capacity)
    }

    /// Creates an engine whose `updates` channel buffers `capacity` events.
    pub fn with_capacity(monitor: VisibilityMonitor, capacity: usize) -> Self {
        let shutdown = CancellationToken::new();
        let (updates, _) = broadcast::channel(capacity.max(1));

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let scheduler =
                PollScheduler::new(monitor.clone(), shutdown.child_token(), poll_tick(weak.clone()));
            Inner {
                state: Mutex::new(SyncState {
                    dispatcher: FetchDispatcher::new(),
                    cache: CacheStore::new(),
                    registry: SubscriptionRegistry::default(),
                    scheduler,
                    in_flight: HashMap::new(),
                    epoch: 0,
                }),
                monitor: monitor.clone(),
                updates,
                shutdown: shutdown.clone(),
            }
        });

        tokio::spawn(watch_visibility(
            Arc::downgrade(&inner),
            monitor.resumes(),
            shutdown,
        ));

        Self { inner }
    }

    /// Registers the adapter and timing of a feed. Call once per feed at startup.
    pub fn register_feed<F>(
        &self,
        feed: impl Into<FeedId>,
        config: FeedConfig,
        fetcher: F,
    ) -> Result<(), SyncError>
    where
        F: FeedFetcher,
    {
        let feed = feed.into();
        self.lock_state()
            .dispatcher
            .register(feed.clone(), config, Arc::new(fetcher))?;
        tracing::info!(
            feed = %feed,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            cache_lifetime_ms = config.cache_lifetime.as_millis() as u64,
            "feed registered"
        );
        Ok(())
    }

    /// The monitor gating this engine.
    pub fn monitor(&self) -> &VisibilityMonitor {
        &self.inner.monitor
    }

    /// A listener receiving every broadcast [`FeedUpdated`] event.
    pub fn updates(&self) -> broadcast::Receiver<FeedUpdated> {
        self.inner.updates.subscribe()
    }

    /// # Subscribe
    ///
    /// Registers `callback` for every update of `feed` and returns the id to
    /// unsubscribe with. Fails only for an unregistered feed.
    ///
    /// With `options.immediate` (the default) the feed is served right away: a
    /// fresh cached value is broadcast, otherwise a fetch starts (or an
    /// outstanding one is joined). A retained value past its lifetime is
    /// handed to the new subscriber alone, marked `stale`, while that fetch
    /// runs.
    pub fn subscribe<F>(
        &self,
        feed: impl Into<FeedId>,
        callback: F,
        options: SubscribeOptions,
    ) -> Result<SubscriberId, SyncError>
    where
        F: Fn(&FeedUpdated) + Send + Sync + 'static,
    {
        let feed = feed.into();
        let (id, immediate) = {
            let mut state = self.lock_state();
            let config = state.dispatcher.config(&feed)?;
            let id = state
                .registry
                .insert(feed.clone(), Arc::new(callback), &options);
            let first = state.cache.add_interest(&feed, id);
            reschedule(&mut state, &feed, config);
            if first {
                tracing::info!(feed = %feed, "feed active");
            }
            let immediate = state
                .registry
                .get(id)
                .is_some_and(|sub| sub.fetch_immediately);
            (id, immediate)
        };
        tracing::debug!(feed = %feed, subscriber = %id, immediate, "subscribed");

        if immediate {
            self.serve_new_subscriber(&feed, id)?;
        }
        Ok(id)
    }

    /// # Unsubscribe
    ///
    /// Removes the subscriber. The feed's timer stops when it was the last one.
    /// Unknown or already-removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let removed = {
            let mut state = self.lock_state();
            let Some(sub) = state.registry.remove(id) else {
                tracing::debug!(subscriber = %id, "unsubscribe of unknown subscriber ignored");
                return;
            };
            if state.cache.remove_interest(&sub.feed, id) {
                state.scheduler.deactivate(&sub.feed);
                tracing::info!(feed = %sub.feed, "feed idle");
            } else if let Ok(config) = state.dispatcher.config(&sub.feed) {
                reschedule(&mut state, &sub.feed, config);
            }
            sub
        };
        tracing::debug!(feed = %removed.feed, subscriber = %id, "unsubscribed");
    }

    /// # Refresh
    ///
    /// Returns the latest value of `feed` and broadcasts it to its subscribers.
    ///
    /// Without `force` a fresh cached value is used as is. Otherwise the adapter
    /// runs, unless a fetch of the feed is already outstanding, in which case
    /// this call waits for that one. A failed fetch is returned to the caller
    /// and not broadcast.
    pub async fn refresh(&self, feed: &FeedId, force: bool) -> Result<FeedValue, SyncError> {
        match self.begin_refresh(feed, force)? {
            RefreshStep::Ready(value) => Ok(value),
            RefreshStep::Pending(fetch) => fetch.await,
        }
    }

    /// The cached value of `feed` while it is within its cache lifetime.
    pub fn get_cached_data(&self, feed: &FeedId) -> Option<FeedValue> {
        let state = self.lock_state();
        let config = state.dispatcher.config(feed).ok()?;
        state.cache.get(feed, config.cache_lifetime, Instant::now())
    }

    /// Invalidates the cached value of one feed, or of all feeds.
    pub fn clear_cache(&self, feed: Option<&FeedId>) {
        self.lock_state().cache.clear(feed);
        match feed {
            Some(feed) => tracing::debug!(feed = %feed, "cache cleared"),
            None => tracing::debug!("all caches cleared"),
        }
    }

    /// Snapshot of polling and subscription activity.
    pub fn status(&self) -> SyncStatus {
        let state = self.lock_state();
        let mut in_flight: Vec<FeedId> = state.in_flight.keys().cloned().collect();
        in_flight.sort();
        SyncStatus {
            active_polling: state.scheduler.active_feeds(),
            subscriber_count: state.registry.len(),
            in_flight,
            page: self.inner.monitor.state(),
        }
    }

    /// Clears every timer, subscriber, cached value and in-flight entry.
    /// Registered feeds stay registered. Fetches still running finish without
    /// touching the cleared state.
    pub fn cleanup(&self) {
        let dropped = {
            let mut state = self.lock_state();
            state.scheduler.cancel_all();
            state.cache.reset();
            state.in_flight.clear();
            state.epoch += 1;
            state.registry.clear()
        };
        tracing::info!(subscribers = dropped.len(), "sync core cleaned up");
    }

    /// Cleans up and stops the background visibility watcher. The handle stays
    /// usable for reads but resume-on-focus no longer fires.
    pub fn shutdown(&self) {
        self.cleanup();
        self.inner.shutdown.cancel();
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        // No adapter or callback runs under this lock.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_refresh(&self, feed: &FeedId, force: bool) -> Result<RefreshStep, SyncError> {
        let (value, targets) = {
            let mut state = self.lock_state();
            let config = state.dispatcher.config(feed)?;

            let cached = if force {
                None
            } else {
                state.cache.get(feed, config.cache_lifetime, Instant::now())
            };

            match cached {
                Some(value) => {
                    let targets = state.registry.callbacks(state.cache.interested(feed));
                    (value, targets)
                }
                None => {
                    if let Some(fetch) = state.in_flight.get(feed) {
                        tracing::debug!(feed = %feed, "attaching to in-flight fetch");
                        return Ok(RefreshStep::Pending(fetch.clone()));
                    }
                    let fetch = self.start_fetch(&mut state, feed, force)?;
                    return Ok(RefreshStep::Pending(fetch));
                }
            }
        };

        tracing::debug!(feed = %feed, "serving fresh cache");
        self.broadcast(feed, Arc::clone(&value), false, targets);
        Ok(RefreshStep::Ready(value))
    }

    fn start_fetch(
        &self,
        state: &mut SyncState,
        feed: &FeedId,
        force: bool,
    ) -> Result<InFlight, SyncError> {
        let pending = state.dispatcher.prepare(feed, force)?;
        let epoch = state.epoch;
        let weak = Arc::downgrade(&self.inner);
        let task_feed = feed.clone();

        let task = tokio::spawn(async move {
            // A panicking adapter is a failed fetch like any other; it must still
            // reach complete_fetch so the in-flight entry is released.
            let outcome = match AssertUnwindSafe(pending.run()).catch_unwind().await {
                Ok(outcome) => outcome.map(Arc::new),
                Err(payload) => Err(SyncError::FetchFailure {
                    feed: task_feed.clone(),
                    message: format!("adapter panicked: {}", panic_reason(payload.as_ref())),
                }),
            };
            match weak.upgrade() {
                Some(inner) => SyncCore { inner }.complete_fetch(&task_feed, epoch, outcome),
                None => outcome,
            }
        });

        let join_feed = feed.clone();
        let join_weak = Arc::downgrade(&self.inner);
        let fetch: InFlight = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let outcome = Err(SyncError::FetchFailure {
                        feed: join_feed.clone(),
                        message: format!("fetch task ended abnormally: {err}"),
                    });
                    match join_weak.upgrade() {
                        Some(inner) => SyncCore { inner }.complete_fetch(&join_feed, epoch, outcome),
                        None => outcome,
                    }
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(feed.clone(), fetch.clone());
        Ok(fetch)
    }

    fn complete_fetch(
        &self,
        feed: &FeedId,
        epoch: u64,
        outcome: Result<FeedValue, SyncError>,
    ) -> Result<FeedValue, SyncError> {
        let targets = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                tracing::debug!(feed = %feed, "discarding fetch result from before cleanup");
                return outcome;
            }
            state.in_flight.remove(feed);
            match &outcome {
                Ok(value) => {
                    state.cache.put(feed, Arc::clone(value), Instant::now());
                    state.registry.callbacks(state.cache.interested(feed))
                }
                Err(err) => {
                    tracing::warn!(feed = %feed, error = %err, "fetch failed; keeping last good value");
                    return outcome;
                }
            }
        };

        if let Ok(value) = &outcome {
            self.broadcast(feed, Arc::clone(value), false, targets);
        }
        outcome
    }

    fn serve_new_subscriber(&self, feed: &FeedId, id: SubscriberId) -> Result<(), SyncError> {
        let stale = {
            let state = self.lock_state();
            let config = state.dispatcher.config(feed)?;
            if state
                .cache
                .get(feed, config.cache_lifetime, Instant::now())
                .is_some()
            {
                None
            } else {
                state
                    .cache
                    .peek(feed)
                    .map(|value| (value, state.registry.callbacks([id])))
            }
        };
        if let Some((value, target)) = stale {
            tracing::debug!(feed = %feed, subscriber = %id, "serving retained value while refetching");
            self.broadcast(feed, value, true, target);
        }

        match self.begin_refresh(feed, false)? {
            RefreshStep::Ready(_) => {}
            // The fetch task caches and broadcasts on its own; nobody awaits it here.
            RefreshStep::Pending(_) => {
                tracing::debug!(feed = %feed, "immediate fetch left to complete in the background");
            }
        }
        Ok(())
    }

    fn broadcast(
        &self,
        feed: &FeedId,
        value: FeedValue,
        stale: bool,
        targets: Vec<(SubscriberId, FeedCallback)>,
    ) {
        let update = FeedUpdated {
            feed: feed.clone(),
            value,
            stale,
        };

        for (subscriber, callback) in targets {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&update))) {
                let err = SyncError::CallbackFailure {
                    feed: feed.clone(),
                    subscriber,
                    reason: panic_reason(payload.as_ref()),
                };
                tracing::error!(error = %err, "subscriber callback failed");
            }
        }

        // No listeners is fine.
        let _ = self.inner.updates.send(update);
    }

    fn resume_active_feeds(&self) {
        let feeds = self.lock_state().scheduler.active_feeds();
        if feeds.is_empty() {
            return;
        }
        tracing::info!(feeds = feeds.len(), "page active again; refreshing active feeds");
        for feed in feeds {
            let core = self.clone();
            tokio::spawn(async move {
                if let Err(err) = core.refresh(&feed, true).await {
                    tracing::debug!(feed = %feed, error = %err, "resume refresh failed");
                }
            });
        }
    }
}

/// Applies the effective period of `feed`: the shortest of its configured
/// interval and every subscriber's override.
fn reschedule(state: &mut SyncState, feed: &FeedId, config: FeedConfig) {
    let period = state
        .registry
        .min_interval(feed)
        .map_or(config.poll_interval, |requested| {
            requested.min(config.poll_interval)
        });
    state.scheduler.activate(feed, period);
}

fn poll_tick(weak: Weak<Inner>) -> PollTick {
    Arc::new(move |feed: FeedId| {
        let weak = weak.clone();
        async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let core = SyncCore { inner };
            if let Err(err) = core.refresh(&feed, false).await {
                tracing::debug!(feed = %feed, error = %err, "scheduled poll failed");
            }
        }
        .boxed()
    })
}

async fn watch_visibility(
    weak: Weak<Inner>,
    mut resumes: watch::Receiver<u64>,
    shutdown: CancellationToken,
) {
    let mut seen = *resumes.borrow_and_update();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = resumes.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *resumes.borrow_and_update();
                if count == seen {
                    continue;
                }
                // Several resumes coalesced into one wakeup still refresh once:
                // the page is active now and each feed needs one fresh value.
                seen = count;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncCore { inner }.resume_active_feeds();
            }
        }
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
