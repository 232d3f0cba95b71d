//! # Core Engine Module
//!
//! The live-data synchronization engine. Hosts register feeds with a fetch
//! adapter, views subscribe to them, and the engine keeps every subscriber
//! current while the page is visible and focused.
//!
//! ## Core Components:
//!
//! - **`feed`**: Feed identity, timing and the update event broadcast to
//!   subscribers.
//!
//! - **`registry`**: Live subscribers, their callbacks and cadence overrides.
//!
//! - **`cache`**: Last fetched value per feed with freshness checks, plus the
//!   set of subscribers interested in each feed.
//!
//! - **`dispatcher`**: The feed-to-adapter table that performs the actual
//!   asynchronous retrieval.
//!
//! - **`scheduler`**: One recurring timer per active feed, gated on page
//!   visibility and focus.
//!
//! - **`visibility`**: The visible/focused signals the scheduler and core
//!   react to.
//!
//! - **`sync_core`**: The orchestrator. It owns all of the above and exposes
//!   subscribe, refresh, cache and teardown operations.

/// Feed identity, timing and update events.
pub mod feed;
/// Error type shared by every engine operation.
pub mod errors;
/// Live subscribers and their callbacks.
pub mod registry;
/// Per-feed cached values with freshness.
pub mod cache;
/// The feed-to-adapter table.
pub mod dispatcher;
/// Visibility-gated poll timers.
pub mod scheduler;
/// Page visibility and focus signals.
pub mod visibility;
/// The orchestrating engine.
pub mod sync_core;

// --- Public API Re-exports ---
pub use cache::{CacheEntry, CacheStore};
pub use dispatcher::{FeedFetcher, FetchDispatcher, PendingFetch};
pub use errors::SyncError;
pub use feed::{FeedConfig, FeedId, FeedUpdated, FeedValue};
pub use registry::{FeedCallback, SubscribeOptions, SubscriberId};
pub use scheduler::{PollScheduler, PollState, PollTick, MIN_POLL_PERIOD};
pub use sync_core::{SyncCore, SyncStatus, DEFAULT_UPDATES_CAPACITY};
pub use visibility::{PageState, VisibilityMonitor};
