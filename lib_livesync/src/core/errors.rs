//! # Sync Error Taxonomy

use thiserror::Error;

use crate::core::feed::FeedId;
use crate::core::registry::SubscriberId;

/// Errors raised by the synchronization engine.
///
/// `Clone` so that a single fetch outcome can be handed to every caller
/// attached to the same in-flight fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The feed was never registered. Fix the call site.
    #[error("unknown feed '{feed}'")]
    UnknownFeed { feed: FeedId },

    /// The feed was registered twice.
    #[error("feed '{feed}' is already registered")]
    DuplicateFeed { feed: FeedId },

    /// The feed's fetch adapter failed. Transient.
    #[error("fetch failed for feed '{feed}': {message}")]
    FetchFailure { feed: FeedId, message: String },

    /// A subscriber callback panicked during broadcast. Logged, never propagated.
    #[error("callback of subscriber {subscriber} failed on feed '{feed}': {reason}")]
    CallbackFailure {
        feed: FeedId,
        subscriber: SubscriberId,
        reason: String,
    },
}

impl SyncError {
    /// True for failures that a later poll may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FetchFailure { .. })
    }
}
