//! # Poll Scheduler
//!
//! Owns at most one recurring timer per active feed. Each feed moves through a
//! two-state machine, independent of every other feed:
//!
//! - **Idle** → **Active** when its first subscriber registers: a timer task is
//!   spawned at the feed's effective period.
//! - **Active** → **Idle** when its last subscriber leaves: the task's
//!   cancellation token fires and the task exits.
//!
//! On each tick the task consults the [`VisibilityMonitor`]. A tick while the
//! page is hidden or unfocused is skipped without touching the feed; the timer
//! keeps running so polling resumes on the next tick after the page returns.
//! Resuming immediately on the transition is the sync core's job, since it
//! needs the force-refresh path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::feed::FeedId;
use crate::core::visibility::VisibilityMonitor;

/// Shortest period a timer will run at.
pub const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

/// Work run on every ungated tick of a feed.
pub type PollTick = Arc<dyn Fn(FeedId) -> BoxFuture<'static, ()> + Send + Sync>;

/// Scheduling state of one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No subscribers, no timer.
    Idle,
    /// A timer is running at `period`.
    Active {
        /// Effective timer period.
        period: Duration,
    },
}

struct PollTimer {
    period: Duration,
    token: CancellationToken,
}

/// # Poll Scheduler
///
/// Timer table keyed by feed. Timer tasks are children of one root token, so
/// [`PollScheduler::cancel_all`] and dropping the owning core stop them all.
pub struct PollScheduler {
    timers: HashMap<FeedId, PollTimer>,
    monitor: VisibilityMonitor,
    root: CancellationToken,
    tick: PollTick,
}

impl PollScheduler {
    /// Creates a scheduler whose ticks are gated by `monitor` and run `tick`.
    /// Timers are spawned on the current Tokio runtime.
    pub fn new(monitor: VisibilityMonitor, root: CancellationToken, tick: PollTick) -> Self {
        Self {
            timers: HashMap::new(),
            monitor,
            root,
            tick,
        }
    }

    /// Ensures `feed` polls at `period`. Starts a timer for an idle feed and
    /// restarts it when the period changed. Returns true when a timer was
    /// (re)started.
    pub fn activate(&mut self, feed: &FeedId, period: Duration) -> bool {
        let period = period.max(MIN_POLL_PERIOD);
        if let Some(timer) = self.timers.get(feed) {
            if timer.period == period {
                return false;
            }
            timer.token.cancel();
            tracing::debug!(
                feed = %feed,
                from_ms = timer.period.as_millis() as u64,
                to_ms = period.as_millis() as u64,
                "poll period changed; restarting timer"
            );
        }

        let token = self.root.child_token();
        tokio::spawn(run_timer(
            feed.clone(),
            period,
            token.clone(),
            self.monitor.clone(),
            Arc::clone(&self.tick),
        ));
        self.timers.insert(feed.clone(), PollTimer { period, token });
        true
    }

    /// Cancels the timer of `feed`. Returns true when it was active.
    pub fn deactivate(&mut self, feed: &FeedId) -> bool {
        match self.timers.remove(feed) {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Current state of `feed`.
    pub fn state(&self, feed: &FeedId) -> PollState {
        self.timers
            .get(feed)
            .map_or(PollState::Idle, |timer| PollState::Active {
                period: timer.period,
            })
    }

    /// Active feeds, sorted by name.
    pub fn active_feeds(&self) -> Vec<FeedId> {
        let mut feeds: Vec<FeedId> = self.timers.keys().cloned().collect();
        feeds.sort();
        feeds
    }

    /// Cancels every timer.
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.token.cancel();
        }
    }
}

async fn run_timer(
    feed: FeedId,
    period: Duration,
    token: CancellationToken,
    monitor: VisibilityMonitor,
    tick: PollTick,
) {
    // The first tick lands one period out; subscribe already did the immediate fetch.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(feed = %feed, period_ms = period.as_millis() as u64, "poll timer started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if !monitor.is_active() {
                    tracing::trace!(feed = %feed, "page inactive; skipping poll");
                    continue;
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick(feed.clone()) => {}
                }
            }
        }
    }

    tracing::debug!(feed = %feed, "poll timer stopped");
}
