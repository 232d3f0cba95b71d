//! # Visibility / Focus Monitor
//!
//! Tracks the two environment signals the engine gates on: whether the host
//! page is visible and whether its window is focused. The engine treats the
//! page as *active* only when both hold.
//!
//! Hosts feed the signals in through [`VisibilityMonitor::set_visible`] and
//! [`VisibilityMonitor::set_focused`]; observers read the current
//! [`PageState`] or wait for changes on a `tokio::sync::watch` receiver.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Snapshot of the two environment signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    /// The document is visible (not a background tab, not minimized).
    pub visible: bool,
    /// The window holds input focus.
    pub focused: bool,
}

impl PageState {
    /// Both signals set.
    pub fn is_active(&self) -> bool {
        self.visible && self.focused
    }
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            visible: true,
            focused: true,
        }
    }
}

/// # Visibility Monitor
///
/// Cheap to clone; every clone observes and drives the same state.
#[derive(Debug, Clone)]
pub struct VisibilityMonitor {
    tx: Arc<watch::Sender<PageState>>,
    // Count of inactive -> active edges, bumped where the edge happens so a
    // hide/show pair between two watcher wakeups is never lost.
    resumes: Arc<watch::Sender<u64>>,
}

impl VisibilityMonitor {
    /// Creates a monitor starting from `initial`.
    pub fn new(initial: PageState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        let (resumes, _rx) = watch::channel(0);
        Self {
            tx: Arc::new(tx),
            resumes: Arc::new(resumes),
        }
    }

    /// Current snapshot.
    pub fn state(&self) -> PageState {
        *self.tx.borrow()
    }

    /// True when the page is visible and focused.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Updates the visibility signal. Returns whether it changed.
    pub fn set_visible(&self, visible: bool) -> bool {
        self.update(|state| state.visible = visible)
    }

    /// Updates the focus signal. Returns whether it changed.
    pub fn set_focused(&self, focused: bool) -> bool {
        self.update(|state| state.focused = focused)
    }

    /// A receiver notified on every change of either signal.
    pub fn watch(&self) -> watch::Receiver<PageState> {
        self.tx.subscribe()
    }

    /// A receiver holding the number of times the page became active again.
    /// Every transition into visible-and-focused bumps it exactly once.
    pub fn resumes(&self) -> watch::Receiver<u64> {
        self.resumes.subscribe()
    }

    /// Transitions into visible-and-focused so far.
    pub fn resume_count(&self) -> u64 {
        *self.resumes.borrow()
    }

    fn update(&self, apply: impl FnOnce(&mut PageState)) -> bool {
        let mut resumed = false;
        let changed = self.tx.send_if_modified(|state| {
            let before = *state;
            apply(state);
            resumed = !before.is_active() && state.is_active();
            let changed = before != *state;
            if changed {
                tracing::debug!(
                    visible = state.visible,
                    focused = state.focused,
                    "page state changed"
                );
            }
            changed
        });
        if resumed {
            self.resumes.send_modify(|count| *count += 1);
        }
        changed
    }
}

impl Default for VisibilityMonitor {
    fn default() -> Self {
        Self::new(PageState::default())
    }
}
