//! Completion tracking for the broadcast barrier.
//!
//! Each general bumps `active` and `visited` when it starts and drops
//! `active` when it ends. The run is quiescent once `active == 0` and
//! `visited == n`. A failed run only waits for `active == 0`.

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Snapshot of the shared counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub active: usize,
    pub visited: usize,
    pub failed: bool,
}

impl Counters {
    fn settled(&self, expected: usize) -> bool {
        self.active == 0 && (self.visited >= expected || self.failed)
    }
}

/// Lock-protected counters with a waitable barrier.
#[derive(Debug)]
pub struct CompletionTracker {
    expected: usize,
    state: watch::Sender<Counters>,
}

impl CompletionTracker {
    /// Track `expected` generals.
    pub fn new(expected: usize) -> Self {
        let (state, _) = watch::channel(Counters::default());
        Self { expected, state }
    }

    /// Mark a general as started. `active` drops again when the guard does.
    pub fn enter(&self) -> ActiveGuard<'_> {
        self.state.send_modify(|c| {
            c.active += 1;
            c.visited += 1;
        });
        ActiveGuard { tracker: self }
    }

    fn leave(&self) {
        self.state.send_modify(|c| c.active = c.active.saturating_sub(1));
    }

    /// Flag the run as failed so the barrier stops waiting for stragglers.
    pub fn fail(&self) {
        self.state.send_modify(|c| c.failed = true);
    }

    pub fn snapshot(&self) -> Counters {
        *self.state.borrow()
    }

    pub fn is_settled(&self) -> bool {
        self.snapshot().settled(self.expected)
    }

    /// Wait until every general has started and finished.
    pub async fn wait(&self) -> Result<Counters> {
        let mut rx = self.state.subscribe();
        let expected = self.expected;
        let counters = rx
            .wait_for(|c| c.settled(expected))
            .await
            .map_err(|_| Error::Aborted)?;
        Ok(*counters)
    }

    /// Zero the counters and leave the barrier released.
    ///
    /// Guards still alive keep decrementing from zero, and a pending
    /// [`wait`](Self::wait) returns with `failed` set.
    pub fn reset(&self) {
        self.state.send_replace(Counters {
            failed: true,
            ..Counters::default()
        });
    }
}

/// Decrements `active` on drop, on every exit path of a general.
#[derive(Debug)]
pub struct ActiveGuard<'a> {
    tracker: &'a CompletionTracker,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.tracker.leave();
    }
}
