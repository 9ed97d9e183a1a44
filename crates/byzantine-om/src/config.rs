//! Run configuration.

use crate::bound::{letters_per_lieutenant, DEFAULT_MAX_DEPTH};
use crate::general::Decision;

/// Configuration for one OM run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Mailbox capacity per general.
    /// `None` sizes each mailbox to the letters a lieutenant receives in one
    /// run, and never below `n - 1`.
    pub mailbox_capacity: Option<usize>,

    /// Largest number of traitors (recursion depth) a run accepts.
    pub max_depth: usize,

    /// Order chosen when a majority vote is tied.
    pub tie_break: Decision,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: None,
            max_depth: DEFAULT_MAX_DEPTH,
            tie_break: Decision::Retreat,
        }
    }
}

impl RunConfig {
    /// Read overrides from `OM_MAILBOX_CAPACITY`, `OM_MAX_DEPTH` and
    /// `OM_TIE_BREAK`. Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mailbox_capacity = std::env::var("OM_MAILBOX_CAPACITY")
            .ok()
            .and_then(|s| s.trim().parse().ok());

        let max_depth = std::env::var("OM_MAX_DEPTH")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.max_depth);

        let tie_break = std::env::var("OM_TIE_BREAK")
            .ok()
            .and_then(|s| s.trim().chars().next())
            .and_then(|c| Decision::try_from(c).ok())
            .unwrap_or(defaults.tie_break);

        Self {
            mailbox_capacity,
            max_depth,
            tie_break,
        }
    }

    /// Fix the mailbox capacity.
    #[must_use]
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    /// Set the maximum recursion depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the tie-break order.
    #[must_use]
    pub fn with_tie_break(mut self, decision: Decision) -> Self {
        self.tie_break = decision;
        self
    }

    /// Capacity a run of `generals` with `traitors` will use.
    ///
    /// `None` when auto-sizing and the letter count overflows.
    pub fn capacity_for(&self, generals: usize, traitors: usize) -> Option<usize> {
        match self.mailbox_capacity {
            Some(capacity) => Some(capacity),
            None => letters_per_lieutenant(generals, traitors)
                .map(|letters| letters.max(generals.saturating_sub(1)).max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.mailbox_capacity, None);
        assert_eq!(cfg.max_depth, 3);
        assert_eq!(cfg.tie_break, Decision::Retreat);
    }

    #[test]
    fn builder() {
        let cfg = RunConfig::default()
            .with_mailbox_capacity(8)
            .with_max_depth(2)
            .with_tie_break(Decision::Attack);
        assert_eq!(cfg.mailbox_capacity, Some(8));
        assert_eq!(cfg.max_depth, 2);
        assert_eq!(cfg.tie_break, Decision::Attack);
        assert_eq!(cfg.capacity_for(4, 1), Some(8));
        assert_eq!(cfg.capacity_for(70, 23), Some(8));
    }

    #[test]
    fn auto_capacity() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.capacity_for(4, 1), Some(3));
        assert_eq!(cfg.capacity_for(7, 2), Some(26));
        assert_eq!(cfg.capacity_for(1, 0), Some(1));
        // OM(0) still needs room for one fan-out round.
        assert_eq!(cfg.capacity_for(6, 0), Some(5));
        assert_eq!(cfg.capacity_for(70, 23), None);
    }
}
