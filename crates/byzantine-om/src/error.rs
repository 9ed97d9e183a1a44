//! Error types for byzantine-om.

use thiserror::Error;

use crate::general::GeneralId;

/// Result type for byzantine-om operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or running an OM round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The loyalty vector was empty.
    #[error("a run needs at least one general")]
    NoGenerals,

    /// The traitor bound `n > 3m` does not hold.
    #[error("{generals} generals cannot tolerate {traitors} traitors (need n > 3m)")]
    TooManyTraitors { generals: usize, traitors: usize },

    /// More traitors than the configured recursion depth allows.
    #[error("{traitors} traitors exceed the maximum recursion depth of {max}")]
    DepthExceeded { traitors: usize, max: usize },

    /// A general id outside `[0, n)`.
    #[error("unknown general {0}")]
    UnknownGeneral(GeneralId),

    /// The configured mailbox capacity cannot hold one fan-out round.
    #[error("mailbox capacity {capacity} is below the required {required}")]
    CapacityTooSmall { capacity: usize, required: usize },

    /// The configured mailbox capacity is beyond what a channel can hold.
    #[error("mailbox capacity {capacity} exceeds the limit of {max}")]
    CapacityTooLarge { capacity: usize, max: usize },

    /// The letter count of the run does not fit in a `usize`.
    #[error("OM({traitors}) over {generals} generals needs more letters than can be counted")]
    TooManyLetters { generals: usize, traitors: usize },

    /// Registry or mailbox allocation failed.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// A delivery found the target mailbox full.
    #[error("mailbox of general {general} is full (capacity {capacity})")]
    MailboxFull { general: GeneralId, capacity: usize },

    /// The mailbox was torn down or its receiver is gone.
    #[error("mailbox of general {0} is closed")]
    MailboxClosed(GeneralId),

    /// A letter broke the chain invariants.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// `broadcast` was already called on this run.
    #[error("this run has already been broadcast")]
    AlreadyBroadcast,

    /// `general(id)` was entered twice for the same id.
    #[error("general {0} has already started")]
    AlreadyStarted(GeneralId),

    /// A command character other than 'A' or 'R'.
    #[error("invalid command {0:?}, expected 'A' or 'R'")]
    InvalidCommand(char),

    /// A general's task panicked mid-run.
    #[error("general {0} panicked")]
    Panicked(GeneralId),

    /// The run was aborted after another general failed.
    #[error("run aborted")]
    Aborted,
}

impl From<std::collections::TryReserveError> for Error {
    fn from(e: std::collections::TryReserveError) -> Self {
        Error::Allocation(e.to_string())
    }
}
