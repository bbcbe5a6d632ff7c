//! Error kinds used by the deadline scheduling core (spec §7).

use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedError {
    /// Deadline/runtime/period failed syntactic validation.
    InvalidParameter,
    /// Admission would exceed capacity; no state changed.
    Busy,
    /// Operation targeted an offline or out-of-range CPU.
    NoSuchCpu,
    /// A double-lock race was lost; caller reloads and retries (bounded).
    Retry,
    /// Non-fatal: the entity has been removed from the tree and armed for
    /// replenishment. Not surfaced to user-facing callers (spec §7
    /// "Runtime-exhaustion is never surfaced upward").
    Throttled,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SchedError::InvalidParameter => "invalid deadline scheduling parameter",
            SchedError::Busy => "admission would exceed bandwidth capacity",
            SchedError::NoSuchCpu => "target CPU is offline or out of range",
            SchedError::Retry => "lock race lost, retry",
            SchedError::Throttled => "entity throttled pending replenishment",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for SchedError {}

pub type SchedResult<T> = Result<T, SchedError>;
