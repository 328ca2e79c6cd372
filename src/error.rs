// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Typed error taxonomy: resource exhaustion, precondition violation,
// transient OS, fatal (see SPEC_FULL.md §7). Fatal conditions are not
// represented here — they surface as debug_assert!/panic! at the call site.

use std::fmt;

/// Unified error type for fallible core operations.
///
/// `allocate`-style "no chunk available" outcomes are deliberately `Option`,
/// not a variant of this enum — that outcome is normal backpressure, not
/// an error (see SPEC_FULL.md §7, "user-visible failure behavior").
#[derive(thiserror::Error, Debug)]
pub enum IpcError {
    /// A bounded subscriber delivery queue rejected a push under `REJECT_NEW`.
    #[error("delivery queue full")]
    QueueFull,

    /// A wait-set has no free trigger slots.
    #[error("wait-set is at capacity")]
    WaitSetFull,

    /// `attach` was called with the same `(origin, has_triggered)` pair twice.
    #[error("event already attached to this wait-set")]
    EventAlreadyAttached,

    /// A relative pointer referenced an unregistered segment or an
    /// out-of-bounds offset.
    #[error("invalid relative pointer: {0}")]
    InvalidRelativePointer(String),

    /// A chunk header's version or magic did not match what this build
    /// understands.
    #[error("chunk header version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u8, found: u8 },

    /// A shared-segment syscall failed for a transient OS reason
    /// (permission, out-of-space, already-exists without CreateOrOpen, ...).
    #[error("shared-segment operation failed: {0}")]
    Os(#[from] std::io::Error),

    /// A blocking operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Configuration failed validation (see `Config::validate`).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Error codes returned by [`crate::wait_set::WaitSet::attach_event`].
///
/// Kept as a distinct small enum (rather than folding into [`IpcError`])
/// because the wait-set's attach/detach protocol is the one place the
/// specification names exact error identifiers that calling code is
/// expected to match on. There is no "has_triggered callback is unset"
/// variant here: `attach_event` takes a `HasTriggeredCallback` by value,
/// not `Option<HasTriggeredCallback>`, so that precondition is enforced
/// by the type system instead of at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSetError {
    EventAlreadyAttached,
    WaitSetFull,
}

impl fmt::Display for WaitSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventAlreadyAttached => write!(f, "event already attached to this wait-set"),
            Self::WaitSetFull => write!(f, "wait-set is at capacity"),
        }
    }
}

impl std::error::Error for WaitSetError {}

impl From<WaitSetError> for IpcError {
    fn from(e: WaitSetError) -> Self {
        match e {
            WaitSetError::EventAlreadyAttached => IpcError::EventAlreadyAttached,
            WaitSetError::WaitSetFull => IpcError::WaitSetFull,
        }
    }
}
