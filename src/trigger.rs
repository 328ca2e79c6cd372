// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of iceoryx's `Trigger`/`EventInfo` (popo/trigger.cpp), adapted to
// the two-half-edge invalidation pattern described in SPEC_FULL.md §9:
// rather than a wait-set and an event origin holding shared pointers to
// each other (a cycle neither side can safely tear down alone), each
// side holds only a plain callback into the other. Detaching either
// side just clears its own callback; there is no cross-owned state to
// synchronize.

use std::sync::Arc;

pub const INVALID_TRIGGER_ID: u64 = u64::MAX;

/// Identifies what fired: which object (`event_origin_id`, a caller-chosen
/// handle — a subscriber port index, a user event id, ...) and which kind
/// of event on it (`event_id`, e.g. "data received" vs "deadline missed").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventInfo {
    pub event_origin_id: u64,
    pub event_id: u64,
}

pub type HasTriggeredCallback = Arc<dyn Fn() -> bool + Send + Sync>;
pub type ResetCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// One armed slot in a [`crate::wait_set::WaitSet`].
///
/// Valid from construction until [`Trigger::reset`]/[`Trigger::invalidate`]
/// is called (including implicitly, by `Drop`). A default-constructed or
/// invalidated trigger reports [`Trigger::is_valid`] == `false` and never
/// triggers.
pub struct Trigger {
    unique_id: u64,
    event_info: EventInfo,
    has_triggered_callback: Option<HasTriggeredCallback>,
    reset_callback: Option<ResetCallback>,
}

impl Trigger {
    /// Constructs an armed trigger. `has_triggered_callback` polls the
    /// event origin (e.g. "is my delivery queue non-empty"); `reset_callback`
    /// is invoked with `unique_id` when the wait-set detaches this trigger,
    /// so the origin can stop notifying a wait-set that is no longer
    /// listening.
    pub fn new(
        unique_id: u64,
        event_info: EventInfo,
        has_triggered_callback: HasTriggeredCallback,
        reset_callback: ResetCallback,
    ) -> Self {
        Self {
            unique_id,
            event_info,
            has_triggered_callback: Some(has_triggered_callback),
            reset_callback: Some(reset_callback),
        }
    }

    /// An invalid trigger, for pre-filling a wait-set's trigger array.
    pub fn invalid() -> Self {
        Self {
            unique_id: INVALID_TRIGGER_ID,
            event_info: EventInfo {
                event_origin_id: 0,
                event_id: 0,
            },
            has_triggered_callback: None,
            reset_callback: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.has_triggered_callback.is_some()
    }

    pub fn has_triggered(&self) -> bool {
        match &self.has_triggered_callback {
            Some(cb) => cb(),
            None => false,
        }
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn event_info(&self) -> &EventInfo {
        &self.event_info
    }

    /// Detaches from the event origin (calls `reset_callback`) and
    /// invalidates this slot. No-op if already invalid.
    pub fn reset(&mut self) {
        if !self.is_valid() {
            return;
        }
        if let Some(cb) = &self.reset_callback {
            cb(self.unique_id);
        }
        self.invalidate();
    }

    /// Clears this slot's callbacks without notifying the event origin.
    /// Used when the origin itself initiates detachment and already
    /// knows not to notify this wait-set again.
    pub fn invalidate(&mut self) {
        self.has_triggered_callback = None;
        self.reset_callback = None;
        self.unique_id = INVALID_TRIGGER_ID;
    }

    /// True if this trigger is still armed and was constructed against
    /// the same event origin / predicate as described by `event_origin_id`.
    /// Used to reject re-attaching the same event twice
    /// ([`crate::error::WaitSetError::EventAlreadyAttached`]).
    pub fn is_logical_equal_to(&self, event_origin_id: u64) -> bool {
        self.is_valid() && self.event_info.event_origin_id == event_origin_id
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        self.reset();
    }
}
