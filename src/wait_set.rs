// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of iceoryx's `WaitSet` (internal/popo/wait_set.inl): per-process
// aggregation of up to `capacity` triggers with a two-pass wait algorithm
// that tolerates spurious wakeups and predicates that go false again
// between notification and poll (SPEC_FULL.md §4.8).
//
// Unlike the C++ original, which shares a `ConditionVariableData` in
// shared memory so a wait-set can be woken from another process, this
// port keeps the wait-set itself process-local (SPEC_FULL.md §9: wait
// sets aggregate this process's own ports) and uses a plain
// `std::sync::Condvar` rather than the cross-process primitive in
// `condition.rs`. Cross-process wakeup still happens: a publisher in
// another process pushes into a subscriber's (shared-memory) delivery
// queue and then calls the subscriber-side `TriggerHandle::trigger`,
// which runs in the subscriber's own process and wakes its local
// wait-set.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::WaitSetError;
use crate::index_queue::IndexQueue;
use crate::trigger::{EventInfo, HasTriggeredCallback, Trigger};

struct WaitSetState {
    triggers: Vec<Trigger>,
    active_notifications: Vec<u64>,
}

/// Aggregates up to `capacity` event sources and blocks until at least
/// one has fired.
///
/// `generation` and `to_be_destroyed` stand in for `wait_set.inl`'s
/// shared condition variable's notification ring and `to_be_destroyed`
/// flag (SPEC_FULL.md §4.7, §4.8): since this wait-set is process-local
/// (see the module doc comment), there is no separate ring to drain —
/// `active_notifications` already holds exactly the currently-pending
/// ids, so "was a notification missed between `was_notified` and
/// `wait`" cannot happen, it is read under the same mutex the predicate
/// blocks on. `generation` covers the one case a plain "is the queue
/// non-empty" predicate cannot: a cancellation (`remove_all_triggers`,
/// or the wait-set being dropped) that doesn't add anything to
/// `active_notifications` but must still wake every blocked waiter
/// immediately rather than have them re-block forever on an empty
/// queue. A waiter snapshots `generation` before blocking and the
/// predicate also breaks on that snapshot going stale, so a
/// cancellation is never missed regardless of when it lands relative to
/// the waiter's own wait cycle.
pub struct WaitSet {
    state: Mutex<WaitSetState>,
    free_indices: IndexQueue,
    cv: std::sync::Condvar,
    capacity: u32,
    generation: AtomicU64,
    to_be_destroyed: AtomicBool,
}

impl WaitSet {
    pub fn new(capacity: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WaitSetState {
                triggers: (0..capacity).map(|_| Trigger::invalid()).collect(),
                active_notifications: Vec::new(),
            }),
            free_indices: IndexQueue::new(capacity),
            cv: std::sync::Condvar::new(),
            capacity,
            generation: AtomicU64::new(0),
            to_be_destroyed: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of currently attached triggers.
    pub fn size(&self) -> u32 {
        self.capacity - self.free_indices.size()
    }

    /// Attaches a new event. `event_origin_id` identifies the source
    /// object (used to reject a duplicate attach of the same source);
    /// `event_id` is an opaque tag the caller gets back in [`EventInfo`]
    /// when this event fires. Returns a [`TriggerHandle`] the event
    /// source keeps and calls `.trigger()` on whenever it becomes ready.
    #[instrument(level = "debug", skip(self, has_triggered_callback))]
    pub fn attach_event(
        self: &Arc<Self>,
        event_origin_id: u64,
        event_id: u64,
        has_triggered_callback: HasTriggeredCallback,
    ) -> Result<TriggerHandle, WaitSetError> {
        let mut state = self.state.lock().unwrap();
        if state
            .triggers
            .iter()
            .any(|t| t.is_logical_equal_to(event_origin_id))
        {
            return Err(WaitSetError::EventAlreadyAttached);
        }
        let index = self.free_indices.pop().ok_or(WaitSetError::WaitSetFull)?;
        let trigger = Trigger::new(
            index as u64,
            EventInfo {
                event_origin_id,
                event_id,
            },
            has_triggered_callback,
            Arc::new(|_| {}),
        );
        state.triggers[index as usize] = trigger;
        debug!(index, "event attached");
        Ok(TriggerHandle {
            wait_set: Arc::downgrade(self),
            unique_id: index as u64,
        })
    }

    fn detach_internal(&self, unique_id: u64) {
        let mut state = self.state.lock().unwrap();
        let idx = unique_id as usize;
        if idx < state.triggers.len() && state.triggers[idx].is_valid() {
            state.triggers[idx] = Trigger::invalid();
            if let Ok(pos) = state.active_notifications.binary_search(&unique_id) {
                state.active_notifications.remove(pos);
            }
            self.free_indices.push(unique_id as u32);
        }
    }

    fn notify(&self, unique_id: u64) {
        let mut state = self.state.lock().unwrap();
        let idx = unique_id as usize;
        if idx >= state.triggers.len() || !state.triggers[idx].is_valid() {
            return;
        }
        if let Err(pos) = state.active_notifications.binary_search(&unique_id) {
            state.active_notifications.insert(pos, unique_id);
        }
        drop(state);
        self.cv.notify_all();
    }

    /// Detaches every attached trigger and returns all slots to the free
    /// pool. Unlike the C++ destructor-only `removeAllTriggers`, this can
    /// be called on a wait-set that stays alive afterward — so rather than
    /// the permanent `to_be_destroyed` latch, it bumps `generation` and
    /// wakes every blocked waiter, which then observes there is nothing
    /// triggered and returns immediately instead of re-blocking
    /// (SPEC_FULL.md §4.8's "any blocked listener returns promptly").
    pub fn remove_all_triggers(&self) {
        let mut state = self.state.lock().unwrap();
        for (idx, trigger) in state.triggers.iter_mut().enumerate() {
            if trigger.is_valid() {
                *trigger = Trigger::invalid();
                self.free_indices.push(idx as u32);
            }
        }
        state.active_notifications.clear();
        self.generation.fetch_add(1, Ordering::Release);
        drop(state);
        self.cv.notify_all();
    }

    /// Non-blocking peek: true if at least one attached event currently
    /// has a pending notification (SPEC_FULL.md §4.7's `was_notified`).
    pub fn was_notified(&self) -> bool {
        !self.state.lock().unwrap().active_notifications.is_empty()
    }

    fn create_vector_with_triggered(&self, state: &mut WaitSetState) -> Vec<EventInfo> {
        let mut triggered = Vec::new();
        state.active_notifications.retain(|&id| {
            let trigger = &state.triggers[id as usize];
            if trigger.is_valid() && trigger.has_triggered() {
                triggered.push(*trigger.event_info());
                true
            } else {
                false
            }
        });
        triggered
    }

    /// Blocks until at least one attached event has fired, then returns
    /// the [`EventInfo`] for every event that is currently triggered.
    ///
    /// Two-pass algorithm (mirrors `waitAndReturnTriggeredTriggers`):
    /// after the first wakeup the predicate may already be false again
    /// (another waiter drained it first), so an empty first pass waits
    /// once more before giving up the thread again.
    pub fn wait(&self) -> Vec<EventInfo> {
        self.wait_and_return_triggered(None)
    }

    /// Like [`Self::wait`] but gives up after `timeout` and returns
    /// whatever (possibly nothing) is currently triggered.
    pub fn timed_wait(&self, timeout: Duration) -> Vec<EventInfo> {
        self.wait_and_return_triggered(Some(timeout))
    }

    fn wait_and_return_triggered(&self, timeout: Option<Duration>) -> Vec<EventInfo> {
        let start_generation = self.generation.load(Ordering::Acquire);
        let cancelled = || {
            self.to_be_destroyed.load(Ordering::Acquire)
                || self.generation.load(Ordering::Acquire) != start_generation
        };

        let mut state = self.state.lock().unwrap();

        if state.active_notifications.is_empty() && !cancelled() {
            state = match timeout {
                None => self
                    .cv
                    .wait_while(state, |s| s.active_notifications.is_empty() && !cancelled())
                    .unwrap(),
                Some(d) => {
                    let (s, _timed_out) = self
                        .cv
                        .wait_timeout_while(state, d, |s| {
                            s.active_notifications.is_empty() && !cancelled()
                        })
                        .unwrap();
                    s
                }
            };
        }

        let triggered = self.create_vector_with_triggered(&mut state);
        if !triggered.is_empty() {
            return triggered;
        }

        if cancelled() {
            return Vec::new();
        }

        // First pass produced a wakeup but nothing survived the has_triggered
        // re-check (a spurious wakeup, or another waiter already drained the
        // event). Retry once, the same way the original does.
        match timeout {
            None => {
                state = self
                    .cv
                    .wait_while(state, |s| s.active_notifications.is_empty() && !cancelled())
                    .unwrap();
                self.create_vector_with_triggered(&mut state)
            }
            Some(_) => Vec::new(),
        }
    }
}

impl Drop for WaitSet {
    /// Sets `to_be_destroyed` and wakes every blocked waiter, mirroring
    /// the C++ destructor's effect on the shared condition variable
    /// (SPEC_FULL.md §5 Cancellation). In this process-local design a
    /// waiter always holds its own `Arc<WaitSet>`, so this in practice
    /// only matters for a waiter that is mid-wait on a *different* clone
    /// of the `Arc` being dropped concurrently; `remove_all_triggers` is
    /// the path that actually unblocks waiters under the common
    /// reference-counted-handle usage pattern.
    fn drop(&mut self) {
        self.to_be_destroyed.store(true, Ordering::Release);
        self.cv.notify_all();
    }
}

/// Held by an event source after attaching to a wait-set. Calling
/// `.trigger()` notifies the wait-set; dropping (or explicitly calling
/// `.detach()`) removes the attachment. Holds only a `Weak` reference to
/// the wait-set, so a wait-set can be torn down without this handle
/// needing to know — the next `.trigger()` becomes a silent no-op.
pub struct TriggerHandle {
    wait_set: Weak<WaitSet>,
    unique_id: u64,
}

impl TriggerHandle {
    pub fn trigger(&self) {
        if let Some(ws) = self.wait_set.upgrade() {
            ws.notify(self.unique_id);
        }
    }

    pub fn detach(&self) {
        if let Some(ws) = self.wait_set.upgrade() {
            ws.detach_internal(self.unique_id);
        }
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn attach_wait_trigger_roundtrip() {
        let ws = WaitSet::new(4);
        let ready = Arc::new(AtomicBool::new(false));
        let ready2 = Arc::clone(&ready);
        let handle = ws
            .attach_event(1, 99, Arc::new(move || ready2.load(Ordering::Acquire)))
            .unwrap();

        ready.store(true, Ordering::Release);
        handle.trigger();

        let fired = ws.wait();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].event_id, 99);
        assert_eq!(fired[0].event_origin_id, 1);
    }

    #[test]
    fn duplicate_attach_rejected() {
        let ws = WaitSet::new(4);
        let _h1 = ws.attach_event(1, 0, Arc::new(|| false)).unwrap();
        let err = ws.attach_event(1, 0, Arc::new(|| false)).unwrap_err();
        assert_eq!(err, WaitSetError::EventAlreadyAttached);
    }

    #[test]
    fn full_wait_set_rejects_attach() {
        let ws = WaitSet::new(1);
        let _h = ws.attach_event(1, 0, Arc::new(|| false)).unwrap();
        let err = ws.attach_event(2, 0, Arc::new(|| false)).unwrap_err();
        assert_eq!(err, WaitSetError::WaitSetFull);
    }

    #[test]
    fn detach_frees_slot_for_reuse() {
        let ws = WaitSet::new(1);
        let h = ws.attach_event(1, 0, Arc::new(|| false)).unwrap();
        assert_eq!(ws.size(), 1);
        h.detach();
        assert_eq!(ws.size(), 0);
        assert!(ws.attach_event(2, 0, Arc::new(|| false)).is_ok());
    }

    #[test]
    fn dropping_handle_detaches() {
        let ws = WaitSet::new(1);
        {
            let _h = ws.attach_event(1, 0, Arc::new(|| false)).unwrap();
            assert_eq!(ws.size(), 1);
        }
        assert_eq!(ws.size(), 0);
    }

    #[test]
    fn timed_wait_returns_empty_on_timeout() {
        let ws = WaitSet::new(1);
        let _h = ws.attach_event(1, 0, Arc::new(|| false)).unwrap();
        let fired = ws.timed_wait(Duration::from_millis(20));
        assert!(fired.is_empty());
    }

    #[test]
    fn blocking_wait_wakes_on_cross_thread_trigger() {
        let ws = WaitSet::new(1);
        let ready = Arc::new(AtomicBool::new(false));
        let ready2 = Arc::clone(&ready);
        let handle = ws
            .attach_event(1, 7, Arc::new(move || ready2.load(Ordering::Acquire)))
            .unwrap();

        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ready.store(true, Ordering::Release);
            handle.trigger();
        });

        let fired = ws.wait();
        assert_eq!(fired[0].event_id, 7);
        t.join().unwrap();
    }

    #[test]
    fn remove_all_triggers_clears_everything() {
        let ws = WaitSet::new(2);
        let _h1 = ws.attach_event(1, 0, Arc::new(|| false)).unwrap();
        let _h2 = ws.attach_event(2, 0, Arc::new(|| false)).unwrap();
        ws.remove_all_triggers();
        assert_eq!(ws.size(), 0);
    }

    #[test]
    fn remove_all_triggers_wakes_a_blocked_waiter_promptly() {
        let ws = WaitSet::new(1);
        let _h = ws.attach_event(1, 0, Arc::new(|| false)).unwrap();

        let waiter_ws = Arc::clone(&ws);
        let waiter = thread::spawn(move || waiter_ws.wait());

        // Give the waiter time to actually park in `cv.wait_while`.
        thread::sleep(Duration::from_millis(50));
        ws.remove_all_triggers();

        let fired = waiter.join().unwrap();
        assert!(fired.is_empty());
    }

    #[test]
    fn was_notified_reflects_pending_notifications() {
        let ws = WaitSet::new(1);
        let ready = Arc::new(AtomicBool::new(false));
        let ready2 = Arc::clone(&ready);
        let handle = ws
            .attach_event(1, 0, Arc::new(move || ready2.load(Ordering::Acquire)))
            .unwrap();

        assert!(!ws.was_notified());
        ready.store(true, Ordering::Release);
        handle.trigger();
        assert!(ws.was_notified());

        ws.wait();
        assert!(!ws.was_notified());
    }
}
