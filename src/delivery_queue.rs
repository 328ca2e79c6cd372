// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bounded single-producer/single-consumer delivery queue of relative
// pointers (SPEC_FULL.md §4.5). One of these lives per subscriber; a
// publisher's `send()` pushes a chunk's relative pointer into every
// connected subscriber's queue, applying that subscriber's overflow
// policy independently.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::debug;

use crate::config::QueueFullPolicy;
use crate::registry::RelativePointer;

/// Result of a [`DeliveryQueue::try_push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The chunk was queued.
    Accepted,
    /// The queue was full; the oldest entry was evicted to make room.
    /// The caller owns one reference count on the evicted chunk and must
    /// release it.
    DiscardedOldest(RelativePointer),
    /// The queue was full and the policy is `REJECT_NEW`; the pushed
    /// chunk was not queued. The caller still owns its reference count
    /// and must release it.
    Rejected,
}

/// A bounded ring of [`RelativePointer`]s, single-producer/single-consumer.
///
/// Head and tail are independent atomics rather than a combined
/// CAS-guarded word: with exactly one producer and one consumer there is
/// never a race on either end alone, only on the shared `len` used to
/// detect full/empty, so plain `Acquire`/`Release` loads and stores are
/// enough (SPEC_FULL.md §4.5 requires no CAS loop here).
pub struct DeliveryQueue {
    slots: Vec<AtomicU64>,
    capacity: u32,
    head: AtomicU32,
    tail: AtomicU32,
    len: AtomicU32,
    full_policy: QueueFullPolicy,
}

impl DeliveryQueue {
    pub fn new(capacity: u32, full_policy: QueueFullPolicy) -> Self {
        assert!(capacity > 0, "delivery queue capacity must be > 0");
        let slots = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        Self {
            slots,
            capacity,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            len: AtomicU32::new(0),
            full_policy,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn len(&self) -> u32 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn advance(i: u32, capacity: u32) -> u32 {
        let next = i + 1;
        if next == capacity {
            0
        } else {
            next
        }
    }

    fn push_at_tail(&self, rp: RelativePointer) {
        let tail = self.tail.load(Ordering::Relaxed);
        self.slots[tail as usize].store(rp.to_bits(), Ordering::Release);
        self.tail
            .store(Self::advance(tail, self.capacity), Ordering::Release);
    }

    fn pop_at_head(&self) -> RelativePointer {
        let head = self.head.load(Ordering::Relaxed);
        let bits = self.slots[head as usize].load(Ordering::Acquire);
        self.head
            .store(Self::advance(head, self.capacity), Ordering::Release);
        RelativePointer::from_bits(bits)
    }

    /// Pushes `rp`, applying the configured overflow policy when full.
    /// Producer-only; callers must not call this from more than one
    /// thread concurrently.
    pub fn try_push(&self, rp: RelativePointer) -> PushOutcome {
        if self.len.load(Ordering::Acquire) < self.capacity {
            self.push_at_tail(rp);
            self.len.fetch_add(1, Ordering::AcqRel);
            return PushOutcome::Accepted;
        }

        match self.full_policy {
            QueueFullPolicy::RejectNew => {
                debug!("delivery queue full, rejecting new chunk");
                PushOutcome::Rejected
            }
            QueueFullPolicy::DiscardOldest => {
                let evicted = self.pop_at_head();
                self.push_at_tail(rp);
                debug!("delivery queue full, discarded oldest chunk");
                PushOutcome::DiscardedOldest(evicted)
            }
        }
    }

    /// Pops the oldest queued chunk. Consumer-only; callers must not call
    /// this from more than one thread concurrently.
    pub fn pop(&self) -> Option<RelativePointer> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let rp = self.pop_at_head();
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(rp)
    }
}

unsafe impl Send for DeliveryQueue {}
unsafe impl Sync for DeliveryQueue {}

#[cfg(test)]
mod tests {
    use super::*;

    fn rp(offset: u64) -> RelativePointer {
        RelativePointer::new(1, offset)
    }

    #[test]
    fn push_pop_fifo_order() {
        let q = DeliveryQueue::new(4, QueueFullPolicy::RejectNew);
        q.try_push(rp(1));
        q.try_push(rp(2));
        assert_eq!(q.pop(), Some(rp(1)));
        assert_eq!(q.pop(), Some(rp(2)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn reject_new_leaves_queue_unchanged() {
        let q = DeliveryQueue::new(2, QueueFullPolicy::RejectNew);
        q.try_push(rp(1));
        q.try_push(rp(2));
        assert_eq!(q.try_push(rp(3)), PushOutcome::Rejected);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(rp(1)));
        assert_eq!(q.pop(), Some(rp(2)));
    }

    #[test]
    fn discard_oldest_evicts_head() {
        let q = DeliveryQueue::new(2, QueueFullPolicy::DiscardOldest);
        q.try_push(rp(1));
        q.try_push(rp(2));
        assert_eq!(q.try_push(rp(3)), PushOutcome::DiscardedOldest(rp(1)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(rp(2)));
        assert_eq!(q.pop(), Some(rp(3)));
    }

    #[test]
    fn wraps_around_ring() {
        let q = DeliveryQueue::new(2, QueueFullPolicy::DiscardOldest);
        for i in 0..10u64 {
            q.try_push(rp(i));
            if i >= 1 {
                assert_eq!(q.pop(), Some(rp(i - 1)));
            }
        }
    }
}
