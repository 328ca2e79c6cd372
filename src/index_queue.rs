// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bounded MPMC free-list of small integer indices (SPEC_FULL.md §4.1).
// A Treiber-style stack over an array of next-links, with a version
// counter packed into the head word so a concurrent pop/push pair can't
// alias an index that's already been reused (ABA). The same CAS-retry
// shape as the connection bitmask in the bitmask-based free lists this
// crate's allocator lineage uses elsewhere, generalized to a plain
// linked free-list since indices here are not required to stay ordered.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::spin_lock::adaptive_yield_pub;

const NIL: u32 = u32::MAX;

#[inline]
fn pack(version: u32, index: u32) -> u64 {
    ((version as u64) << 32) | index as u64
}

#[inline]
fn unpack(head: u64) -> (u32, u32) {
    ((head >> 32) as u32, head as u32)
}

/// A bounded, lock-free, MPMC queue of indices in `0..capacity`.
///
/// `push`/`pop` are linearizable; FIFO order is not guaranteed (and is
/// explicitly not required by any caller — see SPEC_FULL.md §4.1).
pub struct IndexQueue {
    next: Vec<AtomicU32>,
    head: AtomicU64,
    len: AtomicU32,
    capacity: u32,
}

impl IndexQueue {
    /// Creates a queue of the given capacity, initially full: every index
    /// in `0..capacity` is free.
    pub fn new(capacity: u32) -> Self {
        let next: Vec<AtomicU32> = (0..capacity)
            .map(|i| {
                let n = if i + 1 < capacity { i + 1 } else { NIL };
                AtomicU32::new(n)
            })
            .collect();
        let head = if capacity == 0 {
            pack(0, NIL)
        } else {
            pack(0, 0)
        };
        Self {
            next,
            head: AtomicU64::new(head),
            len: AtomicU32::new(capacity),
            capacity,
        }
    }

    /// Creates an empty queue of the given capacity (no index is free yet).
    pub fn new_empty(capacity: u32) -> Self {
        let next: Vec<AtomicU32> = (0..capacity).map(|_| AtomicU32::new(NIL)).collect();
        Self {
            next,
            head: AtomicU64::new(pack(0, NIL)),
            len: AtomicU32::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of indices currently available to `pop`. Advisory under
    /// concurrent access (read with `Relaxed`), not linearized with
    /// `push`/`pop`.
    pub fn size(&self) -> u32 {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns an index to the free set. Infallible: capacity is conserved
    /// by construction, so there is always room for an index the caller
    /// legitimately owns.
    pub fn push(&self, index: u32) {
        debug_assert!(index < self.capacity, "index out of range");
        let mut k = 0u32;
        loop {
            let old = self.head.load(Ordering::Acquire);
            let (version, old_idx) = unpack(old);
            self.next[index as usize].store(old_idx, Ordering::Relaxed);
            let new = pack(version.wrapping_add(1), index);
            if self
                .head
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.len.fetch_add(1, Ordering::Relaxed);
                return;
            }
            #[cfg(not(loom))]
            adaptive_yield_pub(&mut k);
            #[cfg(loom)]
            {
                let _ = k;
                loom::thread::yield_now();
            }
        }
    }

    /// Pops a free index, or `None` if the queue is empty.
    pub fn pop(&self) -> Option<u32> {
        let mut k = 0u32;
        loop {
            let old = self.head.load(Ordering::Acquire);
            let (version, old_idx) = unpack(old);
            if old_idx == NIL {
                return None;
            }
            let new_idx = self.next[old_idx as usize].load(Ordering::Relaxed);
            let new = pack(version.wrapping_add(1), new_idx);
            if self
                .head
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);
                return Some(old_idx);
            }
            #[cfg(not(loom))]
            adaptive_yield_pub(&mut k);
            #[cfg(loom)]
            {
                let _ = k;
                loom::thread::yield_now();
            }
        }
    }
}

unsafe impl Send for IndexQueue {}
unsafe impl Sync for IndexQueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_full() {
        let q = IndexQueue::new(4);
        assert_eq!(q.size(), 4);
        let mut seen = vec![];
        while let Some(i) = q.pop() {
            seen.push(i);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_then_pop_roundtrip() {
        let q = IndexQueue::new(2);
        let a = q.pop().unwrap();
        let b = q.pop().unwrap();
        assert_eq!(q.pop(), None);
        q.push(a);
        assert_eq!(q.size(), 1);
        q.push(b);
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn empty_capacity_always_empty() {
        let q = IndexQueue::new(0);
        assert_eq!(q.pop(), None);
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn concurrent_push_pop_conserves_capacity() {
        let q = Arc::new(IndexQueue::new(64));
        let mut handles = vec![];
        for _ in 0..8 {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    if let Some(i) = q.pop() {
                        q.push(i);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let mut seen = vec![];
        while let Some(i) = q.pop() {
            seen.push(i);
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 64);
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Popping `n` indices and pushing them straight back, in any
        /// order, always restores the queue to fully free — the
        /// allocate/release round trip §2d names for the free-list path.
        #[test]
        fn pop_all_then_push_all_restores_full_queue(
            capacity in 1u32..64,
            order in proptest::collection::vec(any::<usize>(), 0..64),
        ) {
            let q = IndexQueue::new(capacity);
            let mut popped = Vec::new();
            while let Some(i) = q.pop() {
                popped.push(i);
            }
            prop_assert_eq!(popped.len(), capacity as usize);

            // Push back in a permuted order derived from `order`'s values,
            // not its literal contents.
            let mut remaining = popped;
            for pick in order {
                if remaining.is_empty() {
                    break;
                }
                let idx = pick % remaining.len();
                q.push(remaining.remove(idx));
            }
            for i in remaining {
                q.push(i);
            }

            prop_assert_eq!(q.size(), capacity);
            let mut seen = Vec::new();
            while let Some(i) = q.pop() {
                seen.push(i);
            }
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..capacity).collect::<Vec<_>>());
        }
    }
}
