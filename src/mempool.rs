// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Size-segregated, lock-free chunk allocator (SPEC_FULL.md §4.2, §4.3).
// A Mempool owns one size class: a flat array of fixed-size chunks
// carved out of a shared segment, plus a lock-free free-list of chunk
// indices. A MempoolSet orders several Mempools by ascending chunk_size
// and dispatches to the smallest one that fits a request.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use tracing::{debug, instrument};

use crate::chunk::ChunkHeader;
use crate::error::IpcError;
use crate::index_queue::IndexQueue;
use crate::registry::{RelativePointer, RelativePointerRegistry};
use crate::shm::ShmHandle;

const CHUNK_ALIGN: usize = 32;

/// Where a Mempool's bytes live: either a shared-memory segment mapped by
/// the shared-segment provider, or a process-local aligned buffer (used
/// for single-process tests and the in-process demo).
enum Backing {
    Shm(ShmHandle),
    Local { ptr: *mut u8, layout: Layout },
}

impl Drop for Backing {
    fn drop(&mut self) {
        if let Backing::Local { ptr, layout } = *self {
            unsafe { dealloc(ptr, layout) };
        }
    }
}

/// One size class: pre-carved fixed-size chunks plus a free index queue.
pub struct Mempool<'r> {
    registry: &'r RelativePointerRegistry,
    segment_id: u16,
    base: *mut u8,
    chunk_size: u32,
    chunk_count: u32,
    free: IndexQueue,
    _backing: Backing,
}

unsafe impl Send for Mempool<'_> {}
unsafe impl Sync for Mempool<'_> {}

impl<'r> Mempool<'r> {
    /// Builds a mempool over a process-local buffer. Useful for
    /// single-process tests, benches, and the bundled demo; production
    /// use goes through [`Mempool::from_shm`].
    pub fn new_in_memory(registry: &'r RelativePointerRegistry, chunk_size: u32, chunk_count: u32) -> Self {
        let total = chunk_size as usize * chunk_count as usize;
        let layout = Layout::from_size_align(total.max(1), CHUNK_ALIGN).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "allocation failure");
        Self::build(registry, ptr, chunk_size, chunk_count, Backing::Local { ptr, layout })
    }

    /// Builds a mempool over an already-mapped shared-memory segment. The
    /// segment must be at least `chunk_size * chunk_count` bytes and
    /// 32-byte aligned (true of any segment obtained through
    /// [`crate::shm::ShmHandle`]).
    pub fn from_shm(registry: &'r RelativePointerRegistry, shm: ShmHandle, chunk_size: u32, chunk_count: u32) -> Self {
        assert!(
            shm.user_size() >= chunk_size as usize * chunk_count as usize,
            "segment too small for requested chunk layout"
        );
        let base = shm.as_mut_ptr();
        Self::build(registry, base, chunk_size, chunk_count, Backing::Shm(shm))
    }

    fn build(
        registry: &'r RelativePointerRegistry,
        base: *mut u8,
        chunk_size: u32,
        chunk_count: u32,
        backing: Backing,
    ) -> Self {
        let segment_id = registry.register(base);
        Self {
            registry,
            segment_id,
            base,
            chunk_size,
            chunk_count,
            free: IndexQueue::new(chunk_count),
            _backing: backing,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Chunks currently in the free list. `chunk_count - free_count` are
    /// live (SPEC_FULL.md §3's mempool invariant).
    pub fn free_count(&self) -> u32 {
        self.free.size()
    }

    fn chunk_ptr(&self, index: u32) -> *mut u8 {
        unsafe { self.base.add(index as usize * self.chunk_size as usize) }
    }

    fn index_of(&self, addr: *mut u8) -> u32 {
        ((addr as usize - self.base as usize) / self.chunk_size as usize) as u32
    }

    /// Pops a free chunk, constructs its header in place with
    /// `reference_count = 1`, and returns its relative pointer. Returns
    /// `None` when the pool is empty; never blocks (SPEC_FULL.md §4.2).
    #[instrument(level = "debug", skip(self), fields(chunk_size = self.chunk_size))]
    pub fn allocate(
        &self,
        payload_size: u32,
        custom_header_size: u32,
        payload_align: u32,
    ) -> Option<RelativePointer> {
        let index = self.free.pop()?;
        let chunk_base = self.chunk_ptr(index);
        unsafe {
            ChunkHeader::init_in_place(
                chunk_base,
                self.chunk_size,
                custom_header_size,
                payload_size,
                payload_align,
            );
        }
        Some(
            self.registry
                .make_relative(self.segment_id, chunk_base)
                .expect("segment was just registered by this mempool"),
        )
    }

    /// Atomic fetch-add with release ordering (SPEC_FULL.md §4.2), used
    /// by the publisher port before pushing into `n` delivery queues.
    pub fn increment_refcount(&self, rp: RelativePointer, n: u32) -> Result<(), IpcError> {
        let header = self.header_at(rp)?;
        header.increment_refcount(n);
        Ok(())
    }

    /// Decrements the header's reference count; if it reaches zero,
    /// returns the chunk to the free queue (SPEC_FULL.md §4.2).
    pub fn release(&self, rp: RelativePointer) -> Result<(), IpcError> {
        let addr = self.registry.resolve(rp)?;
        self.release_addr(addr)
    }

    /// Same as [`Self::release`] but the caller has already resolved the
    /// address (used by [`MempoolSet::release`] to avoid a second
    /// registry lookup).
    pub(crate) fn release_addr(&self, addr: *mut u8) -> Result<(), IpcError> {
        let header = unsafe { ChunkHeader::from_raw(addr) }?;
        if header.decrement_refcount() {
            let index = self.index_of(addr);
            self.free.push(index);
            debug!(index, "chunk returned to free list");
        }
        Ok(())
    }

    fn header_at(&self, rp: RelativePointer) -> Result<&ChunkHeader, IpcError> {
        let addr = self.registry.resolve(rp)?;
        unsafe { ChunkHeader::from_raw(addr) }
    }
}

/// Ordered collection of mempools by chunk size; picks the smallest
/// class that fits a request (SPEC_FULL.md §4.3).
pub struct MempoolSet<'r> {
    registry: &'r RelativePointerRegistry,
    pools: Vec<Mempool<'r>>,
}

impl<'r> MempoolSet<'r> {
    /// `pools` is sorted ascending by `chunk_size`; tie-break on input
    /// order is preserved but not observable per spec.
    pub fn new(registry: &'r RelativePointerRegistry, mut pools: Vec<Mempool<'r>>) -> Self {
        pools.sort_by_key(|p| p.chunk_size());
        Self { registry, pools }
    }

    /// Computes the required chunk size the same way [`ChunkHeader`]
    /// does, picks the smallest mempool that fits, and allocates from
    /// it. Returns `None` if the smallest fitting pool is empty or no
    /// pool is large enough.
    #[instrument(level = "debug", skip(self))]
    pub fn allocate(
        &self,
        payload_size: u32,
        custom_header_size: u32,
        payload_align: u32,
    ) -> Option<RelativePointer> {
        let required =
            ChunkHeader::compute_payload_offset(custom_header_size, payload_align) + payload_size;
        let pool = self.pools.iter().find(|p| p.chunk_size() >= required)?;
        pool.allocate(payload_size, custom_header_size, payload_align)
    }

    pub fn increment_refcount(&self, rp: RelativePointer, n: u32) -> Result<(), IpcError> {
        let addr = self.registry.resolve(rp)?;
        let header = unsafe { ChunkHeader::from_raw(addr) }?;
        header.increment_refcount(n);
        Ok(())
    }

    pub fn release(&self, rp: RelativePointer) -> Result<(), IpcError> {
        let addr = self.registry.resolve(rp)?;
        let header = unsafe { ChunkHeader::from_raw(addr) }?;
        let chunk_size = header.chunk_size;
        let pool = self
            .pools
            .iter()
            .find(|p| p.chunk_size() == chunk_size)
            .ok_or_else(|| IpcError::InvalidRelativePointer("no mempool owns this chunk_size".into()))?;
        pool.release_addr(addr)
    }

    pub fn pools(&self) -> &[Mempool<'r>] {
        &self.pools
    }

    /// Stamps the publisher-assigned origin and sequence number into a
    /// loaned chunk's header (SPEC_FULL.md §4.6, step 1).
    pub fn set_origin_and_sequence(
        &self,
        rp: RelativePointer,
        origin_id: u64,
        sequence_number: u64,
    ) -> Result<(), IpcError> {
        let addr = self.registry.resolve(rp)?;
        let header = unsafe { ChunkHeader::from_raw_mut(addr) }?;
        header.origin_id = origin_id;
        header.sequence_number = sequence_number;
        Ok(())
    }

    /// Pointer to a loaned or received chunk's payload, for writing or
    /// reading application data.
    pub fn payload_ptr(&self, rp: RelativePointer) -> Result<*mut u8, IpcError> {
        let addr = self.registry.resolve(rp)?;
        let header = unsafe { ChunkHeader::from_raw(addr) }?;
        Ok(header.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_release_restores_free_count() {
        let registry = RelativePointerRegistry::new();
        let pool = Mempool::new_in_memory(&registry, 128, 4);
        assert_eq!(pool.free_count(), 4);

        let rp = pool.allocate(16, 0, 8).expect("chunk available");
        assert_eq!(pool.free_count(), 3);

        pool.release(rp).unwrap();
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn empty_pool_returns_none() {
        let registry = RelativePointerRegistry::new();
        let pool = Mempool::new_in_memory(&registry, 64, 0);
        assert!(pool.allocate(8, 0, 8).is_none());
    }

    #[test]
    fn exhausts_then_recovers() {
        let registry = RelativePointerRegistry::new();
        let pool = Mempool::new_in_memory(&registry, 64, 2);
        let a = pool.allocate(8, 0, 8).unwrap();
        let _b = pool.allocate(8, 0, 8).unwrap();
        assert!(pool.allocate(8, 0, 8).is_none());
        pool.release(a).unwrap();
        assert!(pool.allocate(8, 0, 8).is_some());
    }

    #[test]
    fn refcount_fan_out() {
        let registry = RelativePointerRegistry::new();
        let pool = Mempool::new_in_memory(&registry, 64, 1);
        let rp = pool.allocate(8, 0, 8).unwrap();
        pool.increment_refcount(rp, 2).unwrap(); // now 3 total (1 publisher + 2 subs)
        assert_eq!(pool.free_count(), 0);
        pool.release(rp).unwrap();
        pool.release(rp).unwrap();
        assert_eq!(pool.free_count(), 0); // still 1 outstanding
        pool.release(rp).unwrap();
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn set_picks_smallest_fitting_pool() {
        let registry = RelativePointerRegistry::new();
        let small = Mempool::new_in_memory(&registry, 128, 2);
        let large = Mempool::new_in_memory(&registry, 512, 2);
        let set = MempoolSet::new(&registry, vec![large, small]);

        let rp = set.allocate(50, 0, 8).expect("fits small pool");
        assert_eq!(set.pools()[0].chunk_size(), 128);
        assert_eq!(set.pools()[0].free_count(), 1);
        assert_eq!(set.pools()[1].free_count(), 2);

        set.release(rp).unwrap();
        assert_eq!(set.pools()[0].free_count(), 2);
    }

    #[test]
    fn set_returns_none_when_nothing_fits() {
        let registry = RelativePointerRegistry::new();
        let small = Mempool::new_in_memory(&registry, 32, 2);
        let set = MempoolSet::new(&registry, vec![small]);
        assert!(set.allocate(1000, 0, 8).is_none());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Allocating `n` chunks and releasing every one, in any order,
        /// always restores the pool's free count to its starting capacity
        /// — the allocate/release idempotence property SPEC_FULL.md §2d
        /// names for the mempool path.
        #[test]
        fn allocate_release_idempotence(
            chunk_count in 1u32..32,
            release_order in proptest::collection::vec(any::<usize>(), 0..32),
        ) {
            let registry = RelativePointerRegistry::new();
            let pool = Mempool::new_in_memory(&registry, 64, chunk_count);

            let mut rps = Vec::new();
            while let Some(rp) = pool.allocate(8, 0, 8) {
                rps.push(rp);
            }
            prop_assert_eq!(rps.len(), chunk_count as usize);
            prop_assert_eq!(pool.free_count(), 0);

            let mut remaining = rps;
            for pick in release_order {
                if remaining.is_empty() {
                    break;
                }
                let idx = pick % remaining.len();
                pool.release(remaining.remove(idx)).unwrap();
            }
            for rp in remaining {
                pool.release(rp).unwrap();
            }

            prop_assert_eq!(pool.free_count(), chunk_count);
        }

        /// A chunk fanned out to `extra` subscriber references is only
        /// returned to the free list once every reference (publisher +
        /// subscribers) has released it, regardless of release order.
        #[test]
        fn fan_out_refcount_idempotence(extra in 0u32..8) {
            let registry = RelativePointerRegistry::new();
            let pool = Mempool::new_in_memory(&registry, 64, 1);
            let rp = pool.allocate(8, 0, 8).unwrap();
            if extra > 0 {
                pool.increment_refcount(rp, extra).unwrap();
            }
            for _ in 0..extra {
                pool.release(rp).unwrap();
                prop_assert_eq!(pool.free_count(), 0);
            }
            pool.release(rp).unwrap();
            prop_assert_eq!(pool.free_count(), 1);
        }
    }
}
