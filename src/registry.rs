// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Relative pointers and the per-process registry that resolves them.
// Port of the `(segment_id, offset)` scheme from cpp-ipc's shared-memory
// primitives, generalized per SPEC_FULL.md §3/§9: the registry is an
// explicit, constructible object rather than hidden global state, so
// tests can instantiate several for isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::IpcError;

/// A `(segment_id, offset)` pair portable across processes that share a
/// [`RelativePointerRegistry`] binding for `segment_id`.
///
/// Packed into a single `u64` so it can be stored in a [`crate::chunk::ChunkHeader`]-adjacent
/// slot or pushed through a [`crate::delivery_queue::DeliveryQueue`] by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RelativePointer(u64);

const OFFSET_BITS: u32 = 48;
const OFFSET_MASK: u64 = (1u64 << OFFSET_BITS) - 1;

impl RelativePointer {
    pub const NULL: RelativePointer = RelativePointer(u64::MAX);

    pub fn new(segment_id: u16, offset: u64) -> Self {
        debug_assert!(offset <= OFFSET_MASK, "offset exceeds 48-bit range");
        RelativePointer(((segment_id as u64) << OFFSET_BITS) | (offset & OFFSET_MASK))
    }

    pub fn segment_id(self) -> u16 {
        (self.0 >> OFFSET_BITS) as u16
    }

    pub fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// Raw bit pattern, for storing a `RelativePointer` in an atomic slot
    /// (e.g. a [`crate::delivery_queue::DeliveryQueue`] ring cell).
    pub fn to_bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Self {
        RelativePointer(bits)
    }
}

/// Per-process map from `segment_id` to the locally-mapped base address
/// of that segment.
///
/// Deliberately a plain object rather than a `static` / global: every
/// cross-process-aware component (mempool, delivery queue, wait-set
/// trigger handles) takes a `&RelativePointerRegistry` explicitly, per
/// SPEC_FULL.md §9's "Global/process state" note.
pub struct RelativePointerRegistry {
    map: std::sync::RwLock<HashMap<u16, usize>>,
    next_id: AtomicU64,
}

impl RelativePointerRegistry {
    pub fn new() -> Self {
        Self {
            map: std::sync::RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers `base` under a freshly allocated segment id.
    pub fn register(&self, base: *mut u8) -> u16 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = (id % (u16::MAX as u64 - 1) + 1) as u16; // avoid 0 as a footgun sentinel
        self.map.write().unwrap().insert(id, base as usize);
        id
    }

    /// Registers `base` under a caller-chosen segment id (e.g. one handed
    /// back by the daemon handshake, SPEC_FULL.md §6).
    pub fn register_with_id(&self, segment_id: u16, base: *mut u8) {
        self.map.write().unwrap().insert(segment_id, base as usize);
    }

    pub fn unregister(&self, segment_id: u16) {
        self.map.write().unwrap().remove(&segment_id);
    }

    /// Resolves a relative pointer to a local address.
    pub fn resolve(&self, rp: RelativePointer) -> Result<*mut u8, IpcError> {
        if rp.is_null() {
            return Err(IpcError::InvalidRelativePointer(
                "null relative pointer".into(),
            ));
        }
        let map = self.map.read().unwrap();
        let base = map.get(&rp.segment_id()).ok_or_else(|| {
            IpcError::InvalidRelativePointer(format!(
                "segment {} not registered in this process",
                rp.segment_id()
            ))
        })?;
        Ok((*base as usize + rp.offset() as usize) as *mut u8)
    }

    /// Converts a local address within segment `segment_id` into a
    /// relative pointer.
    pub fn make_relative(&self, segment_id: u16, addr: *const u8) -> Result<RelativePointer, IpcError> {
        let map = self.map.read().unwrap();
        let base = map.get(&segment_id).ok_or_else(|| {
            IpcError::InvalidRelativePointer(format!("segment {segment_id} not registered"))
        })?;
        let offset = (addr as usize).checked_sub(*base).ok_or_else(|| {
            IpcError::InvalidRelativePointer("address precedes segment base".into())
        })?;
        Ok(RelativePointer::new(segment_id, offset as u64))
    }
}

impl Default for RelativePointerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for RelativePointerRegistry {}
unsafe impl Sync for RelativePointerRegistry {}
