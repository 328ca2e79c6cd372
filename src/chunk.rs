// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The self-describing header carried at the base of every chunk
// (SPEC_FULL.md §3, §4.4). Constructed in place inside shared memory by
// a Mempool; copy and move are forbidden (the header's identity is its
// address), so all access here goes through raw pointers rather than an
// owned value.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::error;

use crate::error::IpcError;

/// Current on-wire layout version. Bump whenever a field's width,
/// order, or meaning changes incompatibly.
pub const CHUNK_HEADER_VERSION: u8 = 1;

/// Self-describing header at the base of every chunk.
///
/// 32-byte aligned per SPEC_FULL.md §3 ("mempool chunks are 32-byte
/// aligned"); `repr(C)` so the field layout is bit-stable across the
/// processes that share this chunk.
#[repr(C, align(32))]
pub struct ChunkHeader {
    pub chunk_size: u32,
    pub header_version: u8,
    reserved: [u8; 3],
    pub origin_id: u64,
    pub sequence_number: u64,
    pub payload_size: u32,
    pub payload_offset: u32,
    reference_count: AtomicU32,
}

const _: () = assert!(std::mem::align_of::<ChunkHeader>() == 32);

/// Width of the footer word written immediately before the payload; lets
/// `from_payload` recover the header address without already knowing it
/// (SPEC_FULL.md §4.4).
const FOOTER_WIDTH: usize = 4;

impl ChunkHeader {
    /// Computes the smallest `payload_offset` that is
    /// `>= size_of::<ChunkHeader>() + custom_header_size`, leaves room for
    /// the footer word, and satisfies `payload_align`.
    pub fn compute_payload_offset(custom_header_size: u32, payload_align: u32) -> u32 {
        let payload_align = payload_align.max(1);
        let min_offset = std::mem::size_of::<ChunkHeader>() as u32 + custom_header_size;
        let with_footer = min_offset + FOOTER_WIDTH as u32;
        with_footer.div_ceil(payload_align) * payload_align
    }

    /// Constructs a `ChunkHeader` in place at `base` and writes the footer
    /// word before the payload. `base` must point to at least `chunk_size`
    /// writable, 32-byte-aligned bytes that no other live header overlaps.
    ///
    /// Returns the initialized header with `reference_count = 1` (the
    /// publisher's own handle; see SPEC_FULL.md §4.6).
    ///
    /// # Safety
    /// `base` must be valid, aligned, and exclusively owned for the
    /// duration of the chunk's lifetime.
    pub unsafe fn init_in_place<'a>(
        base: *mut u8,
        chunk_size: u32,
        custom_header_size: u32,
        payload_size: u32,
        payload_align: u32,
    ) -> &'a mut ChunkHeader {
        debug_assert_eq!(base as usize % 32, 0, "chunk base must be 32-byte aligned");
        let payload_offset = Self::compute_payload_offset(custom_header_size, payload_align);
        debug_assert!(
            (payload_offset as u64) + (payload_size as u64) <= chunk_size as u64,
            "chunk_size too small for header + custom header + payload"
        );

        let header = base as *mut ChunkHeader;
        header.write(ChunkHeader {
            chunk_size,
            header_version: CHUNK_HEADER_VERSION,
            reserved: [0; 3],
            origin_id: 0,
            sequence_number: 0,
            payload_size,
            payload_offset,
            reference_count: AtomicU32::new(1),
        });

        let footer = base.add(payload_offset as usize - FOOTER_WIDTH) as *mut u32;
        footer.write_unaligned(payload_offset);

        &mut *header
    }

    /// Dereferences a resolved chunk address as a `ChunkHeader`, checking
    /// `header_version` first. This is the first point any header reached
    /// through a [`crate::registry::RelativePointerRegistry`] lookup is
    /// touched, so it is where a header written by a build with an
    /// incompatible layout gets caught rather than silently
    /// misinterpreted.
    ///
    /// # Safety
    /// `addr` must point at a live `ChunkHeader` (or at least its first
    /// `header_version` byte) for the duration of the returned borrow.
    pub unsafe fn from_raw<'a>(addr: *mut u8) -> Result<&'a ChunkHeader, IpcError> {
        let header = &*(addr as *const ChunkHeader);
        if header.header_version != CHUNK_HEADER_VERSION {
            return Err(IpcError::VersionMismatch {
                expected: CHUNK_HEADER_VERSION,
                found: header.header_version,
            });
        }
        Ok(header)
    }

    /// Mutable counterpart of [`Self::from_raw`], for callers that need to
    /// write header fields (the publisher stamping `origin_id`/
    /// `sequence_number` before `send`).
    ///
    /// # Safety
    /// Same as [`Self::from_raw`], plus the caller must hold the only live
    /// reference to this header for the duration of the borrow.
    pub unsafe fn from_raw_mut<'a>(addr: *mut u8) -> Result<&'a mut ChunkHeader, IpcError> {
        let header = &mut *(addr as *mut ChunkHeader);
        if header.header_version != CHUNK_HEADER_VERSION {
            return Err(IpcError::VersionMismatch {
                expected: CHUNK_HEADER_VERSION,
                found: header.header_version,
            });
        }
        Ok(header)
    }

    /// Pointer to this header's payload.
    pub fn payload(&self) -> *mut u8 {
        let base = self as *const ChunkHeader as *mut u8;
        unsafe { base.add(self.payload_offset as usize) }
    }

    /// Recovers the header address from a payload pointer, using the
    /// footer word [`Self::init_in_place`] wrote just before the payload.
    /// Checks `header_version` on the recovered header before handing it
    /// back, since a payload pointer handed across a version boundary is
    /// exactly the case [`Self::from_raw`] guards against.
    ///
    /// # Safety
    /// `payload` must either be null or point into a chunk previously
    /// initialized by [`Self::init_in_place`].
    pub unsafe fn from_payload(payload: *const u8) -> Result<Option<*mut ChunkHeader>, IpcError> {
        if payload.is_null() {
            return Ok(None);
        }
        let footer = payload.sub(FOOTER_WIDTH) as *const u32;
        let payload_offset = footer.read_unaligned();
        let addr = payload.sub(payload_offset as usize) as *mut u8;
        Self::from_raw(addr)?;
        Ok(Some(addr as *mut ChunkHeader))
    }

    /// `payload_offset + payload_size`, clamped to never exceed
    /// `chunk_size`, computed via a widened intermediate so a corrupt
    /// header can't overflow the arithmetic (SPEC_FULL.md §4.4).
    pub fn used_size_of_chunk(&self) -> u32 {
        let used = self.payload_offset as u64 + self.payload_size as u64;
        used.min(self.chunk_size as u64) as u32
    }

    /// Atomic fetch-add with release ordering, used by the publisher port
    /// before pushing into `n` delivery queues (SPEC_FULL.md §4.2).
    pub fn increment_refcount(&self, n: u32) {
        self.reference_count.fetch_add(n, Ordering::Release);
    }

    pub fn refcount(&self) -> u32 {
        self.reference_count.load(Ordering::Acquire)
    }

    /// Decrements the reference count. Returns `true` if this was the last
    /// reference (the caller should return the chunk to its mempool).
    ///
    /// A pre-decrement count of 0 is a fatal programming error: a fatal
    /// assertion fires in debug builds, and in release builds the error is
    /// logged and the decrement is ignored (SPEC_FULL.md §7).
    pub fn decrement_refcount(&self) -> bool {
        let prev = self.reference_count.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |v| if v == 0 { None } else { Some(v - 1) },
        );
        match prev {
            Ok(1) => true,
            Ok(_) => false,
            Err(_) => {
                error!("double-release detected: reference_count already 0");
                debug_assert!(false, "release called with reference_count == 0");
                false
            }
        }
    }
}
