//! Block-offset index from heap address to object start.
//!
//! The old generation keeps one byte per 512-byte block. A block's byte
//! holds the word offset of the first object starting in that block, or a
//! sentinel if no object starts there. Finding the object containing an
//! arbitrary address is then a short backward walk to the nearest recorded
//! start followed by a forward walk over object sizes.
//!
//! Allocation and promotion record starts as they lay objects down; the
//! card scan only reads. Entries are relaxed atomics for the same reason
//! card bytes are: promotion workers touch disjoint blocks, and the atomic
//! type only makes the sharing well-defined.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::addr::{Address, HEAP_WORD_SIZE};
use crate::object::ObjectRef;

/// Log2 of the block size in bytes.
pub const BLOCK_SHIFT: usize = 9;

/// Bytes covered by one block entry.
pub const BLOCK_BYTE_SIZE: usize = 1 << BLOCK_SHIFT;

/// Words covered by one block entry.
pub const BLOCK_SIZE_IN_WORDS: usize = BLOCK_BYTE_SIZE / HEAP_WORD_SIZE;

/// Entry value meaning "no object starts in this block".
const NO_START: u8 = u8::MAX;

const _: () = assert!(BLOCK_SIZE_IN_WORDS <= NO_START as usize);

/// Index from address to the start of the containing object.
pub struct ObjectStartArray {
    blocks: Box<[AtomicU8]>,
    base: Address,
    covered_bytes: usize,
}

impl ObjectStartArray {
    /// Creates an index covering `[base, base + covered_bytes)` with no
    /// recorded starts.
    ///
    /// # Panics
    ///
    /// Panics if `base` is not block-aligned.
    #[must_use]
    pub fn new(base: Address, covered_bytes: usize) -> Self {
        assert!(
            base.is_aligned(BLOCK_BYTE_SIZE),
            "start array base must be block-aligned"
        );
        let num_blocks = covered_bytes.div_ceil(BLOCK_BYTE_SIZE);
        let blocks: Vec<AtomicU8> = (0..num_blocks).map(|_| AtomicU8::new(NO_START)).collect();
        Self {
            blocks: blocks.into_boxed_slice(),
            base,
            covered_bytes,
        }
    }

    #[inline]
    fn block_index(&self, addr: Address) -> usize {
        debug_assert!(
            self.base <= addr && addr.byte_offset_from(self.base) < self.covered_bytes,
            "address {addr} outside start-array range"
        );
        addr.byte_offset_from(self.base) >> BLOCK_SHIFT
    }

    #[inline]
    fn block_addr(&self, index: usize) -> Address {
        self.base.offset_bytes(index << BLOCK_SHIFT)
    }

    /// Records that an object starts at `addr`.
    ///
    /// Keeps the lowest start per block, so recording in any order is fine.
    pub fn record_object_start(&self, addr: Address) {
        debug_assert!(addr.is_aligned(HEAP_WORD_SIZE));
        let block = self.block_index(addr);
        let offset = addr.word_offset_from(self.block_addr(block));
        debug_assert!(offset < BLOCK_SIZE_IN_WORDS);
        #[allow(clippy::cast_possible_truncation)]
        self.blocks[block].fetch_min(offset as u8, Ordering::Relaxed);
    }

    /// Forgets all recorded starts.
    pub fn reset(&self) {
        for block in &*self.blocks {
            block.store(NO_START, Ordering::Relaxed);
        }
    }

    /// Returns the start address of the object containing `addr`.
    ///
    /// Total over the allocated part of the space: every covered address
    /// must lie inside some recorded object.
    ///
    /// # Panics
    ///
    /// Debug-panics if no start is recorded at or before `addr`; the index
    /// and the heap are out of sync.
    #[must_use]
    pub fn object_start(&self, addr: Address) -> Address {
        let mut block = self.block_index(addr);
        let mut offset = self.blocks[block].load(Ordering::Relaxed);
        while offset == NO_START {
            debug_assert!(block > 0, "no object start recorded below {addr}");
            block -= 1;
            offset = self.blocks[block].load(Ordering::Relaxed);
        }
        let mut start = self.block_addr(block).offset_words(offset as usize);
        if start > addr {
            // The first start in addr's own block lies beyond addr; the
            // covering object starts in an earlier block.
            loop {
                debug_assert!(block > 0, "no object start recorded below {addr}");
                block -= 1;
                offset = self.blocks[block].load(Ordering::Relaxed);
                if offset != NO_START {
                    break;
                }
            }
            start = self.block_addr(block).offset_words(offset as usize);
        }
        debug_assert!(start <= addr);
        // Walk forward object by object until one covers addr.
        loop {
            // SAFETY: recorded starts always denote live objects in a
            // parseable space.
            let obj = unsafe { ObjectRef::from_start(start) };
            let end = obj.end();
            if addr < end {
                return start;
            }
            start = end;
        }
    }

    /// Returns `true` if any object starts in `[left, right)`.
    ///
    /// `left` must be block-aligned; the scan only asks about card-aligned
    /// stripe fronts, which coincide with block boundaries.
    #[must_use]
    pub fn object_starts_in_range(&self, left: Address, right: Address) -> bool {
        debug_assert!(left.is_aligned(BLOCK_BYTE_SIZE));
        debug_assert!(left <= right);
        if left == right {
            return false;
        }
        let first = self.block_index(left);
        let last = self.block_index(right.sub_words(1));
        for block in first..=last {
            let offset = self.blocks[block].load(Ordering::Relaxed);
            if offset != NO_START {
                let start = self.block_addr(block).offset_words(offset as usize);
                if start < right {
                    return true;
                }
            }
        }
        false
    }
}
