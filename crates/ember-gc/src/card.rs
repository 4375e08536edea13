//! Card table for old-to-young remembered-set tracking.
//!
//! The old generation is divided into 512-byte cards, each summarised by
//! one byte. The write barrier dirties the card of any store that might
//! create an old-to-young reference; a minor collection then scans only
//! dirty cards instead of the whole old generation.
//!
//! Card bytes are stored as relaxed atomics. During a collection mutators
//! are stopped and worker threads operate on disjoint card ranges, so
//! relaxed loads and stores compile to plain byte accesses; the atomic type
//! exists to make the sharing well-defined in Rust, not to synchronise.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::addr::{Address, HEAP_WORD_SIZE};
use crate::object::ObjectRef;
use crate::start_array::ObjectStartArray;

/// Log2 of the card size in bytes.
pub const CARD_SHIFT: usize = 9;

/// Size of the heap region covered by one card, in bytes.
pub const CARD_BYTE_SIZE: usize = 1 << CARD_SHIFT;

/// Size of the heap region covered by one card, in heap words.
pub const CARD_SIZE_IN_WORDS: usize = CARD_BYTE_SIZE / HEAP_WORD_SIZE;

const _: () = assert!(CARD_BYTE_SIZE.is_power_of_two());

/// One card-table entry.
pub type CardValue = u8;

/// No young-pointing reference is known to exist on this card.
pub const CLEAN_CARD: CardValue = 0;
/// The write barrier recorded a potential young-pointing store here.
pub const DIRTY_CARD: CardValue = 1;
/// A reference into the young generation survived the collection here.
pub const YOUNGERGEN_CARD: CardValue = 2;
/// Transient marker used by the precise post-collection check.
pub const VERIFY_CARD: CardValue = 3;

/// Returns `true` for a clean card byte.
#[inline]
#[must_use]
pub const fn card_is_clean(value: CardValue) -> bool {
    value == CLEAN_CARD
}

/// Returns `true` for a dirty card byte.
#[inline]
#[must_use]
pub const fn card_is_dirty(value: CardValue) -> bool {
    value == DIRTY_CARD
}

/// Returns `true` for a youngergen card byte.
#[inline]
#[must_use]
pub const fn card_is_youngergen(value: CardValue) -> bool {
    value == YOUNGERGEN_CARD
}

/// Returns `true` for the transient verify marker.
#[inline]
#[must_use]
pub const fn card_is_verify(value: CardValue) -> bool {
    value == VERIFY_CARD
}

/// Returns `true` if the card carries an imprecise mark: some reference
/// somewhere on the card's region may point into the young generation.
#[inline]
#[must_use]
pub const fn card_is_marked_imprecise(value: CardValue) -> bool {
    card_is_dirty(value) || card_is_youngergen(value)
}

/// Returns `true` if `addr` lies on a card boundary.
#[inline]
#[must_use]
pub const fn is_card_aligned(addr: Address) -> bool {
    addr.is_aligned(CARD_BYTE_SIZE)
}

/// The card table: one byte per card of the covered old-generation range.
///
/// Indices and addresses are interchangeable through [`CardTable::index_for`]
/// and [`CardTable::addr_for`]; for any covered address `a`,
/// `addr_for(index_for(a))` is `a` rounded down to its card boundary.
pub struct CardTable {
    cards: Box<[AtomicU8]>,
    base: Address,
    covered_bytes: usize,
}

impl CardTable {
    /// Creates a table covering `[base, base + covered_bytes)`, all clean.
    ///
    /// # Panics
    ///
    /// Panics if `base` is not card-aligned.
    #[must_use]
    pub fn new(base: Address, covered_bytes: usize) -> Self {
        assert!(is_card_aligned(base), "card table base must be card-aligned");
        let num_cards = covered_bytes.div_ceil(CARD_BYTE_SIZE);
        let cards: Vec<AtomicU8> = (0..num_cards).map(|_| AtomicU8::new(CLEAN_CARD)).collect();
        Self {
            cards: cards.into_boxed_slice(),
            base,
            covered_bytes,
        }
    }

    /// First address covered by the table.
    #[must_use]
    pub const fn base(&self) -> Address {
        self.base
    }

    /// Number of cards in the table.
    #[must_use]
    pub const fn num_cards(&self) -> usize {
        self.cards.len()
    }

    /// Index of the card covering `addr`.
    ///
    /// `addr` may also be the exclusive end of the covered range, in which
    /// case the result is `num_cards()` and usable only as a limit.
    #[inline]
    #[must_use]
    pub fn index_for(&self, addr: Address) -> usize {
        debug_assert!(
            self.base <= addr && addr.byte_offset_from(self.base) <= self.covered_bytes,
            "address {addr} outside card-table range"
        );
        addr.byte_offset_from(self.base) >> CARD_SHIFT
    }

    /// First heap address covered by card `index`.
    #[inline]
    #[must_use]
    pub fn addr_for(&self, index: usize) -> Address {
        debug_assert!(index <= self.num_cards(), "card index out of range");
        self.base.offset_bytes(index << CARD_SHIFT)
    }

    /// Reads the card byte at `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> CardValue {
        self.cards[index].load(Ordering::Relaxed)
    }

    /// Writes the card byte at `index`.
    #[inline]
    pub fn set(&self, index: usize, value: CardValue) {
        self.cards[index].store(value, Ordering::Relaxed);
    }

    /// Dirties the card at `index`.
    #[inline]
    pub fn set_card_dirty(&self, index: usize) {
        self.set(index, DIRTY_CARD);
    }

    /// Marks the card covering `addr` as holding a surviving young reference.
    #[inline]
    pub fn set_card_youngergen(&self, addr: Address) {
        self.set(self.index_for(addr), YOUNGERGEN_CARD);
    }

    /// Returns `true` if the card covering `addr` carries an imprecise mark
    /// (`dirty` or `youngergen`).
    ///
    /// # Panics
    ///
    /// Panics on a card byte outside the known encoding; the table is
    /// corrupt and collection cannot continue.
    #[must_use]
    pub fn addr_is_marked_imprecise(&self, addr: Address) -> bool {
        let value = self.get(self.index_for(addr));
        if card_is_marked_imprecise(value) {
            return true;
        }
        assert!(
            card_is_clean(value),
            "unhandled card mark {value:#x} at {addr}"
        );
        false
    }

    /// Returns `true` if the card covering `addr` carries a precise mark
    /// (`youngergen` or the transient `verify`).
    ///
    /// # Panics
    ///
    /// Panics on a card byte outside the known encoding.
    #[must_use]
    pub fn addr_is_marked_precise(&self, addr: Address) -> bool {
        let value = self.get(self.index_for(addr));
        if card_is_youngergen(value) || card_is_verify(value) {
            return true;
        }
        assert!(
            card_is_clean(value) || card_is_dirty(value),
            "unhandled card mark {value:#x} at {addr}"
        );
        false
    }

    /// Returns the first non-clean card in `[start, end)`, or `end`.
    #[must_use]
    pub fn find_first_dirty_card(&self, start: usize, end: usize) -> usize {
        for index in start..end {
            if !card_is_clean(self.get(index)) {
                return index;
            }
        }
        end
    }

    /// Returns the first clean card in `[start, end)`, or `end`.
    #[must_use]
    pub fn find_first_clean_card(&self, start: usize, end: usize) -> usize {
        for index in start..end {
            if card_is_clean(self.get(index)) {
                return index;
            }
        }
        end
    }

    /// Returns the first clean card in `[start, end)` that does not split an
    /// object across the dirty/clean boundary, or `end`.
    ///
    /// If any part of an object lies on a dirty card, every card the object
    /// touches is treated as dirty, so the object on the last dirty card is
    /// followed to its end before a boundary is accepted. The result is
    /// always a clean card or `end`.
    ///
    /// Precondition: `start == end`, or the card at `start` is not clean.
    #[must_use]
    pub fn find_first_clean_card_object_aware(
        &self,
        start_array: &ObjectStartArray,
        start: usize,
        end: usize,
    ) -> usize {
        debug_assert!(
            start == end || !card_is_clean(self.get(start)),
            "object-aware search must start on a non-clean card"
        );
        // Skip the first dirty card.
        let mut index = start + 1;
        while index < end {
            if !card_is_clean(self.get(index)) {
                index += 1;
                continue;
            }
            debug_assert!(!card_is_clean(self.get(index - 1)), "prev card must be dirty");
            // Find the final object on the previous dirty card.
            let obj_addr = start_array.object_start(self.addr_for(index).sub_words(1));
            // SAFETY: the start array indexes a parseable space; `obj_addr`
            // is the start of a live object.
            let obj = unsafe { ObjectRef::from_start(obj_addr) };
            let final_card_by_obj = self.index_for(obj.end().sub_words(1));
            debug_assert!(final_card_by_obj < end, "object extends past search range");
            if final_card_by_obj <= index {
                return index;
            }
            // The object extends beyond this clean card; its last card
            // decides where the chunk really ends.
            if card_is_clean(self.get(final_card_by_obj)) {
                return final_card_by_obj;
            }
            index = final_card_by_obj + 1;
        }
        end
    }

    /// Writes `clean` to every card in `[start, end)`.
    ///
    /// Plain byte stores: stripes are disjoint, so no synchronisation is
    /// needed between worker threads.
    pub fn clear_cards(&self, start: usize, end: usize) {
        for index in start..end {
            self.set(index, CLEAN_CARD);
        }
    }
}
