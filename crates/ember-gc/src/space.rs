//! Generation spaces and the two-generation heap.
//!
//! Each generation is one contiguous anonymous mapping reserved through
//! `sys_alloc`, so membership tests are plain range checks. The old
//! generation's object space is parseable: objects sit back to back in
//! allocation order between `bottom` and `top`, and the object-start array
//! is kept in step with every allocation.
//!
//! Allocation here is the minimum the collector core needs: bump pointers,
//! used by heap setup and by promotion. There are no free lists and no
//! size classes.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use sys_alloc::MmapOptions;

use crate::addr::{Address, HEAP_WORD_SIZE};
use crate::card::CardTable;
use crate::object::{encode_header, ObjectKind, ObjectRef};
use crate::start_array::ObjectStartArray;

/// Advisory placement for the old generation; a stable base makes
/// addresses comparable across runs when debugging scan traces.
const OLD_GEN_BASE_HINT: usize = 0x7000_0000_0000;

/// A contiguous run of parseable objects: `[bottom, top)` is allocated,
/// `[top, end)` is free.
pub struct MutableSpace {
    bottom: Address,
    end: Address,
    top: AtomicUsize,
}

impl MutableSpace {
    /// Creates an empty space over `[bottom, end)`.
    #[must_use]
    pub fn new(bottom: Address, end: Address) -> Self {
        debug_assert!(bottom <= end);
        Self {
            bottom,
            end,
            top: AtomicUsize::new(bottom.as_usize()),
        }
    }

    /// Lowest address of the space.
    #[must_use]
    pub const fn bottom(&self) -> Address {
        self.bottom
    }

    /// One past the highest reserved address.
    #[must_use]
    pub const fn end(&self) -> Address {
        self.end
    }

    /// Current allocation frontier.
    #[must_use]
    pub fn top(&self) -> Address {
        Address::new(self.top.load(Ordering::Relaxed))
    }

    /// The allocated region `[bottom, top)`.
    #[must_use]
    pub fn used_region(&self) -> (Address, Address) {
        (self.bottom, self.top())
    }

    /// Returns `true` if `addr` lies in the reserved range.
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        self.bottom <= addr && addr < self.end
    }

    /// Bump-allocates `words` heap words; `None` when the space is full.
    pub fn allocate_words(&self, words: usize) -> Option<Address> {
        let bytes = words * HEAP_WORD_SIZE;
        let mut old = self.top.load(Ordering::Relaxed);
        loop {
            if self.end.as_usize() - old < bytes {
                return None;
            }
            match self.top.compare_exchange_weak(
                old,
                old + bytes,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(Address::new(old)),
                Err(current) => old = current,
            }
        }
    }

    /// Walks every object in `[bottom, top)` in address order.
    pub fn object_iterate(&self, mut f: impl FnMut(ObjectRef)) {
        let mut addr = self.bottom;
        let top = self.top();
        while addr < top {
            // SAFETY: the space is parseable; every address below top is
            // the start of a live object laid down by allocation.
            let obj = unsafe { ObjectRef::from_start(addr) };
            f(obj);
            addr = obj.end();
        }
        debug_assert!(addr == top, "space walk overran top");
    }
}

/// The young generation: a reserved range plus a bump pointer.
///
/// The card scan only needs two things from it: the reservation check that
/// classifies references, and fresh addresses for tests and promotion
/// scaffolding to point references at.
pub struct YoungGen {
    _mapping: sys_alloc::Mmap,
    space: MutableSpace,
}

impl YoungGen {
    /// Reserves a young generation of `reserved_bytes`.
    ///
    /// # Errors
    ///
    /// Fails if the mapping cannot be created.
    pub fn new(reserved_bytes: usize) -> io::Result<Self> {
        // SAFETY: the mapping is owned by the returned value and all
        // pointers into it are derived from `space`, which it outlives.
        let mapping = unsafe { MmapOptions::new().len(reserved_bytes).map_anon()? };
        let bottom = Address::from_ptr(mapping.ptr());
        let end = bottom.offset_bytes(reserved_bytes);
        Ok(Self {
            _mapping: mapping,
            space: MutableSpace::new(bottom, end),
        })
    }

    /// Returns `true` if `addr` lies anywhere in the reserved range.
    #[inline]
    #[must_use]
    pub fn is_in_reserved(&self, addr: Address) -> bool {
        self.space.contains(addr)
    }

    /// Lowest reserved address.
    #[must_use]
    pub const fn bottom(&self) -> Address {
        self.space.bottom()
    }

    /// Reserved size in words.
    #[must_use]
    pub fn capacity_in_words(&self) -> usize {
        self.space.end().word_offset_from(self.space.bottom())
    }

    /// Hands out `words` of raw young space; `None` when exhausted.
    ///
    /// Young objects have no structure the card scan cares about, so this
    /// returns bare addresses for references to target.
    pub fn allocate_raw(&self, words: usize) -> Option<Address> {
        self.space.allocate_words(words)
    }
}

/// The old generation: object space plus its object-start index.
pub struct OldGen {
    _mapping: sys_alloc::Mmap,
    space: MutableSpace,
    start_array: ObjectStartArray,
}

impl OldGen {
    /// Reserves an old generation of `reserved_bytes`.
    ///
    /// # Errors
    ///
    /// Fails if the mapping cannot be created.
    pub fn new(reserved_bytes: usize) -> io::Result<Self> {
        // SAFETY: as for `YoungGen::new`; the hint is advisory.
        let mapping = unsafe {
            MmapOptions::new()
                .len(reserved_bytes)
                .with_hint(OLD_GEN_BASE_HINT)
                .map_anon()?
        };
        let bottom = Address::from_ptr(mapping.ptr());
        let end = bottom.offset_bytes(reserved_bytes);
        let start_array = ObjectStartArray::new(bottom, reserved_bytes);
        Ok(Self {
            _mapping: mapping,
            space: MutableSpace::new(bottom, end),
            start_array,
        })
    }

    /// The object space.
    #[must_use]
    pub const fn space(&self) -> &MutableSpace {
        &self.space
    }

    /// The object-start index.
    #[must_use]
    pub const fn start_array(&self) -> &ObjectStartArray {
        &self.start_array
    }

    /// Allocates an ordinary object with `ref_len` leading reference slots,
    /// all null. `None` when the space is full.
    pub fn allocate_ordinary(&self, size_in_words: usize, ref_len: usize) -> Option<ObjectRef> {
        self.allocate(encode_header(size_in_words, ObjectKind::Ordinary, ref_len), size_in_words)
    }

    /// Allocates an object array of `size_in_words` total words (elements
    /// all null). `None` when the space is full.
    pub fn allocate_obj_array(&self, size_in_words: usize) -> Option<ObjectRef> {
        self.allocate(encode_header(size_in_words, ObjectKind::ObjArray, 0), size_in_words)
    }

    fn allocate(&self, header: usize, size_in_words: usize) -> Option<ObjectRef> {
        let addr = self.space.allocate_words(size_in_words)?;
        // SAFETY: `addr` is fresh zero-filled space inside our mapping;
        // writing the header makes it a live object. Slots stay null.
        unsafe {
            addr.store_word(header);
            self.start_array.record_object_start(addr);
            Some(ObjectRef::from_start(addr))
        }
    }

    /// Walks every old-generation object in address order.
    pub fn object_iterate(&self, f: impl FnMut(ObjectRef)) {
        self.space.object_iterate(f);
    }
}

/// A two-generation heap with a card table over the old generation.
pub struct GenHeap {
    old: OldGen,
    young: YoungGen,
    card_table: CardTable,
}

impl GenHeap {
    /// Reserves both generations and a clean card table.
    ///
    /// # Errors
    ///
    /// Fails if either reservation cannot be created.
    pub fn new(old_bytes: usize, young_bytes: usize) -> io::Result<Self> {
        let old = OldGen::new(old_bytes)?;
        let young = YoungGen::new(young_bytes)?;
        let card_table = CardTable::new(old.space().bottom(), old_bytes);
        Ok(Self {
            old,
            young,
            card_table,
        })
    }

    /// The old generation.
    #[must_use]
    pub const fn old_gen(&self) -> &OldGen {
        &self.old
    }

    /// The young generation.
    #[must_use]
    pub const fn young_gen(&self) -> &YoungGen {
        &self.young
    }

    /// The card table covering the old generation.
    #[must_use]
    pub const fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    /// Returns `true` if `addr` lies in the young generation's reservation.
    #[must_use]
    pub fn is_in_young(&self, addr: Address) -> bool {
        self.young.is_in_reserved(addr)
    }

    /// Stores a reference value into `slot` and dirties the slot's card,
    /// the way the mutator's write barrier would.
    ///
    /// # Safety
    ///
    /// `slot` must be a reference slot of a live old-generation object and
    /// no other thread may access it concurrently.
    pub unsafe fn barriered_store(&self, slot: Address, value: Address) {
        debug_assert!(self.old.space().contains(slot));
        unsafe { slot.store_word(value.as_usize()) };
        if self.is_in_young(value) {
            self.card_table.set_card_dirty(self.card_table.index_for(slot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::card_is_dirty;

    #[test]
    fn old_gen_allocation_is_parseable() {
        let old = OldGen::new(1 << 20).unwrap();
        let a = old.allocate_ordinary(10, 2).unwrap();
        let b = old.allocate_obj_array(30).unwrap();
        let c = old.allocate_ordinary(5, 0).unwrap();

        assert_eq!(a.end(), b.start());
        assert_eq!(b.end(), c.start());

        let mut seen = Vec::new();
        old.object_iterate(|obj| seen.push(obj.start()));
        assert_eq!(seen, vec![a.start(), b.start(), c.start()]);

        assert_eq!(old.start_array().object_start(b.start().offset_words(17)), b.start());
    }

    #[test]
    fn young_reservation_check() {
        let young = YoungGen::new(1 << 16).unwrap();
        let inside = young.allocate_raw(4).unwrap();
        assert!(young.is_in_reserved(inside));
        assert!(!young.is_in_reserved(Address::new(0x10)));
    }

    #[test]
    fn allocation_exhaustion() {
        let old = OldGen::new(1 << 12).unwrap();
        assert!(old.allocate_ordinary(300, 0).is_some());
        assert!(old.allocate_ordinary(300, 0).is_none());
    }

    #[test]
    fn barriered_store_dirties_young_refs_only() {
        let heap = GenHeap::new(1 << 20, 1 << 16).unwrap();
        let obj = heap.old_gen().allocate_ordinary(8, 2).unwrap();
        let young_target = heap.young_gen().allocate_raw(2).unwrap();
        let old_target = heap.old_gen().allocate_ordinary(4, 0).unwrap();

        let slot0 = obj.ref_slots_start();
        let slot1 = slot0.offset_words(1);
        unsafe {
            heap.barriered_store(slot0, young_target);
            heap.barriered_store(slot1, old_target.start());
        }

        let ct = heap.card_table();
        assert!(card_is_dirty(ct.get(ct.index_for(slot0))));
        // An old-to-old store leaves the card alone. The slot must sit on
        // a fresh card: pad past the one slot0 dirtied.
        let _pad = heap.old_gen().allocate_ordinary(116, 0).unwrap();
        let far = heap.old_gen().allocate_ordinary(1024, 1).unwrap();
        unsafe {
            heap.barriered_store(far.ref_slots_start(), old_target.start());
        }
        assert!(!card_is_dirty(ct.get(ct.index_for(far.ref_slots_start()))));
    }
}
