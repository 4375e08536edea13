//! Minimal parseable object model.
//!
//! Every heap object begins with a one-word header packing its size in
//! words, its kind, and (for ordinary objects) the number of reference
//! slots that immediately follow the header. Object arrays carry their
//! references as the element words themselves.
//!
//! ```text
//!  bit 63..41       bit 40      bit 39..0
//! +-------------+-------------+--------------+
//! |  ref slots  |    kind     |  size (words)|
//! +-------------+-------------+--------------+
//! ```
//!
//! The layout is deliberately the smallest thing the scan and verification
//! code can parse: a real runtime would hang a class pointer here instead,
//! but the card scan only ever needs size, kind and the slot positions.

use crate::addr::Address;

/// Words occupied by the object header.
pub const HEADER_WORDS: usize = 1;

const SIZE_BITS: u32 = 40;
const KIND_SHIFT: u32 = SIZE_BITS;
const REF_LEN_SHIFT: u32 = SIZE_BITS + 1;

const SIZE_MASK: usize = (1 << SIZE_BITS) - 1;
const KIND_MASK: usize = 1;

/// Maximum encodable reference-slot count for an ordinary object.
pub const MAX_REF_LEN: usize = (1 << (usize::BITS - REF_LEN_SHIFT)) - 1;

/// The shape of a heap object, as far as the scan cares.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// A plain object: `ref_len` reference slots after the header, then
    /// non-reference payload.
    Ordinary,
    /// An object array: every word after the header is a reference slot.
    ObjArray,
}

/// Packs an object header word.
///
/// # Panics
///
/// Panics if `size_in_words` or `ref_len` exceed their encodable ranges,
/// if the slots do not fit in the object, or if an array is given an
/// explicit `ref_len`.
#[must_use]
pub fn encode_header(size_in_words: usize, kind: ObjectKind, ref_len: usize) -> usize {
    assert!(size_in_words > 0 && size_in_words <= SIZE_MASK);
    assert!(ref_len <= MAX_REF_LEN);
    match kind {
        ObjectKind::Ordinary => {
            assert!(
                HEADER_WORDS + ref_len <= size_in_words,
                "reference slots exceed object size"
            );
            size_in_words | (ref_len << REF_LEN_SHIFT)
        }
        ObjectKind::ObjArray => {
            assert!(ref_len == 0, "array element count is derived from size");
            size_in_words | (1 << KIND_SHIFT)
        }
    }
}

/// A reference to a live, initialized heap object.
///
/// `ObjectRef` is a thin wrapper over the object's start address. It is
/// `Copy` and carries no lifetime; validity is established at construction
/// and lasts as long as the owning generation's mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ObjectRef(Address);

impl ObjectRef {
    /// Wraps the object starting at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be the start of a live, initialized object in a mapped
    /// generation, and the mapping must outlive every use of the result.
    #[must_use]
    pub unsafe fn from_start(addr: Address) -> Self {
        debug_assert!(!addr.is_null());
        Self(addr)
    }

    /// The object's start address.
    #[must_use]
    pub const fn start(self) -> Address {
        self.0
    }

    #[inline]
    fn header(self) -> usize {
        // SAFETY: construction guarantees a live object at `self.0`; the
        // header word is immutable during a pause.
        unsafe { self.0.load_word() }
    }

    /// The object's total size in heap words, header included.
    #[must_use]
    pub fn size_in_words(self) -> usize {
        let size = self.header() & SIZE_MASK;
        debug_assert!(size >= HEADER_WORDS, "corrupt object header");
        size
    }

    /// The first address past the object.
    #[must_use]
    pub fn end(self) -> Address {
        self.0.offset_words(self.size_in_words())
    }

    /// The object's kind.
    #[must_use]
    pub fn kind(self) -> ObjectKind {
        if (self.header() >> KIND_SHIFT) & KIND_MASK == 0 {
            ObjectKind::Ordinary
        } else {
            ObjectKind::ObjArray
        }
    }

    /// Returns `true` if the object is an object array.
    #[must_use]
    pub fn is_obj_array(self) -> bool {
        self.kind() == ObjectKind::ObjArray
    }

    /// Number of reference slots the object carries.
    #[must_use]
    pub fn ref_len(self) -> usize {
        match self.kind() {
            ObjectKind::Ordinary => self.header() >> REF_LEN_SHIFT,
            ObjectKind::ObjArray => self.size_in_words() - HEADER_WORDS,
        }
    }

    /// Address of the first reference slot (for arrays, the first element).
    #[must_use]
    pub fn ref_slots_start(self) -> Address {
        self.0.offset_words(HEADER_WORDS)
    }

    /// Calls `f` with the address of every reference slot.
    pub fn each_ref_slot(self, mut f: impl FnMut(Address)) {
        let mut slot = self.ref_slots_start();
        for _ in 0..self.ref_len() {
            f(slot);
            slot = slot.offset_words(1);
        }
    }

    /// Calls `f` with the address of every array element slot inside
    /// `[left, right)`, clamped to the element region.
    ///
    /// # Panics
    ///
    /// Debug-panics if the object is not an object array.
    pub fn each_element_slot_in(self, left: Address, right: Address, mut f: impl FnMut(Address)) {
        debug_assert!(self.is_obj_array(), "element walk over non-array");
        let elems_start = self.ref_slots_start();
        let elems_end = self.end();
        let mut slot = if left < elems_start { elems_start } else { left };
        let limit = if right < elems_end { right } else { elems_end };
        while slot < limit {
            f(slot);
            slot = slot.offset_words(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::HEAP_WORD_SIZE;

    fn heap_with(header: usize, words: usize) -> Vec<usize> {
        let mut v = vec![0usize; words];
        v[0] = header;
        v
    }

    #[test]
    fn ordinary_header_round_trip() {
        let mem = heap_with(encode_header(6, ObjectKind::Ordinary, 3), 6);
        let obj = unsafe { ObjectRef::from_start(Address::from_ptr(mem.as_ptr().cast())) };

        assert_eq!(obj.size_in_words(), 6);
        assert_eq!(obj.kind(), ObjectKind::Ordinary);
        assert!(!obj.is_obj_array());
        assert_eq!(obj.ref_len(), 3);
        assert_eq!(obj.end(), obj.start().offset_words(6));
    }

    #[test]
    fn array_header_round_trip() {
        let mem = heap_with(encode_header(10, ObjectKind::ObjArray, 0), 10);
        let obj = unsafe { ObjectRef::from_start(Address::from_ptr(mem.as_ptr().cast())) };

        assert_eq!(obj.size_in_words(), 10);
        assert!(obj.is_obj_array());
        assert_eq!(obj.ref_len(), 9);
    }

    #[test]
    fn each_ref_slot_walks_leading_slots() {
        let mem = heap_with(encode_header(8, ObjectKind::Ordinary, 2), 8);
        let obj = unsafe { ObjectRef::from_start(Address::from_ptr(mem.as_ptr().cast())) };

        let mut slots = Vec::new();
        obj.each_ref_slot(|s| slots.push(s.word_offset_from(obj.start())));
        assert_eq!(slots, vec![1, 2]);
    }

    #[test]
    fn element_walk_clamps_to_element_region() {
        let mem = heap_with(encode_header(12, ObjectKind::ObjArray, 0), 12);
        let obj = unsafe { ObjectRef::from_start(Address::from_ptr(mem.as_ptr().cast())) };
        let base = obj.start();

        // A range starting at the header and running past the end only
        // yields the elements.
        let mut slots = Vec::new();
        obj.each_element_slot_in(base, base.offset_words(64), |s| {
            slots.push(s.word_offset_from(base));
        });
        assert_eq!(slots.first(), Some(&1));
        assert_eq!(slots.last(), Some(&11));
        assert_eq!(slots.len(), 11);

        // An interior window yields exactly the covered elements.
        slots.clear();
        obj.each_element_slot_in(base.offset_words(4), base.offset_words(7), |s| {
            slots.push(s.word_offset_from(base));
        });
        assert_eq!(slots, vec![4, 5, 6]);
    }

    #[test]
    #[should_panic(expected = "reference slots exceed object size")]
    fn oversized_ref_len_is_rejected() {
        let _ = encode_header(4, ObjectKind::Ordinary, 4);
    }

    #[test]
    fn header_is_one_word() {
        assert_eq!(HEADER_WORDS * HEAP_WORD_SIZE, 8);
    }
}
