//! Heap addresses and word arithmetic.
//!
//! The collector measures everything in heap words. An [`Address`] is a
//! word-aligned location inside a reserved generation; keeping it a newtype
//! (rather than a raw pointer) makes the scan code's interval arithmetic
//! explicit and lets debug builds assert alignment cheaply.

use std::fmt;

/// Size of a heap word in bytes.
pub const HEAP_WORD_SIZE: usize = 8;

/// Log2 of [`HEAP_WORD_SIZE`].
pub const LOG_HEAP_WORD_SIZE: usize = 3;

const _: () = assert!(HEAP_WORD_SIZE == std::mem::size_of::<usize>());
const _: () = assert!(1 << LOG_HEAP_WORD_SIZE == HEAP_WORD_SIZE);

/// A word-aligned heap address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
    /// The null address.
    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Creates an address from a raw value.
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Creates an address from a raw pointer.
    #[must_use]
    pub fn from_ptr(ptr: *const u8) -> Self {
        Self(ptr as usize)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the address as a byte pointer.
    #[must_use]
    pub const fn as_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }

    /// Returns `true` if this is the null address.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `n` words higher.
    #[must_use]
    pub const fn offset_words(self, n: usize) -> Self {
        Self(self.0 + n * HEAP_WORD_SIZE)
    }

    /// Returns the address `n` words lower.
    #[must_use]
    pub const fn sub_words(self, n: usize) -> Self {
        Self(self.0 - n * HEAP_WORD_SIZE)
    }

    /// Returns the address `n` bytes higher.
    #[must_use]
    pub const fn offset_bytes(self, n: usize) -> Self {
        Self(self.0 + n)
    }

    /// Distance from `base` to `self` in whole words.
    #[must_use]
    pub fn word_offset_from(self, base: Self) -> usize {
        debug_assert!(base <= self, "word_offset_from: base above address");
        (self.0 - base.0) >> LOG_HEAP_WORD_SIZE
    }

    /// Distance from `base` to `self` in bytes.
    #[must_use]
    pub fn byte_offset_from(self, base: Self) -> usize {
        debug_assert!(base <= self, "byte_offset_from: base above address");
        self.0 - base.0
    }

    /// Rounds down to a multiple of `align` (a power of two).
    #[must_use]
    pub const fn align_down(self, align: usize) -> Self {
        Self(self.0 & !(align - 1))
    }

    /// Rounds up to a multiple of `align` (a power of two).
    #[must_use]
    pub const fn align_up(self, align: usize) -> Self {
        Self((self.0 + align - 1) & !(align - 1))
    }

    /// Returns `true` if the address is a multiple of `align`.
    #[must_use]
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0 & (align - 1) == 0
    }

    /// Reads the word stored at this address.
    ///
    /// # Safety
    ///
    /// The address must be word-aligned and point into mapped memory owned
    /// by a live generation; no thread may be writing the word concurrently.
    #[must_use]
    pub unsafe fn load_word(self) -> usize {
        debug_assert!(self.is_aligned(HEAP_WORD_SIZE), "unaligned load");
        unsafe { *(self.0 as *const usize) }
    }

    /// Writes a word at this address.
    ///
    /// # Safety
    ///
    /// Same as [`Address::load_word`], and the caller must have exclusive
    /// access to the word.
    pub unsafe fn store_word(self, value: usize) {
        debug_assert!(self.is_aligned(HEAP_WORD_SIZE), "unaligned store");
        unsafe { *(self.0 as *mut usize) = value };
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
