//! Anonymous memory mappings for generation reservation.
//!
//! The collector reserves each generation as one contiguous, page-aligned
//! address range so that generation membership is a plain range check. This
//! crate wraps the platform primitives (`mmap` on Unix, `VirtualAlloc` on
//! Windows) behind a small builder with an optional placement hint.
//!
//! Freshly mapped anonymous pages are zero-filled on every supported
//! platform; callers rely on that for zero-initialized side tables.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// Placement hints should be aligned to this value. On Windows it is
/// typically 64KB; on Unix it equals the page size.
#[must_use]
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// An owned anonymous memory mapping.
///
/// The range is unmapped when the handle is dropped; raw pointers handed
/// out by [`Mmap::ptr`] must not outlive it.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the mapping.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Builder for an anonymous mapping.
#[derive(Debug, Clone)]
pub struct MmapOptions {
    len: usize,
    hint_addr: usize,
}

impl MmapOptions {
    /// Creates options with zero length; a length must be set before
    /// mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            hint_addr: 0,
        }
    }

    /// Sets the length of the mapping in bytes.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Requests placement at a specific virtual address.
    ///
    /// The hint is advisory: the OS may place the mapping elsewhere if the
    /// range is taken. The address should be aligned to
    /// [`allocation_granularity`].
    #[must_use]
    pub const fn with_hint(mut self, addr: usize) -> Self {
        self.hint_addr = addr;
        self
    }

    /// Creates the anonymous mapping.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the mapping cannot be created, or
    /// `InvalidInput` if no length was set.
    ///
    /// # Safety
    ///
    /// The mapping itself is owned and safe, but this crate exists to hand
    /// out raw memory: any pointer derived from the result must be used
    /// only while the `Mmap` is alive, and concurrent access through such
    /// pointers is the caller's responsibility.
    pub unsafe fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }
        let inner = unsafe { os::MmapInner::map_anon(self.hint_addr, self.len)? };
        Ok(Mmap { inner })
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn page_size_is_power_of_two() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0);
    }

    #[test]
    fn granularity_covers_page_size() {
        let ag = allocation_granularity();
        assert_eq!(ag & (ag - 1), 0);
        assert!(ag >= page_size());
    }

    #[test]
    fn map_is_writable_and_zeroed() {
        let len = 4 * page_size();
        let mmap = unsafe { MmapOptions::new().len(len).map_anon().unwrap() };

        let ptr = mmap.ptr();
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % page_size(), 0);
        assert_eq!(mmap.len(), len);

        unsafe {
            assert_eq!(ptr::read_volatile(ptr), 0);
            assert_eq!(ptr::read_volatile(ptr.add(len - 1)), 0);
            ptr::write_volatile(ptr, 42);
            assert_eq!(ptr::read_volatile(ptr), 42);
        }
    }

    #[test]
    fn zero_length_is_rejected() {
        let err = unsafe { MmapOptions::new().map_anon() };
        assert!(err.is_err());
    }

    #[test]
    fn hint_is_advisory() {
        let len = allocation_granularity();

        #[cfg(target_pointer_width = "64")]
        let hint = 0x6000_0000_0000usize;
        #[cfg(target_pointer_width = "32")]
        let hint = 0x4000_0000usize;

        // The OS may or may not honor the hint; either way the mapping
        // must be usable.
        if let Ok(mmap) = unsafe { MmapOptions::new().len(len).with_hint(hint).map_anon() } {
            unsafe {
                ptr::write_volatile(mmap.ptr(), 7);
                assert_eq!(ptr::read_volatile(mmap.ptr()), 7);
            }
        }
    }
}
