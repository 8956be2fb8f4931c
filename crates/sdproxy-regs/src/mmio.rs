use core::ptr::NonNull;

use crate::bus::{io_read_barrier, io_write_barrier, RegisterBus};
use crate::mmap::Mapping;

/// A window of device memory accessed with volatile 32-bit loads and stores.
#[derive(Debug)]
pub struct MmioRegion {
    base: NonNull<u32>,
    len: usize,
    _mapping: Option<Mapping>,
}

// Device memory is shared with the hardware anyway; every access is a single volatile
// transaction, so sharing the handle between threads adds no new hazard.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    pub(crate) fn from_mapping(mapping: Mapping) -> Self {
        let base = NonNull::new(mapping.as_ptr().cast::<u32>())
            .unwrap_or_else(|| unreachable!("mappings are never null"));
        Self {
            base,
            len: mapping.len(),
            _mapping: Some(mapping),
        }
    }

    /// Wrap memory that is owned elsewhere.
    ///
    /// # Safety
    ///
    /// `base` must be 4-byte aligned and valid for volatile reads and writes of `len` bytes for
    /// as long as the returned region (and anything it is moved into) is alive.
    pub unsafe fn from_raw(base: NonNull<u32>, len: usize) -> Self {
        Self {
            base,
            len,
            _mapping: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn word_ptr(&self, offset: usize) -> *mut u32 {
        debug_assert_eq!(offset % 4, 0, "unaligned register offset {offset:#x}");
        debug_assert!(
            offset + 4 <= self.len,
            "register offset {offset:#x} outside {:#x}-byte region",
            self.len
        );
        // SAFETY: in bounds per the assertions above (and the caller's layout contract).
        unsafe { self.base.as_ptr().add(offset / 4) }
    }
}

impl RegisterBus for MmioRegion {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: `word_ptr` yields an aligned pointer into the region.
        let value = unsafe { core::ptr::read_volatile(self.word_ptr(offset)) };
        io_read_barrier();
        value
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        io_write_barrier();
        // SAFETY: `word_ptr` yields an aligned pointer into the region.
        unsafe { core::ptr::write_volatile(self.word_ptr(offset), value) }
    }
}
