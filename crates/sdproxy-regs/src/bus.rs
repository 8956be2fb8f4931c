use core::sync::atomic::Ordering;
use std::sync::Arc;

/// 32-bit register access by byte offset.
///
/// Every call is exactly one bus transaction: no caching, no batching, no read-modify-write.
/// Implementations take `&self` because the command and data threads share one mapping; they
/// never touch the same offsets (see [`crate::layout`]).
pub trait RegisterBus {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);
}

impl<T: RegisterBus + ?Sized> RegisterBus for &T {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for Arc<T> {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for Box<T> {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

/// Barrier issued after an I/O read so later accesses cannot be satisfied before it.
///
/// On ARM this is a full `dmb ish`; elsewhere the bus is strongly ordered for uncached device
/// memory and only the compiler needs to be kept from reordering.
#[inline(always)]
pub fn io_read_barrier() {
    #[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
    core::sync::atomic::fence(Ordering::SeqCst);
    #[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
    core::sync::atomic::compiler_fence(Ordering::SeqCst);
}

/// Barrier issued before an I/O write so earlier stores (e.g. the data buffer) are visible to
/// the device before the write that makes it act on them.
#[inline(always)]
pub fn io_write_barrier() {
    #[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
    core::sync::atomic::fence(Ordering::SeqCst);
    #[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
    core::sync::atomic::compiler_fence(Ordering::SeqCst);
}
