//! Optional placement of the command loop's working set in fast on-chip memory.
//!
//! [`Placement::probe`] maps the configured scratch device locked and pre-faulted and hands out
//! objects from a bump arena over it. Anything that does not fit, and everything when there is
//! no usable scratch memory, is placed on the heap instead. Placement only affects latency.

use std::fs::OpenOptions;
use std::io;
use std::marker::PhantomData;
use std::mem::{align_of, size_of, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sdproxy_regs::Mapping;
use thiserror::Error;

use crate::config::BridgeConfig;

/// Size assumed for scratch devices that do not report one (256 KiB of OCM).
pub const DEFAULT_SCRATCH_LEN: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("failed to open scratch device {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to map scratch device {} ({len:#x} bytes): {source}", path.display())]
    Map {
        path: PathBuf,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("scratch arena exhausted: {requested} bytes requested, {available} available")]
    Exhausted { requested: usize, available: usize },
}

#[derive(Debug)]
enum Backing {
    Mapped { _mapping: Mapping },
    #[cfg(test)]
    Heap { _words: Box<[u64]> },
}

/// Bump allocator over a fixed block of memory. Nothing is ever freed back to it.
#[derive(Debug)]
pub struct ScratchArena {
    /// Owns the memory `base` points into.
    _backing: Backing,
    base: NonNull<u8>,
    len: usize,
    next: AtomicUsize,
}

// The arena only hands out disjoint ranges; the objects in them carry their own Send/Sync.
unsafe impl Send for ScratchArena {}
unsafe impl Sync for ScratchArena {}

impl ScratchArena {
    /// Map `path` locked and pre-faulted. `len` defaults to the file size, or
    /// [`DEFAULT_SCRATCH_LEN`] for devices that report none.
    pub fn open(path: &Path, len: Option<usize>) -> Result<Self, PlacementError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| PlacementError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let len = match len {
            Some(len) => len,
            None => match file.metadata().map(|m| m.len() as usize) {
                Ok(0) | Err(_) => DEFAULT_SCRATCH_LEN,
                Ok(len) => len,
            },
        };
        let mapping = Mapping::locked(&file, len).map_err(|source| PlacementError::Map {
            path: path.to_path_buf(),
            len,
            source,
        })?;
        Ok(Self::from_mapping(mapping))
    }

    pub fn from_mapping(mapping: Mapping) -> Self {
        let len = mapping.len();
        let base = NonNull::new(mapping.as_ptr()).unwrap_or(NonNull::dangling());
        Self {
            _backing: Backing::Mapped { _mapping: mapping },
            base,
            len,
            next: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    fn heap(len: usize) -> Self {
        let mut words = vec![0u64; len.div_ceil(8)].into_boxed_slice();
        let base = NonNull::new(words.as_mut_ptr().cast::<u8>()).unwrap_or(NonNull::dangling());
        Self {
            _backing: Backing::Heap { _words: words },
            base,
            len,
            next: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.len
    }

    pub fn used(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }

    /// Reserve room for a `T` and move `value` into it.
    fn alloc<T>(&self, value: T) -> Result<NonNull<T>, (PlacementError, T)> {
        let size = size_of::<T>();
        let align = align_of::<T>();
        let base = self.base.as_ptr() as usize;

        let reserved = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                let start = (base + next).checked_next_multiple_of(align)? - base;
                let end = start.checked_add(size)?;
                (end <= self.len).then_some(end)
            });
        let end = match reserved {
            Ok(prev) => {
                let start = (base + prev).next_multiple_of(align) - base;
                start + size
            }
            Err(next) => {
                return Err((
                    PlacementError::Exhausted {
                        requested: size,
                        available: self.len.saturating_sub(next),
                    },
                    value,
                ))
            }
        };

        // SAFETY: `[end - size, end)` lies inside the arena, is aligned for `T` and was
        // reserved for this call alone.
        unsafe {
            let ptr = self.base.as_ptr().add(end - size).cast::<T>();
            ptr.write(value);
            Ok(NonNull::new_unchecked(ptr))
        }
    }
}

/// Where the command loop's objects go.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    arena: Option<Arc<ScratchArena>>,
}

impl Placement {
    /// Everything on the heap.
    pub fn heap() -> Self {
        Self { arena: None }
    }

    pub fn scratch(arena: ScratchArena) -> Self {
        Self {
            arena: Some(Arc::new(arena)),
        }
    }

    /// Use the configured scratch device if it can be mapped, the heap otherwise.
    pub fn probe(config: &BridgeConfig) -> Self {
        let Some(path) = config.scratch_device.as_deref() else {
            return Self::heap();
        };
        match ScratchArena::open(path, None) {
            Ok(arena) => {
                tracing::info!(
                    path = %path.display(),
                    len = arena.capacity(),
                    "placing command loop in scratch memory"
                );
                Self::scratch(arena)
            }
            Err(err) => {
                tracing::warn!(error = %err, "scratch memory unavailable; using the heap");
                Self::heap()
            }
        }
    }

    pub fn uses_scratch(&self) -> bool {
        self.arena.is_some()
    }

    /// Move `value` into scratch memory if there is room, onto the heap otherwise.
    pub fn place<T>(&self, value: T) -> Placed<T> {
        let Some(arena) = &self.arena else {
            return Placed::boxed(value);
        };
        if size_of::<T>() == 0 {
            return Placed::boxed(value);
        }
        match arena.alloc(value) {
            Ok(ptr) => Placed {
                ptr,
                home: Home::Scratch {
                    _arena: Arc::clone(arena),
                },
                _owns: PhantomData,
            },
            Err((err, value)) => {
                tracing::debug!(error = %err, "object does not fit in scratch memory");
                Placed::boxed(value)
            }
        }
    }
}

#[derive(Debug)]
enum Home {
    Heap,
    Scratch { _arena: Arc<ScratchArena> },
}

/// An owned object living either on the heap or in a [`ScratchArena`].
pub struct Placed<T> {
    ptr: NonNull<T>,
    home: Home,
    _owns: PhantomData<T>,
}

// SAFETY: `Placed<T>` owns its `T` exclusively, like `Box<T>`.
unsafe impl<T: Send> Send for Placed<T> {}
unsafe impl<T: Sync> Sync for Placed<T> {}

impl<T> Placed<T> {
    pub fn boxed(value: T) -> Self {
        Self {
            ptr: NonNull::from(Box::leak(Box::new(value))),
            home: Home::Heap,
            _owns: PhantomData,
        }
    }

    pub fn in_scratch(&self) -> bool {
        matches!(self.home, Home::Scratch { .. })
    }

    /// Give up ownership; the object (and its arena) live until the process exits.
    pub fn leak(self) -> &'static mut T
    where
        T: 'static,
    {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so neither the pointee nor the arena reference it
        // holds is ever released.
        unsafe { &mut *this.ptr.as_ptr() }
    }
}

impl<T> Deref for Placed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `ptr` points at a live `T` owned by `self`.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for Placed<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for Placed<T> {
    fn drop(&mut self) {
        match self.home {
            // SAFETY: `ptr` came from `Box::leak` in `boxed`.
            Home::Heap => unsafe { drop(Box::from_raw(self.ptr.as_ptr())) },
            // SAFETY: `ptr` points at a live `T` in the arena, which `home` keeps alive.
            Home::Scratch { .. } => unsafe { self.ptr.as_ptr().drop_in_place() },
        }
    }
}
