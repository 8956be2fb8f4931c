#[cfg(all(feature = "loom", test))]
pub(crate) use loom::sync::atomic::{fence, AtomicU64};
#[cfg(all(feature = "loom", test))]
pub(crate) use loom::sync::Arc;

#[cfg(not(all(feature = "loom", test)))]
pub(crate) use std::sync::atomic::{fence, AtomicU64};
#[cfg(not(all(feature = "loom", test)))]
pub(crate) use std::sync::Arc;
