//! Register-level access to the FPGA SD card block.
//!
//! The FPGA exposes three resources through a single UIO device:
//!
//! - [`UioRegion::Bram`]: the block data buffer the hardware transmits from/receives into
//! - [`UioRegion::Control`]: the command/status/data control register file ([`layout`])
//! - [`UioRegion::Gpio`]: reset/kick lines of the SD block ([`GpioLines`])
//!
//! Everything above this crate talks to registers through [`RegisterBus`], which is implemented
//! both by real mappings ([`MmioRegion`]) and by [`testing::FakeRegisters`].

mod bus;
mod gpio;
pub mod layout;
mod mmap;
mod mmio;
pub mod testing;
mod uio;

pub use bus::{io_read_barrier, io_write_barrier, RegisterBus};
pub use gpio::{GpioLines, GPIO_KICK, GPIO_RESET};
pub use mmap::Mapping;
pub use mmio::MmioRegion;
pub use uio::{MapError, Uio, UioRegion, DEFAULT_UIO_DEVICE, SYSFS_UIO_ROOT};
