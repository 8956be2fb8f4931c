use std::path::PathBuf;
use std::time::Duration;

use sdproxy_regs::layout::MAX_SECTOR_BYTES;
use thiserror::Error;

/// Who computes the CRC16 of outgoing data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrcMode {
    /// The FPGA appends the CRC (DATCTRL auto-CRC16).
    #[default]
    Hardware,
    /// The data loop computes it and sends it as part of the block.
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusWidth {
    #[default]
    OneBit,
    FourBit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be zero")]
    Zero(&'static str),

    #[error("max transfer size {0} must be a non-zero multiple of 4 no larger than 512")]
    TransferSize(usize),

    #[error("ring capacity {0} is below the minimum of 2")]
    RingCapacity(usize),

    #[error("software CRC16 is only supported on a 1-bit bus")]
    SoftwareCrcOnWideBus,
}

/// Tunables of the bridge. Defaults match the hardware the bridge was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// CPU the command loop is pinned to.
    pub rt_core: usize,
    /// Sleep between data loop passes.
    pub data_poll_interval: Duration,
    /// Sleep between telemetry drain passes that found the ring empty.
    pub drain_poll_interval: Duration,
    /// Completion delays (in cycles) above this are reported as slow.
    pub slow_completion_threshold: u8,
    /// Upper bound on the bytes moved per data block.
    pub max_transfer_bytes: usize,
    pub crc_mode: CrcMode,
    pub bus_width: BusWidth,
    pub ring_capacity: usize,
    /// Stack size of the command thread.
    pub rt_stack_size: usize,
    /// `mlockall` the process before starting the loops.
    pub lock_memory: bool,
    /// Fast on-chip memory to place the command loop's working set in.
    pub scratch_device: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rt_core: 1,
            data_poll_interval: Duration::from_millis(1),
            drain_poll_interval: Duration::from_millis(1),
            slow_completion_threshold: 50,
            max_transfer_bytes: MAX_SECTOR_BYTES,
            crc_mode: CrcMode::Hardware,
            bus_width: BusWidth::OneBit,
            ring_capacity: sdproxy_ring::DEFAULT_CAPACITY,
            rt_stack_size: 64 * 1024,
            lock_memory: false,
            scratch_device: None,
        }
    }
}

impl BridgeConfig {
    /// Reject settings the loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_poll_interval.is_zero() {
            return Err(ConfigError::Zero("data poll interval"));
        }
        if self.drain_poll_interval.is_zero() {
            return Err(ConfigError::Zero("drain poll interval"));
        }
        if self.rt_stack_size == 0 {
            return Err(ConfigError::Zero("real-time stack size"));
        }
        if self.max_transfer_bytes == 0
            || self.max_transfer_bytes > MAX_SECTOR_BYTES
            || self.max_transfer_bytes % 4 != 0
        {
            return Err(ConfigError::TransferSize(self.max_transfer_bytes));
        }
        if self.ring_capacity < 2 {
            return Err(ConfigError::RingCapacity(self.ring_capacity));
        }
        if self.crc_mode == CrcMode::Software && self.bus_width == BusWidth::FourBit {
            return Err(ConfigError::SoftwareCrcOnWideBus);
        }
        Ok(())
    }
}
