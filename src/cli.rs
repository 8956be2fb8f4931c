use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sdproxy_core::{BridgeConfig, BusWidth, CrcMode};
use sdproxy_regs::DEFAULT_UIO_DEVICE;

/// Every tunable is a flag with an `SDPROXY_*` environment fallback; a flag given on the
/// command line wins over the variable.
#[derive(Parser, Debug)]
#[command(
    name = "sdproxy",
    about = "Answer SD commands latched by the FPGA SD card block from a disk image."
)]
pub struct Args {
    /// Disk image or block device presented as the card (read-only)
    pub image: PathBuf,

    /// UIO device exported by the FPGA SD block
    #[arg(long, value_name = "DEVICE", env = "SDPROXY_UIO", default_value = DEFAULT_UIO_DEVICE)]
    pub uio: PathBuf,

    /// CPU the command loop is pinned to
    #[arg(long, value_name = "CPU", env = "SDPROXY_RT_CORE")]
    rt_core: Option<usize>,

    /// Sleep of the data loop between passes, in microseconds
    #[arg(long, value_name = "US", env = "SDPROXY_DATA_POLL_US")]
    poll_interval_us: Option<u64>,

    /// Sleep of the telemetry drain when the ring is empty, in microseconds
    #[arg(long, value_name = "US", env = "SDPROXY_DRAIN_POLL_US")]
    drain_interval_us: Option<u64>,

    /// Completion delay (in cycles) above which a completion is reported as slow
    #[arg(long, value_name = "CYCLES", env = "SDPROXY_SLOW_COMPLETION")]
    slow_completion: Option<u8>,

    /// Upper bound on the bytes staged per data block
    #[arg(long, value_name = "BYTES", env = "SDPROXY_MAX_TRANSFER")]
    max_transfer: Option<usize>,

    /// Telemetry ring slots
    #[arg(long, value_name = "SLOTS", env = "SDPROXY_RING_CAPACITY")]
    ring_capacity: Option<usize>,

    /// Stack size of the command thread, in bytes
    #[arg(long, value_name = "BYTES", env = "SDPROXY_RT_STACK")]
    rt_stack: Option<usize>,

    /// On-chip memory device to place the command loop in
    #[arg(long, value_name = "PATH", env = "SDPROXY_SCRATCH_DEVICE")]
    scratch_device: Option<PathBuf>,

    /// mlockall the process before starting the loops
    #[arg(long, env = "SDPROXY_LOCK_MEMORY")]
    lock_memory: bool,

    /// Compute data CRC16 in software instead of in the FPGA
    #[arg(long, env = "SDPROXY_SOFTWARE_CRC")]
    software_crc: bool,

    /// Drive data on a 4-bit bus
    #[arg(long, env = "SDPROXY_FOUR_BIT")]
    four_bit: bool,

    /// Do not pulse the SD block reset line at start-up
    #[arg(long)]
    pub no_reset: bool,

    /// Time register and data buffer accesses before starting
    #[arg(long)]
    pub bench: bool,
}

impl Args {
    /// Defaults overlaid with whatever was given. Not validated.
    pub fn config(&self) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        if let Some(core) = self.rt_core {
            config.rt_core = core;
        }
        if let Some(us) = self.poll_interval_us {
            config.data_poll_interval = Duration::from_micros(us);
        }
        if let Some(us) = self.drain_interval_us {
            config.drain_poll_interval = Duration::from_micros(us);
        }
        if let Some(cycles) = self.slow_completion {
            config.slow_completion_threshold = cycles;
        }
        if let Some(bytes) = self.max_transfer {
            config.max_transfer_bytes = bytes;
        }
        if let Some(slots) = self.ring_capacity {
            config.ring_capacity = slots;
        }
        if let Some(bytes) = self.rt_stack {
            config.rt_stack_size = bytes;
        }
        config.scratch_device = self.scratch_device.clone();
        config.lock_memory = self.lock_memory;
        if self.software_crc {
            config.crc_mode = CrcMode::Software;
        }
        if self.four_bit {
            config.bus_width = BusWidth::FourBit;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> BridgeConfig {
        Args::try_parse_from(std::iter::once("sdproxy").chain(args.iter().copied()))
            .unwrap()
            .config()
    }

    #[test]
    fn no_flags_give_the_defaults() {
        assert_eq!(config(&["card.img"]), BridgeConfig::default());
    }

    #[test]
    fn flags_reach_every_tunable() {
        let config = config(&[
            "card.img",
            "--rt-core",
            "3",
            "--poll-interval-us",
            "250",
            "--drain-interval-us",
            "2000",
            "--slow-completion",
            "80",
            "--max-transfer",
            "64",
            "--ring-capacity",
            "16",
            "--rt-stack",
            "131072",
            "--scratch-device",
            "/dev/ocm",
            "--lock-memory",
            "--software-crc",
        ]);

        assert_eq!(config.rt_core, 3);
        assert_eq!(config.data_poll_interval, Duration::from_micros(250));
        assert_eq!(config.drain_poll_interval, Duration::from_millis(2));
        assert_eq!(config.slow_completion_threshold, 80);
        assert_eq!(config.max_transfer_bytes, 64);
        assert_eq!(config.ring_capacity, 16);
        assert_eq!(config.rt_stack_size, 128 * 1024);
        assert_eq!(config.scratch_device, Some(PathBuf::from("/dev/ocm")));
        assert!(config.lock_memory);
        assert_eq!(config.crc_mode, CrcMode::Software);
        assert_eq!(config.bus_width, BusWidth::OneBit);
        config.validate().unwrap();
    }

    #[test]
    fn out_of_range_values_are_refused_by_the_parser() {
        let err = Args::try_parse_from(["sdproxy", "card.img", "--slow-completion", "300"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
