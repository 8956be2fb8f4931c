//! `sdproxy`: present a disk image to an SD host through the FPGA SD card block.

mod bench;
mod cli;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use sdproxy_card::{sd_card, BlockBackend, CardIdentity, FileBackend};
use sdproxy_core::{Bridge, BridgeContext, Clock, Placement, SystemClock, TelemetryDrain};
use sdproxy_regs::{GpioLines, MmioRegion, Uio, UioRegion};
use sdproxy_ring::event_ring;
use tracing_subscriber::EnvFilter;

use crate::cli::Args;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = args.config();
    config.validate().context("invalid configuration")?;

    let backend = FileBackend::open(&args.image)
        .with_context(|| format!("failed to open image {}", args.image.display()))?;
    tracing::info!(
        image = %args.image.display(),
        sectors = backend.sector_count(),
        "image opened"
    );

    let uio = Uio::open(&args.uio).context("failed to open UIO device")?;
    let control = uio
        .map(UioRegion::Control)
        .context("failed to map control registers")?;
    let buffer = uio
        .map(UioRegion::Bram)
        .context("failed to map data buffer")?;
    let gpio = GpioLines::new(uio.map(UioRegion::Gpio).context("failed to map GPIO lines")?);

    if !args.no_reset {
        gpio.pulse_reset();
        tracing::info!("SD block reset");
    }
    if args.bench {
        bench::run(&control, &buffer);
    }

    let (producer, consumer) = event_ring(config.ring_capacity);
    let placement = Placement::probe(&config);
    let ctx: &'static BridgeContext<MmioRegion> =
        placement.place(BridgeContext::new(control, buffer)).leak();
    let (commands, data) = sd_card(backend, &CardIdentity::default());

    tracing::info!("starting SD card emulation");
    let bridge = Bridge::start(&config, &placement, ctx, commands, data, producer)
        .context("failed to start bridge threads")?;

    let clock = SystemClock::new();
    let mut drain = TelemetryDrain::new(consumer);
    while bridge.is_running() {
        if drain.drain().records == 0 {
            clock.sleep(config.drain_poll_interval);
        }
    }
    let _ = drain.drain();

    bridge
        .join()
        .map_err(|_| anyhow!("a bridge thread panicked"))?;
    bail!("bridge loops exited unexpectedly")
}
