//! Start-up timing of the register file and the data buffer.

use std::time::{Duration, Instant};

use sdproxy_regs::layout::offset;
use sdproxy_regs::RegisterBus;

pub const CONTROL_READ_ROUNDS: usize = 1_000_000;
pub const BUFFER_WRITES: usize = 100_000;

/// Result of one timed loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub operations: usize,
    pub elapsed: Duration,
}

impl Timing {
    pub fn per_operation_ns(&self) -> f64 {
        if self.operations == 0 {
            return 0.0;
        }
        self.elapsed.as_nanos() as f64 / self.operations as f64
    }
}

fn timed(operations: usize, mut op: impl FnMut()) -> Timing {
    let start = Instant::now();
    for _ in 0..operations {
        op();
    }
    Timing {
        operations,
        elapsed: start.elapsed(),
    }
}

/// Read Control and Status back to back, `rounds` times.
pub fn control_reads(control: &impl RegisterBus, rounds: usize) -> Timing {
    let mut sink = 0u32;
    let timing = timed(rounds, || {
        sink ^= control.read32(offset::CONTROL);
        sink ^= control.read32(offset::STATUS);
    });
    std::hint::black_box(sink);
    Timing {
        operations: rounds * 2,
        ..timing
    }
}

/// Write a fixed pattern to the first data buffer word `writes` times.
pub fn buffer_writes(buffer: &impl RegisterBus, writes: usize) -> Timing {
    timed(writes, || buffer.write32(0, 0xdead_beef))
}

fn report(what: &str, timing: Timing) {
    tracing::info!(
        operations = timing.operations,
        elapsed_us = timing.elapsed.as_micros() as u64,
        per_op_ns = format!("{:.1}", timing.per_operation_ns()),
        "benchmarked {what}"
    );
}

/// Time the buses before the bridge takes them over.
pub fn run(control: &impl RegisterBus, buffer: &impl RegisterBus) {
    report("data buffer writes", buffer_writes(buffer, BUFFER_WRITES));
    report("control register reads", control_reads(control, CONTROL_READ_ROUNDS));
}
