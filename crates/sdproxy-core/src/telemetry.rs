use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sdproxy_ring::{Consumer, EventKind, EventRecord};

use crate::clock::Clock;

/// Counts from one [`TelemetryDrain::drain`] pass.
#[must_use]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub records: usize,
    /// Records overwritten before they could be read, since the previous pass.
    pub lost: u64,
}

/// Consumer side of the telemetry ring: turns records into `tracing` events.
pub struct TelemetryDrain {
    consumer: Consumer,
    last_timestamp: Option<u64>,
    reported_lost: u64,
}

impl TelemetryDrain {
    pub fn new(consumer: Consumer) -> Self {
        Self {
            consumer,
            last_timestamp: None,
            reported_lost: 0,
        }
    }

    /// Log every record currently in the ring.
    pub fn drain(&mut self) -> DrainStats {
        let mut stats = DrainStats::default();
        while let Some(slot) = self.consumer.try_take() {
            let latency_us = latency_us(self.last_timestamp, slot.timestamp);
            self.last_timestamp = Some(slot.timestamp);
            emit(slot.record(), latency_us);
            self.consumer.release(slot);
            stats.records += 1;
        }

        let lost = self.consumer.lost();
        if lost > self.reported_lost {
            stats.lost = lost - self.reported_lost;
            self.reported_lost = lost;
            tracing::warn!(
                lost = stats.lost,
                total = lost,
                "telemetry records overwritten before they were read"
            );
        }
        stats
    }

    /// Drain until `stop` is raised, sleeping `interval` whenever the ring is empty.
    pub fn run(&mut self, clock: &impl Clock, interval: Duration, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            if self.drain().records == 0 {
                clock.sleep(interval);
            }
        }
        let _ = self.drain();
    }
}

/// Microseconds between two record timestamps (0 for the first record).
pub fn latency_us(previous: Option<u64>, timestamp: u64) -> f64 {
    match previous {
        Some(prev) => timestamp.saturating_sub(prev) as f64 / 1_000.0,
        None => 0.0,
    }
}

fn emit(record: &EventRecord, latency_us: f64) {
    let text = record.payload.as_str();
    let extra = record.extra;
    match record.kind {
        EventKind::Done => {}
        EventKind::Debug => tracing::debug!(latency_us, "{text}"),
        EventKind::DebugWithValue => tracing::debug!(latency_us, value = extra, "{text}"),
        EventKind::GetSize => tracing::info!(latency_us, bytes = extra, "get size"),
        EventKind::ReadSector => tracing::info!(latency_us, sector = extra, "read sector"),
        EventKind::WriteSector => tracing::info!(latency_us, sector = extra, "write sector"),
        EventKind::Started => {
            if extra == u64::MAX {
                tracing::info!("{text}");
            } else {
                tracing::info!(cpu = extra, "{text}");
            }
        }
        EventKind::CommandReceived => tracing::debug!(latency_us, command = extra, "{text}"),
        EventKind::CommandProcessed => tracing::debug!(latency_us, command = extra, "{text}"),
        EventKind::CommandComplete => {
            let status = format!("{extra:#010x}");
            tracing::debug!(latency_us, %status, "{text}")
        }
        EventKind::NoResponse => tracing::debug!(latency_us, command = extra, "{text}"),
        EventKind::SlowCompletion => tracing::warn!(latency_us, delay = extra, "{text}"),
        EventKind::BadResponseLength => tracing::warn!(latency_us, len = extra, "{text}"),
        EventKind::ProtocolEngineError => tracing::warn!(latency_us, command = extra, "{text}"),
    }
}
