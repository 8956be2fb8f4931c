//! Slot protocol.
//!
//! Cursors are free-running `u64` sequence numbers; record `n` lives in slot `n % capacity`.
//! `head` is the next record the producer writes, `tail` the next record the consumer reads,
//! and `head == tail` means empty.
//!
//! Each slot carries `seq`, the sequence number of the record it holds plus one (`0` means
//! never written). Publishing record `n`:
//! 1) Mark the slot busy by storing [`SLOT_BUSY`] in `seq`.
//! 2) Release fence, then store the record fields.
//! 3) Store `n + 1` into `seq` (release), then advance `head` (release).
//!
//! The consumer copies the fields out between two reads of `seq` (acquire fence in between).
//! If either read differs from `n + 1`, the producer has lapped the consumer and record `n` is
//! gone: it is counted as lost and skipped.

use std::time::Instant;

use crate::event::{EventKind, EventPayload, EventRecord, PAYLOAD_CAPACITY};
use crate::sync::{fence, Arc, AtomicU64};
use core::sync::atomic::Ordering;

/// Ring size used by the bridge.
pub const DEFAULT_CAPACITY: usize = 512;

/// Marks a slot whose fields are being rewritten.
const SLOT_BUSY: u64 = u64::MAX;

const PAYLOAD_WORDS: usize = PAYLOAD_CAPACITY / 8;

struct Slot {
    seq: AtomicU64,
    /// `kind | payload_len << 8`.
    meta: AtomicU64,
    extra: AtomicU64,
    timestamp: AtomicU64,
    text: [AtomicU64; PAYLOAD_WORDS],
}

impl Slot {
    fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            meta: AtomicU64::new(0),
            extra: AtomicU64::new(0),
            timestamp: AtomicU64::new(0),
            text: core::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn store(&self, record: &EventRecord) {
        let meta = record.kind as u64 | (record.payload.len() as u64) << 8;
        self.meta.store(meta, Ordering::Relaxed);
        self.extra.store(record.extra, Ordering::Relaxed);
        self.timestamp.store(record.timestamp, Ordering::Relaxed);
        let bytes = record.payload.raw_bytes();
        for (i, word) in self.text.iter().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            word.store(u64::from_le_bytes(chunk), Ordering::Relaxed);
        }
    }

    fn load_raw(&self) -> RawRecord {
        let mut text = [0u8; PAYLOAD_CAPACITY];
        for (i, word) in self.text.iter().enumerate() {
            text[i * 8..i * 8 + 8].copy_from_slice(&word.load(Ordering::Relaxed).to_le_bytes());
        }
        RawRecord {
            meta: self.meta.load(Ordering::Relaxed),
            extra: self.extra.load(Ordering::Relaxed),
            timestamp: self.timestamp.load(Ordering::Relaxed),
            text,
        }
    }
}

/// Slot contents copied out before validation.
struct RawRecord {
    meta: u64,
    extra: u64,
    timestamp: u64,
    text: [u8; PAYLOAD_CAPACITY],
}

impl RawRecord {
    fn decode(self) -> EventRecord {
        EventRecord {
            kind: EventKind::from_u8(self.meta as u8).unwrap_or(EventKind::Debug),
            payload: EventPayload::from_raw((self.meta >> 8) as u8, self.text),
            extra: self.extra,
            timestamp: self.timestamp,
        }
    }
}

struct Shared {
    slots: Box<[Slot]>,
    head: AtomicU64,
    tail: AtomicU64,
}

impl Shared {
    #[inline]
    fn slot(&self, cursor: u64) -> (usize, &Slot) {
        let index = (cursor % self.slots.len() as u64) as usize;
        (index, &self.slots[index])
    }

    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }
}

/// Create a ring with `capacity` slots and return its two ends.
pub fn event_ring(capacity: usize) -> (Producer, Consumer) {
    assert!(capacity >= 2, "event ring needs at least two slots");
    let shared = Arc::new(Shared {
        slots: (0..capacity).map(|_| Slot::new()).collect(),
        head: AtomicU64::new(0),
        tail: AtomicU64::new(0),
    });
    (
        Producer {
            shared: shared.clone(),
            head: 0,
            epoch: Instant::now(),
        },
        Consumer {
            shared,
            tail: 0,
            lost: 0,
        },
    )
}

/// Writing end of the ring. Owned by the real-time thread.
pub struct Producer {
    shared: Arc<Shared>,
    head: u64,
    epoch: Instant,
}

impl Producer {
    /// Publish a record stamped with the time since the ring was created.
    #[inline]
    pub fn publish(&mut self, kind: EventKind, payload: &str, extra: u64) {
        let now = self.epoch.elapsed().as_nanos() as u64;
        self.publish_at(kind, payload, extra, now);
    }

    /// Publish a record with an explicit timestamp.
    #[inline]
    pub fn publish_at(&mut self, kind: EventKind, payload: &str, extra: u64, timestamp: u64) {
        self.publish_record(&EventRecord::new(kind, payload, extra, timestamp));
    }

    pub fn publish_record(&mut self, record: &EventRecord) {
        let cursor = self.head;
        let (_, slot) = self.shared.slot(cursor);

        slot.seq.store(SLOT_BUSY, Ordering::Relaxed);
        fence(Ordering::Release);
        slot.store(record);
        slot.seq.store(cursor + 1, Ordering::Release);

        self.head = cursor + 1;
        self.shared.head.store(self.head, Ordering::Release);
    }

    /// Records published and not yet released by the consumer (may exceed the capacity when
    /// the consumer is being lapped).
    pub fn backlog(&self) -> u64 {
        self.head.saturating_sub(self.shared.tail.load(Ordering::Acquire))
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Nanoseconds on the clock `publish` stamps records with.
    pub fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// A record taken from the ring and not yet released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    cursor: u64,
    index: usize,
    record: EventRecord,
}

impl SlotRef {
    /// Sequence number of the record (0 for the first record ever published).
    pub fn sequence(&self) -> u64 {
        self.cursor
    }

    /// Slot the record was read from.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn record(&self) -> &EventRecord {
        &self.record
    }
}

impl core::ops::Deref for SlotRef {
    type Target = EventRecord;

    fn deref(&self) -> &EventRecord {
        &self.record
    }
}

/// Reading end of the ring. Owned by the telemetry drain.
pub struct Consumer {
    shared: Arc<Shared>,
    tail: u64,
    lost: u64,
}

impl Consumer {
    /// The record at `tail`, if any. Does not advance `tail`: the record must be handed back
    /// through [`Consumer::release`] before the next one can be taken.
    pub fn try_take(&mut self) -> Option<SlotRef> {
        loop {
            let head = self.shared.head.load(Ordering::Acquire);
            if head == self.tail {
                return None;
            }

            let capacity = self.shared.capacity();
            if head - self.tail > capacity {
                // Lapped: everything older than `head - capacity` has been overwritten.
                let oldest = head - capacity;
                self.lost += oldest - self.tail;
                self.set_tail(oldest);
            }

            let cursor = self.tail;
            let (index, slot) = self.shared.slot(cursor);
            let expected = cursor + 1;

            let seq0 = slot.seq.load(Ordering::Acquire);
            if seq0 == expected {
                let raw = slot.load_raw();
                fence(Ordering::Acquire);
                let seq1 = slot.seq.load(Ordering::Relaxed);
                if seq1 == expected {
                    return Some(SlotRef {
                        cursor,
                        index,
                        record: raw.decode(),
                    });
                }
            }

            // Overwritten while (or before) we looked at it.
            self.lost += 1;
            self.set_tail(cursor + 1);
        }
    }

    /// Hand back the record returned by the last [`Consumer::try_take`] and advance `tail`.
    ///
    /// Releasing anything but the current tail is a contract violation: it panics in debug
    /// builds and is ignored otherwise.
    pub fn release(&mut self, slot: SlotRef) {
        debug_assert_eq!(
            slot.cursor, self.tail,
            "released record {} but the ring tail is {}",
            slot.cursor, self.tail
        );
        if slot.cursor != self.tail {
            return;
        }
        self.set_tail(self.tail + 1);
    }

    /// Number of records overwritten before they could be read.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn is_empty(&self) -> bool {
        self.shared.head.load(Ordering::Acquire) == self.tail
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    fn set_tail(&mut self, tail: u64) {
        self.tail = tail;
        self.shared.tail.store(tail, Ordering::Release);
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_has_nothing_to_take() {
        let (_producer, mut consumer) = event_ring(4);
        assert!(consumer.is_empty());
        assert_eq!(consumer.try_take(), None);
    }

    #[test]
    fn take_does_not_advance_until_release() {
        let (mut producer, mut consumer) = event_ring(4);
        producer.publish_at(EventKind::Debug, "one", 1, 10);
        producer.publish_at(EventKind::Debug, "two", 2, 20);

        let first = consumer.try_take().unwrap();
        assert_eq!(consumer.try_take().unwrap(), first);
        assert_eq!(producer.backlog(), 2);

        consumer.release(first);
        let second = consumer.try_take().unwrap();
        assert_eq!(second.extra, 2);
        assert_eq!(second.payload.as_str(), "two");
        consumer.release(second);
        assert!(consumer.is_empty());
        assert_eq!(producer.backlog(), 0);
    }

    #[test]
    fn full_lap_is_not_mistaken_for_empty() {
        let (mut producer, mut consumer) = event_ring(4);
        for i in 0..4 {
            producer.publish_at(EventKind::DebugWithValue, "v", i, i);
        }
        assert!(!consumer.is_empty());
        let slot = consumer.try_take().unwrap();
        assert_eq!(slot.extra, 0);
        assert_eq!(consumer.lost(), 0);
    }

    #[test]
    #[should_panic(expected = "ring tail")]
    #[cfg(debug_assertions)]
    fn releasing_a_stale_slot_panics_in_debug() {
        let (mut producer, mut consumer) = event_ring(4);
        producer.publish_at(EventKind::Debug, "a", 0, 0);
        producer.publish_at(EventKind::Debug, "b", 0, 0);
        let first = consumer.try_take().unwrap();
        consumer.release(first);
        consumer.release(first);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn releasing_a_stale_slot_is_ignored_in_release() {
        let (mut producer, mut consumer) = event_ring(4);
        producer.publish_at(EventKind::DebugWithValue, "a", 1, 0);
        producer.publish_at(EventKind::DebugWithValue, "b", 2, 0);
        let first = consumer.try_take().unwrap();
        consumer.release(first);
        consumer.release(first);

        let second = consumer.try_take().unwrap();
        assert_eq!(second.extra, 2);
        consumer.release(second);
        assert!(consumer.is_empty());
        assert_eq!(consumer.lost(), 0);
    }
}
