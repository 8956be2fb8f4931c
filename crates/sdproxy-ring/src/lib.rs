//! Single-producer/single-consumer telemetry ring.
//!
//! The real-time command thread must never block, so it reports what it is doing by publishing
//! small fixed-size records into this ring; a non-real-time consumer drains and logs them.
//!
//! - Fixed capacity, no allocation after [`event_ring`] returns.
//! - [`Producer::publish`] never blocks and never fails. A producer that laps the consumer
//!   overwrites the oldest records; the consumer notices (every slot carries the sequence
//!   number of the record in it), skips to the oldest surviving record and counts the loss.
//! - Payload text is copied into the slot, so no reference crosses threads.
//! - Exactly one [`Producer`] and one [`Consumer`] exist per ring; neither is `Clone`.

mod event;
mod ring;
mod sync;

pub use event::{EventKind, EventPayload, EventRecord, PAYLOAD_CAPACITY};
pub use ring::{event_ring, Consumer, Producer, SlotRef, DEFAULT_CAPACITY};
