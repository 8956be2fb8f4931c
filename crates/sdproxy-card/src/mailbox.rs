//! Hand-off of data jobs from the command half to the data half.
//!
//! A job is packed with a 28-bit generation into one `u64` ticket, so posting is a single
//! atomic store and two identical commands in a row are still told apart. Generation 0 is
//! reserved for [`Ticket::IDLE`].

use std::sync::atomic::{AtomicU64, Ordering};

const GENERATION_SHIFT: u32 = 36;
const GENERATION_MASK: u32 = 0x0fff_ffff;
const KIND_SHIFT: u32 = 32;
const PAYLOAD_MASK: u64 = (1 << KIND_SHIFT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Job {
    Idle,
    ReadBlock { lba: u64 },
    ReadBlocks { lba: u64 },
    SdStatus { wide_bus: bool },
    Scr,
}

impl Job {
    fn encode(self) -> (u64, u64) {
        match self {
            Job::Idle => (0, 0),
            Job::ReadBlock { lba } => (1, lba),
            Job::ReadBlocks { lba } => (2, lba),
            Job::SdStatus { wide_bus } => (3, wide_bus as u64),
            Job::Scr => (4, 0),
        }
    }

    fn decode(kind: u64, payload: u64) -> Self {
        match kind {
            1 => Job::ReadBlock { lba: payload },
            2 => Job::ReadBlocks { lba: payload },
            3 => Job::SdStatus {
                wide_bus: payload != 0,
            },
            4 => Job::Scr,
            _ => Job::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket(u64);

impl Ticket {
    pub(crate) const IDLE: Ticket = Ticket(0);

    pub(crate) fn new(generation: u32, job: Job) -> Self {
        let (kind, payload) = job.encode();
        debug_assert!(payload <= PAYLOAD_MASK);
        Self(
            u64::from(generation & GENERATION_MASK) << GENERATION_SHIFT
                | kind << KIND_SHIFT
                | payload & PAYLOAD_MASK,
        )
    }

    pub(crate) fn job(self) -> Job {
        Job::decode((self.0 >> KIND_SHIFT) & 0xf, self.0 & PAYLOAD_MASK)
    }
}

/// The latest posted job and the last job the data half finished.
#[derive(Debug)]
pub(crate) struct Mailbox {
    posted: AtomicU64,
    finished: AtomicU64,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {
            posted: AtomicU64::new(Ticket::IDLE.0),
            finished: AtomicU64::new(Ticket::IDLE.0),
        }
    }

    pub(crate) fn post(&self, ticket: Ticket) {
        self.posted.store(ticket.0, Ordering::Release);
    }

    pub(crate) fn latest(&self) -> Ticket {
        Ticket(self.posted.load(Ordering::Acquire))
    }

    pub(crate) fn finish(&self, ticket: Ticket) {
        self.finished.store(ticket.0, Ordering::Release);
    }

    pub(crate) fn finished(&self) -> Ticket {
        Ticket(self.finished.load(Ordering::Acquire))
    }
}

/// Generation counter on the posting side. Never hands out 0.
#[derive(Debug, Default)]
pub(crate) struct Generations(u32);

impl Generations {
    pub(crate) fn next(&mut self) -> u32 {
        self.0 = match self.0.wrapping_add(1) & GENERATION_MASK {
            0 => 1,
            next => next,
        };
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_keep_job_and_generation_apart() {
        let job = Job::ReadBlocks {
            lba: u64::from(u32::MAX),
        };
        let a = Ticket::new(1, job);
        let b = Ticket::new(2, job);
        assert_ne!(a, b);
        assert_eq!(a.job(), job);
        assert_eq!(b.job(), job);
        assert_eq!(
            Ticket::new(7, Job::SdStatus { wide_bus: true }).job(),
            Job::SdStatus { wide_bus: true }
        );
        assert_eq!(Ticket::IDLE.job(), Job::Idle);
    }

    #[test]
    fn generations_wrap_past_zero() {
        let mut generations = Generations(GENERATION_MASK - 1);
        assert_eq!(generations.next(), GENERATION_MASK);
        assert_eq!(generations.next(), 1);
        assert_eq!(generations.next(), 2);
    }

    #[test]
    fn idle_post_is_distinct_from_the_initial_ticket() {
        let mut generations = Generations(GENERATION_MASK);
        let ticket = Ticket::new(generations.next(), Job::Idle);
        assert_ne!(ticket, Ticket::IDLE);
        assert_eq!(ticket.job(), Job::Idle);
    }
}
