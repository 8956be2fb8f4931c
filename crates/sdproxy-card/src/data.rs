use std::sync::Arc;

use sdproxy_core::SdDataSource;

use crate::backend::{BlockBackend, SECTOR_SIZE};
use crate::mailbox::{Job, Mailbox, Ticket};
use crate::registers;

/// Data half of the card. Reads the backend on the data thread.
#[derive(Debug)]
pub struct CardData<B> {
    backend: B,
    mailbox: Arc<Mailbox>,
    ticket: Ticket,
    job: Job,
    block: [u8; SECTOR_SIZE],
    len: usize,
    pos: usize,
}

impl<B: BlockBackend> CardData<B> {
    pub(crate) fn new(backend: B, mailbox: Arc<Mailbox>) -> Self {
        Self {
            backend,
            mailbox,
            ticket: Ticket::IDLE,
            job: Job::Idle,
            block: [0; SECTOR_SIZE],
            len: 0,
            pos: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Drop whatever is staged when the command half posted something new.
    fn follow_mailbox(&mut self) {
        let latest = self.mailbox.latest();
        if latest != self.ticket {
            self.ticket = latest;
            self.job = latest.job();
            self.len = 0;
            self.pos = 0;
        }
    }

    fn stage(&mut self, bytes: &[u8]) {
        self.block[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        self.pos = 0;
    }

    fn finish(&mut self) {
        self.job = Job::Idle;
        self.mailbox.finish(self.ticket);
    }

    /// Stage the next block of the current job. Returns `false` when the job has nothing left.
    fn load_next(&mut self) -> bool {
        match self.job {
            Job::Idle => false,
            Job::ReadBlock { lba } | Job::ReadBlocks { lba } => {
                if let Err(err) = self.backend.read_sector(lba, &mut self.block) {
                    tracing::warn!(lba, error = %err, "sector read failed");
                    self.finish();
                    return false;
                }
                tracing::trace!(lba, "sector staged");
                self.len = SECTOR_SIZE;
                self.pos = 0;
                self.job = match self.job {
                    Job::ReadBlocks { .. } if lba + 1 < self.backend.sector_count() => {
                        Job::ReadBlocks { lba: lba + 1 }
                    }
                    _ => Job::Idle,
                };
                true
            }
            Job::SdStatus { wide_bus } => {
                self.stage(&registers::sd_status(wide_bus));
                self.job = Job::Idle;
                true
            }
            Job::Scr => {
                self.stage(&registers::SCR);
                self.job = Job::Idle;
                true
            }
        }
    }
}

impl<B: BlockBackend> SdDataSource for CardData<B> {
    fn data_ready(&mut self) -> bool {
        self.follow_mailbox();
        self.pos < self.len || self.load_next()
    }

    fn read_next_byte(&mut self) -> u8 {
        if self.pos >= self.len {
            return 0;
        }
        let byte = self.block[self.pos];
        self.pos += 1;
        if self.pos == self.len && self.job == Job::Idle {
            self.finish();
        }
        byte
    }
}
