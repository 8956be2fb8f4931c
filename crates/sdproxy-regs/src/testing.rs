//! In-memory register file for exercising register protocols without hardware.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::bus::RegisterBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegWrite {
    pub offset: usize,
    pub value: u32,
}

impl RegWrite {
    pub const fn new(offset: usize, value: u32) -> Self {
        Self { offset, value }
    }
}

/// A register file backed by plain memory that records every write.
///
/// Offsets registered with [`FakeRegisters::with_write_one_to_clear`] behave like hardware
/// W1C status registers: writing a 1 clears that bit, writing a 0 leaves it alone. Everything
/// else stores the written value.
#[derive(Debug)]
pub struct FakeRegisters {
    words: Box<[AtomicU32]>,
    w1c: Vec<usize>,
    log: Mutex<Vec<RegWrite>>,
    reads: AtomicU32,
}

impl FakeRegisters {
    pub fn new(len_bytes: usize) -> Self {
        assert_eq!(len_bytes % 4, 0, "register file length must be word aligned");
        Self {
            words: (0..len_bytes / 4).map(|_| AtomicU32::new(0)).collect(),
            w1c: Vec::new(),
            log: Mutex::new(Vec::new()),
            reads: AtomicU32::new(0),
        }
    }

    pub fn with_write_one_to_clear(mut self, offset: usize) -> Self {
        self.w1c.push(offset);
        self
    }

    /// Set a register from the "hardware" side. Not recorded as a write.
    pub fn set(&self, offset: usize, value: u32) {
        self.words[offset / 4].store(value, Ordering::SeqCst);
    }

    /// Current register contents, without counting as a bus read.
    pub fn get(&self, offset: usize) -> u32 {
        self.words[offset / 4].load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<RegWrite> {
        self.log.lock().expect("register log poisoned").clone()
    }

    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|w| w.offset == offset)
            .map(|w| w.value)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.log.lock().expect("register log poisoned").clear();
    }

    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl RegisterBus for FakeRegisters {
    fn read32(&self, offset: usize) -> u32 {
        assert_eq!(offset % 4, 0, "unaligned read at {offset:#x}");
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.get(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        assert_eq!(offset % 4, 0, "unaligned write at {offset:#x}");
        self.log
            .lock()
            .expect("register log poisoned")
            .push(RegWrite::new(offset, value));
        let word = &self.words[offset / 4];
        if self.w1c.contains(&offset) {
            word.fetch_and(!value, Ordering::SeqCst);
        } else {
            word.store(value, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_one_to_clear_only_clears_written_ones() {
        let regs = FakeRegisters::new(8).with_write_one_to_clear(4);
        regs.set(4, 0b1011);
        regs.write32(4, 0b0001);
        assert_eq!(regs.get(4), 0b1010);
        regs.write32(4, 0);
        assert_eq!(regs.get(4), 0b1010);

        regs.write32(0, 0b0001);
        assert_eq!(regs.get(0), 0b0001);
        assert_eq!(regs.writes().len(), 3);
    }
}
