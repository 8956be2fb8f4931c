use std::sync::atomic::{AtomicBool, Ordering};

use sdproxy_regs::RegisterBus;

/// Everything the command and data loops share: the register file, the data buffer and the
/// "command in flight" flag.
///
/// The command loop only touches CONTROL, STATUS and ARG*; the data loop only touches POINTER,
/// DATCTRL and the data buffer, so no lock guards the registers.
#[derive(Debug)]
pub struct BridgeContext<B> {
    regs: B,
    buffer: B,
    command_in_flight: AtomicBool,
}

impl<B: RegisterBus> BridgeContext<B> {
    /// `regs` is the control register file, `buffer` the block data buffer.
    pub fn new(regs: B, buffer: B) -> Self {
        Self {
            regs,
            buffer,
            command_in_flight: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn regs(&self) -> &B {
        &self.regs
    }

    #[inline]
    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Whether the command loop is inside the protocol engine right now.
    ///
    /// Advisory only: the data loop checks it once per pass and may race with a command that
    /// starts right after.
    #[inline]
    pub fn command_in_flight(&self) -> bool {
        self.command_in_flight.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_command_in_flight(&self, in_flight: bool) {
        self.command_in_flight.store(in_flight, Ordering::Release);
    }
}
