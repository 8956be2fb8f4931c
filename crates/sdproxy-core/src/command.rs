//! Real-time command loop.
//!
//! One pass of [`CommandEngine::poll_once`] walks
//! `Idle -> Decoding -> Dispatching -> Responding -> Acknowledging -> Idle`, short-circuiting
//! back to `Idle` when STATUS shows nothing to do. The only side effects on the way are
//! register accesses; telemetry is published after the acknowledgement is on the bus.

use std::sync::atomic::{AtomicBool, Ordering};

use sdproxy_regs::layout::{control_word, offset, Control, Status, StatusWord};
use sdproxy_regs::RegisterBus;
use sdproxy_ring::{EventKind, Producer};

use crate::context::BridgeContext;
use crate::protocol::{
    BlockRequest, ProtocolError, SdProtocol, SdRequest, LONG_RESPONSE_LEN, MAX_RESPONSE_LEN,
    SHORT_RESPONSE_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Decoding(StatusWord),
    Dispatching(SdRequest),
    Responding { command: u8, len: usize },
    Acknowledging,
}

/// Why an exchange was dropped without touching the response registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The protocol engine answered with a length other than 0, 4 or 16.
    BadResponseLength(usize),
    Protocol(ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Answered { command: u8, response_len: usize },
    Rejected { command: u8, rejection: Rejection },
}

impl Exchange {
    pub fn command(&self) -> u8 {
        match *self {
            Self::Answered { command, .. } | Self::Rejected { command, .. } => command,
        }
    }
}

/// What a single [`CommandEngine::poll_once`] did.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// STATUS as read at the start of the pass.
    pub status: StatusWord,
    /// A response transmission completed and was acknowledged.
    pub completed: bool,
    pub exchange: Option<Exchange>,
}

impl PollOutcome {
    pub fn is_idle(&self) -> bool {
        !self.completed && self.exchange.is_none()
    }
}

/// Polls STATUS, hands new commands to the protocol engine and writes the responses back.
pub struct CommandEngine<'a, B, P> {
    ctx: &'a BridgeContext<B>,
    protocol: P,
    events: Producer,
    slow_completion_threshold: u8,
    response: [u8; MAX_RESPONSE_LEN],
    /// STATUS (minus the completion bit) of the last rejected exchange, to report a command
    /// the host has not withdrawn yet only once.
    last_rejected: Option<u32>,
}

impl<'a, B: RegisterBus, P: SdProtocol> CommandEngine<'a, B, P> {
    pub fn new(
        ctx: &'a BridgeContext<B>,
        protocol: P,
        events: Producer,
        slow_completion_threshold: u8,
    ) -> Self {
        Self {
            ctx,
            protocol,
            events,
            slow_completion_threshold,
            response: [0; MAX_RESPONSE_LEN],
            last_rejected: None,
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Enable command reception. Must run once before the first poll.
    pub fn arm(&mut self, cpu: Option<usize>) {
        self.ctx
            .regs()
            .write32(offset::CONTROL, Control::ENABLE.bits());
        self.events.publish(
            EventKind::Started,
            "Command loop started",
            cpu.map_or(u64::MAX, |cpu| cpu as u64),
        );
    }

    /// Arm, then poll until `stop` is raised.
    pub fn run(&mut self, cpu: Option<usize>, stop: &AtomicBool) {
        self.arm(cpu);
        while !stop.load(Ordering::Relaxed) {
            let _ = self.poll_once();
            core::hint::spin_loop();
        }
    }

    pub fn poll_once(&mut self) -> PollOutcome {
        let ctx = self.ctx;
        let regs = ctx.regs();
        let mut outcome = PollOutcome {
            status: StatusWord(0),
            completed: false,
            exchange: None,
        };
        let mut clear = Status::empty();
        let mut seen_at = 0;

        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => {
                    let status = StatusWord(regs.read32(offset::STATUS));
                    outcome.status = status;
                    if status.has(Status::COMPLETE) {
                        clear |= Status::COMPLETE;
                        outcome.completed = true;
                    }
                    if status.has(Status::NEW_COMMAND) {
                        seen_at = self.events.now();
                        Phase::Decoding(status)
                    } else {
                        self.last_rejected = None;
                        if clear.is_empty() {
                            break;
                        }
                        Phase::Acknowledging
                    }
                }
                Phase::Decoding(status) => Phase::Dispatching(SdRequest {
                    command: status.command_index(),
                    argument: regs.read32(offset::ARG),
                    crc7: status.crc7(),
                }),
                Phase::Dispatching(request) => {
                    ctx.set_command_in_flight(true);
                    let result = self.protocol.dispatch(&request, &mut self.response);
                    ctx.set_command_in_flight(false);

                    match checked_len(result) {
                        Ok(len) => Phase::Responding {
                            command: request.command,
                            len,
                        },
                        Err(rejection) => {
                            outcome.exchange = Some(Exchange::Rejected {
                                command: request.command,
                                rejection,
                            });
                            // The new-command bit stays set; the host times out.
                            if clear.is_empty() {
                                break;
                            }
                            Phase::Acknowledging
                        }
                    }
                }
                Phase::Responding { command, len } => {
                    self.write_response(command, len);
                    clear |= Status::NEW_COMMAND;
                    outcome.exchange = Some(Exchange::Answered {
                        command,
                        response_len: len,
                    });
                    Phase::Acknowledging
                }
                Phase::Acknowledging => {
                    regs.write32(offset::STATUS, clear.bits());
                    break;
                }
            };
        }

        if !outcome.is_idle() {
            self.report(&outcome, seen_at);
        }
        outcome
    }

    fn write_response(&self, command: u8, len: usize) {
        let regs = self.ctx.regs();
        let mut flags = Control::ENABLE | Control::SEND | Control::AUTO_CRC7;
        match len {
            LONG_RESPONSE_LEN => {
                for (word, reg) in self.response.chunks_exact(4).zip(offset::RESPONSE_WORDS) {
                    regs.write32(reg, u32::from_be_bytes([word[0], word[1], word[2], word[3]]));
                }
                flags |= Control::LONG_RESPONSE;
            }
            SHORT_RESPONSE_LEN => {
                let r = &self.response;
                regs.write32(offset::ARG, u32::from_be_bytes([r[0], r[1], r[2], r[3]]));
            }
            // Nothing to send; acknowledging is enough.
            _ => return,
        }
        regs.write32(offset::CONTROL, control_word(flags, command, 0));
    }

    fn report(&mut self, outcome: &PollOutcome, seen_at: u64) {
        if let Some(exchange) = outcome.exchange {
            let block = self.protocol.take_block_request();
            match exchange {
                Exchange::Answered {
                    command,
                    response_len,
                } => {
                    self.last_rejected = None;
                    self.events.publish_at(
                        EventKind::CommandReceived,
                        "New command",
                        u64::from(command),
                        seen_at,
                    );
                    if response_len == 0 {
                        self.events
                            .publish(EventKind::NoResponse, "No response", u64::from(command));
                    }
                    self.report_block(block);
                    self.events.publish(
                        EventKind::CommandProcessed,
                        "Processed command",
                        u64::from(command),
                    );
                }
                Exchange::Rejected { command, rejection } => {
                    let key = outcome.status.raw() & !Status::COMPLETE.bits();
                    if self.last_rejected != Some(key) {
                        self.last_rejected = Some(key);
                        match rejection {
                            Rejection::BadResponseLength(len) => self.events.publish(
                                EventKind::BadResponseLength,
                                "Bad response length",
                                len as u64,
                            ),
                            Rejection::Protocol(_) => self.events.publish(
                                EventKind::ProtocolEngineError,
                                "Protocol engine refused command",
                                u64::from(command),
                            ),
                        }
                    }
                    self.report_block(block);
                }
            }
        }

        if outcome.completed {
            let status = outcome.status;
            self.events.publish(
                EventKind::CommandComplete,
                "Command complete",
                u64::from(status.raw()),
            );
            // Bits 23..16 hold the completion delay unless a new command overwrote them.
            if !status.has(Status::NEW_COMMAND)
                && status.completion_delay() > self.slow_completion_threshold
            {
                self.events.publish(
                    EventKind::SlowCompletion,
                    "Warning: processing took too long",
                    u64::from(status.completion_delay()),
                );
            }
        }
    }

    fn report_block(&mut self, block: Option<BlockRequest>) {
        match block {
            Some(BlockRequest::GetSize(bytes)) => {
                self.events.publish(EventKind::GetSize, "Get size", bytes)
            }
            Some(BlockRequest::ReadSector(lba)) => {
                self.events.publish(EventKind::ReadSector, "Read sector", lba)
            }
            Some(BlockRequest::WriteSector(lba)) => {
                self.events.publish(EventKind::WriteSector, "Write sector", lba)
            }
            None => {}
        }
    }
}

fn checked_len(result: Result<usize, ProtocolError>) -> Result<usize, Rejection> {
    match result {
        Ok(len @ (0 | SHORT_RESPONSE_LEN | LONG_RESPONSE_LEN)) => Ok(len),
        Ok(len) => Err(Rejection::BadResponseLength(len)),
        Err(err) => Err(Rejection::Protocol(err)),
    }
}
