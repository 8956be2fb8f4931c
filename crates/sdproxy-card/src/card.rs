use std::sync::Arc;

use bitflags::bitflags;
use sdproxy_core::{
    BlockRequest, ProtocolError, SdProtocol, SdRequest, LONG_RESPONSE_LEN, MAX_RESPONSE_LEN,
    SHORT_RESPONSE_LEN,
};

use crate::backend::{BlockBackend, SECTOR_SIZE};
use crate::data::CardData;
use crate::mailbox::{Generations, Job, Mailbox, Ticket};
use crate::registers::{
    self, CardIdentity, CID_LEN, CSD_LEN, OCR_HIGH_CAPACITY, OCR_POWERED_UP, OCR_VOLTAGE_WINDOW,
};

const RCA_STEP: u16 = 0x4567;
const BLOCK_LEN: u32 = 512;
const IF_COND_VOLTAGE_27_36: u32 = 0x1;

bitflags! {
    /// Card status bits reported in R1 responses. The current state field (bits 12:9) is
    /// filled in from [`CardState`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        const OUT_OF_RANGE = 1 << 31;
        const ADDRESS_ERROR = 1 << 30;
        const BLOCK_LEN_ERROR = 1 << 29;
        const WP_VIOLATION = 1 << 26;
        const ILLEGAL_COMMAND = 1 << 22;
        const READY_FOR_DATA = 1 << 8;
        const APP_CMD = 1 << 5;
    }
}

impl CardStatus {
    /// Error bits that are cleared once reported.
    const CLEAR_ON_READ: CardStatus = CardStatus::OUT_OF_RANGE
        .union(CardStatus::ADDRESS_ERROR)
        .union(CardStatus::BLOCK_LEN_ERROR)
        .union(CardStatus::WP_VIOLATION)
        .union(CardStatus::ILLEGAL_COMMAND);

    pub const STATE_SHIFT: u32 = 9;
    pub const STATE_MASK: u32 = 0xf << Self::STATE_SHIFT;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready,
    Ident,
    Standby,
    Transfer,
    SendingData,
}

impl CardState {
    /// Value of the CURRENT_STATE field.
    pub const fn code(self) -> u32 {
        match self {
            CardState::Idle => 0,
            CardState::Ready => 1,
            CardState::Ident => 2,
            CardState::Standby => 3,
            CardState::Transfer => 4,
            CardState::SendingData => 5,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CardState::Idle => "idle",
            CardState::Ready => "ready",
            CardState::Ident => "ident",
            CardState::Standby => "stby",
            CardState::Transfer => "tran",
            CardState::SendingData => "data",
        }
    }
}

/// Build both halves of a card backed by `backend`.
pub fn sd_card<B: BlockBackend>(
    backend: B,
    identity: &CardIdentity,
) -> (CardCommands, CardData<B>) {
    let mailbox = Arc::new(Mailbox::new());
    let sectors = backend.sector_count();
    let commands = CardCommands {
        state: CardState::Idle,
        rca: 0,
        status: CardStatus::empty(),
        app_command: false,
        wide_bus: false,
        sectors,
        cid: registers::cid(identity),
        csd: registers::csd(sectors),
        mailbox: Arc::clone(&mailbox),
        generations: Generations::default(),
        posted: Ticket::IDLE,
        pending: None,
        refused_app_command: None,
    };
    (commands, CardData::new(backend, mailbox))
}

/// Command half of the card. Answers from memory only.
#[derive(Debug)]
pub struct CardCommands {
    state: CardState,
    rca: u16,
    status: CardStatus,
    app_command: bool,
    wide_bus: bool,
    sectors: u64,
    cid: [u8; CID_LEN],
    csd: [u8; CSD_LEN],
    mailbox: Arc<Mailbox>,
    generations: Generations,
    posted: Ticket,
    pending: Option<BlockRequest>,
    /// An application command that was refused. The bridge dispatches it again while the
    /// host still has it latched, and it must still be read as an ACMD then.
    refused_app_command: Option<SdRequest>,
}

impl CardCommands {
    pub fn state(&self) -> CardState {
        self.state
    }

    pub fn rca(&self) -> u16 {
        self.rca
    }

    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    fn post(&mut self, job: Job) {
        self.posted = Ticket::new(self.generations.next(), job);
        self.mailbox.post(self.posted);
    }

    /// Leave the data state once the data half has sent the whole block.
    fn sync_data_state(&mut self) {
        if self.state == CardState::SendingData && self.mailbox.finished() == self.posted {
            self.state = CardState::Transfer;
        }
    }

    fn expect_state(&self, command: u8, allowed: &[CardState]) -> Result<(), ProtocolError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ProtocolError::WrongState {
                command,
                state: self.state.name(),
            })
        }
    }

    fn addressed(&self, argument: u32) -> bool {
        (argument >> 16) as u16 == self.rca
    }

    fn status_word(&mut self, extra: CardStatus) -> u32 {
        let word = (self.status | extra | CardStatus::READY_FOR_DATA).bits()
            | (self.state.code() << CardStatus::STATE_SHIFT);
        self.status.remove(CardStatus::CLEAR_ON_READ);
        word
    }

    fn r1(&mut self, response: &mut [u8; MAX_RESPONSE_LEN]) -> usize {
        let word = self.status_word(CardStatus::empty());
        short(response, word)
    }

    fn r1_app(&mut self, response: &mut [u8; MAX_RESPONSE_LEN]) -> usize {
        let word = self.status_word(CardStatus::APP_CMD);
        short(response, word)
    }

    fn r6(&mut self, response: &mut [u8; MAX_RESPONSE_LEN]) -> usize {
        let status = self.status_word(CardStatus::empty());
        let word = (u32::from(self.rca) << 16)
            | ((status >> 8) & 0xc000)
            | ((status >> 6) & 0x2000)
            | (status & 0x1fff);
        short(response, word)
    }

    fn reset(&mut self) {
        self.state = CardState::Idle;
        self.rca = 0;
        self.status = CardStatus::empty();
        self.app_command = false;
        self.wide_bus = false;
        self.post(Job::Idle);
    }

    fn start_read(&mut self, lba: u64, job: Job) -> bool {
        if lba >= self.sectors {
            self.status |= CardStatus::OUT_OF_RANGE;
            return false;
        }
        self.post(job);
        self.pending = Some(BlockRequest::ReadSector(lba));
        true
    }

    fn command(
        &mut self,
        request: &SdRequest,
        response: &mut [u8; MAX_RESPONSE_LEN],
    ) -> Result<usize, ProtocolError> {
        let command = request.command;
        let argument = request.argument;
        use CardState::*;

        match command {
            // GO_IDLE_STATE
            0 => {
                self.reset();
                Ok(0)
            }
            // ALL_SEND_CID
            2 => {
                self.expect_state(command, &[Ready])?;
                self.state = Ident;
                Ok(long(response, &self.cid))
            }
            // SEND_RELATIVE_ADDR
            3 => {
                self.expect_state(command, &[Ident, Standby])?;
                self.rca = match self.rca.wrapping_add(RCA_STEP) {
                    0 => RCA_STEP,
                    rca => rca,
                };
                let len = self.r6(response);
                self.state = Standby;
                Ok(len)
            }
            // SELECT/DESELECT_CARD
            7 => {
                if self.addressed(argument) {
                    self.expect_state(command, &[Standby])?;
                    let len = self.r1(response);
                    self.state = Transfer;
                    Ok(len)
                } else {
                    if matches!(self.state, Transfer | SendingData) {
                        self.post(Job::Idle);
                        self.state = Standby;
                    }
                    Ok(0)
                }
            }
            // SEND_IF_COND
            8 => {
                self.expect_state(command, &[Idle])?;
                if (argument >> 8) & 0xf != IF_COND_VOLTAGE_27_36 {
                    return Ok(0);
                }
                Ok(short(response, argument & 0xfff))
            }
            // SEND_CSD
            9 => {
                self.expect_state(command, &[Standby])?;
                if !self.addressed(argument) {
                    return Ok(0);
                }
                self.pending = Some(BlockRequest::GetSize(self.sectors * SECTOR_SIZE as u64));
                Ok(long(response, &self.csd))
            }
            // SEND_CID
            10 => {
                self.expect_state(command, &[Standby])?;
                if !self.addressed(argument) {
                    return Ok(0);
                }
                Ok(long(response, &self.cid))
            }
            // STOP_TRANSMISSION
            12 => {
                self.expect_state(command, &[SendingData])?;
                self.post(Job::Idle);
                let len = self.r1(response);
                self.state = Transfer;
                Ok(len)
            }
            // SEND_STATUS
            13 => {
                self.expect_state(command, &[Standby, Transfer, SendingData])?;
                if !self.addressed(argument) {
                    return Ok(0);
                }
                Ok(self.r1(response))
            }
            // SET_BLOCKLEN
            16 => {
                self.expect_state(command, &[Transfer])?;
                if argument != BLOCK_LEN {
                    self.status |= CardStatus::BLOCK_LEN_ERROR;
                }
                Ok(self.r1(response))
            }
            // READ_SINGLE_BLOCK, READ_MULTIPLE_BLOCK
            17 | 18 => {
                self.expect_state(command, &[Transfer])?;
                let lba = u64::from(argument);
                let job = if command == 17 {
                    Job::ReadBlock { lba }
                } else {
                    Job::ReadBlocks { lba }
                };
                let started = self.start_read(lba, job);
                let len = self.r1(response);
                if started {
                    self.state = SendingData;
                }
                Ok(len)
            }
            // WRITE_BLOCK, WRITE_MULTIPLE_BLOCK
            24 | 25 => {
                self.expect_state(command, &[Transfer])?;
                self.status |= CardStatus::WP_VIOLATION;
                self.pending = Some(BlockRequest::WriteSector(u64::from(argument)));
                Ok(self.r1(response))
            }
            // APP_CMD
            55 => {
                if self.state != Idle && !self.addressed(argument) {
                    return Ok(0);
                }
                self.app_command = true;
                Ok(self.r1_app(response))
            }
            _ => Err(ProtocolError::IllegalCommand(command)),
        }
    }

    fn app_command(
        &mut self,
        request: &SdRequest,
        response: &mut [u8; MAX_RESPONSE_LEN],
    ) -> Result<usize, ProtocolError> {
        let command = request.command;
        let argument = request.argument;
        use CardState::*;

        match command {
            // SET_BUS_WIDTH
            6 => {
                self.expect_state(command, &[Transfer])?;
                self.wide_bus = match argument & 0x3 {
                    0 => false,
                    2 => true,
                    _ => return Err(ProtocolError::OutOfRange { command, argument }),
                };
                Ok(self.r1_app(response))
            }
            // SD_STATUS
            13 => {
                self.expect_state(command, &[Transfer])?;
                let len = self.r1_app(response);
                self.post(Job::SdStatus {
                    wide_bus: self.wide_bus,
                });
                self.state = SendingData;
                Ok(len)
            }
            // SD_SEND_OP_COND
            41 => {
                self.expect_state(command, &[Idle, Ready])?;
                let mut ocr = OCR_VOLTAGE_WINDOW;
                if argument & OCR_VOLTAGE_WINDOW != 0 {
                    ocr |= OCR_POWERED_UP | OCR_HIGH_CAPACITY;
                    self.state = Ready;
                }
                Ok(short(response, ocr))
            }
            // SEND_SCR
            51 => {
                self.expect_state(command, &[Transfer])?;
                let len = self.r1_app(response);
                self.post(Job::Scr);
                self.state = SendingData;
                Ok(len)
            }
            _ => self.command(request, response),
        }
    }
}

fn short(response: &mut [u8; MAX_RESPONSE_LEN], word: u32) -> usize {
    response[..SHORT_RESPONSE_LEN].copy_from_slice(&word.to_be_bytes());
    SHORT_RESPONSE_LEN
}

fn long(response: &mut [u8; MAX_RESPONSE_LEN], register: &[u8; LONG_RESPONSE_LEN]) -> usize {
    response.copy_from_slice(register);
    LONG_RESPONSE_LEN
}

impl SdProtocol for CardCommands {
    fn dispatch(
        &mut self,
        request: &SdRequest,
        response: &mut [u8; MAX_RESPONSE_LEN],
    ) -> Result<usize, ProtocolError> {
        self.sync_data_state();
        self.pending = None;
        let retried = self.refused_app_command.take() == Some(*request);
        let app = std::mem::take(&mut self.app_command) || retried;
        let result = if app {
            self.app_command(request, response)
        } else {
            self.command(request, response)
        };
        if app && result.is_err() {
            self.refused_app_command = Some(*request);
        }
        if let Err(ProtocolError::IllegalCommand(_)) = result {
            self.status |= CardStatus::ILLEGAL_COMMAND;
        }
        result
    }

    fn take_block_request(&mut self) -> Option<BlockRequest> {
        self.pending.take()
    }
}
