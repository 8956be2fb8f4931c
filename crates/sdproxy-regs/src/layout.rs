//! Register file layout of the FPGA SD card block.
//!
//! All registers are 32 bits wide. Command arguments and response words travel big-endian
//! inside the 32-bit words, i.e. byte 0 of a protocol-engine buffer lands in bits 31..24.
//!
//! ```text
//! 0x00 CONTROL   [w]    b0 enable, b1 send, b3 136-bit, b4/b5 irq enables,
//!                       b23..16 command, b24 auto-crc7, b31..25 crc7
//! 0x04 STATUS    [r,wc] b0 new cmd (WC), b1 cmd sent (WC), b2 powered, b3 cmd wire,
//!                       b4 new data, b5 data complete, b6 data crc error, b7 busy sent,
//!                       b8 in flight, b15..9 own crc7, b23..16 command, b24 end bit,
//!                       b31..25 crc7
//! 0x08 POINTER   [w]    b15..0 buffer offset, b31..16 length
//! 0x0c DATCTRL   [w]    b0 enable, b1 send, b2 4-bit, b4 auto-crc16, b5 busy,
//!                       b6 auto-busy, b11..8 crc status token
//! 0x10 ARG       [rw]   received argument / response word 0
//! 0x14..0x1c ARG2..4    response words 1..3 (136-bit responses only)
//! ```
//!
//! The command thread owns CONTROL, STATUS and ARG*; the data thread owns POINTER, DATCTRL and
//! the data buffer.

use bitflags::bitflags;

pub mod offset {
    pub const CONTROL: usize = 0x00;
    pub const STATUS: usize = 0x04;
    pub const POINTER: usize = 0x08;
    pub const DATA_CONTROL: usize = 0x0c;
    pub const ARG: usize = 0x10;
    pub const ARG2: usize = 0x14;
    pub const ARG3: usize = 0x18;
    pub const ARG4: usize = 0x1c;

    /// Response words in the order they are filled for a 136-bit response.
    pub const RESPONSE_WORDS: [usize; 4] = [ARG, ARG2, ARG3, ARG4];

    /// Size of the register file in bytes.
    pub const SIZE: usize = 0x20;
}

/// Bit set on commands travelling host → card (the "transmission bit" of the 48-bit frame).
pub const COMMAND_HOST_TO_CARD: u8 = 0x40;

/// Mask extracting the 6-bit command index from a command byte.
pub const COMMAND_INDEX_MASK: u8 = 0x3f;

pub const CONTROL_COMMAND_SHIFT: u32 = 16;
pub const CONTROL_CRC7_SHIFT: u32 = 25;

pub const STATUS_OWN_CRC7_SHIFT: u32 = 9;
pub const STATUS_COMMAND_SHIFT: u32 = 16;
pub const STATUS_END_BIT: u32 = 1 << 24;
pub const STATUS_CRC7_SHIFT: u32 = 25;

pub const POINTER_OFFSET_MASK: u32 = 0x0000_ffff;
pub const POINTER_LEN_SHIFT: u32 = 16;

pub const DATA_CONTROL_CRC_STATUS_SHIFT: u32 = 8;
pub const DATA_CONTROL_CRC_STATUS_MASK: u32 = 0xf << DATA_CONTROL_CRC_STATUS_SHIFT;

/// Largest block the data buffer is used for.
pub const MAX_SECTOR_BYTES: usize = 512;

bitflags! {
    /// Flag bits of the CONTROL register. The command and CRC7 fields are built with
    /// [`control_word`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Control: u32 {
        const ENABLE = 1 << 0;
        const SEND = 1 << 1;
        const LONG_RESPONSE = 1 << 3;
        const IRQ_NEW_COMMAND = 1 << 4;
        const IRQ_REST = 1 << 5;
        const AUTO_CRC7 = 1 << 24;
    }
}

bitflags! {
    /// Flag bits of the STATUS register. `NEW_COMMAND` and `COMPLETE` are write-one-to-clear.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        const NEW_COMMAND = 1 << 0;
        const COMPLETE = 1 << 1;
        const POWERED = 1 << 2;
        const CMD_WIRE = 1 << 3;
        const NEW_DATA = 1 << 4;
        const DATA_COMPLETE = 1 << 5;
        const DATA_CRC_ERROR = 1 << 6;
        const BUSY_SENT = 1 << 7;
        const IN_FLIGHT = 1 << 8;
    }
}

bitflags! {
    /// Flag bits of the DATCTRL register.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct DataControl: u32 {
        const ENABLE = 1 << 0;
        const SEND = 1 << 1;
        const FOUR_BIT = 1 << 2;
        const AUTO_CRC16 = 1 << 4;
        const BUSY = 1 << 5;
        const AUTO_BUSY = 1 << 6;
    }
}

/// CRC status token sent by the card after a host → card data block.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    None = 0x0,
    Accepted = 0x5,
    CrcError = 0xb,
    WriteError = 0xd,
}

impl CrcStatus {
    pub const fn bits(self) -> u32 {
        (self as u32) << DATA_CONTROL_CRC_STATUS_SHIFT
    }
}

/// Build a CONTROL register value.
#[inline]
pub const fn control_word(flags: Control, command: u8, crc7: u8) -> u32 {
    flags.bits()
        | ((command as u32) << CONTROL_COMMAND_SHIFT)
        | (((crc7 & 0x7f) as u32) << CONTROL_CRC7_SHIFT)
}

/// Build a POINTER register value.
#[inline]
pub const fn pointer_word(buffer_offset: u16, len: u16) -> u32 {
    ((len as u32) << POINTER_LEN_SHIFT) | (buffer_offset as u32 & POINTER_OFFSET_MASK)
}

/// Build a DATCTRL register value.
#[inline]
pub const fn data_control_word(flags: DataControl, crc_status: CrcStatus) -> u32 {
    flags.bits() | crc_status.bits()
}

/// A raw STATUS register value with field accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWord(pub u32);

impl StatusWord {
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn flags(self) -> Status {
        Status::from_bits_truncate(self.0)
    }

    #[inline]
    pub const fn has(self, flag: Status) -> bool {
        self.0 & flag.bits() != 0
    }

    /// The full received command byte (start/transmission bits included).
    #[inline]
    pub const fn command_byte(self) -> u8 {
        (self.0 >> STATUS_COMMAND_SHIFT) as u8
    }

    /// The 6-bit SD command index.
    #[inline]
    pub const fn command_index(self) -> u8 {
        self.command_byte() & COMMAND_INDEX_MASK
    }

    /// CRC7 received with the command.
    #[inline]
    pub const fn crc7(self) -> u8 {
        ((self.0 >> STATUS_CRC7_SHIFT) & 0x7f) as u8
    }

    /// CRC7 the hardware computed itself (valid while `NEW_COMMAND` is set).
    #[inline]
    pub const fn own_crc7(self) -> u8 {
        ((self.0 >> STATUS_OWN_CRC7_SHIFT) & 0x7f) as u8
    }

    #[inline]
    pub const fn end_bit(self) -> bool {
        self.0 & STATUS_END_BIT != 0
    }

    /// Cycles between the end of the response and the hardware noticing completion.
    ///
    /// Shares bits 23..16 with the command field; only meaningful while `COMPLETE` is set and
    /// `NEW_COMMAND` is not.
    #[inline]
    pub const fn completion_delay(self) -> u8 {
        self.command_byte()
    }
}

impl From<u32> for StatusWord {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
