//! Contract between the bridge and the SD protocol engine that actually answers commands.
//!
//! The protocol engine is split in two halves because the bridge runs them on different
//! threads: [`SdProtocol`] is called from the real-time command loop and must answer without
//! blocking, [`SdDataSource`] is drained by the data loop and may do I/O.

use thiserror::Error;

/// Response length of R1/R3/R6/R7 style 48-bit responses (payload only).
pub const SHORT_RESPONSE_LEN: usize = 4;
/// Response length of 136-bit R2 responses (payload only).
pub const LONG_RESPONSE_LEN: usize = 16;
/// Size of the buffer handed to [`SdProtocol::dispatch`].
pub const MAX_RESPONSE_LEN: usize = LONG_RESPONSE_LEN;

/// A command received from the SD host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdRequest {
    /// 6-bit command index (`17` for CMD17).
    pub command: u8,
    pub argument: u32,
    pub crc7: u8,
}

impl SdRequest {
    pub const fn new(command: u8, argument: u32) -> Self {
        Self {
            command,
            argument,
            crc7: 0,
        }
    }
}

/// The protocol engine cannot answer a command. The exchange is dropped and the host times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("illegal command CMD{0}")]
    IllegalCommand(u8),

    #[error("CMD{command} not accepted in state {state}")]
    WrongState { command: u8, state: &'static str },

    #[error("argument {argument:#010x} out of range for CMD{command}")]
    OutOfRange { command: u8, argument: u32 },
}

/// Block I/O the protocol engine queued while answering a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRequest {
    /// Capacity query; the value is the size in bytes.
    GetSize(u64),
    ReadSector(u64),
    WriteSector(u64),
}

/// Command half of the protocol engine. Runs on the real-time thread.
pub trait SdProtocol {
    /// Answer `request`, writing the response payload into `response`.
    ///
    /// Returns the number of response bytes: `0` (no response), [`SHORT_RESPONSE_LEN`] or
    /// [`LONG_RESPONSE_LEN`]. Any other length is treated like an error by the caller.
    fn dispatch(
        &mut self,
        request: &SdRequest,
        response: &mut [u8; MAX_RESPONSE_LEN],
    ) -> Result<usize, ProtocolError>;

    /// Block I/O queued by the last [`SdProtocol::dispatch`], if any.
    fn take_block_request(&mut self) -> Option<BlockRequest> {
        None
    }
}

/// Data half of the protocol engine. Runs on the data thread.
pub trait SdDataSource {
    fn data_ready(&mut self) -> bool;

    /// Next byte of the outgoing block. Only meaningful while [`SdDataSource::data_ready`]
    /// returns `true`.
    fn read_next_byte(&mut self) -> u8;
}

impl<T: SdProtocol + ?Sized> SdProtocol for Box<T> {
    fn dispatch(
        &mut self,
        request: &SdRequest,
        response: &mut [u8; MAX_RESPONSE_LEN],
    ) -> Result<usize, ProtocolError> {
        (**self).dispatch(request, response)
    }

    fn take_block_request(&mut self) -> Option<BlockRequest> {
        (**self).take_block_request()
    }
}

impl<T: SdDataSource + ?Sized> SdDataSource for Box<T> {
    fn data_ready(&mut self) -> bool {
        (**self).data_ready()
    }

    fn read_next_byte(&mut self) -> u8 {
        (**self).read_next_byte()
    }
}
