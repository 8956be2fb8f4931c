use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sdproxy_crc::{crc16_update, CRC16_XMODEM_INIT, CRC16_XMODEM_POLY};
use sdproxy_regs::layout::{
    data_control_word, offset, pointer_word, CrcStatus, DataControl, MAX_SECTOR_BYTES,
};
use sdproxy_regs::RegisterBus;

use crate::clock::Clock;
use crate::config::{BridgeConfig, BusWidth, CrcMode};
use crate::context::BridgeContext;
use crate::protocol::SdDataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSettings {
    pub max_transfer_bytes: usize,
    pub crc_mode: CrcMode,
    pub bus_width: BusWidth,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            max_transfer_bytes: MAX_SECTOR_BYTES,
            crc_mode: CrcMode::Hardware,
            bus_width: BusWidth::OneBit,
        }
    }
}

impl From<&BridgeConfig> for DataSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            max_transfer_bytes: config.max_transfer_bytes,
            crc_mode: config.crc_mode,
            bus_width: config.bus_width,
        }
    }
}

/// Result of one [`DataEngine::pump`].
#[must_use]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataTransfer {
    /// Bytes handed to the hardware, CRC included in software CRC mode.
    pub bytes: usize,
    /// 32-bit words written to the data buffer.
    pub words: usize,
}

impl DataTransfer {
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }
}

/// Packs bytes MSB-first into 32-bit words of the data buffer.
struct WordWriter<'b, B> {
    buffer: &'b B,
    stage: [u8; 4],
    bytes: usize,
    words: usize,
}

impl<'b, B: RegisterBus> WordWriter<'b, B> {
    fn new(buffer: &'b B) -> Self {
        Self {
            buffer,
            stage: [0; 4],
            bytes: 0,
            words: 0,
        }
    }

    #[inline]
    fn push(&mut self, byte: u8) {
        self.stage[self.bytes % 4] = byte;
        self.bytes += 1;
        if self.bytes % 4 == 0 {
            self.flush_word();
        }
    }

    fn flush_word(&mut self) {
        self.buffer
            .write32(self.words * 4, u32::from_be_bytes(self.stage));
        self.words += 1;
        self.stage = [0; 4];
    }

    /// Write out a trailing partial word, zero-padded.
    fn finish(mut self) -> DataTransfer {
        if self.bytes % 4 != 0 {
            self.flush_word();
        }
        DataTransfer {
            bytes: self.bytes,
            words: self.words,
        }
    }
}

/// Streams outgoing block data from the protocol engine into the FPGA data buffer.
pub struct DataEngine<'a, B, S> {
    ctx: &'a BridgeContext<B>,
    source: S,
    settings: DataSettings,
}

impl<'a, B: RegisterBus, S: SdDataSource> DataEngine<'a, B, S> {
    pub fn new(ctx: &'a BridgeContext<B>, source: S, settings: DataSettings) -> Self {
        Self {
            ctx,
            source,
            settings,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Move up to one block of ready bytes into the data buffer and start its transmission.
    ///
    /// Does nothing while a command is being dispatched, while the previous block is still
    /// going out, or when no byte is ready.
    pub fn pump(&mut self) -> DataTransfer {
        if self.ctx.command_in_flight() {
            return DataTransfer::default();
        }
        // The FPGA drops SEND once the block is on the wire.
        let datctrl = self.ctx.regs().read32(offset::DATA_CONTROL);
        if datctrl & DataControl::SEND.bits() != 0 {
            return DataTransfer::default();
        }

        let software_crc = self.settings.crc_mode == CrcMode::Software;
        let mut crc = CRC16_XMODEM_INIT;
        let mut writer = WordWriter::new(self.ctx.buffer());
        while writer.bytes < self.settings.max_transfer_bytes && self.source.data_ready() {
            let byte = self.source.read_next_byte();
            if software_crc {
                crc = crc16_update(crc, &[byte], CRC16_XMODEM_POLY);
            }
            writer.push(byte);
        }
        if writer.bytes == 0 {
            return DataTransfer::default();
        }

        let mut flags = DataControl::SEND;
        if software_crc {
            for byte in crc.to_be_bytes() {
                writer.push(byte);
            }
        } else {
            flags |= DataControl::AUTO_CRC16;
        }
        if self.settings.bus_width == BusWidth::FourBit {
            flags |= DataControl::FOUR_BIT;
        }
        let transfer = writer.finish();

        let regs = self.ctx.regs();
        regs.write32(offset::POINTER, pointer_word(0, transfer.bytes as u16));
        regs.write32(
            offset::DATA_CONTROL,
            data_control_word(flags, CrcStatus::None),
        );
        tracing::trace!(bytes = transfer.bytes, "data block queued");
        transfer
    }

    /// Pump until `stop` is raised, sleeping `interval` on `clock` after every pass.
    pub fn run(&mut self, clock: &impl Clock, interval: Duration, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            let _ = self.pump();
            clock.sleep(interval);
        }
    }
}
