use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sdproxy_core::{
    BridgeContext, BusWidth, Clock, CrcMode, DataEngine, DataSettings, DataTransfer,
    ManualClock, SdDataSource,
};
use sdproxy_crc::crc16_xmodem;
use sdproxy_regs::layout::{offset, pointer_word, DataControl};
use sdproxy_regs::testing::{FakeRegisters, RegWrite};

const BUFFER_BYTES: usize = 1024;

fn context() -> BridgeContext<FakeRegisters> {
    BridgeContext::new(
        FakeRegisters::new(offset::SIZE).with_write_one_to_clear(offset::STATUS),
        FakeRegisters::new(BUFFER_BYTES),
    )
}

#[derive(Default)]
struct Bytes(VecDeque<u8>);

impl Bytes {
    fn new(bytes: impl IntoIterator<Item = u8>) -> Self {
        Self(bytes.into_iter().collect())
    }
}

impl SdDataSource for Bytes {
    fn data_ready(&mut self) -> bool {
        !self.0.is_empty()
    }

    fn read_next_byte(&mut self) -> u8 {
        self.0.pop_front().unwrap_or(0)
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// What the FPGA does once a queued block has been clocked out.
fn block_sent(ctx: &BridgeContext<FakeRegisters>) {
    ctx.regs().set(offset::DATA_CONTROL, 0);
}

fn hardware_flags() -> u32 {
    (DataControl::SEND | DataControl::AUTO_CRC16).bits()
}

#[test]
fn full_sector_is_streamed_as_128_words() {
    let ctx = context();
    let data = pattern(512);
    let mut engine = DataEngine::new(&ctx, Bytes::new(data.clone()), DataSettings::default());

    let transfer = engine.pump();
    assert_eq!(
        transfer,
        DataTransfer {
            bytes: 512,
            words: 128
        }
    );

    let buffer = ctx.buffer().writes();
    assert_eq!(buffer.len(), 128);
    for (i, (write, chunk)) in buffer.iter().zip(data.chunks_exact(4)).enumerate() {
        assert_eq!(write.offset, i * 4);
        assert_eq!(
            write.value,
            u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        );
    }

    assert_eq!(
        ctx.regs().writes(),
        vec![
            RegWrite::new(offset::POINTER, 512 << 16),
            RegWrite::new(offset::DATA_CONTROL, hardware_flags()),
        ]
    );
}

#[test]
fn transfer_stops_at_the_sector_limit() {
    let ctx = context();
    let mut engine = DataEngine::new(&ctx, Bytes::new(pattern(600)), DataSettings::default());

    assert_eq!(engine.pump().bytes, 512);
    assert_eq!(engine.source().0.len(), 88);

    block_sent(&ctx);
    ctx.buffer().clear_writes();
    let rest = engine.pump();
    assert_eq!(rest, DataTransfer { bytes: 88, words: 22 });
    assert_eq!(ctx.buffer().writes()[0].offset, 0);
    assert_eq!(
        ctx.regs().writes_to(offset::POINTER),
        vec![pointer_word(0, 512), pointer_word(0, 88)]
    );
}

#[test]
fn nothing_ready_writes_nothing() {
    let ctx = context();
    let mut engine = DataEngine::new(&ctx, Bytes::default(), DataSettings::default());

    for _ in 0..10 {
        assert!(engine.pump().is_empty());
    }
    assert!(ctx.regs().writes().is_empty());
    assert!(ctx.buffer().writes().is_empty());
}

#[test]
fn trailing_bytes_are_zero_padded() {
    let ctx = context();
    let mut engine = DataEngine::new(
        &ctx,
        Bytes::new([1, 2, 3, 4, 5, 6]),
        DataSettings::default(),
    );

    assert_eq!(engine.pump(), DataTransfer { bytes: 6, words: 2 });
    assert_eq!(
        ctx.buffer().writes(),
        vec![RegWrite::new(0, 0x0102_0304), RegWrite::new(4, 0x0506_0000)]
    );
    assert_eq!(
        ctx.regs().writes_to(offset::POINTER),
        vec![pointer_word(0, 6)]
    );
}

#[test]
fn software_crc_is_appended_and_hardware_crc_disabled() {
    let ctx = context();
    let data = pattern(8);
    let crc = crc16_xmodem(&data);
    let settings = DataSettings {
        crc_mode: CrcMode::Software,
        ..DataSettings::default()
    };
    let mut engine = DataEngine::new(&ctx, Bytes::new(data.clone()), settings);

    assert_eq!(engine.pump(), DataTransfer { bytes: 10, words: 3 });
    let [hi, lo] = crc.to_be_bytes();
    assert_eq!(
        ctx.buffer().writes_to(8),
        vec![u32::from_be_bytes([hi, lo, 0, 0])]
    );
    assert_eq!(
        ctx.regs().writes(),
        vec![
            RegWrite::new(offset::POINTER, pointer_word(0, 10)),
            RegWrite::new(offset::DATA_CONTROL, DataControl::SEND.bits()),
        ]
    );
}

#[test]
fn four_bit_bus_sets_the_width_bit() {
    let ctx = context();
    let settings = DataSettings {
        bus_width: BusWidth::FourBit,
        ..DataSettings::default()
    };
    let mut engine = DataEngine::new(&ctx, Bytes::new(pattern(4)), settings);

    let _ = engine.pump();
    assert_eq!(
        ctx.regs().writes_to(offset::DATA_CONTROL),
        vec![hardware_flags() | DataControl::FOUR_BIT.bits()]
    );
}

#[test]
fn smaller_transfer_limit_is_honoured() {
    let ctx = context();
    let settings = DataSettings {
        max_transfer_bytes: 64,
        ..DataSettings::default()
    };
    let mut engine = DataEngine::new(&ctx, Bytes::new(pattern(100)), settings);

    assert_eq!(engine.pump(), DataTransfer { bytes: 64, words: 16 });
}

#[test]
fn next_block_waits_until_the_previous_one_is_sent() {
    let ctx = context();
    let mut engine = DataEngine::new(&ctx, Bytes::new(pattern(1024)), DataSettings::default());

    assert_eq!(engine.pump().bytes, 512);
    let first = ctx.buffer().get(0);

    // SEND still set: the buffer is not touched and no byte is consumed.
    assert!(engine.pump().is_empty());
    assert_eq!(ctx.buffer().writes().len(), 128);
    assert_eq!(ctx.buffer().get(0), first);
    assert_eq!(engine.source().0.len(), 512);

    block_sent(&ctx);
    assert_eq!(engine.pump().bytes, 512);
    assert_eq!(ctx.regs().writes_to(offset::POINTER).len(), 2);
}

/// A clock that finishes the pending block on every sleep and raises `stop` after a fixed
/// number of sleeps.
struct StopAfter<'a> {
    clock: ManualClock,
    sleeps: u64,
    stop: &'a AtomicBool,
    ctx: &'a BridgeContext<FakeRegisters>,
}

impl Clock for StopAfter<'_> {
    fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
        block_sent(self.ctx);
        if self.clock.sleeps() >= self.sleeps {
            self.stop.store(true, Ordering::Relaxed);
        }
    }
}

#[test]
fn run_sleeps_the_poll_interval_after_every_pass() {
    let ctx = context();
    let stop = AtomicBool::new(false);
    let clock = StopAfter {
        clock: ManualClock::new(),
        sleeps: 3,
        stop: &stop,
        ctx: &ctx,
    };
    let mut engine = DataEngine::new(&ctx, Bytes::new(pattern(1024)), DataSettings::default());

    engine.run(&clock, Duration::from_micros(250), &stop);

    // One sector per pass, then an idle pass.
    assert_eq!(ctx.regs().writes_to(offset::POINTER).len(), 2);
    assert!(engine.source().0.is_empty());
    assert_eq!(clock.clock.sleeps(), 3);
    assert_eq!(clock.clock.now_ns(), 750_000);
}

#[test]
fn command_in_flight_gates_the_transfer() {
    use sdproxy_core::{CommandEngine, ProtocolError, SdProtocol, SdRequest, MAX_RESPONSE_LEN};
    use sdproxy_regs::layout::Status;
    use std::cell::RefCell;

    // Pumps the data engine from inside the protocol engine, i.e. while the flag is raised.
    struct Reentrant<'a, 'b> {
        data: &'b RefCell<DataEngine<'a, FakeRegisters, Bytes>>,
        during: Option<DataTransfer>,
    }

    impl SdProtocol for Reentrant<'_, '_> {
        fn dispatch(
            &mut self,
            _request: &SdRequest,
            _response: &mut [u8; MAX_RESPONSE_LEN],
        ) -> Result<usize, ProtocolError> {
            self.during = Some(self.data.borrow_mut().pump());
            Ok(0)
        }
    }

    let ctx = context();
    let data = RefCell::new(DataEngine::new(
        &ctx,
        Bytes::new(pattern(16)),
        DataSettings::default(),
    ));
    let (producer, _consumer) = sdproxy_ring::event_ring(16);
    let mut command = CommandEngine::new(
        &ctx,
        Reentrant {
            data: &data,
            during: None,
        },
        producer,
        50,
    );

    ctx.regs()
        .set(offset::STATUS, Status::NEW_COMMAND.bits() | (12 << 16));
    let _ = command.poll_once();

    assert_eq!(command.protocol().during, Some(DataTransfer::default()));
    assert!(ctx.buffer().writes().is_empty());

    // Flag down again: the data goes out.
    assert_eq!(data.borrow_mut().pump().bytes, 16);
}
