use std::collections::VecDeque;
use std::time::{Duration, Instant};

use sdproxy_core::{
    Bridge, BridgeConfig, BridgeContext, Placement, ProtocolError, SdDataSource, SdProtocol,
    SdRequest, TelemetryDrain, MAX_RESPONSE_LEN,
};
use sdproxy_regs::layout::{control_word, offset, pointer_word, Control, Status};
use sdproxy_regs::testing::FakeRegisters;
use sdproxy_ring::event_ring;

struct Echo;

impl SdProtocol for Echo {
    fn dispatch(
        &mut self,
        request: &SdRequest,
        response: &mut [u8; MAX_RESPONSE_LEN],
    ) -> Result<usize, ProtocolError> {
        response[..4].copy_from_slice(&request.argument.to_be_bytes());
        Ok(4)
    }
}

struct Block(VecDeque<u8>);

impl SdDataSource for Block {
    fn data_ready(&mut self) -> bool {
        !self.0.is_empty()
    }

    fn read_next_byte(&mut self) -> u8 {
        self.0.pop_front().unwrap_or(0)
    }
}

fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn bridge_threads_answer_commands_and_stream_data() {
    let ctx: &'static BridgeContext<FakeRegisters> = Box::leak(Box::new(BridgeContext::new(
        FakeRegisters::new(offset::SIZE).with_write_one_to_clear(offset::STATUS),
        FakeRegisters::new(1024),
    )));
    let regs = ctx.regs();
    regs.set(offset::ARG, 0xdead_beef);
    regs.set(
        offset::STATUS,
        Status::NEW_COMMAND.bits() | (13 << 16),
    );

    let (producer, consumer) = event_ring(64);
    let config = BridgeConfig {
        rt_core: 0,
        ..BridgeConfig::default()
    };
    let bridge = Bridge::start(
        &config,
        &Placement::heap(),
        ctx,
        Echo,
        Block((1..=8).collect()),
        producer,
    )
    .expect("spawn bridge threads");

    wait_for("command acknowledgement", || {
        regs.get(offset::STATUS) & Status::NEW_COMMAND.bits() == 0
    });
    wait_for("data block", || !regs.writes_to(offset::POINTER).is_empty());
    assert!(bridge.is_running());

    bridge.stop();
    bridge.join().expect("bridge threads exit cleanly");

    assert_eq!(regs.get(offset::ARG), 0xdead_beef);
    assert_eq!(
        regs.writes_to(offset::CONTROL),
        vec![
            Control::ENABLE.bits(),
            control_word(Control::ENABLE | Control::SEND | Control::AUTO_CRC7, 13, 0),
        ]
    );
    assert_eq!(regs.writes_to(offset::POINTER), vec![pointer_word(0, 8)]);
    assert_eq!(ctx.buffer().get(0), 0x0102_0304);
    assert_eq!(ctx.buffer().get(4), 0x0506_0708);

    // Started, received, processed.
    let mut drain = TelemetryDrain::new(consumer);
    assert_eq!(drain.drain().records, 3);
}
