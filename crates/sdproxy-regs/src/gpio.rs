use crate::bus::RegisterBus;

/// Channel 0 data register: active-high reset of the SD block.
pub const GPIO_RESET: usize = 0x0;
/// Channel 1 data register: kick line.
pub const GPIO_KICK: usize = 0x8;

/// The SD block's GPIO lines.
#[derive(Debug)]
pub struct GpioLines<B> {
    bus: B,
}

impl<B: RegisterBus> GpioLines<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn set_reset(&self, high: bool) {
        self.bus.write32(GPIO_RESET, u32::from(high));
    }

    pub fn set_kick(&self, high: bool) {
        self.bus.write32(GPIO_KICK, u32::from(high));
    }

    /// Assert then release reset, returning the SD block to its power-on state.
    pub fn pulse_reset(&self) {
        self.set_reset(true);
        self.set_reset(false);
    }

    pub fn into_inner(self) -> B {
        self.bus
    }
}
