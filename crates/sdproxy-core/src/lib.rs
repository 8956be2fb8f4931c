//! The two loops that bridge the FPGA SD card block to a software protocol engine.
//!
//! - [`CommandEngine`] runs on an isolated core and turns every command the FPGA latches into a
//!   response in the register file, within the SD bus response deadline. It never blocks and
//!   reports what it did through the telemetry ring only.
//! - [`DataEngine`] streams outgoing block data into the FPGA data buffer from a normal thread.
//! - [`TelemetryDrain`] logs the telemetry ring through `tracing`.
//!
//! Both engines share one [`BridgeContext`]; [`Bridge::start`] wires everything together.

mod bridge;
pub mod clock;
mod command;
pub mod config;
mod context;
mod data;
pub mod placement;
pub mod protocol;
pub mod sched;
mod telemetry;

pub use bridge::{Bridge, COMMAND_THREAD_NAME, DATA_THREAD_NAME};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandEngine, Exchange, PollOutcome, Rejection};
pub use config::{BridgeConfig, BusWidth, ConfigError, CrcMode};
pub use context::BridgeContext;
pub use data::{DataEngine, DataSettings, DataTransfer};
pub use placement::{Placed, Placement, PlacementError, ScratchArena};
pub use protocol::{
    BlockRequest, ProtocolError, SdDataSource, SdProtocol, SdRequest, LONG_RESPONSE_LEN,
    MAX_RESPONSE_LEN, SHORT_RESPONSE_LEN,
};
pub use sched::AffinityError;
pub use telemetry::{latency_us, DrainStats, TelemetryDrain};
