use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use sdproxy_regs::RegisterBus;
use sdproxy_ring::Producer;

use crate::clock::SystemClock;
use crate::command::CommandEngine;
use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::data::{DataEngine, DataSettings};
use crate::placement::Placement;
use crate::protocol::{SdDataSource, SdProtocol};
use crate::sched::{current_cpu, lock_all_memory, pin_current_thread};

pub const COMMAND_THREAD_NAME: &str = "sdproxy-cmd";
pub const DATA_THREAD_NAME: &str = "sdproxy-dat";

/// The two running bridge loops.
#[derive(Debug)]
pub struct Bridge {
    command: JoinHandle<()>,
    data: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl Bridge {
    /// Start the command loop (pinned to `config.rt_core`, working set placed through
    /// `placement`) and the data loop.
    ///
    /// Failing to pin or to lock memory is logged and otherwise ignored.
    pub fn start<B, P, S>(
        config: &BridgeConfig,
        placement: &Placement,
        ctx: &'static BridgeContext<B>,
        protocol: P,
        source: S,
        events: Producer,
    ) -> io::Result<Self>
    where
        B: RegisterBus + Send + Sync + 'static,
        P: SdProtocol + Send + 'static,
        S: SdDataSource + Send + 'static,
    {
        if config.lock_memory {
            match lock_all_memory() {
                Ok(()) => tracing::info!("process memory locked"),
                Err(err) => tracing::warn!(error = %err, "mlockall failed"),
            }
        }

        let stop = Arc::new(AtomicBool::new(false));

        let mut engine = placement.place(CommandEngine::new(
            ctx,
            protocol,
            events,
            config.slow_completion_threshold,
        ));
        let rt_core = config.rt_core;
        let command = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(COMMAND_THREAD_NAME.into())
                .stack_size(config.rt_stack_size)
                .spawn(move || {
                    match pin_current_thread(rt_core) {
                        Ok(()) => tracing::info!(cpu = rt_core, "command loop pinned"),
                        Err(err) => tracing::warn!(error = %err, "command loop running unpinned"),
                    }
                    tracing::debug!(scratch = engine.in_scratch(), "command loop placement");
                    engine.run(current_cpu(), &stop);
                    tracing::info!("command loop stopped");
                })?
        };

        let settings = DataSettings::from(config);
        let interval = config.data_poll_interval;
        let data = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(DATA_THREAD_NAME.into())
                .spawn(move || {
                    let mut engine = DataEngine::new(ctx, source, settings);
                    engine.run(&SystemClock::new(), interval, &stop);
                    tracing::info!("data loop stopped");
                })
        };
        let data = match data {
            Ok(handle) => handle,
            Err(err) => {
                stop.store(true, Ordering::Relaxed);
                let _ = command.join();
                return Err(err);
            }
        };

        Ok(Self {
            command,
            data,
            stop,
        })
    }

    /// Ask both loops to exit after their current pass.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        !self.command.is_finished() && !self.data.is_finished()
    }

    /// Wait for both loops. Returns the first panic payload, if any.
    pub fn join(self) -> thread::Result<()> {
        let command = self.command.join();
        let data = self.data.join();
        command.and(data)
    }
}
