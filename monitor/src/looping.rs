//! Periodic ticking for `monitor run`.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::engine::{Engine, TickOutcome};
use crate::io::build_gateway::BuildGateway;
use crate::io::release_gateway::ReleaseGateway;
use crate::io::store::RecordStore;

/// Wall clock used by the loop; replaced in tests.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Pause before every tick.
    pub interval: Duration,
    /// Stop after this many ticks; run forever when `None`.
    pub max_ticks: Option<u32>,
    /// Skip the pause before the first tick.
    pub immediate: bool,
}

/// Summary of a loop invocation (only reachable with `max_ticks`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub ticks: u32,
    pub failed_ticks: u32,
}

/// Tick `engine` every `config.interval`.
///
/// Tick errors are handed to `on_tick` and never stop the loop; the next tick
/// retries from whatever record was persisted.
pub fn run_loop<B, R, S, C, F>(
    engine: &Engine<B, R, S>,
    config: &LoopConfig,
    clock: &C,
    mut on_tick: F,
) -> LoopOutcome
where
    B: BuildGateway,
    R: ReleaseGateway,
    S: RecordStore,
    C: Clock,
    F: FnMut(&Result<TickOutcome>),
{
    let mut outcome = LoopOutcome {
        ticks: 0,
        failed_ticks: 0,
    };
    loop {
        if config.max_ticks.is_some_and(|max| outcome.ticks >= max) {
            return outcome;
        }
        if outcome.ticks > 0 || !config.immediate {
            debug!(interval_secs = config.interval.as_secs(), "sleeping until next tick");
            clock.sleep(config.interval);
        }

        let result = engine.tick(clock.now());
        outcome.ticks += 1;
        if let Err(err) = &result {
            outcome.failed_ticks += 1;
            warn!(tick = outcome.ticks, error = %format!("{err:#}"), "tick failed");
        }
        on_tick(&result);
    }
}
