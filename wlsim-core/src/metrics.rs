use crate::object::Time;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters and timings accumulated while the command queue runs.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct SimMetrics {
    /// Commands executed, stale ones included.
    pub commands: u64,
    /// Task updates run.
    pub acts: u64,
    /// Acts dropped because a later signal, pop or reset superseded them.
    pub stale_acts: u64,
    pub balances: u64,
    pub transfers_finished: u64,
    pub transfers_failed: u64,
    /// Wares consumed into production site input queues.
    pub wares_delivered: u64,
    /// Wall clock time spent inside `run_queue`.
    pub total_time: Duration,
    /// (game time, state checksum) pairs.
    pub checksums: Vec<(Time, u64)>,
}

impl SimMetrics {
    pub fn command_avg_us(&self) -> f64 {
        if self.commands == 0 {
            0.0
        } else {
            self.total_time.as_secs_f64() * 1_000_000.0 / self.commands as f64
        }
    }

    /// Game time simulated per wall clock second.
    pub fn speedup(&self, game_ms: Time) -> f64 {
        if self.total_time.as_secs_f64() == 0.0 {
            0.0
        } else {
            game_ms as f64 / 1000.0 / self.total_time.as_secs_f64()
        }
    }

    pub fn last_checksum(&self) -> Option<u64> {
        self.checksums.last().map(|&(_, sum)| sum)
    }
}
