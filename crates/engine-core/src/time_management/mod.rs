//! Time management: turning clock state into search time limits.

mod allocation;

pub use allocation::{compute_time_limits, TimeControlInput, TimeLimits};

/// Tunable time-management parameters.
#[derive(Debug, Clone, Copy)]
pub struct TimeParameters {
    /// Safety margin kept on the clock, milliseconds.
    pub buffer_time_ms: i64,
    /// Assume at most this many moves remain when `movestogo` is absent.
    pub max_remaining_moves: i32,
    /// Expected ponder hit rate in percent; stretches the base allocation
    /// when pondering is enabled.
    pub ponder_hit_rate_pct: i32,
    /// Upper bound on `max_time / min_time`, in percent.
    pub max_time_usage_pct: i32,
    /// Stop at the soft limit once this percentage of it has elapsed and the
    /// best move is stable.
    pub early_stop_pct: i32,
}

impl Default for TimeParameters {
    fn default() -> Self {
        TimeParameters {
            buffer_time_ms: 1000,
            max_remaining_moves: 35,
            ponder_hit_rate_pct: 50,
            max_time_usage_pct: 400,
            early_stop_pct: 75,
        }
    }
}
