//! Time allocation for a single search.

use super::TimeParameters;

/// Raw `go` parameters relevant to timing. All times in milliseconds;
/// zero/None means "not given".
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeControlInput {
    pub wtime: Option<i64>,
    pub btime: Option<i64>,
    pub winc: i64,
    pub binc: i64,
    pub moves_to_go: Option<i32>,
    pub movetime: Option<i64>,
    pub infinite: bool,
    pub depth: Option<i32>,
    pub nodes: Option<i64>,
    pub mate: Option<i32>,
}

/// Computed limits. Negative time limits mean "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimits {
    pub min_time_ms: i64,
    pub max_time_ms: i64,
    pub early_stop_pct: i32,
    pub max_depth: i32,
    pub max_nodes: i64,
}

impl TimeLimits {
    pub fn unlimited() -> TimeLimits {
        TimeLimits { min_time_ms: -1, max_time_ms: -1, early_stop_pct: -1, max_depth: -1, max_nodes: -1 }
    }

    pub fn is_infinite(&self) -> bool {
        self.max_time_ms < 0 && self.max_depth < 0 && self.max_nodes < 0
    }

    /// Shrink both limits for a position with a single legal move; keeps a
    /// heartbeat of thinking without burning clock.
    pub fn collapse_for_single_move(&mut self) {
        if self.max_time_ms > 0 {
            self.max_time_ms = (self.max_time_ms / 100).clamp(1, 100);
            self.min_time_ms = (self.min_time_ms / 100).clamp(1, 100);
        } else if self.max_depth < 0 || self.max_depth > 2 {
            self.max_depth = 2;
        }
    }
}

/// Compute search limits from clock state.
pub fn compute_time_limits(
    input: &TimeControlInput,
    white_to_move: bool,
    ponder_enabled: bool,
    params: &TimeParameters,
) -> TimeLimits {
    let mut limits = TimeLimits::unlimited();
    if input.infinite {
        return limits;
    }

    if let Some(d) = input.depth {
        limits.max_depth = d;
    }
    if let Some(m) = input.mate {
        // A mate in m moves needs at most 2m - 1 plies.
        let md = m * 2 - 1;
        limits.max_depth = if limits.max_depth < 0 { md } else { limits.max_depth.min(md) };
    }
    if let Some(n) = input.nodes {
        limits.max_nodes = n;
    }

    if let Some(movetime) = input.movetime {
        limits.min_time_ms = movetime;
        limits.max_time_ms = movetime;
        // A fixed-time search must not stop early.
        limits.early_stop_pct = 100;
        return limits;
    }

    let time = if white_to_move { input.wtime } else { input.btime };
    let Some(time) = time else {
        return limits;
    };
    let inc = if white_to_move { input.winc } else { input.binc };

    let moves = match input.moves_to_go {
        Some(m) if m > 0 => m,
        _ => 999,
    }
    .min(params.max_remaining_moves) as i64;

    let margin = params.buffer_time_ms.min(time * 9 / 10);
    let mut min_t = (time + inc * (moves - 1) - margin) / moves;
    if ponder_enabled {
        let hit_rate = params.ponder_hit_rate_pct as f64 * 0.01;
        min_t = (min_t as f64 / (1.0 - hit_rate)).ceil() as i64;
    }
    let usage = (moves as f64 * 0.5).clamp(2.0, params.max_time_usage_pct as f64 * 0.01);
    let max_t = (min_t as f64 * usage) as i64;

    // Leave at least the margin on the clock, but never go negative.
    limits.min_time_ms = min_t.clamp(1, (time - margin).max(1));
    limits.max_time_ms = max_t.clamp(1, (time - margin).max(1));
    limits.early_stop_pct = params.early_stop_pct;
    limits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TimeParameters {
        TimeParameters::default()
    }

    #[test]
    fn movetime_fixes_both_limits() {
        let input = TimeControlInput { movetime: Some(5000), ..Default::default() };
        let l = compute_time_limits(&input, true, false, &params());
        assert_eq!(l.min_time_ms, 5000);
        assert_eq!(l.max_time_ms, 5000);
        assert_eq!(l.early_stop_pct, 100);
    }

    #[test]
    fn infinite_has_no_limits() {
        let input = TimeControlInput { infinite: true, wtime: Some(1000), ..Default::default() };
        let l = compute_time_limits(&input, true, false, &params());
        assert!(l.is_infinite());
    }

    #[test]
    fn fischer_allocation() {
        let input = TimeControlInput {
            wtime: Some(60_000),
            btime: Some(60_000),
            winc: 1000,
            binc: 1000,
            ..Default::default()
        };
        let l = compute_time_limits(&input, true, false, &params());
        // (60000 + 1000*34 - 1000) / 35 = 2657 ms.
        assert_eq!(l.min_time_ms, 2657);
        assert!(l.max_time_ms > l.min_time_ms);
        assert!(l.max_time_ms <= 60_000 - 1000);
    }

    #[test]
    fn moves_to_go_respected() {
        let input = TimeControlInput {
            wtime: Some(30_000),
            btime: Some(30_000),
            moves_to_go: Some(10),
            ..Default::default()
        };
        let l = compute_time_limits(&input, false, false, &params());
        // (30000 - 1000) / 10 = 2900 ms.
        assert_eq!(l.min_time_ms, 2900);
    }

    #[test]
    fn ponder_stretches_minimum() {
        let input = TimeControlInput { wtime: Some(60_000), btime: Some(60_000), ..Default::default() };
        let a = compute_time_limits(&input, true, false, &params());
        let b = compute_time_limits(&input, true, true, &params());
        assert!(b.min_time_ms > a.min_time_ms);
    }

    #[test]
    fn short_clock_clamps() {
        let input = TimeControlInput { wtime: Some(50), btime: Some(50), ..Default::default() };
        let l = compute_time_limits(&input, true, false, &params());
        assert!(l.min_time_ms >= 1);
        assert!(l.max_time_ms <= 50);
    }

    #[test]
    fn mate_limits_depth() {
        let input = TimeControlInput { mate: Some(3), ..Default::default() };
        let l = compute_time_limits(&input, true, false, &params());
        assert_eq!(l.max_depth, 5);
    }

    #[test]
    fn single_move_collapse() {
        let mut l = TimeLimits { min_time_ms: 5000, max_time_ms: 9000, early_stop_pct: 75, max_depth: -1, max_nodes: -1 };
        l.collapse_for_single_move();
        assert_eq!(l.min_time_ms, 50);
        assert_eq!(l.max_time_ms, 90);

        let mut l = TimeLimits::unlimited();
        l.collapse_for_single_move();
        assert_eq!(l.max_depth, 2);
    }
}
