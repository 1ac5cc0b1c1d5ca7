//! Score constants shared by search, evaluation and the tablebase adapter.

/// Mate at ply 0. A mate in N plies scores `MATE0 - N`.
pub const MATE0: i32 = 32000;

/// Anything above this is treated as a forced win (mate or tablebase win).
pub const MIN_WIN_SCORE: i32 = MATE0 / 2;

/// Scores for positions that are theoretically drawn but "almost" won, either
/// on static evaluation (swindle mode) or because a tablebase win is out of
/// reach under the fifty-move rule. They sit above any quiet positional
/// score produced by the swindle compression and far below real win scores.
pub const MIN_FRUSTRATED: i32 = 50;
pub const MAX_FRUSTRATED: i32 = 150;

/// Cap for the distance-to-win hint stored alongside frustrated draws.
pub const MAX_FRUSTRATED_DIST: i32 = 1000;

/// Upper bound used for "plies until mate" estimates derived from tablebase
/// distance data; keeps derived scores inside the win-score band.
pub const MAX_SUB_MATE_PLIES: i32 = 14000;

pub const MAX_PLY: usize = 128;

#[inline]
pub const fn is_win_score(score: i32) -> bool {
    score > MIN_WIN_SCORE
}

#[inline]
pub const fn is_loss_score(score: i32) -> bool {
    score < -MIN_WIN_SCORE
}

#[inline]
pub const fn mate_in(ply: i32) -> i32 {
    MATE0 - ply
}

#[inline]
pub const fn mated_in(ply: i32) -> i32 {
    -MATE0 + ply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bands_are_ordered() {
        assert!(MAX_FRUSTRATED < MIN_WIN_SCORE);
        assert!(MIN_FRUSTRATED < MAX_FRUSTRATED);
        assert!(is_win_score(mate_in(30)));
        assert!(is_loss_score(mated_in(30)));
        assert!(!is_win_score(MAX_FRUSTRATED));
    }
}
