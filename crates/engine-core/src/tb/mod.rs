//! Endgame tablebase adapter.
//!
//! Presents one probe interface over two backend families: a
//! distance-to-mate family (Gaviota style) and a WDL/distance-to-zero family
//! (Syzygy style). The adapter owns all fifty-move-rule arithmetic; backends
//! report raw distances. File I/O backends live outside the engine core;
//! tests drive the adapter through in-process doubles.

use crate::bitboard;
use crate::movegen;
use crate::position::Position;
use crate::search::constants::{
    is_loss_score, is_win_score, MATE0, MAX_FRUSTRATED_DIST, MAX_SUB_MATE_PLIES, MIN_FRUSTRATED,
};
use crate::search::tt::Bound;
use crate::types::{Color, Piece, PieceKind};

/// Distance-to-mate backend (Gaviota family). Distances are plies from the
/// probed position, positive when the side to move wins, zero for draws.
pub trait DtmBackend: Send + Sync {
    fn max_pieces(&self) -> u32;
    fn probe_dtm(&self, pos: &Position) -> Option<i32>;
    /// Win/draw/loss from the side to move's view: -1, 0, +1.
    fn probe_wdl(&self, pos: &Position) -> Option<i32>;
}

/// WDL / distance-to-zeroing backend (Syzygy family). WDL is -2..=2 with
/// +-1 meaning a win or loss barred by the fifty-move rule ("cursed").
pub trait DtzBackend: Send + Sync {
    fn max_pieces(&self) -> u32;
    fn probe_wdl(&self, pos: &Position) -> Option<i32>;
    /// Plies until the next zeroing move on the winning line; sign as WDL.
    fn probe_dtz(&self, pos: &Position) -> Option<i32>;
}

/// Probe outcome: a score with a bound, plus an optional hint for the
/// evaluation describing how far away a rule-barred win is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbResult {
    pub score: i32,
    pub bound: Bound,
    /// Signed distance-to-win hint for drawn-but-frustrated positions;
    /// zero when not applicable. Feeds the swindle score.
    pub eval_hint: i32,
}

impl TbResult {
    fn new(score: i32, bound: Bound) -> TbResult {
        TbResult { score, bound, eval_hint: 0 }
    }
}

fn update_hint(hint: &mut i32, new: i32) {
    if *hint == 0 || new.abs() < hint.abs() {
        *hint = new;
    }
}

#[derive(Default)]
pub struct TbProbe {
    dtm: Option<Box<dyn DtmBackend>>,
    dtz: Option<Box<dyn DtzBackend>>,
    /// Probes are suppressed entirely when more pieces are on the board.
    max_pieces: u32,
}

impl TbProbe {
    pub fn new() -> TbProbe {
        TbProbe::default()
    }

    pub fn set_dtm_backend(&mut self, backend: Box<dyn DtmBackend>) {
        self.max_pieces = self.max_pieces.max(backend.max_pieces());
        self.dtm = Some(backend);
    }

    pub fn set_dtz_backend(&mut self, backend: Box<dyn DtzBackend>) {
        self.max_pieces = self.max_pieces.max(backend.max_pieces());
        self.dtz = Some(backend);
    }

    pub fn enabled(&self) -> bool {
        self.dtm.is_some() || self.dtz.is_some()
    }

    pub fn max_pieces(&self) -> u32 {
        self.max_pieces
    }

    /// Combined probe. `ply` is the distance from the search root; `alpha`
    /// and `beta` let one-sided verdicts cut off early.
    pub fn probe(&self, pos: &Position, ply: i32, alpha: i32, beta: i32) -> Option<TbResult> {
        let n_pieces = pos.occupied().count_ones();
        if n_pieces > self.max_pieces || !self.enabled() {
            return None;
        }
        let hmc = pos.halfmove_clock() as i32;
        let mut hint = 0i32;

        // Exact distance-to-mate first for the smallest endings.
        let mut has_dtm = false;
        if n_pieces <= 4 {
            if let Some(res) = self.try_dtm(pos, ply, hmc, &mut hint) {
                match res {
                    DtmOutcome::Exact(score) => return Some(finish(score, Bound::Exact, hint)),
                    DtmOutcome::RuleBarred(_) => has_dtm = true,
                }
            }
        }

        // WDL pre-filter. A nonzero verdict is only trustworthy at hmc == 0;
        // otherwise it still bounds the score when alpha/beta already
        // straddle zero.
        let mut has_result = false;
        let mut result = TbResult::new(0, Bound::Empty);
        let mut check_ab_bound = false;
        let mut wdl_score = 0;
        if let Some(backend) = &self.dtz {
            if n_pieces <= backend.max_pieces()
                && pos.castle_mask() == 0
            {
                if let Some(wdl) = backend.probe_wdl(pos) {
                    let score = self.wdl_to_score(pos, ply, wdl, &mut hint);
                    if score == 0 || hmc == 0 {
                        has_result = true;
                    } else {
                        check_ab_bound = true;
                    }
                    wdl_score = score;
                }
            }
        }
        if !has_result && !check_ab_bound {
            if let Some(backend) = &self.dtm {
                if n_pieces <= backend.max_pieces() {
                    if let Some(wdl) = probe_with_ep(pos, |p| backend.probe_wdl(p)) {
                        let score = self.gtb_wdl_to_score(pos, ply, wdl);
                        if score == 0 || (hmc == 0 && n_pieces <= 4) {
                            has_result = true;
                        } else {
                            check_ab_bound = true;
                        }
                        wdl_score = score;
                    }
                }
            }
        }

        if check_ab_bound {
            if wdl_score > 0 && beta <= 0 {
                // Says win, but the fifty-move rule may make it a draw.
                return Some(finish(0, Bound::Lower, hint));
            }
            if wdl_score < 0 && alpha >= 0 {
                return Some(finish(0, Bound::Upper, hint));
            }
        }

        let mut frustrated = false;
        if has_result {
            result = TbResult::new(wdl_score, Bound::Exact);
            if wdl_score > 0 {
                result.bound = Bound::Lower;
                if wdl_score >= beta {
                    return Some(finish(wdl_score, Bound::Lower, hint));
                }
            } else if wdl_score < 0 {
                result.bound = Bound::Upper;
                if wdl_score <= alpha {
                    return Some(finish(wdl_score, Bound::Upper, hint));
                }
            } else {
                if hint == 0 {
                    return Some(finish(0, Bound::Exact, hint));
                }
                if hint > 0 && beta <= MIN_FRUSTRATED {
                    return Some(finish(0, Bound::Exact, hint));
                }
                if hint < 0 && alpha >= -MIN_FRUSTRATED {
                    return Some(finish(0, Bound::Exact, hint));
                }
                frustrated = true;
            }
        }

        // When hunting the fastest mate (or frustrated), prefer DTM before DTZ.
        let dtm_first = frustrated || is_loss_score(alpha) || is_win_score(beta);
        if dtm_first && !has_dtm {
            if let Some(res) = self.try_dtm(pos, ply, hmc, &mut hint) {
                match res {
                    DtmOutcome::Exact(score) => return Some(finish(score, Bound::Exact, hint)),
                    DtmOutcome::RuleBarred(_) => has_dtm = true,
                }
            }
        }

        // Distance to zeroing move.
        if let Some(backend) = &self.dtz {
            if n_pieces <= backend.max_pieces() && pos.castle_mask() == 0 {
                if let Some(dtz) = backend.probe_dtz(pos) {
                    if let Some(res) = self.dtz_to_result(pos, ply, dtz, hmc, &mut hint) {
                        if res.bound == Bound::Exact
                            || (res.score >= beta && res.bound == Bound::Lower)
                            || (res.score <= alpha && res.bound == Bound::Upper)
                        {
                            return Some(finish(res.score, res.bound, hint));
                        }
                        has_result = true;
                        result = res;
                    }
                }
            }
        }

        if !dtm_first && !has_dtm {
            if let Some(res) = self.try_dtm(pos, ply, hmc, &mut hint) {
                match res {
                    DtmOutcome::Exact(score) => return Some(finish(score, Bound::Exact, hint)),
                    DtmOutcome::RuleBarred(_) => has_dtm = true,
                }
            }
        }

        if has_result {
            Some(finish(result.score, result.bound, hint))
        } else if has_dtm {
            // Rule-barred mate: known draw-ish bound with a hint attached.
            Some(finish(0, if hint > 0 { Bound::Lower } else { Bound::Upper }, hint))
        } else {
            None
        }
    }

    /// DTM probe with the fifty-move margin applied.
    fn try_dtm(&self, pos: &Position, ply: i32, hmc: i32, hint: &mut i32) -> Option<DtmOutcome> {
        let backend = self.dtm.as_ref()?;
        if pos.occupied().count_ones() > backend.max_pieces() {
            return None;
        }
        let dtm = probe_with_ep(pos, |p| backend.probe_dtm(p))?;
        if dtm == 0 {
            return Some(DtmOutcome::Exact(0));
        }
        let plies = dtm.abs();
        let margin = (100 - hmc) - plies;
        if margin >= 0 {
            let score = if dtm > 0 { MATE0 - ply - plies } else { -(MATE0 - ply - plies) };
            Some(DtmOutcome::Exact(score))
        } else {
            // Draw by the fifty-move rule; remember how near the win was.
            update_hint(hint, if dtm > 0 { -margin } else { margin });
            Some(DtmOutcome::RuleBarred(if dtm > 0 { Bound::Lower } else { Bound::Upper }))
        }
    }

    /// Convert a Syzygy WDL verdict into a score, attaching cursed-win hints.
    fn wdl_to_score(&self, pos: &Position, ply: i32, wdl: i32, hint: &mut i32) -> i32 {
        match wdl {
            0 => 0,
            1 => {
                update_hint(hint, MAX_FRUSTRATED_DIST);
                0
            }
            -1 => {
                update_hint(hint, -MAX_FRUSTRATED_DIST);
                0
            }
            2 | -2 => {
                let ply_to_mate = max_sub_mate(pos) + MAX_DTZ_BOUND;
                let score = MATE0 - ply - ply_to_mate - 2;
                if wdl > 0 {
                    score
                } else {
                    -score
                }
            }
            _ => 0,
        }
    }

    /// Gaviota WDL: only -1/0/1 and no cursed information.
    fn gtb_wdl_to_score(&self, pos: &Position, ply: i32, wdl: i32) -> i32 {
        if wdl == 0 {
            return 0;
        }
        let ply_to_mate = max_sub_mate(pos) + MAX_DTZ_BOUND;
        let score = MATE0 - ply - ply_to_mate - 2;
        if wdl > 0 {
            score
        } else {
            -score
        }
    }

    fn dtz_to_result(
        &self,
        pos: &Position,
        ply: i32,
        dtz: i32,
        hmc: i32,
        hint: &mut i32,
    ) -> Option<TbResult> {
        if dtz == 0 {
            return Some(TbResult::new(0, Bound::Exact));
        }
        let max_clock = dtz.abs() + hmc;
        let sgn = if dtz > 0 { 1 } else { -1 };
        if max_clock == 100 && hmc > 0 {
            // DTZ values can be off by one; do not decide right at the edge.
            return None;
        }
        if dtz.abs() <= 2 {
            if max_clock > 101 {
                update_hint(hint, sgn * (max_clock - 100));
                return Some(TbResult::new(0, Bound::Exact));
            } else if max_clock == 101 {
                return None; // off-by-one risk at mate-in-one distances
            }
        } else if max_clock > 100 {
            let h = if dtz.abs() <= 100 { sgn * (max_clock - 100) } else { sgn * MAX_FRUSTRATED_DIST };
            update_hint(hint, h);
            return Some(TbResult::new(0, Bound::Exact));
        }
        let ply_to_mate = max_sub_mate(pos) + dtz.abs();
        let score = MATE0 - ply - ply_to_mate - 2;
        let (score, bound) = if dtz > 0 { (score, Bound::Lower) } else { (-score, Bound::Upper) };
        Some(TbResult::new(score, bound))
    }
}

fn finish(score: i32, bound: Bound, hint: i32) -> TbResult {
    TbResult { score, bound, eval_hint: hint }
}

enum DtmOutcome {
    Exact(i32),
    RuleBarred(Bound),
}

/// Conservative bound on the distance to the next zeroing move when only a
/// WDL verdict is available.
const MAX_DTZ_BOUND: i32 = 100;

/// Upper bound on the number of plies needed to mate once the next zeroing
/// move has been played: each remaining capture or pawn move buys at most a
/// hundred plies.
fn max_sub_mate(pos: &Position) -> i32 {
    let non_kings = pos.occupied().count_ones() as i32 - 2;
    let zeroing_moves = non_kings + max_pawn_moves(pos);
    (zeroing_moves * 100).min(MAX_SUB_MATE_PLIES)
}

fn max_pawn_moves(pos: &Position) -> i32 {
    let mut moves = 0;
    for color in [Color::White, Color::Black] {
        for sq in bitboard::squares(pos.kind_bb(color, PieceKind::Pawn)) {
            moves += if color.is_white() { 7 - sq.rank() as i32 } else { sq.rank() as i32 } - 1;
        }
    }
    moves
}

/// Tablebases index positions without en-passant rights. When a probe says
/// draw but an en-passant capture exists, the verdict must consider those
/// captures explicitly; when en passant is the only legal move the probe
/// value is replaced outright.
fn probe_with_ep(pos: &Position, probe: impl Fn(&Position) -> Option<i32>) -> Option<i32> {
    let base = probe(pos)?;
    let ep = match pos.ep_square() {
        Some(sq) if base == 0 => sq,
        _ => return Some(base),
    };

    let mut list = movegen::MoveList::new();
    if movegen::in_check(pos) {
        movegen::check_evasions(pos, &mut list);
    } else {
        movegen::pseudo_legal_moves(pos, &mut list);
    }
    movegen::remove_illegal(pos, &mut list);

    let pawn = Piece::make(pos.side_to_move(), PieceKind::Pawn);
    let mut best_ep: Option<i32> = None;
    let mut other_move = false;
    let mut tmp = pos.clone();
    for &m in list.iter() {
        let is_ep = m.to() == ep && tmp.piece_on(m.from()) == pawn && m.from().file() != ep.file();
        if is_ep {
            let ui = tmp.make_move(m);
            let sub = probe(&tmp);
            tmp.unmake_move(m, ui);
            let sub = sub?;
            best_ep = Some(best_ep.map_or(-sub, |b: i32| b.max(-sub)));
        } else {
            other_move = true;
        }
    }
    match best_ep {
        Some(v) if !other_move => Some(v),
        Some(v) => Some(base.max(v)),
        None => Some(base),
    }
}

/// Piece-count helper for backend implementations.
pub fn piece_count(pos: &Position) -> u32 {
    pos.occupied().count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Backend double keyed by board-only FEN prefix.
    struct MockDtm {
        dtm: HashMap<String, i32>,
        wdl: HashMap<String, i32>,
    }

    fn board_key(pos: &Position) -> String {
        let fen = pos.to_fen();
        let mut it = fen.split(' ');
        format!("{} {}", it.next().unwrap(), it.next().unwrap())
    }

    impl DtmBackend for MockDtm {
        fn max_pieces(&self) -> u32 {
            5
        }
        fn probe_dtm(&self, pos: &Position) -> Option<i32> {
            self.dtm.get(&board_key(pos)).copied()
        }
        fn probe_wdl(&self, pos: &Position) -> Option<i32> {
            self.wdl.get(&board_key(pos)).copied()
        }
    }

    struct MockDtz {
        wdl: HashMap<String, i32>,
        dtz: HashMap<String, i32>,
    }

    impl DtzBackend for MockDtz {
        fn max_pieces(&self) -> u32 {
            6
        }
        fn probe_wdl(&self, pos: &Position) -> Option<i32> {
            self.wdl.get(&board_key(pos)).copied()
        }
        fn probe_dtz(&self, pos: &Position) -> Option<i32> {
            self.dtz.get(&board_key(pos)).copied()
        }
    }

    const KQK: &str = "8/4k3/8/8/8/3QK3/8/8 w";

    fn probe_with_dtm(dtm: i32, hmc: u16) -> Option<TbResult> {
        let mut tb = TbProbe::new();
        tb.set_dtm_backend(Box::new(MockDtm {
            dtm: HashMap::from([(KQK.to_string(), dtm)]),
            wdl: HashMap::new(),
        }));
        let mut pos = Position::from_fen("8/4k3/8/8/8/3QK3/8/8 w - - 0 1").unwrap();
        pos.set_halfmove_clock(hmc);
        tb.probe(&pos, 0, -MATE0, MATE0)
    }

    #[test]
    fn exact_dtm_within_margin() {
        let res = probe_with_dtm(15, 0).unwrap();
        assert_eq!(res.bound, Bound::Exact);
        assert_eq!(res.score, MATE0 - 15);
        assert!(is_win_score(res.score));
    }

    #[test]
    fn fifty_move_rule_collapses_to_draw() {
        // Mate in 15 plies, 86 plies on the clock: wins by one ply.
        let res = probe_with_dtm(15, 85).unwrap();
        assert_eq!(res.bound, Bound::Exact);
        assert!(is_win_score(res.score));

        // One more clock ply and the win is barred: draw, hint +1.
        let res = probe_with_dtm(15, 86).unwrap();
        assert_eq!(res.score, 0);
        assert_eq!(res.eval_hint, 1);

        // The boundary case 99 vs 100 for a mate in one ply.
        let res = probe_with_dtm(1, 99).unwrap();
        assert!(is_win_score(res.score));
        let res = probe_with_dtm(1, 100).unwrap();
        assert_eq!(res.score, 0);
        assert_eq!(res.eval_hint, 1);
    }

    #[test]
    fn losing_side_gets_negative_hint() {
        let res = probe_with_dtm(-15, 86).unwrap();
        assert_eq!(res.score, 0);
        assert_eq!(res.eval_hint, -1);
    }

    #[test]
    fn syzygy_wdl_win_is_win_score() {
        let mut tb = TbProbe::new();
        tb.set_dtz_backend(Box::new(MockDtz {
            wdl: HashMap::from([(KQK.to_string(), 2)]),
            dtz: HashMap::new(),
        }));
        let pos = Position::from_fen("8/4k3/8/8/8/3QK3/8/8 w - - 0 1").unwrap();
        let res = tb.probe(&pos, 0, -MATE0, MATE0).unwrap();
        assert_eq!(res.bound, Bound::Lower);
        assert!(is_win_score(res.score));
    }

    #[test]
    fn cursed_win_gives_frustration_hint() {
        let mut tb = TbProbe::new();
        tb.set_dtz_backend(Box::new(MockDtz {
            wdl: HashMap::from([(KQK.to_string(), 1)]),
            dtz: HashMap::new(),
        }));
        let pos = Position::from_fen("8/4k3/8/8/8/3QK3/8/8 w - - 0 1").unwrap();
        let res = tb.probe(&pos, 0, -MATE0, MATE0).unwrap();
        assert_eq!(res.score, 0);
        assert_eq!(res.eval_hint, MAX_FRUSTRATED_DIST);
    }

    #[test]
    fn dtz_beyond_fifty_is_draw_with_hint() {
        let mut tb = TbProbe::new();
        tb.set_dtz_backend(Box::new(MockDtz {
            wdl: HashMap::new(),
            dtz: HashMap::from([(KQK.to_string(), 30)]),
        }));
        let mut pos = Position::from_fen("8/4k3/8/8/8/3QK3/8/8 w - - 0 1").unwrap();
        pos.set_halfmove_clock(80);
        // 30 + 80 = 110 > 100: draw, hint +10.
        let res = tb.probe(&pos, 0, -MATE0, MATE0).unwrap();
        assert_eq!(res.score, 0);
        assert_eq!(res.eval_hint, 10);

        // 30 + 60 = 90 <= 100: still a win.
        pos.set_halfmove_clock(60);
        let res = tb.probe(&pos, 0, -MATE0, MATE0).unwrap();
        assert!(is_win_score(res.score));
        assert_eq!(res.bound, Bound::Lower);
    }

    #[test]
    fn castling_disables_syzygy() {
        let mut tb = TbProbe::new();
        tb.set_dtz_backend(Box::new(MockDtz {
            wdl: HashMap::from([("4k3/8/8/8/8/8/8/R3K3 w".to_string(), 2)]),
            dtz: HashMap::new(),
        }));
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/R3K3 w Q - 0 1").unwrap();
        assert_eq!(tb.probe(&pos, 0, -MATE0, MATE0), None);
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 0 1").unwrap();
        assert!(tb.probe(&pos, 0, -MATE0, MATE0).is_some());
    }

    #[test]
    fn too_many_pieces_is_a_miss() {
        let mut tb = TbProbe::new();
        tb.set_dtm_backend(Box::new(MockDtm { dtm: HashMap::new(), wdl: HashMap::new() }));
        let pos = Position::start();
        assert_eq!(tb.probe(&pos, 0, -MATE0, MATE0), None);
    }
}
