//! Static evaluation. Scores are centipawns; the public entry point reports
//! from the side to move's perspective, internal terms are computed from
//! White's view and negated at the end.

pub mod endgame;
pub mod kpk;
pub mod net;
pub mod pawns;
mod tables;

mod swindle;

pub use endgame::{material_value, non_pawn_material};
pub use net::Network;
pub use pawns::{compute_stale_pawns, PawnHashData};
pub use swindle::swindle_score;
pub use tables::{interpolate, piece_value, TEMPO_BONUS_EG, TEMPO_BONUS_MG};

use crate::bitboard::{self, squares};
use crate::position::Position;
use crate::types::{Color, Piece, PieceKind};

use tables::{psq_eg, psq_mg, HALF_MOVE_FACTOR, KNIGHT_VS_QUEEN_BONUS, STALE_PAWN_FACTOR};

/// Cached per-material-configuration data.
#[derive(Clone, Copy, Default)]
pub struct MaterialHashData {
    pub id: u64,
    pub valid: bool,
    pub score: i32,
    pub end_game: bool,
}

/// Owning container for the per-engine evaluation caches and the optional
/// network. One instance per search thread; never shared.
pub struct EvalTables {
    pawn: Vec<PawnHashData>,
    material: Vec<MaterialHashData>,
    eval_hash: Vec<u64>,
    pub net: Option<Network>,
}

const PAWN_HASH_BITS: usize = 16;
const MATERIAL_HASH_BITS: usize = 14;
const EVAL_HASH_BITS: usize = 16;

impl Default for EvalTables {
    fn default() -> Self {
        EvalTables::new()
    }
}

impl EvalTables {
    pub fn new() -> EvalTables {
        EvalTables {
            pawn: vec![PawnHashData::default(); 1 << PAWN_HASH_BITS],
            material: vec![MaterialHashData::default(); 1 << MATERIAL_HASH_BITS],
            eval_hash: vec![0; 1 << EVAL_HASH_BITS],
            net: None,
        }
    }
}

/// Evaluator borrowing the per-engine tables.
pub struct Evaluator<'a> {
    tables: &'a mut EvalTables,
    /// Score bias in favor of White, scaled by remaining piece material.
    pub white_contempt: i32,
}

impl<'a> Evaluator<'a> {
    pub fn new(tables: &'a mut EvalTables) -> Evaluator<'a> {
        Evaluator { tables, white_contempt: 0 }
    }

    /// Static evaluation from the side to move's perspective.
    pub fn eval_pos(&mut self, pos: &Position) -> i32 {
        self.eval_impl(pos, false)
    }

    /// Same value, also logging the decomposed contributions.
    pub fn eval_pos_print(&mut self, pos: &Position) -> i32 {
        self.eval_impl(pos, true)
    }

    /// Evaluation from White's point of view; test and analysis helper.
    pub fn eval_white(&mut self, pos: &Position) -> i32 {
        let v = self.eval_pos(pos);
        if pos.is_white_move() {
            v
        } else {
            -v
        }
    }

    fn eval_impl(&mut self, pos: &Position, print: bool) -> i32 {
        if let Some(net) = &self.tables.net {
            return net.eval(pos);
        }

        let key = pos.history_hash();
        let use_hash = !print;
        let slot = (key & ((1 << EVAL_HASH_BITS) - 1)) as usize;
        if use_hash {
            let data = self.tables.eval_hash[slot];
            if (data ^ key) < (1 << 16) {
                return ((data & 0xffff) as i32) - (1 << 15);
            }
        }

        let mhd = self.material_entry(pos);
        let mhd_score = mhd.score;
        let end_game = mhd.end_game;

        let mut score = mhd_score;
        if print {
            log::info!("eval material:{score}");
        }

        score += self.piece_square_eval(pos);
        if print {
            log::info!("eval pst     :{score}");
        }

        let (pawn_mg, pawn_eg, stale_pawns) = {
            let phd = self.pawn_entry(pos);
            (phd.score_mg, phd.score_eg, phd.stale_pawns)
        };
        let non_pawn =
            non_pawn_material(pos, Color::White) + non_pawn_material(pos, Color::Black);
        score += interpolate(pawn_mg, pawn_eg, non_pawn);
        if print {
            log::info!("eval pawns   :{score}");
        }

        score += mobility_and_pieces(pos);
        if print {
            log::info!("eval pieces  :{score}");
        }

        score += king_safety(pos, non_pawn);
        if print {
            log::info!("eval king    :{score}");
        }

        if end_game {
            score = endgame::end_game_eval(pos, score);
            if print {
                log::info!("eval endgame :{score}");
            }
        }

        if self.white_contempt != 0 && !end_game {
            let piece_play = interpolate(128, 32, non_pawn);
            score += self.white_contempt * piece_play / 128;
            if print {
                log::info!("eval contempt:{score}");
            }
        }

        let pawns = pos.piece_bb(Piece::WPawn) | pos.piece_bb(Piece::BPawn);
        if pawns != 0 {
            let hmc = (pos.halfmove_clock() / 10).min(9) as usize;
            score = score * HALF_MOVE_FACTOR[hmc] / 128;
            if print {
                log::info!("eval halfmove:{score}");
            }
        }

        if score > 0 {
            let n = pawns::stale_files(stale_pawns, pos.piece_bb(Piece::WPawn)).min(8);
            score = score * STALE_PAWN_FACTOR[n] / 128;
        } else if score < 0 {
            let n = pawns::stale_files(stale_pawns, pos.piece_bb(Piece::BPawn)).min(8);
            score = score * STALE_PAWN_FACTOR[n] / 128;
        }
        if print {
            log::info!("eval staleP  :{score}");
        }

        let tempo = interpolate(tables::TEMPO_BONUS_MG, tables::TEMPO_BONUS_EG, non_pawn);
        score += if pos.is_white_move() { tempo } else { -tempo };

        let mut stm_score = score;
        if !pos.is_white_move() {
            stm_score = -stm_score;
        }

        if use_hash {
            self.tables.eval_hash[slot] =
                (key & !0xffffu64) | ((stm_score + (1 << 15)) as u64 & 0xffff);
        }
        stm_score
    }

    fn material_entry(&mut self, pos: &Position) -> MaterialHashData {
        let id = pos.material_id();
        let slot = (id & ((1 << MATERIAL_HASH_BITS) - 1)) as usize;
        let entry = &mut self.tables.material[slot];
        if !entry.valid || entry.id != id {
            *entry = compute_material_data(pos, id);
        }
        *entry
    }

    fn pawn_entry(&mut self, pos: &Position) -> &PawnHashData {
        let key = pos.pawn_zobrist_hash();
        let slot = (key & ((1 << PAWN_HASH_BITS) - 1)) as usize;
        let entry = &mut self.tables.pawn[slot];
        if !entry.valid || entry.key != key {
            pawns::compute_pawn_hash_data(pos, entry);
        }
        entry
    }

    fn piece_square_eval(&self, pos: &Position) -> i32 {
        let non_pawn =
            non_pawn_material(pos, Color::White) + non_pawn_material(pos, Color::Black);
        let mut mg = 0;
        let mut eg = 0;
        for color in [Color::White, Color::Black] {
            let sign = if color.is_white() { 1 } else { -1 };
            for kind in PieceKind::ALL {
                let value = piece_value(kind);
                for sq in squares(pos.kind_bb(color, kind)) {
                    mg += sign * (value + psq_mg(color, kind, sq));
                    eg += sign * (value + psq_eg(color, kind, sq));
                }
            }
        }
        interpolate(mg, eg, non_pawn)
    }
}

/// Knights gain on queens when they outnumber them; symmetric correction.
fn knight_vs_queen_correction(n: u32, q: u32) -> i32 {
    if n <= q + 1 {
        return 0;
    }
    let bonus = KNIGHT_VS_QUEEN_BONUS[(q as usize).min(3)];
    bonus * (n - q - 1) as i32
}

fn compute_material_data(pos: &Position, id: u64) -> MaterialHashData {
    let n_wq = pos.piece_bb(Piece::WQueen).count_ones();
    let n_bq = pos.piece_bb(Piece::BQueen).count_ones();
    let n_wn = pos.piece_bb(Piece::WKnight).count_ones();
    let n_bn = pos.piece_bb(Piece::BKnight).count_ones();
    let mut score = knight_vs_queen_correction(n_wn, n_bq) - knight_vs_queen_correction(n_bn, n_wq);

    // Bishop pair.
    for (color, sign) in [(Color::White, 1), (Color::Black, -1)] {
        let bishops = pos.kind_bb(color, PieceKind::Bishop);
        if bishops & bitboard::DARK_SQUARES != 0 && bishops & bitboard::LIGHT_SQUARES != 0 {
            score += sign * 30;
        }
    }

    MaterialHashData { id, valid: true, score, end_game: endgame::is_end_game(pos) }
}

const MOBILITY_WEIGHT: [i32; 6] = [0, 1, 1, 2, 2, 0]; // by PieceKind index

fn mobility_and_pieces(pos: &Position) -> i32 {
    let occ = pos.occupied();
    let mut score = 0;
    for (color, sign) in [(Color::White, 1), (Color::Black, -1)] {
        let own = pos.color_bb(color);
        for kind in [PieceKind::Knight, PieceKind::Bishop, PieceKind::Rook, PieceKind::Queen] {
            for sq in squares(pos.kind_bb(color, kind)) {
                let atk = match kind {
                    PieceKind::Knight => bitboard::knight_attacks(sq),
                    PieceKind::Bishop => bitboard::bishop_attacks(sq, occ),
                    PieceKind::Rook => bitboard::rook_attacks(sq, occ),
                    _ => bitboard::queen_attacks(sq, occ),
                };
                score += sign * MOBILITY_WEIGHT[kind.index()] * (atk & !own).count_ones() as i32;
            }
        }

        // Rooks on open and half-open files.
        let own_pawns = pos.kind_bb(color, PieceKind::Pawn);
        let their_pawns = pos.kind_bb(color.opponent(), PieceKind::Pawn);
        for sq in squares(pos.kind_bb(color, PieceKind::Rook)) {
            let file = bitboard::file_mask(sq.file());
            if file & own_pawns == 0 {
                score += sign * if file & their_pawns == 0 { 15 } else { 8 };
            }
        }
    }
    score
}

fn king_safety(pos: &Position, non_pawn: i32) -> i32 {
    let mut score = 0;
    for (color, sign) in [(Color::White, 1), (Color::Black, -1)] {
        if pos.kind_bb(color.opponent(), PieceKind::Queen) == 0 {
            continue;
        }
        let king = pos.king_sq(color);
        let shield_rank = if color.is_white() { king.rank() + 1 } else { king.rank().wrapping_sub(1) };
        if shield_rank > 7 {
            continue;
        }
        let zone = bitboard::king_attacks(king) & bitboard::rank_mask(shield_rank);
        let shield = (zone & pos.kind_bb(color, PieceKind::Pawn)).count_ones() as i32;
        score += sign * 6 * shield;
    }
    interpolate(score, 0, non_pawn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::util::{mirror_x, swap_colors};
    use crate::position::START_POS_FEN;

    fn eval_white_of(fen: &str) -> i32 {
        let pos = Position::from_fen(fen).unwrap();
        let mut tables = EvalTables::new();
        Evaluator::new(&mut tables).eval_white(&pos)
    }

    #[test]
    fn startpos_is_level_plus_tempo() {
        let v = eval_white_of(START_POS_FEN);
        assert!((0..=15).contains(&v), "startpos eval {v}");
    }

    #[test]
    fn color_symmetry() {
        let fens = [
            START_POS_FEN,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/4k3/8/8/8/3QK3/8/8 w - - 0 1",
            "1k6/1p6/1P6/3K4/8/8/8/8 w - - 0 1",
            "r1bq1rk1/ppp1n1bp/3p1np1/3Pp3/1PP1Pp2/2N2P2/P2NB1PP/1RBQ1RK1 w - - 0 13",
            "6k1/5p2/4p3/3pP3/2pP4/2P5/8/6K1 w - - 0 1",
        ];
        for fen in fens {
            let pos = Position::from_fen(fen).unwrap();
            let sym = swap_colors(&pos);
            let mut t1 = EvalTables::new();
            let mut t2 = EvalTables::new();
            let a = Evaluator::new(&mut t1).eval_white(&pos);
            let b = Evaluator::new(&mut t2).eval_white(&sym);
            assert_eq!(a, b, "color symmetry broken for {fen}");
        }
    }

    #[test]
    fn mirror_symmetry_within_bound() {
        let fens = [
            START_POS_FEN,
            "r1bq1rk1/ppp1n1bp/3p1np1/3Pp3/1PP1Pp2/2N2P2/P2NB1PP/1RBQ1RK1 w - - 0 13",
            "6k1/5p2/4p3/3pP3/2pP4/2P5/8/6K1 w - - 0 1",
        ];
        for fen in fens {
            let pos = Position::from_fen(fen).unwrap();
            let mir = mirror_x(&pos);
            let mut t1 = EvalTables::new();
            let mut t2 = EvalTables::new();
            let a = Evaluator::new(&mut t1).eval_white(&pos);
            let b = Evaluator::new(&mut t2).eval_white(&mir);
            assert!((a - b).abs() <= 2, "mirror asymmetry {a} vs {b} for {fen}");
        }
    }

    #[test]
    fn kqk_scores_high() {
        assert!(eval_white_of("8/4k3/8/8/8/3QK3/8/8 w - - 0 1") > 1275);
    }

    #[test]
    fn kpk_blocked_draw_within_tempo() {
        let v = eval_white_of("1k6/1p6/1P6/3K4/8/8/8/8 w - - 0 1");
        assert!(v.abs() <= TEMPO_BONUS_EG, "blocked KPKP eval {v}");
    }

    #[test]
    fn eval_hash_consistent() {
        let pos = Position::from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1").unwrap();
        let mut tables = EvalTables::new();
        let mut ev = Evaluator::new(&mut tables);
        let first = ev.eval_pos(&pos);
        let second = ev.eval_pos(&pos); // cached path
        assert_eq!(first, second);
    }

    #[test]
    fn halfmove_clock_damps_score() {
        let fresh = eval_white_of("4k3/8/8/8/8/8/PPP5/4K3 w - - 0 1");
        let old = eval_white_of("4k3/8/8/8/8/8/PPP5/4K3 w - - 90 60");
        assert!(old.abs() < fresh.abs());
    }

    #[test]
    fn material_advantage_shows() {
        let v = eval_white_of("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
        let up_a_rook = eval_white_of("1nbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w Kk - 0 1");
        assert!(up_a_rook > v + 300);
    }
}
