//! Endgame-specific evaluation corrections.

use crate::bitboard;
use crate::position::Position;
use crate::types::{Color, Piece, PieceKind, Square};

use super::kpk;
use super::tables::{piece_value, BISHOP_VALUE, KNIGHT_VALUE, PAWN_VALUE, ROOK_VALUE};

pub fn material_value(pos: &Position, color: Color) -> i32 {
    let mut v = 0;
    for kind in PieceKind::ALL {
        v += piece_value(kind) * pos.kind_bb(color, kind).count_ones() as i32;
    }
    v
}

pub fn non_pawn_material(pos: &Position, color: Color) -> i32 {
    material_value(pos, color) - PAWN_VALUE * pos.kind_bb(color, PieceKind::Pawn).count_ones() as i32
}

/// Bonus for driving the losing king toward the edge and keeping the kings
/// close; applied on top of a decisive material advantage in pawnless
/// endings.
pub fn mate_eval(win_k: Square, lose_k: Square) -> i32 {
    let edge_dist = |sq: Square| {
        let f = sq.file().min(7 - sq.file());
        let r = sq.rank().min(7 - sq.rank());
        f.min(r) as i32
    };
    let drive = 10 * (3 - edge_dist(lose_k));
    let proximity = 10 * (7 - win_k.king_distance(lose_k) as i32);
    300 + drive + proximity
}

/// Centralization table for drawish pawnless endings; pushes the king toward
/// the middle without claiming a win.
fn win_king_score(sq: Square) -> i32 {
    let f = sq.file().min(7 - sq.file()) as i32;
    let r = sq.rank().min(7 - sq.rank()) as i32;
    4 * (f + r)
}

fn insufficient_material(pos: &Position, color: Color) -> bool {
    if pos.kind_bb(color, PieceKind::Pawn) != 0 {
        return false;
    }
    let np = non_pawn_material(pos, color);
    np <= BISHOP_VALUE
        || (np == 2 * KNIGHT_VALUE && pos.kind_bb(color, PieceKind::Knight).count_ones() == 2)
}

fn single_pawn_sq(pos: &Position, color: Color) -> Option<Square> {
    let pawns = pos.kind_bb(color, PieceKind::Pawn);
    if pawns.count_ones() == 1 {
        Some(bitboard::first_square(pawns))
    } else {
        None
    }
}

/// True if the non-pawn material is low enough for endgame handling.
pub fn is_end_game(pos: &Position) -> bool {
    non_pawn_material(pos, Color::White) + non_pawn_material(pos, Color::Black) <= 2 * ROOK_VALUE + 2 * BISHOP_VALUE
}

/// Adjust a white-view score for known endgame patterns. `score` is the
/// hand-crafted evaluation so far.
pub fn end_game_eval(pos: &Position, score: i32) -> i32 {
    let w_mtrl = material_value(pos, Color::White);
    let b_mtrl = material_value(pos, Color::Black);
    let pawns = pos.piece_bb(Piece::WPawn) | pos.piece_bb(Piece::BPawn);

    if pawns == 0 {
        let leader = if w_mtrl > b_mtrl { Some(Color::White) } else if b_mtrl > w_mtrl { Some(Color::Black) } else { None };
        match leader {
            Some(color) => {
                // Not enough material to mate: draw apart from a token pull.
                if insufficient_material(pos, color) {
                    return score / 50;
                }
                let diff = (w_mtrl - b_mtrl).abs();
                if diff >= ROOK_VALUE - KNIGHT_VALUE || non_pawn_material(pos, color.opponent()) == 0 {
                    let me = mate_eval(pos.king_sq(color), pos.king_sq(color.opponent()));
                    return if color.is_white() { score + me } else { score - me };
                }
                // Small edge without mating power, e.g. minor vs nothing
                // already handled; R vs B and friends stay drawish.
                return score / 8;
            }
            None => {
                return score / 4
                    + win_king_score(pos.king_sq(Color::White))
                    - win_king_score(pos.king_sq(Color::Black));
            }
        }
    }

    // King and pawn versus bare king: exact bitbase verdict.
    for color in [Color::White, Color::Black] {
        let them = color.opponent();
        if non_pawn_material(pos, color) == 0
            && non_pawn_material(pos, them) == 0
            && pos.kind_bb(them, PieceKind::Pawn) == 0
        {
            if let Some(pawn) = single_pawn_sq(pos, color) {
                let (wk, bk, pawn, stm_is_attacker) = if color.is_white() {
                    (pos.king_sq(Color::White), pos.king_sq(Color::Black), pawn, pos.is_white_move())
                } else {
                    (
                        pos.king_sq(Color::Black).mirror_y(),
                        pos.king_sq(Color::White).mirror_y(),
                        pawn.mirror_y(),
                        !pos.is_white_move(),
                    )
                };
                let win = kpk::probe_white_win(stm_is_attacker, wk, bk, pawn);
                let v = if win {
                    // Promotion is coming; score like a near-queen ending.
                    600 + 40 * pawn.rank() as i32
                } else {
                    0
                };
                return if color.is_white() { v } else { -v };
            }
        }
    }

    // Single pawn each, mutually blocked on one file: dead draw unless a king
    // wins the race, which the search resolves; statically call it level.
    if non_pawn_material(pos, Color::White) == 0 && non_pawn_material(pos, Color::Black) == 0 {
        if let (Some(wp), Some(bp)) = (single_pawn_sq(pos, Color::White), single_pawn_sq(pos, Color::Black)) {
            if wp.file() == bp.file() && bp.index() == wp.index() + 8 {
                return 0;
            }
        }
    }

    score
}
