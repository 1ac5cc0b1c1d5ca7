//! Shortest-path engine over piece move graphs.
//!
//! Distances are computed backwards from a target square with a breadth
//! first search, treating `blocked` squares as impassable. Pawns are not
//! handled here; the scheduler moves them explicitly.

use engine_core::bitboard;
use engine_core::types::{PieceKind, Square};

/// Distance-to-target table. `dist[sq] == None` means unreachable.
pub struct ShortestPathData {
    pub target: Square,
    pub dist: [Option<u8>; 64],
}

/// One-step move set of a non-pawn piece, respecting blockers.
fn step_attacks(kind: PieceKind, sq: Square, blocked: u64) -> u64 {
    match kind {
        PieceKind::Knight => bitboard::knight_attacks(sq),
        PieceKind::King => bitboard::king_attacks(sq),
        PieceKind::Bishop => bitboard::bishop_attacks(sq, blocked),
        PieceKind::Rook => bitboard::rook_attacks(sq, blocked),
        PieceKind::Queen => bitboard::queen_attacks(sq, blocked),
        PieceKind::Pawn => 0,
    }
}

/// Compute distances from every square to `target` for `kind`, never
/// passing through or stopping on `blocked` squares. The target itself may
/// be listed in `blocked` by the caller; it is always treated as free.
pub fn shortest_paths(kind: PieceKind, target: Square, blocked: u64) -> ShortestPathData {
    debug_assert!(kind != PieceKind::Pawn, "pawn paths are directional; handled elsewhere");
    let blocked = blocked & !target.bit();
    let mut dist = [None; 64];
    dist[target.index()] = Some(0);
    let mut frontier = target.bit();
    let mut d = 0u8;
    while frontier != 0 {
        d += 1;
        let mut next = 0u64;
        for sq in bitboard::squares(frontier) {
            // Piece moves are symmetric, so attacks from `sq` reach exactly
            // the squares that can reach `sq`.
            next |= step_attacks(kind, sq, blocked) & !blocked;
        }
        let mut new_frontier = 0u64;
        for sq in bitboard::squares(next) {
            if dist[sq.index()].is_none() {
                dist[sq.index()] = Some(d);
                new_frontier |= sq.bit();
            }
        }
        frontier = new_frontier;
    }
    ShortestPathData { target, dist }
}

impl ShortestPathData {
    #[inline]
    pub fn distance(&self, from: Square) -> Option<u8> {
        self.dist[from.index()]
    }

    /// Squares one step closer to the target, reachable from `from`.
    pub fn next_squares(&self, kind: PieceKind, from: Square, blocked: u64) -> u64 {
        let Some(d) = self.dist[from.index()] else {
            return 0;
        };
        if d == 0 {
            return 0;
        }
        let mut mask = 0;
        for sq in bitboard::squares(step_attacks(kind, from, blocked) & !blocked) {
            if self.dist[sq.index()] == Some(d - 1) {
                mask |= sq.bit();
            }
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::bitboard::sq_mask;

    fn sq(s: &str) -> Square {
        Square::from_str_coord(s).unwrap()
    }

    #[test]
    fn knight_distances_on_empty_board() {
        let spd = shortest_paths(PieceKind::Knight, sq("c3"), 0);
        assert_eq!(spd.distance(sq("c3")), Some(0));
        assert_eq!(spd.distance(sq("b1")), Some(1));
        assert_eq!(spd.distance(sq("a1")), Some(2));
        // The famous long corner trip.
        let spd = shortest_paths(PieceKind::Knight, sq("b2"), 0);
        assert_eq!(spd.distance(sq("a1")), Some(4));
    }

    #[test]
    fn rook_goes_around_blockers() {
        let spd = shortest_paths(PieceKind::Rook, sq("a8"), 0);
        assert_eq!(spd.distance(sq("a1")), Some(1));
        let wall = sq_mask(&["a4", "b4", "c4", "d4", "e4", "f4", "g4"]);
        let spd = shortest_paths(PieceKind::Rook, sq("a8"), wall);
        // Must route around via the h file.
        assert_eq!(spd.distance(sq("a1")), Some(3));
    }

    #[test]
    fn bishop_stays_on_its_color() {
        let spd = shortest_paths(PieceKind::Bishop, sq("c1"), 0);
        assert_eq!(spd.distance(sq("a3")), Some(1));
        assert_eq!(spd.distance(sq("h6")), Some(1));
        assert_eq!(spd.distance(sq("a1")), Some(2));
        assert_eq!(spd.distance(sq("b1")), None, "wrong square color");
    }

    #[test]
    fn sealed_in_piece_is_unreachable() {
        let box_mask = sq_mask(&["a2", "b2", "b1"]);
        let spd = shortest_paths(PieceKind::Rook, sq("h8"), box_mask);
        assert_eq!(spd.distance(sq("a1")), None);
        let spd = shortest_paths(PieceKind::Knight, sq("h8"), box_mask);
        assert!(spd.distance(sq("a1")).is_some(), "knights jump the wall");
    }

    #[test]
    fn next_squares_walk_reaches_target() {
        let blocked = sq_mask(&["d4", "d5", "e4", "e5"]);
        let spd = shortest_paths(PieceKind::Queen, sq("h8"), blocked);
        let mut at = sq("a1");
        let mut steps = 0;
        while at != sq("h8") {
            let nexts = spd.next_squares(PieceKind::Queen, at, blocked);
            assert!(nexts != 0, "stuck at {at}");
            at = engine_core::bitboard::first_square(nexts);
            steps += 1;
            assert!(steps < 10);
        }
        assert_eq!(Some(steps), spd.distance(sq("a1")).map(|d| d as i32));
    }
}
