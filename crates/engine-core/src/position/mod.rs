//! Position representation: board state, make/unmake, incremental hashes.

mod fen;
pub mod util;
pub mod zobrist;

pub use fen::FenError;
pub use util::{mirror_x, swap_colors};

use crate::bitboard;
use crate::types::{Color, Move, Piece, PieceKind, Square, UndoInfo};
use zobrist::ZOBRIST;

/// FEN of the standard chess starting position.
pub const START_POS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Castle-rights bits.
pub const A1_CASTLE: u8 = 1;
pub const H1_CASTLE: u8 = 2;
pub const A8_CASTLE: u8 = 4;
pub const H8_CASTLE: u8 = 8;

/// A snapshot of game state. Copied by value along search stacks; all hashes
/// and the material identifier are maintained incrementally and always equal
/// their from-scratch recomputation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    board: [Piece; 64],
    piece_bb: [u64; Piece::NUM],
    color_bb: [u64; Color::NUM],
    white_move: bool,
    castle_mask: u8,
    ep_square: Option<Square>,
    halfmove_clock: u16,
    fullmove_counter: u16,
    hash: u64,
    pawn_hash: u64,
    material_id: u64,
}

impl Default for Position {
    fn default() -> Self {
        Position::empty()
    }
}

impl Position {
    /// An empty board, White to move. Used as a builder state by FEN parsing
    /// and the proof-game tooling; not a legal game position by itself.
    pub fn empty() -> Position {
        Position {
            board: [Piece::Empty; 64],
            piece_bb: [0; Piece::NUM],
            color_bb: [0; Color::NUM],
            white_move: true,
            castle_mask: 0,
            ep_square: None,
            halfmove_clock: 0,
            fullmove_counter: 1,
            hash: ZOBRIST.side,
            pawn_hash: 0,
            material_id: 0,
        }
    }

    /// The standard starting position.
    pub fn start() -> Position {
        Position::from_fen(START_POS_FEN).expect("start position FEN is valid")
    }

    #[inline]
    pub fn piece_on(&self, sq: Square) -> Piece {
        self.board[sq.index()]
    }

    #[inline]
    pub fn piece_bb(&self, p: Piece) -> u64 {
        self.piece_bb[p.index()]
    }

    #[inline]
    pub fn kind_bb(&self, color: Color, kind: PieceKind) -> u64 {
        self.piece_bb(Piece::make(color, kind))
    }

    #[inline]
    pub fn color_bb(&self, c: Color) -> u64 {
        self.color_bb[c.index()]
    }

    #[inline]
    pub fn occupied(&self) -> u64 {
        self.color_bb[0] | self.color_bb[1]
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        if self.white_move {
            Color::White
        } else {
            Color::Black
        }
    }

    #[inline]
    pub fn is_white_move(&self) -> bool {
        self.white_move
    }

    pub fn set_side_to_move(&mut self, c: Color) {
        if self.white_move != c.is_white() {
            self.hash ^= ZOBRIST.side;
            self.white_move = c.is_white();
        }
    }

    #[inline]
    pub fn castle_mask(&self) -> u8 {
        self.castle_mask
    }

    pub fn set_castle_mask(&mut self, mask: u8) {
        self.castle_mask = mask & 15;
    }

    #[inline]
    pub fn ep_square(&self) -> Option<Square> {
        self.ep_square
    }

    pub fn set_ep_square(&mut self, sq: Option<Square>) {
        self.ep_square = sq;
    }

    #[inline]
    pub fn halfmove_clock(&self) -> u16 {
        self.halfmove_clock
    }

    pub fn set_halfmove_clock(&mut self, clock: u16) {
        self.halfmove_clock = clock;
    }

    #[inline]
    pub fn fullmove_counter(&self) -> u16 {
        self.fullmove_counter
    }

    pub fn set_fullmove_counter(&mut self, n: u16) {
        self.fullmove_counter = n;
    }

    /// King square for `color`. The board must contain that king.
    #[inline]
    pub fn king_sq(&self, color: Color) -> Square {
        bitboard::first_square(self.kind_bb(color, PieceKind::King))
    }

    /// Zobrist hash over pieces and side to move.
    #[inline]
    pub fn zobrist_hash(&self) -> u64 {
        self.hash
    }

    /// Full position hash: pieces, side, castle rights and en-passant file.
    /// This is the key used by the transposition table and repetition checks.
    #[inline]
    pub fn history_hash(&self) -> u64 {
        let mut h = self.hash ^ ZOBRIST.castle[self.castle_mask as usize];
        if let Some(ep) = self.ep_square {
            h ^= ZOBRIST.ep_file[ep.file() as usize];
        }
        h
    }

    /// Hash over pawns only; keys the pawn-structure cache.
    #[inline]
    pub fn pawn_zobrist_hash(&self) -> u64 {
        self.pawn_hash
    }

    /// Compact encoding of the non-king piece counts of both sides.
    /// White counts occupy bits 0..20, black counts bits 32..52, so the
    /// color-swapped identifier is a 32-bit rotation.
    #[inline]
    pub fn material_id(&self) -> u64 {
        self.material_id
    }

    pub fn mirror_material_id(id: u64) -> u64 {
        id.rotate_left(32)
    }

    fn material_nibble(p: Piece) -> Option<u32> {
        let kind = p.kind()?;
        let slot = match kind {
            PieceKind::King => return None,
            PieceKind::Queen => 0,
            PieceKind::Rook => 1,
            PieceKind::Bishop => 2,
            PieceKind::Knight => 3,
            PieceKind::Pawn => 4,
        };
        let base = if p.is_white() { 0 } else { 32 };
        Some(base + slot * 4)
    }

    /// Number of pieces of kind `kind` and color `color`, read from the
    /// material identifier.
    pub fn material_count(id: u64, color: Color, kind: PieceKind) -> u32 {
        match Self::material_nibble(Piece::make(color, kind)) {
            Some(shift) => ((id >> shift) & 0xf) as u32,
            None => 1,
        }
    }

    fn put_piece(&mut self, sq: Square, p: Piece) {
        debug_assert!(self.board[sq.index()].is_empty());
        debug_assert!(!p.is_empty());
        self.board[sq.index()] = p;
        self.piece_bb[p.index()] |= sq.bit();
        self.color_bb[p.color().unwrap().index()] |= sq.bit();
        self.hash ^= ZOBRIST.psq[p.index()][sq.index()];
        if p.kind() == Some(PieceKind::Pawn) {
            self.pawn_hash ^= ZOBRIST.psq[p.index()][sq.index()];
        }
        if let Some(shift) = Self::material_nibble(p) {
            self.material_id += 1 << shift;
        }
    }

    fn remove_piece(&mut self, sq: Square) -> Piece {
        let p = self.board[sq.index()];
        debug_assert!(!p.is_empty());
        self.board[sq.index()] = Piece::Empty;
        self.piece_bb[p.index()] &= !sq.bit();
        self.color_bb[p.color().unwrap().index()] &= !sq.bit();
        self.hash ^= ZOBRIST.psq[p.index()][sq.index()];
        if p.kind() == Some(PieceKind::Pawn) {
            self.pawn_hash ^= ZOBRIST.psq[p.index()][sq.index()];
        }
        if let Some(shift) = Self::material_nibble(p) {
            self.material_id -= 1 << shift;
        }
        p
    }

    /// Place `p` on `sq`, replacing whatever was there. Raw board editing for
    /// tooling; hashes and material stay in sync.
    pub fn set_piece(&mut self, sq: Square, p: Piece) {
        if !self.board[sq.index()].is_empty() {
            self.remove_piece(sq);
        }
        if !p.is_empty() {
            self.put_piece(sq, p);
        }
    }

    /// Apply a pseudo-legal move and return the undo record.
    pub fn make_move(&mut self, m: Move) -> UndoInfo {
        let from = m.from();
        let to = m.to();
        let p = self.board[from.index()];
        debug_assert!(!p.is_empty(), "make_move from an empty square");
        let color = p.color().unwrap();
        let captured = self.board[to.index()];

        let ui = UndoInfo {
            captured,
            castle_mask: self.castle_mask,
            ep_square: self.ep_square,
            halfmove_clock: self.halfmove_clock,
        };

        let is_pawn = p.kind() == Some(PieceKind::Pawn);
        let mut is_capture = !captured.is_empty();

        if !captured.is_empty() {
            self.remove_piece(to);
        } else if is_pawn && self.ep_square == Some(to) && from.file() != to.file() {
            // En passant: the captured pawn stands beside the destination.
            let cap_sq = Square::from_file_rank(to.file(), from.rank());
            self.remove_piece(cap_sq);
            is_capture = true;
        }

        self.remove_piece(from);
        if m.promote_to().is_empty() {
            self.put_piece(to, p);
        } else {
            self.put_piece(to, m.promote_to());
        }

        // Castling: move the rook as well.
        if p.kind() == Some(PieceKind::King) && from.file().abs_diff(to.file()) == 2 {
            let rank = from.rank();
            let (rook_from, rook_to) = if to.file() == 6 {
                (Square::from_file_rank(7, rank), Square::from_file_rank(5, rank))
            } else {
                (Square::from_file_rank(0, rank), Square::from_file_rank(3, rank))
            };
            let rook = self.remove_piece(rook_from);
            self.put_piece(rook_to, rook);
        }

        // Castle rights: lost on king moves, rook moves from a corner, and
        // captures on a corner.
        if p.kind() == Some(PieceKind::King) {
            self.castle_mask &= if color.is_white() {
                !(A1_CASTLE | H1_CASTLE)
            } else {
                !(A8_CASTLE | H8_CASTLE)
            };
        }
        for sq in [from, to] {
            match sq {
                Square::A1 => self.castle_mask &= !A1_CASTLE,
                Square::H1 => self.castle_mask &= !H1_CASTLE,
                Square::A8 => self.castle_mask &= !A8_CASTLE,
                Square::H8 => self.castle_mask &= !H8_CASTLE,
                _ => {}
            }
        }

        // En passant square: only after a double pawn push.
        self.ep_square = if is_pawn && from.rank().abs_diff(to.rank()) == 2 {
            Some(Square::from_file_rank(from.file(), (from.rank() + to.rank()) / 2))
        } else {
            None
        };

        self.halfmove_clock = if is_pawn || is_capture { 0 } else { self.halfmove_clock + 1 };
        if !self.white_move {
            self.fullmove_counter += 1;
        }
        self.white_move = !self.white_move;
        self.hash ^= ZOBRIST.side;

        ui
    }

    /// Reverse `make_move`. Restores the position bit for bit.
    pub fn unmake_move(&mut self, m: Move, ui: UndoInfo) {
        self.white_move = !self.white_move;
        self.hash ^= ZOBRIST.side;
        if !self.white_move {
            self.fullmove_counter -= 1;
        }

        let from = m.from();
        let to = m.to();
        let p = self.remove_piece(to);
        let color = p.color().unwrap();
        let moved = if m.promote_to().is_empty() {
            p
        } else {
            Piece::make(color, PieceKind::Pawn)
        };
        self.put_piece(from, moved);

        if !ui.captured.is_empty() {
            self.put_piece(to, ui.captured);
        } else if moved.kind() == Some(PieceKind::Pawn)
            && ui.ep_square == Some(to)
            && from.file() != to.file()
        {
            let cap_sq = Square::from_file_rank(to.file(), from.rank());
            self.put_piece(cap_sq, Piece::make(color.opponent(), PieceKind::Pawn));
        }

        if p.kind() == Some(PieceKind::King) && from.file().abs_diff(to.file()) == 2 {
            let rank = from.rank();
            let (rook_from, rook_to) = if to.file() == 6 {
                (Square::from_file_rank(7, rank), Square::from_file_rank(5, rank))
            } else {
                (Square::from_file_rank(0, rank), Square::from_file_rank(3, rank))
            };
            let rook = self.remove_piece(rook_to);
            self.put_piece(rook_from, rook);
        }

        self.castle_mask = ui.castle_mask;
        self.ep_square = ui.ep_square;
        self.halfmove_clock = ui.halfmove_clock;
    }

    /// Pass the move: flip the side to move and clear the en-passant square.
    /// Used by null-move pruning; the returned record restores both.
    pub fn make_null_move(&mut self) -> UndoInfo {
        let ui = UndoInfo {
            captured: Piece::Empty,
            castle_mask: self.castle_mask,
            ep_square: self.ep_square,
            halfmove_clock: self.halfmove_clock,
        };
        self.ep_square = None;
        self.halfmove_clock += 1;
        if !self.white_move {
            self.fullmove_counter += 1;
        }
        self.white_move = !self.white_move;
        self.hash ^= ZOBRIST.side;
        ui
    }

    pub fn unmake_null_move(&mut self, ui: UndoInfo) {
        self.white_move = !self.white_move;
        self.hash ^= ZOBRIST.side;
        if !self.white_move {
            self.fullmove_counter -= 1;
        }
        self.ep_square = ui.ep_square;
        self.halfmove_clock = ui.halfmove_clock;
    }

    /// Recompute the piece/side hash from scratch; test oracle for the
    /// incremental update.
    pub fn compute_zobrist_hash(&self) -> u64 {
        let mut h = 0u64;
        for sq in Square::all() {
            let p = self.board[sq.index()];
            h ^= ZOBRIST.psq[p.index()][sq.index()];
        }
        if self.white_move {
            h ^= ZOBRIST.side;
        }
        // The side key is folded in unconditionally at construction and
        // toggled per move, so White to move means "side key present".
        h
    }

    pub fn compute_pawn_hash(&self) -> u64 {
        let mut h = 0u64;
        for sq in bitboard::squares(self.piece_bb(Piece::WPawn) | self.piece_bb(Piece::BPawn)) {
            let p = self.board[sq.index()];
            h ^= ZOBRIST.psq[p.index()][sq.index()];
        }
        h
    }

    pub fn compute_material_id(&self) -> u64 {
        let mut id = 0u64;
        for sq in Square::all() {
            if let Some(shift) = Self::material_nibble(self.board[sq.index()]) {
                id += 1 << shift;
            }
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen;

    fn walk_and_check(fen: &str, depth: u32) {
        let mut pos = Position::from_fen(fen).unwrap();
        walk(&mut pos, depth);
    }

    fn walk(pos: &mut Position, depth: u32) {
        if depth == 0 {
            return;
        }
        let mut list = movegen::MoveList::new();
        movegen::pseudo_legal_moves(pos, &mut list);
        movegen::remove_illegal(pos, &mut list);
        for &m in list.iter() {
            let before = pos.clone();
            let ui = pos.make_move(m);
            assert_eq!(pos.zobrist_hash(), pos.compute_zobrist_hash());
            assert_eq!(pos.pawn_zobrist_hash(), pos.compute_pawn_hash());
            assert_eq!(pos.material_id(), pos.compute_material_id());
            walk(pos, depth - 1);
            pos.unmake_move(m, ui);
            assert_eq!(*pos, before, "unmake did not restore after {m}");
        }
    }

    #[test]
    fn make_unmake_identity_startpos() {
        walk_and_check(START_POS_FEN, 3);
    }

    #[test]
    fn make_unmake_identity_tactical() {
        // Castling, en passant and promotions all reachable.
        walk_and_check("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1", 2);
        walk_and_check("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1", 3);
        walk_and_check("n1n5/PPPk4/8/8/8/8/4Kppp/5N1N b - - 0 1", 3);
    }

    #[test]
    fn en_passant_make_unmake() {
        let mut pos = Position::from_fen("8/8/8/8/1p6/8/P7/K1k5 w - - 0 1").unwrap();
        let dbl = Move::new(Square::from_str_coord("a2").unwrap(), Square::from_str_coord("a4").unwrap(), Piece::Empty);
        let ui = pos.make_move(dbl);
        assert_eq!(pos.ep_square(), Square::from_str_coord("a3"));
        let before = pos.clone();
        let ep = Move::new(Square::from_str_coord("b4").unwrap(), Square::from_str_coord("a3").unwrap(), Piece::Empty);
        let ui2 = pos.make_move(ep);
        assert_eq!(pos.piece_on(Square::from_str_coord("a4").unwrap()), Piece::Empty);
        assert_eq!(pos.halfmove_clock(), 0);
        pos.unmake_move(ep, ui2);
        assert_eq!(pos, before);
        pos.unmake_move(dbl, ui);
    }

    #[test]
    fn castle_rights_never_return() {
        let mut pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let m = Move::new(Square::E1, Square::G1, Piece::Empty);
        pos.make_move(m);
        assert_eq!(pos.castle_mask() & (A1_CASTLE | H1_CASTLE), 0);
        assert_eq!(pos.piece_on(Square::F1), Piece::WRook);
        assert_eq!(pos.piece_on(Square::G1), Piece::WKing);
    }

    #[test]
    fn rook_capture_clears_rights() {
        let mut pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let m = Move::new(Square::A1, Square::A8, Piece::Empty);
        pos.make_move(m);
        assert_eq!(pos.castle_mask() & A8_CASTLE, 0);
        assert_eq!(pos.castle_mask() & A1_CASTLE, 0);
        assert_ne!(pos.castle_mask() & H8_CASTLE, 0);
    }

    #[test]
    fn material_id_mirror() {
        let pos = Position::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap();
        assert_eq!(Position::mirror_material_id(pos.material_id()), pos.material_id());
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/Q3K3 w - - 0 1").unwrap();
        let swapped = crate::position::util::swap_colors(&pos);
        assert_eq!(Position::mirror_material_id(pos.material_id()), swapped.material_id());
    }

    #[test]
    fn material_count_readout() {
        let pos = Position::start();
        let id = pos.material_id();
        assert_eq!(Position::material_count(id, Color::White, PieceKind::Pawn), 8);
        assert_eq!(Position::material_count(id, Color::Black, PieceKind::Queen), 1);
        assert_eq!(Position::material_count(id, Color::White, PieceKind::Rook), 2);
    }
}
