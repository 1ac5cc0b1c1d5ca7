//! Multi-board: a board where a square may temporarily hold several pieces.
//!
//! The extended kernel is applied to this representation before concrete
//! move paths exist, so two pieces can transiently share a square. `expel`
//! collapses the board back to one piece per square.

use engine_core::error::ChessError;
use engine_core::movegen;
use engine_core::position::Position;
use engine_core::types::{Color, Piece, PieceKind, Square};

pub const MAX_PER_SQUARE: usize = 4;

#[derive(Debug, Clone)]
pub struct MultiBoard {
    squares: [[Piece; MAX_PER_SQUARE]; 64],
    counts: [u8; 64],
}

impl Default for MultiBoard {
    fn default() -> Self {
        MultiBoard { squares: [[Piece::Empty; MAX_PER_SQUARE]; 64], counts: [0; 64] }
    }
}

impl MultiBoard {
    pub fn new() -> MultiBoard {
        MultiBoard::default()
    }

    pub fn from_position(pos: &Position) -> MultiBoard {
        let mut brd = MultiBoard::new();
        for sq in Square::all() {
            let p = pos.piece_on(sq);
            if !p.is_empty() {
                brd.add_piece(sq, p).expect("single piece per square fits");
            }
        }
        brd
    }

    pub fn n_pieces(&self, sq: Square) -> usize {
        self.counts[sq.index()] as usize
    }

    pub fn piece(&self, sq: Square, i: usize) -> Piece {
        self.squares[sq.index()][i]
    }

    pub fn has_piece(&self, sq: Square, p: Piece) -> bool {
        self.squares[sq.index()][..self.n_pieces(sq)].contains(&p)
    }

    pub fn n_pieces_of_type(&self, sq: Square, p: Piece) -> usize {
        self.squares[sq.index()][..self.n_pieces(sq)].iter().filter(|&&q| q == p).count()
    }

    pub fn add_piece(&mut self, sq: Square, p: Piece) -> Result<(), ChessError> {
        let n = self.n_pieces(sq);
        if n >= MAX_PER_SQUARE {
            return Err(ChessError::new(format!("too many pieces on square {sq}")));
        }
        self.squares[sq.index()][n] = p;
        self.counts[sq.index()] += 1;
        Ok(())
    }

    pub fn remove_piece_no(&mut self, sq: Square, i: usize) {
        let n = self.n_pieces(sq);
        debug_assert!(i < n);
        self.squares[sq.index()].copy_within(i + 1..n, i);
        self.counts[sq.index()] -= 1;
    }

    /// Remove the most recently added piece of the given kind.
    pub fn remove_piece_type(&mut self, sq: Square, p: Piece) -> Result<(), ChessError> {
        let n = self.n_pieces(sq);
        for i in (0..n).rev() {
            if self.squares[sq.index()][i] == p {
                self.remove_piece_no(sq, i);
                return Ok(());
            }
        }
        Err(ChessError::new(format!("no {p:?} on square {sq}")))
    }

    /// Replace one `old` piece by `new` in place; false if absent.
    pub fn replace_piece(&mut self, sq: Square, old: Piece, new: Piece) -> bool {
        let n = self.n_pieces(sq);
        for i in 0..n {
            if self.squares[sq.index()][i] == old {
                self.squares[sq.index()][i] = new;
                return true;
            }
        }
        false
    }

    /// True if a pawn of `color` can still be routed to `to` along its file
    /// without running into a pawn wall.
    pub fn can_move_pawn(&self, color: Color, to: Square) -> bool {
        let file = to.file();
        let target_rank = to.rank();
        let first_rank: i16 = if color.is_white() { 1 } else { 6 };
        let d: i16 = if color.is_white() { 1 } else { -1 };
        let pawn = Piece::make(color, PieceKind::Pawn);
        let other = Piece::make(color.opponent(), PieceKind::Pawn);

        let mut from_rank = None;
        let mut r = first_rank;
        while r != target_rank as i16 {
            if self.has_piece(Square::from_file_rank(file, r as u8), pawn) {
                from_rank = Some(r);
                break;
            }
            r += d;
        }
        let Some(from_rank) = from_rank else {
            return true;
        };
        let mut r = from_rank + d;
        while r != target_rank as i16 {
            let sq = Square::from_file_rank(file, r as u8);
            if self.has_piece(sq, pawn) || self.has_piece(sq, other) {
                return false;
            }
            r += d;
        }
        true
    }

    /// Collapse to one piece per square: surplus pieces go to the nearest
    /// empty square (same square color for bishops, and kings avoid
    /// blocking pawn promotions), then kings are moved off attacked
    /// squares.
    pub fn expel(&mut self) -> Result<(), ChessError> {
        let dist = |brd: &MultiBoard, from: Square, to: Square, is_king: bool| -> u32 {
            let mut d = from.king_distance(to) as u32;
            if is_king {
                let f = to.file();
                if (to.rank() == 7 && brd.has_piece(Square::from_file_rank(f, 6), Piece::WPawn))
                    || (to.rank() == 0 && brd.has_piece(Square::from_file_rank(f, 1), Piece::BPawn))
                {
                    d += 20;
                }
            }
            d
        };

        for from in Square::all() {
            while self.n_pieces(from) > 1 {
                let p = self.piece(from, 0);
                let is_king = p.kind() == Some(PieceKind::King);
                let is_bishop = p.kind() == Some(PieceKind::Bishop);
                let mut best: Option<Square> = None;
                for to in Square::all() {
                    if self.n_pieces(to) > 0 {
                        continue;
                    }
                    if is_bishop && from.is_dark() != to.is_dark() {
                        continue;
                    }
                    if best.is_none_or(|b| dist(self, from, to, is_king) < dist(self, from, b, is_king)) {
                        best = Some(to);
                    }
                }
                let Some(best) = best else {
                    return Err(ChessError::new(format!("cannot expel piece on square {from}")));
                };
                self.remove_piece_no(from, 0);
                self.add_piece(best, p)?;
            }
        }

        // Kings must not stand in check in the collapsed position.
        let mut pos = self.to_position()?;
        for color in [Color::White, Color::Black] {
            let king = Piece::make(color, PieceKind::King);
            let king_bb = pos.piece_bb(king);
            if king_bb == 0 {
                continue;
            }
            let from = engine_core::bitboard::first_square(king_bb);
            let attacked = movegen::attacked_squares(&pos, color.opponent());
            if attacked & from.bit() == 0 {
                continue;
            }
            pos.set_piece(from, Piece::Empty);
            self.remove_piece_type(from, king)?;
            let not_allowed = pos.occupied() | movegen::attacked_squares(&pos, color.opponent());
            let mut best: Option<Square> = None;
            for to in Square::all() {
                if not_allowed & to.bit() != 0 {
                    continue;
                }
                if best.is_none_or(|b| dist(self, from, to, true) < dist(self, from, b, true)) {
                    best = Some(to);
                }
            }
            let Some(best) = best else {
                return Err(ChessError::new(format!("cannot expel king on square {from}")));
            };
            pos.set_piece(best, king);
            self.add_piece(best, king)?;
        }
        Ok(())
    }

    /// Convert to a position; fails while any square still holds more than
    /// one piece. Side to move and rights are the caller's business.
    pub fn to_position(&self) -> Result<Position, ChessError> {
        let mut pos = Position::empty();
        for sq in Square::all() {
            match self.n_pieces(sq) {
                0 => {}
                1 => pos.set_piece(sq, self.piece(sq, 0)),
                _ => return Err(ChessError::new(format!("too many pieces on square {sq}"))),
            }
        }
        Ok(pos)
    }
}
