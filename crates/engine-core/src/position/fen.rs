//! FEN parsing and serialization.

use crate::types::{Color, Piece, PieceKind, Square};

use super::{Position, A1_CASTLE, A8_CASTLE, H1_CASTLE, H8_CASTLE};

/// FEN parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenError {
    Structure(String),
    Board(String),
    SideToMove(String),
    Castling(String),
    EnPassant(String),
    Clock(String),
    /// Syntactically valid but not a position the engine can hold:
    /// wrong king count or pawns on the first/eighth rank.
    Invalid(String),
}

impl std::fmt::Display for FenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FenError::Structure(s) => write!(f, "invalid FEN: {s}"),
            FenError::Board(s) => write!(f, "invalid board field: {s}"),
            FenError::SideToMove(s) => write!(f, "invalid side to move: {s}"),
            FenError::Castling(s) => write!(f, "invalid castling field: {s}"),
            FenError::EnPassant(s) => write!(f, "invalid en passant field: {s}"),
            FenError::Clock(s) => write!(f, "invalid clock field: {s}"),
            FenError::Invalid(s) => write!(f, "illegal position: {s}"),
        }
    }
}

impl std::error::Error for FenError {}

impl Position {
    /// Parse a FEN string. The clock fields may be omitted; they default to
    /// "0 1" as in en-passant test positions.
    pub fn from_fen(fen: &str) -> Result<Position, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(FenError::Structure(format!("expected at least 4 fields, got {}", fields.len())));
        }

        let mut pos = Position::empty();

        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::Board(format!("expected 8 ranks, got {}", ranks.len())));
        }
        for (i, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - i as u8;
            let mut file = 0u8;
            for c in rank_str.chars() {
                if let Some(d) = c.to_digit(10) {
                    file += d as u8;
                } else {
                    let p = Piece::from_fen_char(c)
                        .ok_or_else(|| FenError::Board(format!("bad piece char '{c}'")))?;
                    if file > 7 {
                        return Err(FenError::Board(format!("rank {} too long", rank + 1)));
                    }
                    pos.set_piece(Square::from_file_rank(file, rank), p);
                    file += 1;
                }
            }
            if file != 8 {
                return Err(FenError::Board(format!("rank {} has {} files", rank + 1, file)));
            }
        }

        match fields[1] {
            "w" => pos.set_side_to_move(Color::White),
            "b" => pos.set_side_to_move(Color::Black),
            other => return Err(FenError::SideToMove(other.to_string())),
        }

        let mut castle = 0u8;
        if fields[2] != "-" {
            for c in fields[2].chars() {
                castle |= match c {
                    'K' => H1_CASTLE,
                    'Q' => A1_CASTLE,
                    'k' => H8_CASTLE,
                    'q' => A8_CASTLE,
                    _ => return Err(FenError::Castling(fields[2].to_string())),
                };
            }
        }
        pos.set_castle_mask(castle);

        if fields[3] != "-" {
            let sq = Square::from_str_coord(fields[3])
                .ok_or_else(|| FenError::EnPassant(fields[3].to_string()))?;
            if sq.rank() != 2 && sq.rank() != 5 {
                return Err(FenError::EnPassant(fields[3].to_string()));
            }
            pos.set_ep_square(Some(sq));
        }

        if let Some(hmc) = fields.get(4) {
            pos.set_halfmove_clock(
                hmc.parse().map_err(|_| FenError::Clock(hmc.to_string()))?,
            );
        }
        if let Some(fmc) = fields.get(5) {
            let n: u16 = fmc.parse().map_err(|_| FenError::Clock(fmc.to_string()))?;
            pos.set_fullmove_counter(n.max(1));
        }

        validate(&pos)?;
        Ok(pos)
    }

    /// Canonical FEN of this position.
    pub fn to_fen(&self) -> String {
        let mut out = String::new();
        for rank in (0..8).rev() {
            let mut empty = 0;
            for file in 0..8 {
                let p = self.piece_on(Square::from_file_rank(file, rank));
                match p.to_fen_char() {
                    Some(c) => {
                        if empty > 0 {
                            out.push(char::from_digit(empty, 10).unwrap());
                            empty = 0;
                        }
                        out.push(c);
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                out.push(char::from_digit(empty, 10).unwrap());
            }
            if rank > 0 {
                out.push('/');
            }
        }

        out.push(' ');
        out.push(if self.is_white_move() { 'w' } else { 'b' });

        out.push(' ');
        if self.castle_mask() == 0 {
            out.push('-');
        } else {
            for (bit, c) in [(H1_CASTLE, 'K'), (A1_CASTLE, 'Q'), (H8_CASTLE, 'k'), (A8_CASTLE, 'q')] {
                if self.castle_mask() & bit != 0 {
                    out.push(c);
                }
            }
        }

        out.push(' ');
        match self.ep_square() {
            Some(sq) => out.push_str(&sq.to_string()),
            None => out.push('-'),
        }

        out.push_str(&format!(" {} {}", self.halfmove_clock(), self.fullmove_counter()));
        out
    }
}

fn validate(pos: &Position) -> Result<(), FenError> {
    for color in [Color::White, Color::Black] {
        let kings = pos.kind_bb(color, PieceKind::King).count_ones();
        if kings != 1 {
            return Err(FenError::Invalid(format!("{kings} {color:?} kings")));
        }
    }
    let pawns = pos.piece_bb(Piece::WPawn) | pos.piece_bb(Piece::BPawn);
    if pawns & (crate::bitboard::RANK_1 | crate::bitboard::RANK_8) != 0 {
        return Err(FenError::Invalid("pawn on first or eighth rank".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::START_POS_FEN;

    #[test]
    fn start_pos_roundtrip() {
        let pos = Position::from_fen(START_POS_FEN).unwrap();
        assert_eq!(pos.to_fen(), START_POS_FEN);
        assert_eq!(pos.piece_on(Square::E1), Piece::WKing);
        assert_eq!(pos.castle_mask(), 15);
    }

    #[test]
    fn roundtrip_misc() {
        for fen in [
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/4k3/8/8/8/3QK3/8/8 w - - 0 1",
            "4k3/8/8/2pP4/8/8/8/4K3 w - c6 0 2",
            "8/8/8/8/8/8/8/k1K5 b - - 99 123",
        ] {
            let pos = Position::from_fen(fen).unwrap();
            assert_eq!(pos.to_fen(), fen, "roundtrip failed for {fen}");
            assert_eq!(pos.zobrist_hash(), pos.compute_zobrist_hash());
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!(Position::from_fen("").is_err());
        assert!(Position::from_fen("rnbqkbnr/pppppppp/8/8 w KQkq -").is_err());
        assert!(matches!(
            Position::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR x KQkq - 0 1"),
            Err(FenError::SideToMove(_))
        ));
        assert!(matches!(
            Position::from_fen("rnbqkbnr/pppppppp/8/9/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Err(FenError::Board(_))
        ));
        assert!(matches!(
            Position::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq e9 0 1"),
            Err(FenError::EnPassant(_))
        ));
    }

    #[test]
    fn rejects_impossible_positions() {
        // Two white kings.
        assert!(matches!(
            Position::from_fen("4k3/8/8/8/8/8/8/K3K3 w - - 0 1"),
            Err(FenError::Invalid(_))
        ));
        // Pawn on the eighth rank.
        assert!(matches!(
            Position::from_fen("P3k3/8/8/8/8/8/8/4K3 w - - 0 1"),
            Err(FenError::Invalid(_))
        ));
    }
}
