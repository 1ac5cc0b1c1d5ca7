//! Proof-game pipeline: given a target position, decide whether it is
//! reachable from the starting position and construct a move sequence.
//!
//! The pipeline runs in stages. The kernel (material level) finds a capture
//! and promotion plan; the extended kernel pins the plan to squares; the
//! scheduler repairs ordering and blocking; a best-first search over real
//! moves stitches the intermediate boards into a legal game.

pub mod filter;
pub mod kernel;
pub mod multi_board;
pub mod path_search;
pub mod sequence;
pub mod shortest_path;

use engine_core::types::{Color, Piece, PieceKind, Square};

/// Piece classification at the material level. Bishops split by square
/// color; kings never participate in kernel accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PkPiece {
    Queen = 0,
    Rook = 1,
    DarkBishop = 2,
    LightBishop = 3,
    Knight = 4,
    Pawn = 5,
}

impl PkPiece {
    pub const NUM: usize = 6;
    pub const ALL: [PkPiece; 6] = [
        PkPiece::Queen,
        PkPiece::Rook,
        PkPiece::DarkBishop,
        PkPiece::LightBishop,
        PkPiece::Knight,
        PkPiece::Pawn,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Classify a board piece; bishops need their square for the color
    /// split.
    pub fn from_piece(p: Piece, sq: Square) -> Option<PkPiece> {
        match p.kind()? {
            PieceKind::King => None,
            PieceKind::Queen => Some(PkPiece::Queen),
            PieceKind::Rook => Some(PkPiece::Rook),
            PieceKind::Bishop => {
                Some(if sq.is_dark() { PkPiece::DarkBishop } else { PkPiece::LightBishop })
            }
            PieceKind::Knight => Some(PkPiece::Knight),
            PieceKind::Pawn => Some(PkPiece::Pawn),
        }
    }

    pub fn to_kind(self) -> PieceKind {
        match self {
            PkPiece::Queen => PieceKind::Queen,
            PkPiece::Rook => PieceKind::Rook,
            PkPiece::DarkBishop | PkPiece::LightBishop => PieceKind::Bishop,
            PkPiece::Knight => PieceKind::Knight,
            PkPiece::Pawn => PieceKind::Pawn,
        }
    }

    pub fn to_piece(self, color: Color) -> Piece {
        Piece::make(color, self.to_kind())
    }

    fn letter(self) -> char {
        match self {
            PkPiece::Queen => 'Q',
            PkPiece::Rook => 'R',
            PkPiece::DarkBishop => 'D',
            PkPiece::LightBishop => 'L',
            PkPiece::Knight => 'N',
            PkPiece::Pawn => 'P',
        }
    }

    fn from_letter(c: char) -> Option<PkPiece> {
        match c {
            'Q' => Some(PkPiece::Queen),
            'R' => Some(PkPiece::Rook),
            'D' => Some(PkPiece::DarkBishop),
            'L' => Some(PkPiece::LightBishop),
            'N' => Some(PkPiece::Knight),
            'P' => Some(PkPiece::Pawn),
            _ => None,
        }
    }
}

/// One kernel move. Every variant removes exactly one piece from the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkMove {
    /// A pawn captures an enemy pawn on an adjacent file.
    PawnTakesPawn { color: Color, from_file: u8, from_idx: u8, to_file: u8, to_idx: u8 },
    /// A pawn captures an enemy piece, entering the target column at
    /// `to_idx`, or promoting instead when `promotion` is set.
    PawnTakesPiece {
        color: Color,
        from_file: u8,
        from_idx: u8,
        taken: PkPiece,
        to_file: u8,
        to_idx: u8,
        promotion: Option<PkPiece>,
    },
    /// A pawn captures a piece that came from an enemy promotion on
    /// `other_promotion_file`.
    PawnTakesPromoted {
        color: Color,
        from_file: u8,
        from_idx: u8,
        other_promotion_file: u8,
        to_file: u8,
        to_idx: u8,
        promotion: Option<PkPiece>,
    },
    /// Some piece captures an enemy pawn.
    PieceTakesPawn { color: Color, to_file: u8, to_idx: u8 },
    /// Some piece captures an enemy piece; inferred from residual excess.
    PieceTakesPiece { color: Color, taken: PkPiece },
}

impl PkMove {
    pub fn color(&self) -> Color {
        match *self {
            PkMove::PawnTakesPawn { color, .. }
            | PkMove::PawnTakesPiece { color, .. }
            | PkMove::PawnTakesPromoted { color, .. }
            | PkMove::PieceTakesPawn { color, .. }
            | PkMove::PieceTakesPiece { color, .. } => color,
        }
    }
}

fn color_char(c: Color) -> char {
    if c.is_white() {
        'w'
    } else {
        'b'
    }
}

fn file_char(f: u8) -> char {
    (b'a' + f) as char
}

impl std::fmt::Display for PkMove {
    /// Compact notation: `wPc0xPb1`, `wPc0xRb0`, `wPc0xRbQ`, `wPc0xfb0`,
    /// `bxPc0`, `bxR`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            PkMove::PawnTakesPawn { color, from_file, from_idx, to_file, to_idx } => {
                write!(
                    f,
                    "{}P{}{}xP{}{}",
                    color_char(color),
                    file_char(from_file),
                    from_idx,
                    file_char(to_file),
                    to_idx
                )
            }
            PkMove::PawnTakesPiece { color, from_file, from_idx, taken, to_file, to_idx, promotion } => {
                write!(
                    f,
                    "{}P{}{}x{}{}",
                    color_char(color),
                    file_char(from_file),
                    from_idx,
                    taken.letter(),
                    file_char(to_file)
                )?;
                match promotion {
                    Some(p) => write!(f, "{}", p.letter()),
                    None => write!(f, "{to_idx}"),
                }
            }
            PkMove::PawnTakesPromoted {
                color,
                from_file,
                from_idx,
                other_promotion_file,
                to_file,
                to_idx,
                promotion,
            } => {
                write!(
                    f,
                    "{}P{}{}x{}{}",
                    color_char(color),
                    file_char(from_file),
                    from_idx,
                    file_char(other_promotion_file),
                    file_char(to_file)
                )?;
                match promotion {
                    Some(p) => write!(f, "{}", p.letter()),
                    None => write!(f, "{to_idx}"),
                }
            }
            PkMove::PieceTakesPawn { color, to_file, to_idx } => {
                write!(f, "{}xP{}{}", color_char(color), file_char(to_file), to_idx)
            }
            PkMove::PieceTakesPiece { color, taken } => {
                write!(f, "{}x{}", color_char(color), taken.letter())
            }
        }
    }
}

/// A kernel move with concrete squares. `from` is unknown for pieces whose
/// identity is resolved later by the scheduler; `piece` is `None` when even
/// the piece class is open (any piece may perform the capture).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtPkMove {
    pub color: Color,
    pub piece: Option<PkPiece>,
    pub from: Option<Square>,
    pub capture: bool,
    pub to: Square,
    pub promotion: Option<PkPiece>,
}

impl ExtPkMove {
    pub fn new(
        color: Color,
        piece: Option<PkPiece>,
        from: Option<Square>,
        capture: bool,
        to: Square,
        promotion: Option<PkPiece>,
    ) -> ExtPkMove {
        ExtPkMove { color, piece, from, capture, to, promotion }
    }

    /// True for a straight, non-capturing pawn move.
    pub fn is_straight_pawn_move(&self) -> bool {
        self.piece == Some(PkPiece::Pawn)
            && !self.capture
            && self.from.is_some_and(|f| f.file() == self.to.file())
    }
}

impl std::fmt::Display for ExtPkMove {
    /// `wPa2-a4`, `wPb5xa6`, `bD?-f5` (unknown origin), `w??xd8` (unknown
    /// piece), `wPg7-g8Q`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", color_char(self.color))?;
        match self.piece {
            Some(p) => write!(f, "{}", p.letter())?,
            None => write!(f, "?")?,
        }
        match self.from {
            Some(sq) => write!(f, "{sq}")?,
            None => write!(f, "?")?,
        }
        write!(f, "{}{}", if self.capture { 'x' } else { '-' }, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "{}", p.letter())?;
        }
        Ok(())
    }
}

/// Parse the `Display` form back; used by the filter when re-reading its own
/// token lines.
impl std::str::FromStr for ExtPkMove {
    type Err = String;

    fn from_str(s: &str) -> Result<ExtPkMove, String> {
        let bad = || format!("bad extended kernel move: {s}");
        let chars: Vec<char> = s.chars().collect();
        if chars.len() < 6 {
            return Err(bad());
        }
        let color = match chars[0] {
            'w' => Color::White,
            'b' => Color::Black,
            _ => return Err(bad()),
        };
        let piece = match chars[1] {
            '?' => None,
            c => Some(PkPiece::from_letter(c).ok_or_else(bad)?),
        };
        let mut i = 2;
        let from = if chars[i] == '?' {
            i += 1;
            None
        } else {
            let sq: String = chars[i..i + 2].iter().collect();
            i += 2;
            Some(Square::from_str_coord(&sq).ok_or_else(bad)?)
        };
        let capture = match chars.get(i) {
            Some('x') => true,
            Some('-') => false,
            _ => return Err(bad()),
        };
        i += 1;
        if chars.len() < i + 2 {
            return Err(bad());
        }
        let to_str: String = chars[i..i + 2].iter().collect();
        let to = Square::from_str_coord(&to_str).ok_or_else(bad)?;
        i += 2;
        let promotion = match chars.get(i) {
            Some(&c) => Some(PkPiece::from_letter(c).ok_or_else(bad)?),
            None => None,
        };
        Ok(ExtPkMove { color, piece, from, capture, to, promotion })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pk_piece_classification() {
        assert_eq!(PkPiece::from_piece(Piece::WBishop, Square::from_str_coord("c1").unwrap()), Some(PkPiece::DarkBishop));
        assert_eq!(PkPiece::from_piece(Piece::WBishop, Square::from_str_coord("f1").unwrap()), Some(PkPiece::LightBishop));
        assert_eq!(PkPiece::from_piece(Piece::WKing, Square::A1), None);
        assert_eq!(PkPiece::from_piece(Piece::BPawn, Square::A1), Some(PkPiece::Pawn));
    }

    #[test]
    fn pk_move_notation() {
        let m = PkMove::PawnTakesPawn { color: Color::White, from_file: 2, from_idx: 0, to_file: 1, to_idx: 1 };
        assert_eq!(m.to_string(), "wPc0xPb1");
        let m = PkMove::PawnTakesPiece {
            color: Color::White,
            from_file: 2,
            from_idx: 0,
            taken: PkPiece::Rook,
            to_file: 1,
            to_idx: 0,
            promotion: None,
        };
        assert_eq!(m.to_string(), "wPc0xRb0");
        let m = PkMove::PawnTakesPiece {
            color: Color::White,
            from_file: 2,
            from_idx: 0,
            taken: PkPiece::Rook,
            to_file: 1,
            to_idx: 0,
            promotion: Some(PkPiece::Queen),
        };
        assert_eq!(m.to_string(), "wPc0xRbQ");
        let m = PkMove::PieceTakesPawn { color: Color::Black, to_file: 2, to_idx: 0 };
        assert_eq!(m.to_string(), "bxPc0");
        let m = PkMove::PieceTakesPiece { color: Color::Black, taken: PkPiece::Rook };
        assert_eq!(m.to_string(), "bxR");
    }

    #[test]
    fn ext_move_roundtrip() {
        for s in ["wPa2-a4", "wPb5xa6", "bD?-f5", "wPg7-g8Q", "bNg8xf6", "wR?xd8", "b??xd1"] {
            let m: ExtPkMove = s.parse().unwrap();
            assert_eq!(m.to_string(), s, "roundtrip failed for {s}");
        }
        assert!("xx".parse::<ExtPkMove>().is_err());
        assert!("wPa2?a4".parse::<ExtPkMove>().is_err());
    }
}
