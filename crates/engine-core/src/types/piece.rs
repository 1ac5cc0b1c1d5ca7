//! Pieces and colors.

/// Side to move / piece owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Color {
    White = 0,
    Black = 1,
}

impl Color {
    pub const NUM: usize = 2;

    #[inline]
    pub const fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn is_white(self) -> bool {
        matches!(self, Color::White)
    }

    /// Pawn push direction as a square delta.
    #[inline]
    pub const fn forward(self) -> i8 {
        match self {
            Color::White => 8,
            Color::Black => -8,
        }
    }
}

/// Piece kind without color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PieceKind {
    King = 0,
    Queen = 1,
    Rook = 2,
    Bishop = 3,
    Knight = 4,
    Pawn = 5,
}

impl PieceKind {
    pub const NUM: usize = 6;
    pub const ALL: [PieceKind; 6] = [
        PieceKind::King,
        PieceKind::Queen,
        PieceKind::Rook,
        PieceKind::Bishop,
        PieceKind::Knight,
        PieceKind::Pawn,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<PieceKind> {
        Self::ALL.get(i).copied()
    }
}

/// A piece on the board, including the empty square. Thirteen values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Piece {
    #[default]
    Empty = 0,
    WKing = 1,
    WQueen = 2,
    WRook = 3,
    WBishop = 4,
    WKnight = 5,
    WPawn = 6,
    BKing = 7,
    BQueen = 8,
    BRook = 9,
    BBishop = 10,
    BKnight = 11,
    BPawn = 12,
}

impl Piece {
    pub const NUM: usize = 13;

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Piece> {
        const ALL: [Piece; 13] = [
            Piece::Empty,
            Piece::WKing,
            Piece::WQueen,
            Piece::WRook,
            Piece::WBishop,
            Piece::WKnight,
            Piece::WPawn,
            Piece::BKing,
            Piece::BQueen,
            Piece::BRook,
            Piece::BBishop,
            Piece::BKnight,
            Piece::BPawn,
        ];
        ALL.get(i).copied()
    }

    #[inline]
    pub const fn make(color: Color, kind: PieceKind) -> Piece {
        let base = match color {
            Color::White => 1,
            Color::Black => 7,
        };
        // Safe: base + kind index is always in 1..=12.
        unsafe { std::mem::transmute::<u8, Piece>(base + kind as u8) }
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        matches!(self, Piece::Empty)
    }

    /// Color of a non-empty piece.
    #[inline]
    pub const fn color(self) -> Option<Color> {
        match self as u8 {
            0 => None,
            1..=6 => Some(Color::White),
            _ => Some(Color::Black),
        }
    }

    #[inline]
    pub const fn is_white(self) -> bool {
        matches!(self as u8, 1..=6)
    }

    #[inline]
    pub const fn kind(self) -> Option<PieceKind> {
        match self as u8 {
            0 => None,
            n => Some(match (n - 1) % 6 {
                0 => PieceKind::King,
                1 => PieceKind::Queen,
                2 => PieceKind::Rook,
                3 => PieceKind::Bishop,
                4 => PieceKind::Knight,
                _ => PieceKind::Pawn,
            }),
        }
    }

    /// Same kind, opposite color. Empty maps to itself.
    #[inline]
    pub fn swap_color(self) -> Piece {
        match (self.kind(), self.color()) {
            (Some(k), Some(c)) => Piece::make(c.opponent(), k),
            _ => Piece::Empty,
        }
    }

    /// FEN character, uppercase for White.
    pub fn to_fen_char(self) -> Option<char> {
        let c = match self.kind()? {
            PieceKind::King => 'k',
            PieceKind::Queen => 'q',
            PieceKind::Rook => 'r',
            PieceKind::Bishop => 'b',
            PieceKind::Knight => 'n',
            PieceKind::Pawn => 'p',
        };
        Some(if self.is_white() { c.to_ascii_uppercase() } else { c })
    }

    pub fn from_fen_char(c: char) -> Option<Piece> {
        let kind = match c.to_ascii_lowercase() {
            'k' => PieceKind::King,
            'q' => PieceKind::Queen,
            'r' => PieceKind::Rook,
            'b' => PieceKind::Bishop,
            'n' => PieceKind::Knight,
            'p' => PieceKind::Pawn,
            _ => return None,
        };
        let color = if c.is_ascii_uppercase() { Color::White } else { Color::Black };
        Some(Piece::make(color, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_and_decompose() {
        for &c in &[Color::White, Color::Black] {
            for &k in &PieceKind::ALL {
                let p = Piece::make(c, k);
                assert_eq!(p.color(), Some(c));
                assert_eq!(p.kind(), Some(k));
            }
        }
        assert_eq!(Piece::Empty.color(), None);
        assert_eq!(Piece::Empty.kind(), None);
    }

    #[test]
    fn swap_color() {
        assert_eq!(Piece::WQueen.swap_color(), Piece::BQueen);
        assert_eq!(Piece::BPawn.swap_color(), Piece::WPawn);
        assert_eq!(Piece::Empty.swap_color(), Piece::Empty);
    }

    #[test]
    fn fen_chars() {
        assert_eq!(Piece::WKing.to_fen_char(), Some('K'));
        assert_eq!(Piece::BPawn.to_fen_char(), Some('p'));
        assert_eq!(Piece::from_fen_char('Q'), Some(Piece::WQueen));
        assert_eq!(Piece::from_fen_char('n'), Some(Piece::BKnight));
        assert_eq!(Piece::from_fen_char('x'), None);
        for i in 1..13 {
            let p = Piece::from_index(i).unwrap();
            assert_eq!(Piece::from_fen_char(p.to_fen_char().unwrap()), Some(p));
        }
    }
}
