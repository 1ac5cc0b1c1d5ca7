//! Textual move formats. The engine accepts both SAN and long-algebraic
//! input, emits long-algebraic on the protocol channel and SAN in
//! user-facing output.

use crate::movegen;
use crate::position::Position;
use crate::types::{Move, Piece, PieceKind, Square};

/// Move-text parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTextError {
    Syntax(String),
    /// Parsed fine but no legal move matches.
    NoMatch(String),
    /// SAN input matched by more than one legal move.
    Ambiguous(String),
}

impl std::fmt::Display for MoveTextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoveTextError::Syntax(s) => write!(f, "bad move syntax: {s}"),
            MoveTextError::NoMatch(s) => write!(f, "no matching legal move: {s}"),
            MoveTextError::Ambiguous(s) => write!(f, "ambiguous move: {s}"),
        }
    }
}

impl std::error::Error for MoveTextError {}

fn promo_char(kind: PieceKind) -> Option<char> {
    match kind {
        PieceKind::Queen => Some('q'),
        PieceKind::Rook => Some('r'),
        PieceKind::Bishop => Some('b'),
        PieceKind::Knight => Some('n'),
        _ => None,
    }
}

fn kind_from_char(c: char) -> Option<PieceKind> {
    match c.to_ascii_uppercase() {
        'K' => Some(PieceKind::King),
        'Q' => Some(PieceKind::Queen),
        'R' => Some(PieceKind::Rook),
        'B' => Some(PieceKind::Bishop),
        'N' => Some(PieceKind::Knight),
        _ => None,
    }
}

/// Long-algebraic form: "e2e4", "e7e8q".
pub fn move_to_uci(m: Move) -> String {
    m.to_string()
}

/// Parse long-algebraic coordinates. Does not check legality.
pub fn move_from_uci_loose(s: &str) -> Result<Move, MoveTextError> {
    if s.len() < 4 || s.len() > 5 {
        return Err(MoveTextError::Syntax(s.to_string()));
    }
    let from = Square::from_str_coord(&s[0..2]).ok_or_else(|| MoveTextError::Syntax(s.to_string()))?;
    let to = Square::from_str_coord(&s[2..4]).ok_or_else(|| MoveTextError::Syntax(s.to_string()))?;
    let promote_kind = match s.len() {
        5 => Some(match s.as_bytes()[4] {
            b'q' => PieceKind::Queen,
            b'r' => PieceKind::Rook,
            b'b' => PieceKind::Bishop,
            b'n' => PieceKind::Knight,
            _ => return Err(MoveTextError::Syntax(s.to_string())),
        }),
        _ => None,
    };
    // Promotion color is resolved against the target rank.
    let promote_to = match promote_kind {
        None => Piece::Empty,
        Some(k) => {
            let color = if to.rank() == 7 { crate::types::Color::White } else { crate::types::Color::Black };
            Piece::make(color, k)
        }
    };
    Ok(Move::new(from, to, promote_to))
}

/// Parse a long-algebraic move and check it against the legal move list.
pub fn move_from_uci(pos: &Position, s: &str) -> Result<Move, MoveTextError> {
    let m = move_from_uci_loose(s)?;
    let legal = movegen::legal_moves(pos);
    legal
        .iter()
        .copied()
        .find(|lm| *lm == m)
        .ok_or_else(|| MoveTextError::NoMatch(s.to_string()))
}

/// Standard algebraic notation for a legal move, with disambiguation and
/// check/mate suffix.
pub fn move_to_san(pos: &Position, m: Move) -> String {
    let p = pos.piece_on(m.from());
    let kind = p.kind().unwrap_or(PieceKind::Pawn);
    let capture = !pos.piece_on(m.to()).is_empty()
        || (kind == PieceKind::Pawn && m.from().file() != m.to().file());

    let mut san = String::new();
    if kind == PieceKind::King && m.from().file().abs_diff(m.to().file()) == 2 {
        san.push_str(if m.to().file() == 6 { "O-O" } else { "O-O-O" });
    } else if kind == PieceKind::Pawn {
        if capture {
            san.push((b'a' + m.from().file()) as char);
            san.push('x');
        }
        san.push_str(&m.to().to_string());
        if let Some(pk) = m.promote_to().kind() {
            san.push('=');
            san.push(promo_char(pk).unwrap_or('?').to_ascii_uppercase());
        }
    } else {
        san.push(match kind {
            PieceKind::King => 'K',
            PieceKind::Queen => 'Q',
            PieceKind::Rook => 'R',
            PieceKind::Bishop => 'B',
            PieceKind::Knight => 'N',
            PieceKind::Pawn => unreachable!(),
        });

        // Disambiguate against other legal moves of the same kind and target.
        let legal = movegen::legal_moves(pos);
        let rivals: Vec<Move> = legal
            .iter()
            .copied()
            .filter(|&lm| {
                lm != m && lm.to() == m.to() && pos.piece_on(lm.from()) == p
            })
            .collect();
        if !rivals.is_empty() {
            let same_file = rivals.iter().any(|r| r.from().file() == m.from().file());
            let same_rank = rivals.iter().any(|r| r.from().rank() == m.from().rank());
            if !same_file {
                san.push((b'a' + m.from().file()) as char);
            } else if !same_rank {
                san.push((b'1' + m.from().rank()) as char);
            } else {
                san.push_str(&m.from().to_string());
            }
        }

        if capture {
            san.push('x');
        }
        san.push_str(&m.to().to_string());
    }

    let mut tmp = pos.clone();
    tmp.make_move(m);
    if movegen::in_check(&tmp) {
        let replies = movegen::legal_moves(&tmp);
        san.push(if replies.is_empty() { '#' } else { '+' });
    }
    san
}

/// Parse SAN against the current position. Accepts optional "+", "#", "x",
/// "=Q" / "Q" promotion suffix forms and castle notation with O or 0.
pub fn san_to_move(pos: &Position, san: &str) -> Result<Move, MoveTextError> {
    let orig = san;
    let san: String = san.chars().filter(|c| !matches!(c, '+' | '#' | '!' | '?')).collect();
    if san.is_empty() {
        return Err(MoveTextError::Syntax(orig.to_string()));
    }

    let legal = movegen::legal_moves(pos);

    if san == "O-O" || san == "0-0" {
        return find_castle(&legal, pos, 6).ok_or_else(|| MoveTextError::NoMatch(orig.to_string()));
    }
    if san == "O-O-O" || san == "0-0-0" {
        return find_castle(&legal, pos, 2).ok_or_else(|| MoveTextError::NoMatch(orig.to_string()));
    }

    let mut chars: Vec<char> = san.chars().collect();

    // Promotion suffix: "=Q" or a trailing piece letter after a digit.
    let mut promo: Option<PieceKind> = None;
    if chars.len() >= 2 {
        let last = chars[chars.len() - 1];
        let prev = chars[chars.len() - 2];
        if prev == '=' {
            promo = kind_from_char(last);
            if promo.is_none() {
                return Err(MoveTextError::Syntax(orig.to_string()));
            }
            chars.truncate(chars.len() - 2);
        } else if last.is_ascii_uppercase() && prev.is_ascii_digit() {
            promo = kind_from_char(last);
            chars.truncate(chars.len() - 1);
        }
    }

    if chars.len() < 2 {
        return Err(MoveTextError::Syntax(orig.to_string()));
    }
    let to_str: String = chars[chars.len() - 2..].iter().collect();
    let to = Square::from_str_coord(&to_str).ok_or_else(|| MoveTextError::Syntax(orig.to_string()))?;
    chars.truncate(chars.len() - 2);

    let mut kind = PieceKind::Pawn;
    let mut idx = 0;
    if let Some(&c) = chars.first() {
        if c.is_ascii_uppercase() {
            kind = kind_from_char(c).ok_or_else(|| MoveTextError::Syntax(orig.to_string()))?;
            idx = 1;
        }
    }

    let mut from_file: Option<u8> = None;
    let mut from_rank: Option<u8> = None;
    for &c in &chars[idx..] {
        match c {
            'a'..='h' => from_file = Some(c as u8 - b'a'),
            '1'..='8' => from_rank = Some(c as u8 - b'1'),
            'x' => {}
            _ => return Err(MoveTextError::Syntax(orig.to_string())),
        }
    }

    let us = pos.side_to_move();
    let want_promo = promo.map(|k| Piece::make(us, k)).unwrap_or(Piece::Empty);
    let matches: Vec<Move> = legal
        .iter()
        .copied()
        .filter(|&lm| {
            lm.to() == to
                && pos.piece_on(lm.from()).kind() == Some(kind)
                && lm.promote_to() == want_promo
                && from_file.is_none_or(|f| lm.from().file() == f)
                && from_rank.is_none_or(|r| lm.from().rank() == r)
        })
        .collect();

    match matches.len() {
        0 => Err(MoveTextError::NoMatch(orig.to_string())),
        1 => Ok(matches[0]),
        _ => Err(MoveTextError::Ambiguous(orig.to_string())),
    }
}

fn find_castle(legal: &movegen::MoveList, pos: &Position, to_file: u8) -> Option<Move> {
    legal.iter().copied().find(|&m| {
        pos.piece_on(m.from()).kind() == Some(PieceKind::King)
            && m.from().file() == 4
            && m.to().file() == to_file
            && m.from().file().abs_diff(m.to().file()) == 2
    })
}

/// Parse either SAN or long-algebraic input.
pub fn any_to_move(pos: &Position, s: &str) -> Result<Move, MoveTextError> {
    match move_from_uci(pos, s) {
        Ok(m) => Ok(m),
        Err(_) => san_to_move(pos, s),
    }
}
