//! Zobrist key tables, generated once from a fixed-seed stream.

use once_cell::sync::Lazy;
use rand::RngCore;
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::types::{Piece, Square};

pub struct Zobrist {
    /// Piece-square keys. Index 0 (empty) stays zero.
    pub psq: [[u64; Square::NUM]; Piece::NUM],
    /// XORed in when White is to move.
    pub side: u64,
    /// One key per castle-rights mask.
    pub castle: [u64; 16],
    /// One key per en-passant file.
    pub ep_file: [u64; 8],
}

pub static ZOBRIST: Lazy<Zobrist> = Lazy::new(|| {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x7ac5_9c92_44d3_01b7);
    let mut psq = [[0u64; Square::NUM]; Piece::NUM];
    for row in psq.iter_mut().skip(1) {
        for key in row.iter_mut() {
            *key = rng.next_u64();
        }
    }
    let side = rng.next_u64();
    let mut castle = [0u64; 16];
    for key in castle.iter_mut() {
        *key = rng.next_u64();
    }
    let mut ep_file = [0u64; 8];
    for key in ep_file.iter_mut() {
        *key = rng.next_u64();
    }
    Zobrist { psq, side, castle, ep_file }
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_piece_has_zero_keys() {
        assert!(ZOBRIST.psq[0].iter().all(|&k| k == 0));
    }

    #[test]
    fn keys_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for p in 1..Piece::NUM {
            for sq in 0..Square::NUM {
                assert!(seen.insert(ZOBRIST.psq[p][sq]));
            }
        }
        assert!(seen.insert(ZOBRIST.side));
    }
}
