//! Shared transposition table.
//!
//! The table is probed and written concurrently without locks. Each entry is
//! two atomic 64-bit words; the key word holds `key ^ data` so a torn
//! read/write pair fails validation and reads as a miss.

mod entry;

pub use entry::{Bound, TTEntry};

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use log::warn;

use crate::types::Move;

const BUCKET_SLOTS: usize = 4;
const MIN_LOG2_ENTRIES: usize = 10;

struct Slot {
    key: AtomicU64,
    data: AtomicU64,
}

impl Slot {
    fn new() -> Slot {
        Slot { key: AtomicU64::new(0), data: AtomicU64::new(0) }
    }
}

pub struct TranspositionTable {
    table: Vec<Slot>,
    mask: usize,
    generation: AtomicU8,
}

impl TranspositionTable {
    /// Create a table with `2^log2_entries` slots.
    pub fn new(log2_entries: usize) -> TranspositionTable {
        let mut tt = TranspositionTable {
            table: Vec::new(),
            mask: 0,
            generation: AtomicU8::new(0),
        };
        tt.resize(log2_entries);
        tt
    }

    /// Resize to `2^log2_entries` slots, falling back to smaller sizes if the
    /// allocation fails. The table contents are discarded.
    pub fn resize(&mut self, log2_entries: usize) {
        let mut log2 = log2_entries.max(MIN_LOG2_ENTRIES);
        loop {
            let n = 1usize << log2;
            let mut v: Vec<Slot> = Vec::new();
            match v.try_reserve_exact(n) {
                Ok(()) => {
                    v.extend((0..n).map(|_| Slot::new()));
                    self.table = v;
                    self.mask = n - 1;
                    return;
                }
                Err(_) if log2 > MIN_LOG2_ENTRIES => {
                    warn!("TT allocation of 2^{log2} entries failed, retrying smaller");
                    log2 -= 1;
                }
                Err(_) => {
                    // Give up at the minimum size; allocate unconditionally.
                    let n = 1usize << MIN_LOG2_ENTRIES;
                    self.table = (0..n).map(|_| Slot::new()).collect();
                    self.mask = n - 1;
                    return;
                }
            }
        }
    }

    /// Number of slots, for `Hash`-option bookkeeping.
    pub fn num_entries(&self) -> usize {
        self.table.len()
    }

    pub fn clear(&self) {
        for slot in &self.table {
            slot.key.store(0, Ordering::Relaxed);
            slot.data.store(0, Ordering::Relaxed);
        }
    }

    /// Advance the generation counter; called once per search.
    pub fn next_generation(&self) {
        let g = self.generation.load(Ordering::Relaxed);
        self.generation.store((g + 1) & entry::GENERATION_MASK, Ordering::Relaxed);
    }

    pub fn generation(&self) -> u8 {
        self.generation.load(Ordering::Relaxed)
    }

    #[inline]
    fn bucket(&self, hash: u64) -> usize {
        (hash as usize & self.mask) & !(BUCKET_SLOTS - 1)
    }

    /// Look up `hash`. Returns a validated snapshot or `None`.
    pub fn probe(&self, hash: u64) -> Option<TTEntry> {
        let base = self.bucket(hash);
        for i in 0..BUCKET_SLOTS {
            let slot = &self.table[(base + i) & self.mask];
            let key = slot.key.load(Ordering::Acquire);
            let data = slot.data.load(Ordering::Acquire);
            if key ^ data == hash {
                let ent = TTEntry { key: hash, data };
                if !ent.is_empty() {
                    return Some(ent);
                }
            }
        }
        None
    }

    /// Store a result. The victim is the weakest entry in the bucket; an
    /// entry for the same position is always updated in place.
    pub fn insert(
        &self,
        hash: u64,
        mv: Move,
        bound: Bound,
        ply: i32,
        depth: u8,
        score: i32,
        static_eval: i32,
    ) {
        let generation = self.generation();
        let data = TTEntry::pack(mv, score, ply, static_eval, depth, bound, generation);

        let base = self.bucket(hash);
        let mut victim = 0;
        let mut victim_entry = TTEntry::empty();
        for i in 0..BUCKET_SLOTS {
            let slot = &self.table[(base + i) & self.mask];
            let key = slot.key.load(Ordering::Acquire);
            let cur_data = slot.data.load(Ordering::Acquire);
            let cur = TTEntry { key: key ^ cur_data, data: cur_data };
            if key ^ cur_data == hash || cur.is_empty() {
                victim = i;
                victim_entry = TTEntry::empty();
                break;
            }
            if i == 0 || victim_entry.better_than(&cur, generation) {
                victim = i;
                victim_entry = cur;
            }
        }

        let slot = &self.table[(base + victim) & self.mask];
        slot.data.store(data, Ordering::Release);
        slot.key.store(hash ^ data, Ordering::Release);
    }

    /// Fraction of sampled slots in use, per mille; feeds `info hashfull`.
    pub fn hashfull(&self) -> u32 {
        let sample = self.table.len().min(1000);
        let used = self.table[..sample]
            .iter()
            .filter(|s| {
                let key = s.key.load(Ordering::Relaxed);
                let data = s.data.load(Ordering::Relaxed);
                !(TTEntry { key: key ^ data, data }).is_empty()
            })
            .count();
        (used * 1000 / sample.max(1)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen;
    use crate::position::Position;
    use crate::search::constants::MATE0;
    use crate::text;

    #[test]
    fn insert_probe_roundtrip_along_a_game() {
        let tt = TranspositionTable::new(16);
        let moves = ["e4", "e5", "Nf3", "Nc6", "Bb5", "a6", "Ba4", "b5", "Bb3", "Nf6", "O-O", "Be7", "Re1"];

        let mut pos = Position::start();
        for (i, san) in moves.iter().enumerate() {
            let m = text::san_to_move(&pos, san).unwrap();
            pos.make_move(m);
            let score = i as i32 * 17 + 3;
            let ply = i as i32 + 1;
            let depth = (i * 2 + 5) as u8;
            tt.insert(pos.history_hash(), m, Bound::Exact, ply, depth, score, score * 2 + 3);
        }

        let mut pos = Position::start();
        for (i, san) in moves.iter().enumerate() {
            let m = text::san_to_move(&pos, san).unwrap();
            pos.make_move(m);
            let ent = tt.probe(pos.history_hash()).expect("entry evicted");
            let score = i as i32 * 17 + 3;
            let ply = i as i32 + 1;
            assert_eq!(ent.bound(), Bound::Exact);
            assert_eq!(ent.get_score(ply), score);
            assert_eq!(ent.depth(), (i * 2 + 5) as u8);
            assert_eq!(ent.static_eval(), score * 2 + 3);
            assert_eq!(ent.get_move(), Some(m));
        }
    }

    #[test]
    fn survives_generation_churn() {
        let tt = TranspositionTable::new(12);
        let pos = Position::start();
        let m = text::san_to_move(&pos, "e4").unwrap();
        tt.insert(pos.history_hash(), m, Bound::Lower, 0, 9, 55, 12);
        for _ in 0..5 {
            tt.next_generation();
        }
        let ent = tt.probe(pos.history_hash()).unwrap();
        assert_eq!(ent.bound(), Bound::Lower);
        assert_eq!(ent.get_score(0), 55);
        assert_eq!(ent.get_move(), Some(m));
    }

    #[test]
    fn mate_score_roundtrip_across_plies() {
        let tt = TranspositionTable::new(12);
        let pos = Position::start();
        let m = text::san_to_move(&pos, "d4").unwrap();
        tt.insert(pos.history_hash(), m, Bound::Exact, 4, 20, MATE0 - 10, 0);
        let ent = tt.probe(pos.history_hash()).unwrap();
        assert_eq!(ent.get_score(4), MATE0 - 10);
        assert_eq!(ent.get_score(2), MATE0 - 8);
        assert_eq!(ent.get_score(6), MATE0 - 12);
    }

    #[test]
    fn miss_on_unknown_hash() {
        let tt = TranspositionTable::new(12);
        assert!(tt.probe(0xdead_beef).is_none());
    }

    #[test]
    fn same_position_updates_in_place() {
        let tt = TranspositionTable::new(12);
        let pos = Position::start();
        let legal = movegen::legal_moves(&pos);
        let m = legal[0];
        tt.insert(pos.history_hash(), m, Bound::Upper, 0, 3, 10, 0);
        tt.insert(pos.history_hash(), m, Bound::Exact, 0, 8, 42, 0);
        let ent = tt.probe(pos.history_hash()).unwrap();
        assert_eq!(ent.depth(), 8);
        assert_eq!(ent.get_score(0), 42);
    }

    #[test]
    fn resize_clears_and_keeps_working() {
        let mut tt = TranspositionTable::new(12);
        let pos = Position::start();
        let m = movegen::legal_moves(&pos)[0];
        tt.insert(pos.history_hash(), m, Bound::Exact, 0, 5, 7, 0);
        tt.resize(14);
        assert!(tt.probe(pos.history_hash()).is_none());
        assert_eq!(tt.num_entries(), 1 << 14);
        tt.insert(pos.history_hash(), m, Bound::Exact, 0, 5, 7, 0);
        assert!(tt.probe(pos.history_hash()).is_some());
    }
}
