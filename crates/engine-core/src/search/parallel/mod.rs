//! Worker coordination for multi-threaded search.
//!
//! One engine-main thread plus `threads - 1` helpers. The helpers are wired
//! as a binary tree: worker `i`'s children are `2i + 1` and `2i + 2`, the
//! root worker's parent is the engine main. Commands (help at a split point,
//! quit) flow down the tree; node counts and split-point results flow back
//! up. This is deliberately coarser than work stealing: helpers only assist
//! at published split points.

mod split;
mod worker;

pub use split::SplitPoint;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};

use crate::search::time_manager::SearchSignals;
use crate::search::TranspositionTable;
use crate::tb::TbProbe;
use worker::{spawn, Command, WorkerContext};

/// Minimum remaining depth for opening a split point.
pub const MIN_SPLIT_DEPTH: i32 = 5;
/// Minimum number of unsearched moves that justifies a split.
pub const MIN_SPLIT_MOVES: usize = 4;

pub struct HelperPool {
    root_tx: Option<Sender<Command>>,
    handles: Vec<JoinHandle<()>>,
    idle_count: Arc<AtomicUsize>,
    total_nodes: Arc<AtomicU64>,
    n_helpers: usize,
}

impl HelperPool {
    /// Create `n_helpers` workers sharing the transposition table and stop
    /// signals. Zero helpers is allowed and yields an inert pool.
    pub fn new(
        n_helpers: usize,
        tt: Arc<TranspositionTable>,
        tb: Arc<TbProbe>,
        signals: Arc<SearchSignals>,
    ) -> HelperPool {
        let idle_count = Arc::new(AtomicUsize::new(n_helpers));
        let total_nodes = Arc::new(AtomicU64::new(0));
        let mut txs = Vec::with_capacity(n_helpers);
        let mut rxs = Vec::with_capacity(n_helpers);
        for _ in 0..n_helpers {
            let (tx, rx) = unbounded();
            txs.push(tx);
            rxs.push(rx);
        }

        let mut handles = Vec::with_capacity(n_helpers);
        for (i, rx) in rxs.into_iter().enumerate() {
            let children: Vec<Sender<Command>> = [2 * i + 1, 2 * i + 2]
                .iter()
                .filter(|&&c| c < n_helpers)
                .map(|&c| txs[c].clone())
                .collect();
            handles.push(spawn(WorkerContext {
                id: i,
                rx,
                children,
                tt: tt.clone(),
                tb: tb.clone(),
                signals: signals.clone(),
                idle_count: idle_count.clone(),
                total_nodes: total_nodes.clone(),
            }));
        }

        HelperPool {
            root_tx: txs.into_iter().next(),
            handles,
            idle_count,
            total_nodes,
            n_helpers,
        }
    }

    pub fn n_helpers(&self) -> usize {
        self.n_helpers
    }

    /// True if at least one helper is waiting for work.
    pub fn has_idle_helper(&self) -> bool {
        self.idle_count.load(Ordering::Acquire) > 0
    }

    /// Offer a split point to the helper tree.
    pub fn publish(&self, sp: &Arc<SplitPoint>) {
        if let Some(tx) = &self.root_tx {
            let _ = tx.send(Command::Help(sp.clone()));
        }
    }

    /// Nodes searched by helpers since the pool was created or last reset.
    pub fn nodes(&self) -> u64 {
        self.total_nodes.load(Ordering::Acquire)
    }

    pub fn reset_nodes(&self) {
        self.total_nodes.store(0, Ordering::Release);
    }
}

impl Drop for HelperPool {
    fn drop(&mut self) {
        if let Some(tx) = self.root_tx.take() {
            let _ = tx.send(Command::Quit);
        }
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen;
    use crate::position::Position;
    use crate::search::{Search, SearchTables};

    fn pool_fixture(n: usize) -> (HelperPool, Arc<TranspositionTable>, Arc<TbProbe>, Arc<SearchSignals>) {
        let tt = Arc::new(TranspositionTable::new(14));
        let tb = Arc::new(TbProbe::new());
        let signals = Arc::new(SearchSignals::new());
        let pool = HelperPool::new(n, tt.clone(), tb.clone(), signals.clone());
        (pool, tt, tb, signals)
    }

    #[test]
    fn inert_pool_is_harmless() {
        let (pool, _, _, _) = pool_fixture(0);
        assert!(!pool.has_idle_helper());
        assert_eq!(pool.nodes(), 0);
    }

    #[test]
    fn helpers_search_published_split_points() {
        let (pool, _tt, _tb, _signals) = pool_fixture(2);
        let pos = Position::start();
        let moves: Vec<_> = movegen::legal_moves(&pos).iter().copied().collect();
        let n_moves = moves.len();
        let sp = SplitPoint::new(
            pos.clone(),
            vec![pos.history_hash()],
            0,
            3,
            -30_000,
            30_000,
            0,
            moves,
        );
        pool.publish(&sp);
        // Helpers drain the queue; workers enter the split before claiming,
        // so once the queue is empty the barrier below is exact.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(20);
        while sp.queue_len() > 0 {
            assert!(std::time::Instant::now() < deadline, "helpers never picked up the split");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let (score, best, cutoff) = sp.wait_result();
        assert!(!best.is_empty());
        assert!(score > -crate::search::constants::MATE0);
        assert!(!cutoff, "full-width window cannot cut off");
        assert!(pool.nodes() > 0);
        assert!(n_moves > 0);
    }

    #[test]
    fn full_search_with_helpers_matches_legal_move() {
        let (pool, tt, tb, signals) = pool_fixture(3);
        let pool = Arc::new(pool);
        let pos = Position::start();
        let mut search = Search::new(
            pos.clone(),
            vec![pos.history_hash()],
            SearchTables::default(),
            tt,
            tb,
            signals,
        );
        search.set_helpers(pool.clone());
        let root_moves = movegen::legal_moves(&pos);
        let m = search.iterative_deepening(root_moves, 7, -1, 1, 0);
        assert!(movegen::legal_moves(&pos).contains(&m));
    }

    #[test]
    fn pool_shuts_down_cleanly() {
        let (pool, _, _, _) = pool_fixture(4);
        drop(pool);
    }
}
