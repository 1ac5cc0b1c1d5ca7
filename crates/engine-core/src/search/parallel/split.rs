//! Split points: shared work units where helper threads join the search.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::position::Position;
use crate::types::Move;

/// Mutable part of a split point, guarded by one mutex.
pub struct SpState {
    pub alpha: i32,
    pub best_score: i32,
    pub best_move: Move,
    pub cutoff: bool,
}

/// A node whose remaining moves are searched cooperatively. The owner
/// publishes the move list; the owner and any idle helpers claim moves and
/// report scores back. A beta cutoff cancels the remaining work.
pub struct SplitPoint {
    pub pos: Position,
    pub hash_list: Vec<u64>,
    pub ply: i32,
    pub depth: i32,
    pub beta: i32,
    pub min_probe_depth: i32,

    queue: Mutex<VecDeque<Move>>,
    state: Mutex<SpState>,
    all_done: Condvar,
    cancelled: Arc<AtomicBool>,
    active_helpers: AtomicUsize,
    /// Nodes searched by helpers on this split point.
    pub nodes: AtomicU64,
    /// Maximum selective depth any helper reached below this node.
    pub sel_depth: AtomicU64,
}

impl SplitPoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pos: Position,
        hash_list: Vec<u64>,
        ply: i32,
        depth: i32,
        alpha: i32,
        beta: i32,
        min_probe_depth: i32,
        moves: Vec<Move>,
    ) -> Arc<SplitPoint> {
        Arc::new(SplitPoint {
            pos,
            hash_list,
            ply,
            depth,
            beta,
            min_probe_depth,
            queue: Mutex::new(moves.into()),
            state: Mutex::new(SpState {
                alpha,
                best_score: -crate::search::constants::MATE0,
                best_move: Move::empty(),
                cutoff: false,
            }),
            all_done: Condvar::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            active_helpers: AtomicUsize::new(0),
            nodes: AtomicU64::new(0),
            sel_depth: AtomicU64::new(0),
        })
    }

    /// Claim the next unsearched move, unless the split has been cancelled.
    pub fn claim(&self) -> Option<Move> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        self.queue.lock().pop_front()
    }

    pub fn current_alpha(&self) -> i32 {
        self.state.lock().alpha
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fold in the score of a claimed move. On a beta cutoff the queue is
    /// drained and siblings are cancelled.
    pub fn report(&self, m: Move, score: i32) {
        let mut st = self.state.lock();
        if score > st.best_score {
            st.best_score = score;
            st.best_move = m;
            if score > st.alpha {
                st.alpha = score;
                if score >= self.beta {
                    st.cutoff = true;
                    drop(st);
                    self.cancelled.store(true, Ordering::Release);
                    self.queue.lock().clear();
                    return;
                }
            }
        }
    }

    pub fn helper_enter(&self) {
        self.active_helpers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn helper_leave(&self) {
        if self.active_helpers.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _st = self.state.lock();
            self.all_done.notify_all();
        }
    }

    /// Owner-side barrier: wait until every helper has left, then read the
    /// final result. Completion of this node is never reported before the
    /// barrier passes.
    pub fn wait_result(&self) -> (i32, Move, bool) {
        let mut st = self.state.lock();
        while self.active_helpers.load(Ordering::Acquire) != 0 {
            self.all_done.wait(&mut st);
        }
        (st.best_score, st.best_move, st.cutoff)
    }
}
