//! Engine control: owns the transposition table, the helper pool, and the
//! search thread; translates protocol commands into search operations.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{info, warn};
use parking_lot::Mutex;
use rand::RngCore;

use engine_core::eval::{Evaluator, Network};
use engine_core::movegen;
use engine_core::position::Position;
use engine_core::search::parallel::HelperPool;
use engine_core::search::{
    PvInfo, Search, SearchListener, SearchSignals, SearchTables, TranspositionTable, Watchdog,
};
use engine_core::tb::TbProbe;
use engine_core::text;
use engine_core::time_management::{compute_time_limits, TimeControlInput, TimeLimits, TimeParameters};
use engine_core::types::Move;

use crate::options::OptionRegistry;
use crate::uci::output::{format_bestmove, format_pv_info};
use crate::uci::GoParams;

/// Entry size assumed when converting the `Hash` option to a table size.
const TT_ENTRY_BYTES: usize = 16;

pub struct EngineControl {
    options: Arc<OptionRegistry>,
    tt: Arc<TranspositionTable>,
    tb: Arc<TbProbe>,
    signals: Arc<SearchSignals>,
    pool: Option<Arc<HelperPool>>,
    pool_size: usize,

    pos: Position,
    hash_list: Vec<u64>,

    searching: Arc<AtomicBool>,
    ponder: Arc<AtomicBool>,
    infinite: Arc<AtomicBool>,
    search_thread: Option<thread::JoinHandle<()>>,
    tables_rx: Option<Receiver<SearchTables>>,
    spare_tables: Option<SearchTables>,

    /// Limits computed at `go` time; applied on `ponderhit`.
    pending_limits: TimeLimits,
    one_possible_move: bool,
    random_seed: u64,
    pending_options: Arc<Mutex<HashMap<String, String>>>,
}

struct UciOut;

impl SearchListener for UciOut {
    fn notify_pv(&mut self, info: &PvInfo) {
        println!("{}", format_pv_info(info));
        let _ = std::io::stdout().flush();
    }

    fn notify_stats(&mut self, nodes: u64, nps: u64, tb_hits: u64, time_ms: u64) {
        if tb_hits > 0 {
            println!("info nodes {nodes} nps {nps} tbhits {tb_hits} time {time_ms}");
        } else {
            println!("info nodes {nodes} nps {nps} time {time_ms}");
        }
        let _ = std::io::stdout().flush();
    }
}

impl EngineControl {
    pub fn new(options: Arc<OptionRegistry>) -> EngineControl {
        let tt = Arc::new(TranspositionTable::new(log2_entries_for_mb(
            options.get_int("Hash").max(0) as usize,
        )));
        let mut ctl = EngineControl {
            options,
            tt,
            tb: Arc::new(TbProbe::new()),
            signals: Arc::new(SearchSignals::new()),
            pool: None,
            pool_size: 0,
            pos: Position::start(),
            hash_list: Vec::new(),
            searching: Arc::new(AtomicBool::new(false)),
            ponder: Arc::new(AtomicBool::new(false)),
            infinite: Arc::new(AtomicBool::new(false)),
            search_thread: None,
            tables_rx: None,
            spare_tables: Some(SearchTables::default()),
            pending_limits: TimeLimits::unlimited(),
            one_possible_move: false,
            random_seed: rand::thread_rng().next_u64(),
            pending_options: Arc::new(Mutex::new(HashMap::new())),
        };
        ctl.hash_list.push(ctl.pos.history_hash());
        ctl.install_observers();
        ctl
    }

    fn install_observers(&self) {
        // Hash resizing and clearing act directly on the shared table.
        let tt = self.tt.clone();
        self.options.add_observer(
            "Hash",
            Box::new(move |v| {
                // Resize needs exclusive access; the table is shared, so the
                // observer only clears here and the size is applied before
                // the next search in `ensure_tt_size`.
                let _ = v;
                tt.clear();
            }),
        );
        let tt = self.tt.clone();
        self.options.add_observer(
            "Clear Hash",
            Box::new(move |_| {
                tt.clear();
                info!("hash table cleared");
            }),
        );
    }

    /// The `Hash` option is applied lazily: the shared table cannot be
    /// resized while a search or the helper pool holds references to it.
    fn ensure_tt_size(&mut self) {
        let want = log2_entries_for_mb(self.options.get_int("Hash").max(0) as usize);
        if (1usize << want) != self.tt.num_entries() {
            // Joining the helpers releases their table references.
            self.pool = None;
            self.pool_size = 0;
            if let Some(tt) = Arc::get_mut(&mut self.tt) {
                tt.resize(want);
            } else {
                warn!("cannot resize hash: table still referenced elsewhere");
            }
        }
    }

    fn ensure_pool(&mut self) {
        let threads = self.options.get_int("Threads").max(1) as usize;
        let want = threads - 1;
        if want != self.pool_size || self.pool.is_none() {
            self.pool = None; // joins old helpers
            self.pool_size = want;
            if want > 0 {
                self.pool = Some(Arc::new(HelperPool::new(
                    want,
                    self.tt.clone(),
                    self.tb.clone(),
                    self.signals.clone(),
                )));
            }
        }
    }

    pub fn is_searching(&self) -> bool {
        self.searching.load(Ordering::Acquire)
    }

    /// Set the game state: a base position plus the moves played from it.
    /// Positions before the last zeroing move are dropped from the
    /// repetition list, mirroring the rules.
    pub fn set_position(&mut self, mut pos: Position, moves: &[String]) -> Result<(), String> {
        let mut hash_list = vec![pos.history_hash()];
        for mv_str in moves {
            let m = text::any_to_move(&pos, mv_str).map_err(|e| e.to_string())?;
            pos.make_move(m);
            if pos.halfmove_clock() == 0 {
                hash_list.clear();
            }
            hash_list.push(pos.history_hash());
        }
        self.pos = pos;
        self.hash_list = hash_list;
        Ok(())
    }

    pub fn position(&self) -> &Position {
        &self.pos
    }

    /// Apply a `setoption`. While a search runs the change is queued and
    /// applied once the search finishes.
    pub fn set_option(&mut self, name: &str, value: Option<&str>) {
        if self.is_searching() {
            if self.options.contains(name) {
                self.pending_options
                    .lock()
                    .insert(name.to_string(), value.unwrap_or("").to_string());
            }
            return;
        }
        if !self.options.set(name, value) {
            println!("info string ignoring option {name}");
        } else if name.eq_ignore_ascii_case("EvalFile") {
            self.load_eval_file();
        }
    }

    fn apply_pending_options(&mut self) {
        let pending: Vec<(String, String)> = self.pending_options.lock().drain().collect();
        for (name, value) in pending {
            let v = if value.is_empty() { None } else { Some(value.as_str()) };
            self.options.set(&name, v);
            if name.eq_ignore_ascii_case("EvalFile") {
                self.load_eval_file();
            }
        }
    }

    fn load_eval_file(&mut self) {
        let path = self.options.get_string("EvalFile");
        let net = if path.is_empty() {
            None
        } else {
            match Network::load_file(std::path::Path::new(&path)) {
                Ok(n) => Some(n),
                Err(e) => {
                    println!("info string cannot load EvalFile: {e}");
                    None
                }
            }
        };
        if let Some(tables) = &mut self.spare_tables {
            tables.et.net = net;
        }
    }

    pub fn new_game(&mut self) {
        self.stop_and_wait();
        self.random_seed = rand::thread_rng().next_u64();
        self.tt.clear();
        self.spare_tables = Some(SearchTables::default());
        self.load_eval_file();
    }

    /// Start a search or a ponder search. Non-blocking; the best move is
    /// printed by the search thread.
    pub fn go(&mut self, params: &GoParams) {
        self.stop_and_wait();
        self.apply_pending_options();
        self.ensure_tt_size();
        self.ensure_pool();

        let time_params = TimeParameters::default();
        let input = TimeControlInput {
            wtime: params.wtime,
            btime: params.btime,
            winc: params.winc,
            binc: params.binc,
            moves_to_go: params.moves_to_go,
            movetime: params.movetime,
            infinite: params.infinite,
            depth: params.depth,
            nodes: params.nodes,
            mate: params.mate,
        };
        let mut limits = compute_time_limits(&input, self.pos.is_white_move(), self.options.get_bool("Ponder"), &time_params);

        // Root move set, optionally restricted by searchmoves.
        let mut root_moves = movegen::legal_moves(&self.pos);
        if !params.search_moves.is_empty() {
            let allowed: Vec<Move> = params
                .search_moves
                .iter()
                .filter_map(|s| text::any_to_move(&self.pos, s).ok())
                .collect();
            root_moves.filter_to(&allowed);
        }

        self.one_possible_move = false;
        if root_moves.len() < 2 && !params.infinite && !params.ponder {
            self.one_possible_move = true;
            limits.collapse_for_single_move();
        }

        let analyse = self.options.get_bool("AnalyseMode");
        if analyse {
            if let Some(tables) = &mut self.spare_tables {
                let score = Evaluator::new(&mut tables.et).eval_white(&self.pos);
                println!("info string eval {:.2}", score as f64 / 100.0);
            }
            if self.options.get_bool("AnalysisAgeHash") {
                self.tt.next_generation();
            }
        } else {
            self.tt.next_generation();
        }

        self.pending_limits = limits;
        self.signals.reset();
        if params.ponder {
            // Pondering: no time pressure until ponderhit.
            self.signals.set_time_limits(-1, -1, -1);
        } else {
            self.signals.set_time_limits(limits.min_time_ms, limits.max_time_ms, limits.early_stop_pct);
        }
        self.ponder.store(params.ponder, Ordering::SeqCst);
        self.infinite.store(
            params.infinite || (limits.is_infinite() && !params.ponder && params.movetime.is_none()),
            Ordering::SeqCst,
        );

        let max_pv = if params.infinite || analyse { self.options.get_int("MultiPV").max(1) } else { 1 };
        let strength = self.options.get_int("Strength").clamp(0, 1000) as i32;
        let min_probe_depth = self.options.get_int("MinProbeDepth") as i32;
        let max_depth = limits.max_depth;
        let max_nodes = limits.max_nodes;

        let tables = self.spare_tables.take().unwrap_or_default();
        let (tables_tx, tables_rx): (Sender<SearchTables>, Receiver<SearchTables>) = unbounded();
        self.tables_rx = Some(tables_rx);

        let pos = self.pos.clone();
        let hash_list = self.hash_list.clone();
        let tt = self.tt.clone();
        let tb = self.tb.clone();
        let signals = self.signals.clone();
        let pool = self.pool.clone();
        let searching = self.searching.clone();
        let ponder = self.ponder.clone();
        let infinite = self.infinite.clone();
        let seed = self.random_seed;

        searching.store(true, Ordering::SeqCst);
        let fallback = root_moves.as_slice().first().copied();
        let handle = thread::Builder::new()
            .name("engine-main".into())
            .spawn(move || {
                let start = std::time::Instant::now();
                let _watchdog = Watchdog::start(signals.clone(), start);

                let searched = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let mut search =
                        Search::new(pos.clone(), hash_list, tables, tt.clone(), tb, signals.clone());
                    search.set_listener(Box::new(UciOut));
                    search.set_strength(strength, seed);
                    if let Some(pool) = pool {
                        pool.reset_nodes();
                        search.set_helpers(pool);
                    }
                    let best = search.iterative_deepening(
                        root_moves,
                        max_depth,
                        max_nodes,
                        max_pv as usize,
                        min_probe_depth,
                    );
                    (best, search.into_tables())
                }));
                let best = match searched {
                    Ok((best, tables)) => {
                        let _ = tables_tx.send(tables);
                        best
                    }
                    Err(_) => {
                        // Fatal search error: fall back to any legal move
                        // and return to the ready state.
                        log::error!("search thread panicked; emitting fallback move");
                        fallback.unwrap_or_else(Move::empty)
                    }
                };

                // Ponder and infinite searches hold their answer until the
                // front end releases them.
                while (ponder.load(Ordering::SeqCst) || infinite.load(Ordering::SeqCst))
                    && !signals.should_stop()
                {
                    thread::sleep(Duration::from_millis(10));
                }

                let ponder_move = ponder_move_from_tt(&tt, &pos, best);
                if best.is_empty() {
                    println!("bestmove 0000");
                } else {
                    println!("{}", format_bestmove(best, ponder_move));
                }
                let _ = std::io::stdout().flush();
                searching.store(false, Ordering::SeqCst);
            })
            .expect("spawn search thread");
        self.search_thread = Some(handle);
    }

    /// Promote a ponder search into a normal one.
    pub fn ponder_hit(&mut self) {
        if !self.is_searching() {
            return;
        }
        let mut limits = self.pending_limits;
        if self.one_possible_move {
            limits.collapse_for_single_move();
        }
        self.signals.set_time_limits(limits.min_time_ms, limits.max_time_ms, limits.early_stop_pct);
        self.infinite.store(limits.is_infinite(), Ordering::SeqCst);
        self.ponder.store(false, Ordering::SeqCst);
    }

    /// Cooperative stop; returns once the search thread has emitted its move
    /// and exited.
    pub fn stop_and_wait(&mut self) {
        self.infinite.store(false, Ordering::SeqCst);
        self.ponder.store(false, Ordering::SeqCst);
        if self.search_thread.is_some() {
            self.signals.request_stop();
        }
        if let Some(h) = self.search_thread.take() {
            let _ = h.join();
        }
        if let Some(rx) = self.tables_rx.take() {
            if let Ok(tables) = rx.try_recv() {
                self.spare_tables = Some(tables);
            }
        }
        if self.spare_tables.is_none() {
            self.spare_tables = Some(SearchTables::default());
        }
        self.apply_pending_options();
    }

    /// `stop` command: request the move now but do not tear anything down.
    pub fn stop(&mut self) {
        self.infinite.store(false, Ordering::SeqCst);
        self.ponder.store(false, Ordering::SeqCst);
        self.signals.request_stop();
    }

    pub fn quit(&mut self) {
        self.stop_and_wait();
        self.pool = None;
    }
}

/// Try to find a ponder move for the opponent from the transposition table.
fn ponder_move_from_tt(tt: &TranspositionTable, pos: &Position, best: Move) -> Option<Move> {
    if best.is_empty() {
        return None;
    }
    let mut pos = pos.clone();
    pos.make_move(best);
    let ent = tt.probe(pos.history_hash())?;
    let m = ent.get_move()?;
    if movegen::legal_moves(&pos).contains(&m) {
        Some(m)
    } else {
        None
    }
}

/// Convert the `Hash` option (MiB) into a power-of-two entry count; zero
/// selects a tiny fixed table.
fn log2_entries_for_mb(mb: usize) -> usize {
    if mb == 0 {
        return 10;
    }
    let entries = mb * (1 << 20) / TT_ENTRY_BYTES;
    let mut log2 = 0;
    while (1usize << (log2 + 1)) <= entries {
        log2 += 1;
    }
    log2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::default_options;

    fn control() -> EngineControl {
        EngineControl::new(Arc::new(default_options()))
    }

    #[test]
    fn hash_size_mapping() {
        assert_eq!(log2_entries_for_mb(0), 10);
        // 1 MiB / 16 bytes = 65536 entries = 2^16.
        assert_eq!(log2_entries_for_mb(1), 16);
        assert_eq!(log2_entries_for_mb(16), 20);
        // Non-power-of-two rounds down.
        assert_eq!(log2_entries_for_mb(3), 17);
    }

    #[test]
    fn set_position_tracks_repetition_list() {
        let mut c = control();
        c.set_position(Position::start(), &["e2e4".into(), "e7e5".into()]).unwrap();
        // Pawn moves zero the clock: only the latest position remains.
        assert_eq!(c.hash_list.len(), 1);
        c.set_position(Position::start(), &["g1f3".into(), "g8f6".into()]).unwrap();
        assert_eq!(c.hash_list.len(), 3);
        assert!(c.set_position(Position::start(), &["e2e5".into()]).is_err());
    }

    #[test]
    fn accepts_san_moves_too() {
        let mut c = control();
        c.set_position(Position::start(), &["e4".into(), "Nf6".into()]).unwrap();
        assert_eq!(c.position().fullmove_counter(), 2);
    }

    #[test]
    fn go_and_stop_produce_a_search() {
        let mut c = control();
        c.set_position(Position::start(), &[]).unwrap();
        let params = GoParams { depth: Some(3), ..Default::default() };
        c.go(&params);
        assert!(c.is_searching() || c.search_thread.is_some());
        c.stop_and_wait();
        assert!(!c.is_searching());
    }

    #[test]
    fn options_deferred_while_searching() {
        let mut c = control();
        c.set_position(Position::start(), &[]).unwrap();
        c.go(&GoParams { infinite: true, ..Default::default() });
        c.set_option("MultiPV", Some("3"));
        // The running search keeps the old value until it ends.
        c.stop_and_wait();
        assert_eq!(c.options.get_int("MultiPV"), 3);
    }

    #[test]
    fn ponderhit_applies_stored_limits() {
        let mut c = control();
        c.set_position(Position::start(), &[]).unwrap();
        c.go(&GoParams {
            wtime: Some(10_000),
            btime: Some(10_000),
            ponder: true,
            ..Default::default()
        });
        // While pondering there is no hard limit.
        assert_eq!(c.signals.max_time_ms(), -1);
        c.ponder_hit();
        assert!(c.signals.max_time_ms() > 0);
        c.stop_and_wait();
    }
}
