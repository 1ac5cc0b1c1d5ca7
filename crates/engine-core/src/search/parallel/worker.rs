//! Helper worker threads.
//!
//! Workers form a tree: each has a parent and up to two children. Commands
//! travel parent to child; node counts travel back up when a worker goes
//! idle. A worker blocks on its command channel while idle.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};

use super::split::SplitPoint;
use crate::search::time_manager::SearchSignals;
use crate::search::{Search, SearchTables, TranspositionTable};
use crate::tb::TbProbe;

pub enum Command {
    /// Join the given split point, then forward to children.
    Help(Arc<SplitPoint>),
    /// Stop helping and shut down.
    Quit,
}

pub struct WorkerContext {
    pub id: usize,
    pub rx: Receiver<Command>,
    pub children: Vec<Sender<Command>>,
    pub tt: Arc<TranspositionTable>,
    pub tb: Arc<TbProbe>,
    pub signals: Arc<SearchSignals>,
    pub idle_count: Arc<AtomicUsize>,
    pub total_nodes: Arc<AtomicU64>,
}

pub fn worker_main(ctx: WorkerContext) {
    let mut tables = SearchTables::default();
    debug!("helper {} started", ctx.id);
    loop {
        let cmd = match ctx.rx.recv() {
            Ok(c) => c,
            Err(_) => break, // pool dropped
        };
        match cmd {
            Command::Quit => {
                for child in &ctx.children {
                    let _ = child.send(Command::Quit);
                }
                break;
            }
            Command::Help(sp) => {
                for child in &ctx.children {
                    let _ = child.send(Command::Help(sp.clone()));
                }
                ctx.idle_count.fetch_sub(1, Ordering::AcqRel);
                tables = help_at(&ctx, sp, tables);
                ctx.idle_count.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
    debug!("helper {} stopped", ctx.id);
}

/// Claim and search moves from a split point until it is exhausted or
/// cancelled. Returns the heuristic tables for reuse.
fn help_at(ctx: &WorkerContext, sp: Arc<SplitPoint>, tables: SearchTables) -> SearchTables {
    sp.helper_enter();
    let mut search = Search::new(
        sp.pos.clone(),
        sp.hash_list.clone(),
        tables,
        ctx.tt.clone(),
        ctx.tb.clone(),
        ctx.signals.clone(),
    );
    search.set_cancel_flag(sp.cancel_flag());

    while let Some(m) = sp.claim() {
        let alpha = sp.current_alpha();
        if alpha >= sp.beta {
            break;
        }
        match search.search_split_move(m, alpha, sp.beta, sp.ply, sp.depth, sp.min_probe_depth) {
            Ok(score) => sp.report(m, score),
            Err(_) => break, // stopped or cancelled mid-move
        }
    }

    let nodes = search.nodes();
    sp.nodes.fetch_add(nodes, Ordering::AcqRel);
    sp.sel_depth.fetch_max(search.sel_depth() as u64, Ordering::AcqRel);
    ctx.total_nodes.fetch_add(nodes, Ordering::AcqRel);
    sp.helper_leave();
    search.into_tables()
}

/// Spawn a worker thread; panics are contained and reported.
pub fn spawn(ctx: WorkerContext) -> thread::JoinHandle<()> {
    let id = ctx.id;
    thread::Builder::new()
        .name(format!("helper-{id}"))
        .spawn(move || {
            let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| worker_main(ctx)));
            if res.is_err() {
                error!("helper {id} panicked");
            }
        })
        .expect("spawn helper thread")
}
