//! Proof-game filter: a staged pipeline deciding, per input position,
//! whether it is reachable from the starting position.
//!
//! Each input line carries a FEN plus `name:`-tagged token groups recording
//! pipeline state. A line moves INITIAL -> KERNEL -> PATH -> LEGAL, or ends
//! in ILLEGAL / FAIL / UNKNOWN. Node budgets escalate geometrically between
//! iterations through the `status: N=...` token.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::time::Instant;

use log::info;
use rayon::prelude::*;

use engine_core::bitboard;
use engine_core::error::ChessError;
use engine_core::position::{Position, START_POS_FEN};
use engine_core::text;
use engine_core::types::{Color, Move, Piece, PieceKind, Square};

use super::kernel::{KernelResult, ProofKernel};
use super::multi_board::MultiBoard;
use super::path_search::{PgOptions, PgOutcome, PgResult, ProofGame};
use super::sequence::PkSequence;
use super::{ExtPkMove, PkPiece};

// Budget ladders. Hand-tuned in the original system; kept as named
// constants.
const PATH_INIT_MAX_NODES: u64 = 5_000;
const PATH_MAX_MAX_NODES: u64 = 500_000;
const PROOF_INIT_MAX_NODES: u64 = 50_000;
const PROOF_MAX_MAX_NODES: u64 = 3_200_000;
/// Budget divisor for the non-admissible retry seeded with the closest path.
const NON_ADMISSIBLE_BUDGET_DIV: u64 = 4;
/// Further divisor for the last-ditch retry from the original seed.
const RETRY_BUDGET_DIV: u64 = 2;

/// Token kinds, in their canonical spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Token {
    Illegal,
    Unknown,
    Legal,
    Forced,
    Kernel,
    ExtKernel,
    Path,
    Status,
    Fail,
    Info,
    Proof,
}

const TOKENS: [(Token, &str); 11] = [
    (Token::Illegal, "illegal"),
    (Token::Unknown, "unknown"),
    (Token::Legal, "legal"),
    (Token::Forced, "forced"),
    (Token::Kernel, "kernel"),
    (Token::ExtKernel, "extKernel"),
    (Token::Path, "path"),
    (Token::Status, "status"),
    (Token::Fail, "fail"),
    (Token::Info, "info"),
    (Token::Proof, "proof"),
];

fn token_from_str(s: &str) -> Option<Token> {
    TOKENS.iter().find(|(_, name)| *name == s).map(|(t, _)| *t)
}

fn token_name(t: Token) -> &'static str {
    TOKENS.iter().find(|(tt, _)| *tt == t).map(|(_, n)| n).expect("all tokens named")
}

/// Pipeline progress of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Legality {
    Initial,
    Kernel,
    Path,
    Legal,
    Illegal,
    Fail,
}

/// Malformed filter input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFormatError(pub String);

impl std::fmt::Display for LineFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid line format: {}", self.0)
    }
}

impl std::error::Error for LineFormatError {}

/// One work item: a FEN plus its token groups.
#[derive(Debug, Clone, Default)]
pub struct Line {
    pub fen: String,
    data: BTreeMap<Token, Vec<String>>,
}

impl Line {
    pub fn parse(text: &str) -> Result<Line, LineFormatError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() < 6 {
            return Err(LineFormatError(text.to_string()));
        }
        let mut line = Line { fen: fields[..6].join(" "), data: BTreeMap::new() };
        let mut current: Option<Token> = None;
        for tok in &fields[6..] {
            if let Some(name) = tok.strip_suffix(':') {
                let t = token_from_str(name).ok_or_else(|| LineFormatError(text.to_string()))?;
                line.data.insert(t, Vec::new());
                current = Some(t);
            } else {
                let Some(t) = current else {
                    return Err(LineFormatError(text.to_string()));
                };
                line.data.get_mut(&t).expect("inserted above").push(tok.to_string());
            }
        }
        Ok(line)
    }

    pub fn has_token(&self, t: Token) -> bool {
        self.data.contains_key(&t)
    }

    pub fn token_data(&mut self, t: Token) -> &mut Vec<String> {
        self.data.entry(t).or_default()
    }

    pub fn get(&self, t: Token) -> Option<&Vec<String>> {
        self.data.get(&t)
    }

    pub fn erase(&mut self, t: Token) {
        self.data.remove(&t);
    }

    pub fn status(&self) -> Legality {
        if self.has_token(Token::Illegal) {
            return Legality::Illegal;
        }
        if self.has_token(Token::Legal) && self.has_token(Token::Proof) {
            return Legality::Legal;
        }
        if self.has_token(Token::Unknown) {
            if self.has_token(Token::Fail) {
                return Legality::Fail;
            }
            if self.has_token(Token::Path) {
                return Legality::Path;
            }
            if self.has_token(Token::ExtKernel) {
                return Legality::Kernel;
            }
        }
        Legality::Initial
    }

    pub fn status_int(&self, name: &str, default: u64) -> u64 {
        let prefix = format!("{name}=");
        if let Some(status) = self.get(Token::Status) {
            for s in status {
                if let Some(v) = s.strip_prefix(&prefix) {
                    return v.parse().unwrap_or(default);
                }
            }
        }
        default
    }

    pub fn set_status_int(&mut self, name: &str, value: u64) {
        let prefix = format!("{name}=");
        let entry = format!("{prefix}{value}");
        let status = self.token_data(Token::Status);
        for s in status.iter_mut() {
            if s.starts_with(&prefix) {
                *s = entry;
                return;
            }
        }
        status.push(entry);
    }

    /// Serialize in the canonical order for the current verdict.
    pub fn to_line(&self) -> String {
        let mut out = self.fen.clone();
        let mut emit = |out: &mut String, t: Token| {
            if let Some(data) = self.data.get(&t) {
                out.push(' ');
                out.push_str(token_name(t));
                out.push(':');
                for s in data {
                    out.push(' ');
                    out.push_str(s);
                }
            }
        };
        if self.has_token(Token::Illegal) {
            emit(&mut out, Token::Illegal);
            emit(&mut out, Token::Forced);
        } else if self.has_token(Token::Unknown) {
            emit(&mut out, Token::Unknown);
            emit(&mut out, Token::Kernel);
            emit(&mut out, Token::ExtKernel);
            emit(&mut out, Token::Path);
            emit(&mut out, Token::Status);
            emit(&mut out, Token::Fail);
            emit(&mut out, Token::Info);
        } else if self.has_token(Token::Legal) {
            emit(&mut out, Token::Legal);
            emit(&mut out, Token::Proof);
        }
        out
    }
}

/// Render a move path in SAN, starting from `start`.
fn san_path(start: &Position, moves: &[Move]) -> Vec<String> {
    let mut out = Vec::with_capacity(moves.len());
    let mut pos = start.clone();
    for &m in moves {
        out.push(text::move_to_san(&pos, m));
        pos.make_move(m);
    }
    out
}

fn parse_path(start: &Position, tokens: &[String]) -> Result<Vec<Move>, ChessError> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut pos = start.clone();
    for s in tokens {
        let m = text::any_to_move(&pos, s)
            .map_err(|e| ChessError::new(format!("bad path move {s}: {e}")))?;
        pos.make_move(m);
        out.push(m);
    }
    Ok(out)
}

pub struct ProofGameFilter {
    start_pos: Position,
}

impl Default for ProofGameFilter {
    fn default() -> Self {
        ProofGameFilter::new()
    }
}

impl ProofGameFilter {
    pub fn new() -> ProofGameFilter {
        ProofGameFilter { start_pos: Position::start() }
    }

    /// Advance one line one stage. Returns true when more work remains.
    pub fn advance(&self, line: &mut Line) -> bool {
        match line.status() {
            Legality::Initial => {
                self.compute_ext_proof_kernel(line);
                true
            }
            Legality::Kernel => self.compute_path(line),
            Legality::Path => self.compute_proof_game(line),
            Legality::Legal | Legality::Illegal | Legality::Fail => false,
        }
    }

    /// INITIAL: a tiny direct search catches already-legal positions; the
    /// kernel decides between KERNEL, ILLEGAL and UNKNOWN otherwise.
    fn compute_ext_proof_kernel(&self, line: &mut Line) {
        let set_illegal = |line: &mut Line, reason: &str| {
            line.erase(Token::Unknown);
            let data = line.token_data(Token::Illegal);
            data.clear();
            data.push(reason.to_string());
        };

        let goal_pos = match Position::from_fen(&line.fen) {
            Ok(p) => p,
            Err(e) => {
                set_illegal(line, &format!("bad_fen:{e}"));
                return;
            }
        };

        info!("finding proof kernel for {}", line.fen);
        let pg = ProofGame::from_positions(self.start_pos.clone(), goal_pos.clone(), Vec::new());
        let opts = PgOptions { weight_a: 1, weight_b: 1, max_nodes: 2, accept_first: true, use_non_admissible: false };
        let mut result = PgResult::default();
        match pg.search(&opts, &mut result) {
            PgOutcome::Solved => {
                line.token_data(Token::Legal).clear();
                let proof = san_path(&self.start_pos, &result.proof);
                *line.token_data(Token::Proof) = proof;
                return;
            }
            PgOutcome::Unreachable => {
                set_illegal(line, "Other");
                return;
            }
            PgOutcome::BudgetExceeded => {}
        }

        let blocked = ProofKernel::compute_blocked(&self.start_pos, &goal_pos);
        let mut pk = ProofKernel::new(&self.start_pos, &goal_pos, blocked);
        match pk.find_proof_kernel() {
            Err(e) => {
                line.token_data(Token::Unknown).clear();
                line.token_data(Token::Fail).clear();
                let info_data = line.token_data(Token::Info);
                info_data.clear();
                info_data.push(e.to_string().replace(' ', "_"));
            }
            Ok(KernelResult::Fail { forced_prefix }) => {
                set_illegal(line, "No_proof_kernel");
                if !forced_prefix.is_empty() {
                    *line.token_data(Token::Forced) =
                        forced_prefix.iter().map(|m| m.to_string()).collect();
                }
            }
            Ok(KernelResult::ProofKernel { kernel: _ }) => {
                set_illegal(line, "No_extended_proof_kernel");
            }
            Ok(KernelResult::ExtProofKernel { kernel, ext }) => {
                let mut seq = PkSequence::new(ext, &self.start_pos, &goal_pos);
                seq.improve();
                line.token_data(Token::Unknown).clear();
                *line.token_data(Token::Kernel) = kernel.iter().map(|m| m.to_string()).collect();
                *line.token_data(Token::ExtKernel) =
                    seq.moves().iter().map(|m| m.to_string()).collect();
            }
        }
    }

    /// KERNEL: evolve the extended kernel over a multi-board and stitch the
    /// intermediate boards together with bounded best-first searches.
    fn compute_path(&self, line: &mut Line) -> bool {
        if !line.has_token(Token::ExtKernel) {
            return false;
        }
        let ext: Vec<ExtPkMove> = match line
            .get(Token::ExtKernel)
            .expect("checked above")
            .iter()
            .map(|s| s.parse())
            .collect::<Result<_, _>>()
        {
            Ok(v) => v,
            Err(e) => {
                line.token_data(Token::Fail).clear();
                line.token_data(Token::Info).push(e.replace(' ', "_"));
                return false;
            }
        };

        let old_max = line.status_int("N", 0);
        line.erase(Token::Status);
        let max_nodes = (old_max * 2).clamp(PATH_INIT_MAX_NODES, PATH_MAX_MAX_NODES);
        if max_nodes <= old_max {
            line.token_data(Token::Fail).clear();
            return false;
        }

        let fen = line.fen.clone();
        let run = |fen: &str| -> Result<Vec<String>, ChessError> {
            info!("finding path for {fen}");
            let goal_pos =
                Position::from_fen(fen).map_err(|e| ChessError::new(format!("bad fen: {e}")))?;
            let mut init_pos = self.start_pos.clone();
            init_pos.set_castle_mask(goal_pos.castle_mask());

            let mut brd_vec = evolve_multiboards(&init_pos, &ext)?;
            decide_promotions(&mut brd_vec, &init_pos, &goal_pos)?;

            let opts = PgOptions {
                weight_a: 1,
                weight_b: 5,
                max_nodes,
                accept_first: true,
                use_non_admissible: false,
            };
            let mut path = Vec::new();
            let end = brd_vec.len() - 1;
            self.compute_path_rec(&mut brd_vec, 0, end, &init_pos, &goal_pos, &opts, &mut path)?;
            Ok(san_path(&init_pos, &path))
        };

        match run(&fen) {
            Ok(path) => {
                line.erase(Token::Info);
                *line.token_data(Token::Path) = path;
                true
            }
            Err(e) => {
                line.erase(Token::Path);
                let work_remains = max_nodes < PATH_MAX_MAX_NODES;
                if work_remains {
                    line.erase(Token::Fail);
                    line.set_status_int("N", max_nodes);
                } else {
                    line.token_data(Token::Fail).clear();
                }
                let info_data = line.token_data(Token::Info);
                info_data.clear();
                info_data.push(e.to_string().replace(' ', "_"));
                work_remains
            }
        }
    }

    /// Stitch boards `[start_idx, end_idx]`, splitting at the midpoint when
    /// a single bounded search cannot cross the span.
    #[allow(clippy::too_many_arguments)]
    fn compute_path_rec(
        &self,
        brd_vec: &mut Vec<MultiBoard>,
        start_idx: usize,
        end_idx: usize,
        init_pos: &Position,
        goal_pos: &Position,
        opts: &PgOptions,
        path: &mut Vec<Move>,
    ) -> Result<(), ChessError> {
        free_pieces(brd_vec, end_idx, init_pos, goal_pos);

        let mut start_pos = init_pos.clone();
        brd_vec[start_idx].expel()?;
        board_onto_position(&brd_vec[start_idx], &mut start_pos)?;

        let mut end_pos = init_pos.clone();
        brd_vec[end_idx].expel()?;
        board_onto_position(&brd_vec[end_idx], &mut end_pos)?;

        let mut result = PgResult::default();
        // Intermediate boards carry no tempo, so placement matching only.
        let outcome = pg_search_with(
            start_pos.clone(),
            end_pos.clone(),
            Vec::new(),
            *opts,
            false,
            &mut result,
        );
        match outcome {
            PgOutcome::Unreachable => Err(ChessError::new(format!(
                "No solution exists, fen1= {} fen2= {}",
                start_pos.to_fen(),
                end_pos.to_fen()
            ))),
            PgOutcome::BudgetExceeded => {
                if end_idx <= start_idx + 1 {
                    return Err(ChessError::new(format!(
                        "No solution found, fen1= {} fen2= {}",
                        start_pos.to_fen(),
                        end_pos.to_fen()
                    )));
                }
                let mid = (start_idx + end_idx) / 2;
                self.compute_path_rec(brd_vec, start_idx, mid, init_pos, goal_pos, opts, path)?;
                self.compute_path_rec(brd_vec, mid, end_idx, init_pos, goal_pos, opts, path)
            }
            PgOutcome::Solved => {
                path.extend_from_slice(&result.proof);
                Ok(())
            }
        }
    }

    /// PATH: search from the start position to the target FEN, seeded with
    /// the stitched path.
    fn compute_proof_game(&self, line: &mut Line) -> bool {
        let init_path = match line.get(Token::Path) {
            Some(tokens) => match parse_path(&self.start_pos, tokens) {
                Ok(p) => p,
                Err(_) => Vec::new(),
            },
            None => Vec::new(),
        };

        let old_max = line.status_int("N", 0);
        line.erase(Token::Status);
        let max_nodes = (old_max * 2).clamp(PROOF_INIT_MAX_NODES, PROOF_MAX_MAX_NODES);
        if max_nodes <= old_max {
            line.token_data(Token::Fail).clear();
            return false;
        }

        info!("finding proof game for {}", line.fen);
        let goal_pos = match Position::from_fen(&line.fen) {
            Ok(p) => p,
            Err(e) => {
                line.token_data(Token::Fail).clear();
                line.token_data(Token::Info).push(format!("bad_fen:{e}"));
                return false;
            }
        };

        let opts = PgOptions {
            weight_a: 1,
            weight_b: 5,
            max_nodes,
            accept_first: true,
            use_non_admissible: false,
        };
        let mut result = PgResult::default();
        let outcome =
            pg_search(self.start_pos.clone(), goal_pos, init_path, opts, &mut result);

        match outcome {
            PgOutcome::Solved => {
                *line.token_data(Token::Proof) = san_path(&self.start_pos, &result.proof);
                line.erase(Token::Unknown);
                line.erase(Token::Status);
                line.erase(Token::Info);
                line.token_data(Token::Legal).clear();
                info!(
                    "solution len {} nodes {} for {}",
                    result.proof.len(),
                    result.num_nodes,
                    line.fen
                );
                false
            }
            PgOutcome::Unreachable => {
                line.token_data(Token::Fail).clear();
                let info_data = line.token_data(Token::Info);
                info_data.clear();
                info_data.push("No_solution_exists".to_string());
                false
            }
            PgOutcome::BudgetExceeded => {
                line.erase(Token::Proof);
                let work_remains = max_nodes < PROOF_MAX_MAX_NODES;
                if work_remains {
                    line.erase(Token::Fail);
                    line.set_status_int("N", max_nodes);
                } else {
                    line.token_data(Token::Fail).clear();
                }
                let info_data = line.token_data(Token::Info);
                info_data.clear();
                info_data.push("No_solution_found,".to_string());
                info_data.push(format!("bound={}", result.smallest_bound));
                info_data.push("moves".to_string());
                info_data.extend(san_path(&self.start_pos, &result.closest_path));
                work_remains
            }
        }
    }

    /// Process a whole stream once. Returns true while any line can still
    /// make progress.
    pub fn run_one_iteration(
        &self,
        input: impl BufRead,
        output: &mut impl Write,
        jobs: usize,
        show_progress: bool,
        start_time: Instant,
    ) -> std::io::Result<bool> {
        let mut lines: Vec<Line> = Vec::new();
        for l in input.lines() {
            let l = l?;
            if l.trim().is_empty() {
                continue;
            }
            match Line::parse(&l) {
                Ok(line) => lines.push(line),
                Err(e) => {
                    // Diagnose and keep going; never crash on bad input.
                    eprintln!("{e}");
                }
            }
        }

        let work_flags: Vec<bool> = if jobs > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .expect("build rayon pool");
            pool.install(|| lines.par_iter_mut().map(|line| self.advance(line)).collect())
        } else {
            lines.iter_mut().map(|line| self.advance(line)).collect()
        };

        let mut counts = [0usize; 6];
        for line in &lines {
            writeln!(output, "{}", line.to_line())?;
            let idx = match line.status() {
                Legality::Legal => 0,
                Legality::Path => 1,
                Legality::Kernel => 2,
                Legality::Fail => 3,
                Legality::Illegal => 4,
                Legality::Initial => 5,
            };
            counts[idx] += 1;
        }
        if show_progress {
            println!(
                "legal: {} path: {} kernel: {} fail: {} illegal: {} time: {:.3}",
                counts[0],
                counts[1],
                counts[2],
                counts[3],
                counts[4],
                start_time.elapsed().as_secs_f64()
            );
        }
        Ok(work_flags.iter().any(|&w| w))
    }
}

/// Run the two-stage fallback ladder: an admissible search, then a
/// non-admissible retry seeded with the closest path on a quartered budget,
/// then a final halved retry from the original seed.
pub fn pg_search(
    start: Position,
    goal: Position,
    initial_path: Vec<Move>,
    opts: PgOptions,
    result: &mut PgResult,
) -> PgOutcome {
    pg_search_with(start, goal, initial_path, opts, true, result)
}

fn pg_search_with(
    start: Position,
    goal: Position,
    initial_path: Vec<Move>,
    mut opts: PgOptions,
    exact: bool,
    result: &mut PgResult,
) -> PgOutcome {
    {
        let mut pg = ProofGame::from_positions(start.clone(), goal.clone(), initial_path.clone());
        pg.set_exact_match(exact);
        let outcome = pg.search(&opts, result);
        if outcome != PgOutcome::BudgetExceeded || result.closest_path.is_empty() {
            return outcome;
        }
    }

    let mut tmp = PgResult::default();
    opts.max_nodes /= NON_ADMISSIBLE_BUDGET_DIV;
    opts.use_non_admissible = true;
    {
        let mut pg =
            ProofGame::from_positions(start.clone(), goal.clone(), result.closest_path.clone());
        pg.set_exact_match(exact);
        let outcome = pg.search(&opts, &mut tmp);
        result.num_nodes += tmp.num_nodes;
        if outcome == PgOutcome::Solved {
            result.proof = tmp.proof;
            return outcome;
        }
    }

    opts.max_nodes /= RETRY_BUDGET_DIV;
    let mut pg = ProofGame::from_positions(start, goal, initial_path);
    pg.set_exact_match(exact);
    let mut tmp = PgResult::default();
    let outcome = pg.search(&opts, &mut tmp);
    result.num_nodes += tmp.num_nodes;
    if outcome == PgOutcome::Solved {
        result.proof = tmp.proof;
    }
    outcome
}

/// Apply the extended kernel to a multi-board, collecting the board after
/// every move. Promoted pawns are materialized retroactively when a piece
/// moves off a promotion square that only ever held a pawn.
fn evolve_multiboards(init_pos: &Position, ext: &[ExtPkMove]) -> Result<Vec<MultiBoard>, ChessError> {
    let mut brd = MultiBoard::from_position(init_pos);
    let mut brd_vec = vec![brd.clone()];
    for m in ext {
        let white = m.color.is_white();
        let mut moving_piece = Piece::Empty;
        if let Some(from) = m.from {
            if let Some(pk) = m.piece {
                moving_piece = pk.to_piece(m.color);
                let pawn = Piece::make(m.color, PieceKind::Pawn);
                let last_rank = if white { 7 } else { 0 };
                if !brd.has_piece(from, moving_piece)
                    && from.rank() == last_rank
                    && brd.has_piece(from, pawn)
                {
                    // A promoted pawn: rewrite history so earlier boards
                    // already show the promoted piece.
                    if brd.replace_piece(from, pawn, moving_piece) {
                        for b in brd_vec.iter_mut().rev() {
                            if !b.replace_piece(from, pawn, moving_piece) {
                                break;
                            }
                        }
                    }
                }
                brd.remove_piece_type(from, moving_piece)?;
            }
        }

        if m.capture {
            let n = brd.n_pieces(m.to);
            let mut found = false;
            for i in (0..n).rev() {
                let p = brd.piece(m.to, i);
                if p.color() == Some(m.color.opponent()) {
                    brd.remove_piece_no(m.to, i);
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(ChessError::new(format!("No piece to capture on square {}", m.to)));
            }
        }

        let tgt = match m.promotion {
            Some(pk) => pk.to_piece(m.color),
            None => moving_piece,
        };
        if !tgt.is_empty() {
            brd.add_piece(m.to, tgt)?;
        }
        brd_vec.push(brd.clone());
    }
    Ok(brd_vec)
}

/// Write a collapsed multi-board onto `pos`, keeping its meta state.
fn board_onto_position(brd: &MultiBoard, pos: &mut Position) -> Result<(), ChessError> {
    let collapsed = brd.to_position()?;
    for sq in Square::all() {
        pos.set_piece(sq, collapsed.piece_on(sq));
    }
    Ok(())
}

/// Decide what each pawn reaching the last rank promotes to, so the goal
/// counts per piece type and bishop square color work out. A required
/// bishop promotion must be the last promotion in its file because the
/// bishop gets trapped after promoting.
fn decide_promotions(
    brd_vec: &mut [MultiBoard],
    init_pos: &Position,
    goal_pos: &Position,
) -> Result<(), ChessError> {
    let all_done = {
        let last = brd_vec.last().expect("at least the initial board");
        let mut done = true;
        for color in [Color::White, Color::Black] {
            let pawn = Piece::make(color, PieceKind::Pawn);
            let y = if color.is_white() { 7 } else { 0 };
            for x in 0..8 {
                if last.has_piece(Square::from_file_rank(x, y), pawn) {
                    done = false;
                }
            }
        }
        done
    };
    if all_done {
        return Ok(());
    }

    #[derive(Clone, Copy)]
    struct FileProm {
        n_avail: i32,
        bishop_allowed: bool,
        bishop_required: bool,
        bishop_type: PkPiece,
    }
    let empty = FileProm {
        n_avail: 0,
        bishop_allowed: false,
        bishop_required: false,
        bishop_type: PkPiece::Queen,
    };
    let mut fpi = [[empty; 2]; 8];

    // Pawns frozen on their start squares block neighboring promotions.
    let mut blocked_pawns = 0u64;
    for color in [Color::White, Color::Black] {
        let pawn = Piece::make(color, PieceKind::Pawn);
        let y = if color.is_white() { 1 } else { 6 };
        for x in 0..8 {
            let sq = Square::from_file_rank(x, y);
            if goal_pos.piece_on(sq) == pawn && init_pos.piece_on(sq) == pawn {
                blocked_pawns |= sq.bit();
            }
        }
    }
    let is_blocked = |x: i32, y: u8| {
        (0..8).contains(&x) && blocked_pawns & Square::from_file_rank(x as u8, y).bit() != 0
    };

    let last_brd_idx = brd_vec.len() - 1;
    for color in [Color::White, Color::Black] {
        let ci = color.index();
        let white = color.is_white();
        let pawn = Piece::make(color, PieceKind::Pawn);
        for x in 0..8u8 {
            let dark = Square::from_file_rank(x, if white { 7 } else { 0 }).is_dark();
            let f = &mut fpi[x as usize][ci];
            f.bishop_type = if dark { PkPiece::DarkBishop } else { PkPiece::LightBishop };

            let y = if white { 6 } else { 1 };
            let prom_blocked =
                (x == 0 || is_blocked(x as i32 - 1, y)) && (x == 7 || is_blocked(x as i32 + 1, y));
            if !prom_blocked {
                f.bishop_allowed = true;
                f.bishop_required = false;
            } else {
                let y = if white { 7 } else { 0 };
                let bishop = Piece::make(color, PieceKind::Bishop);
                let sq = Square::from_file_rank(x, y);
                let required = goal_pos.piece_on(sq) == bishop
                    && !brd_vec[last_brd_idx].has_piece(sq, bishop);
                f.bishop_required = required;
                f.bishop_allowed = required;
            }

            let mut avail = 0i32;
            for y in 0..8 {
                avail += brd_vec[last_brd_idx].n_pieces_of_type(Square::from_file_rank(x, y), pawn)
                    as i32;
            }
            avail -= (goal_pos.piece_bb(pawn) & bitboard::file_mask(x)).count_ones() as i32;
            f.n_avail = avail;
        }
    }

    // Promotions still needed per piece class and color.
    let mut needed = [[0i32; 2]; PkPiece::NUM];
    {
        let mut tmp = brd_vec[last_brd_idx].clone();
        tmp.expel()?;
        let last_pos = tmp.to_position()?;
        for pk in [PkPiece::Queen, PkPiece::Rook, PkPiece::DarkBishop, PkPiece::LightBishop, PkPiece::Knight] {
            for color in [Color::White, Color::Black] {
                let count = |pos: &Position| -> i32 {
                    let mut bb = pos.piece_bb(pk.to_piece(color));
                    match pk {
                        PkPiece::DarkBishop => bb &= bitboard::DARK_SQUARES,
                        PkPiece::LightBishop => bb &= bitboard::LIGHT_SQUARES,
                        _ => {}
                    }
                    bb.count_ones() as i32
                };
                needed[pk.index()][color.index()] = count(goal_pos) - count(&last_pos);
            }
        }
    }

    // Required bishop promotions first; they must be the last promotion of
    // their file.
    for color in [Color::White, Color::Black] {
        let ci = color.index();
        let white = color.is_white();
        let pawn = Piece::make(color, PieceKind::Pawn);
        let bishop = Piece::make(color, PieceKind::Bishop);
        let y = if white { 7 } else { 0 };
        for x in 0..8u8 {
            let f = fpi[x as usize][ci];
            if !f.bishop_required {
                continue;
            }
            let sq = Square::from_file_rank(x, y);
            if f.n_avail == brd_vec[last_brd_idx].n_pieces_of_type(sq, pawn) as i32 {
                for b in brd_vec.iter_mut().rev() {
                    let n_pawns = b.n_pieces_of_type(sq, pawn) as i32;
                    if n_pawns != f.n_avail {
                        break;
                    }
                    b.replace_piece(sq, pawn, bishop);
                }
            }
            needed[f.bishop_type.index()][ci] -= 1;
            let f = &mut fpi[x as usize][ci];
            f.n_avail -= 1;
            f.bishop_allowed = false;
            f.bishop_required = false;
        }
    }

    // Remaining pawns on the last rank: bishop if useful and allowed, then
    // knight, rook, queen.
    for color in [Color::White, Color::Black] {
        let ci = color.index();
        let white = color.is_white();
        let pawn = Piece::make(color, PieceKind::Pawn);
        let y = if white { 7 } else { 0 };
        for x in 0..8u8 {
            let sq = Square::from_file_rank(x, y);
            while brd_vec[last_brd_idx].has_piece(sq, pawn) {
                let f = &mut fpi[x as usize][ci];
                if f.n_avail <= 0 {
                    return Err(ChessError::new(format!("no promotion available on file {x}")));
                }
                f.n_avail -= 1;

                let prom = if f.bishop_allowed && needed[f.bishop_type.index()][ci] > 0 {
                    f.bishop_type
                } else if needed[PkPiece::Knight.index()][ci] > 0 {
                    PkPiece::Knight
                } else if needed[PkPiece::Rook.index()][ci] > 0 {
                    PkPiece::Rook
                } else {
                    PkPiece::Queen
                };
                needed[prom.index()][ci] -= 1;

                let piece = prom.to_piece(color);
                for b in brd_vec.iter_mut().rev() {
                    if !b.has_piece(sq, pawn) {
                        break;
                    }
                    b.replace_piece(sq, pawn, piece);
                }
            }
        }
    }
    Ok(())
}

/// Move home-rank pieces' blocking pawns forward so rooks, bishops, queens
/// and kings that must leave their start squares can get out.
fn free_pieces(brd_vec: &mut [MultiBoard], start_idx: usize, init_pos: &Position, goal_pos: &Position) {
    struct FreeData {
        piece: Piece,
        square: &'static str,
        pawn_targets: &'static [&'static str],
    }
    const DATA: &[FreeData] = &[
        FreeData { piece: Piece::WRook, square: "a1", pawn_targets: &["a4", "b4"] },
        FreeData { piece: Piece::WRook, square: "h1", pawn_targets: &["h4", "g4"] },
        FreeData { piece: Piece::WBishop, square: "c1", pawn_targets: &["d4", "b4", "d3", "b3"] },
        FreeData { piece: Piece::WBishop, square: "f1", pawn_targets: &["e4", "g4", "e3", "g3"] },
        FreeData { piece: Piece::WQueen, square: "d1", pawn_targets: &["e4", "d4", "c4", "e3", "d3", "c3"] },
        FreeData { piece: Piece::WKing, square: "e1", pawn_targets: &["e4", "d4", "f4", "e3", "d3", "f3"] },
        FreeData { piece: Piece::BRook, square: "a8", pawn_targets: &["a5", "b5"] },
        FreeData { piece: Piece::BRook, square: "h8", pawn_targets: &["h5", "g5"] },
        FreeData { piece: Piece::BBishop, square: "c8", pawn_targets: &["d5", "b5", "d6", "b6"] },
        FreeData { piece: Piece::BBishop, square: "f8", pawn_targets: &["e5", "g5", "e6", "g6"] },
        FreeData { piece: Piece::BQueen, square: "d8", pawn_targets: &["e5", "d5", "c5", "e6", "d6", "c6"] },
        FreeData { piece: Piece::BKing, square: "e8", pawn_targets: &["e5", "d5", "f5", "e6", "d6", "f6"] },
    ];

    let _ = init_pos;
    let n_brds = brd_vec.len();
    for d in DATA {
        let home = Square::from_str_coord(d.square).expect("static square");
        if brd_vec[start_idx].has_piece(home, d.piece) {
            continue;
        }
        let white = d.piece.is_white();
        for tgt in d.pawn_targets {
            let tgt_sq = Square::from_str_coord(tgt).expect("static square");
            let mut can_move =
                (start_idx..n_brds).all(|b| brd_vec[b].can_move_pawn(if white { Color::White } else { Color::Black }, tgt_sq));
            if can_move {
                // A goal pawn behind the target square must stay movable.
                let goal_pawns = goal_pos.piece_bb(if white { Piece::WPawn } else { Piece::BPawn });
                let mask = if white {
                    bitboard::south_fill(tgt_sq.bit() >> 8)
                } else {
                    bitboard::north_fill(tgt_sq.bit() << 8)
                };
                if goal_pawns & mask != 0 {
                    can_move = false;
                }
            }
            if can_move {
                let pawn = if white { Piece::WPawn } else { Piece::BPawn };
                let first = Square::from_file_rank(tgt_sq.file(), if white { 1 } else { 6 });
                let step: i16 = if white { 8 } else { -8 };
                let mut moved = false;
                for b in brd_vec.iter_mut().skip(start_idx) {
                    let mut sq = first.index() as i16;
                    while sq != tgt_sq.index() as i16 {
                        let s = Square::new(sq as u8);
                        if b.has_piece(s, pawn) {
                            let _ = b.remove_piece_type(s, pawn);
                            let _ = b.add_piece(tgt_sq, pawn);
                            moved = true;
                            break;
                        }
                        sq += step;
                    }
                }
                if moved {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_until_done(filter: &ProofGameFilter, line: &mut Line, max_rounds: usize) {
        for _ in 0..max_rounds {
            if !filter.advance(line) {
                return;
            }
            if matches!(line.status(), Legality::Legal | Legality::Illegal) {
                return;
            }
        }
    }

    #[test]
    fn line_parse_and_write() {
        let text = format!("{START_POS_FEN} unknown: kernel: wPc0xPb1 status: N=5000");
        let line = Line::parse(&text).unwrap();
        assert_eq!(line.fen, START_POS_FEN);
        assert!(line.has_token(Token::Unknown));
        assert_eq!(line.get(Token::Kernel).unwrap(), &vec!["wPc0xPb1".to_string()]);
        assert_eq!(line.status_int("N", 0), 5000);

        let out = line.to_line();
        let reparsed = Line::parse(&out).unwrap();
        assert_eq!(reparsed.get(Token::Kernel), line.get(Token::Kernel));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(Line::parse("too short").is_err());
        assert!(Line::parse(&format!("{START_POS_FEN} notatoken: x")).is_err());
        assert!(Line::parse(&format!("{START_POS_FEN} stray")).is_err());
    }

    #[test]
    fn status_transitions() {
        let mut line = Line::parse(START_POS_FEN).unwrap();
        assert_eq!(line.status(), Legality::Initial);
        line.token_data(Token::Unknown);
        line.token_data(Token::ExtKernel);
        assert_eq!(line.status(), Legality::Kernel);
        line.token_data(Token::Path);
        assert_eq!(line.status(), Legality::Path);
        line.token_data(Token::Fail);
        assert_eq!(line.status(), Legality::Fail);
        line.erase(Token::Fail);
        line.token_data(Token::Legal);
        line.token_data(Token::Proof);
        assert_eq!(line.status(), Legality::Legal);
        line.token_data(Token::Illegal);
        assert_eq!(line.status(), Legality::Illegal);
    }

    #[test]
    fn startpos_is_immediately_legal_with_empty_proof() {
        let filter = ProofGameFilter::new();
        let mut line = Line::parse(START_POS_FEN).unwrap();
        filter.advance(&mut line);
        assert_eq!(line.status(), Legality::Legal, "line: {}", line.to_line());
        assert!(line.get(Token::Proof).unwrap().is_empty());
    }

    #[test]
    fn one_ply_position_is_legal() {
        let filter = ProofGameFilter::new();
        let mut line =
            Line::parse("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1").unwrap();
        advance_until_done(&filter, &mut line, 10);
        assert_eq!(line.status(), Legality::Legal, "line: {}", line.to_line());
        assert_eq!(line.get(Token::Proof).unwrap(), &vec!["e4".to_string()]);
    }

    #[test]
    fn short_game_position_reaches_legal() {
        // After 1.e4 e5 2.Nf3: no captures, kernel is empty, and the proof
        // search has to find three plies.
        let filter = ProofGameFilter::new();
        let mut line = Line::parse(
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2",
        )
        .unwrap();
        advance_until_done(&filter, &mut line, 20);
        assert_eq!(line.status(), Legality::Legal, "line: {}", line.to_line());
        let proof = line.get(Token::Proof).unwrap().clone();

        // The proof must replay to the input position.
        let mut pos = Position::start();
        for san in &proof {
            let m = text::san_to_move(&pos, san).unwrap();
            pos.make_move(m);
        }
        let goal = Position::from_fen(&line.fen).unwrap();
        assert_eq!(pos.history_hash(), goal.history_hash());
    }

    #[test]
    fn impossible_bishops_are_illegal() {
        // Three dark-squared white bishops with every pawn at home.
        let filter = ProofGameFilter::new();
        let mut line = Line::parse(
            "rnbqkbnr/pppppppp/8/8/2B1B3/4B3/PPPPPPPP/RN1QK1NR w KQkq - 0 1",
        )
        .unwrap();
        advance_until_done(&filter, &mut line, 10);
        assert_eq!(line.status(), Legality::Illegal, "line: {}", line.to_line());
    }

    #[test]
    fn capture_position_reaches_legal() {
        // After 1.e4 d5 2.exd5: one capture, real kernel work.
        let filter = ProofGameFilter::new();
        let mut line = Line::parse(
            "rnbqkbnr/ppp1pppp/8/3P4/8/8/PPPP1PPP/RNBQKBNR b KQkq - 0 2",
        )
        .unwrap();
        advance_until_done(&filter, &mut line, 30);
        assert_eq!(line.status(), Legality::Legal, "line: {}", line.to_line());
    }

    #[test]
    fn iteration_runs_until_fixpoint() {
        let filter = ProofGameFilter::new();
        let input = format!(
            "{}\n{}\n",
            START_POS_FEN, "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1"
        );
        let mut cur = input.clone();
        let start = Instant::now();
        for _ in 0..20 {
            let mut out = Vec::new();
            let work = filter
                .run_one_iteration(cur.as_bytes(), &mut out, 1, false, start)
                .unwrap();
            cur = String::from_utf8(out).unwrap();
            if !work {
                break;
            }
        }
        for l in cur.lines() {
            let line = Line::parse(l).unwrap();
            assert_eq!(line.status(), Legality::Legal, "line: {l}");
        }
    }

    #[test]
    fn pg_search_ladder_budget_division() {
        // The ladder must not panic and must report accumulated node counts.
        let start = Position::start();
        let goal = Position::from_fen(
            "r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4",
        )
        .unwrap();
        let opts = PgOptions { weight_a: 1, weight_b: 5, max_nodes: 400, accept_first: true, use_non_admissible: false };
        let mut result = PgResult::default();
        let outcome = pg_search(start, goal, Vec::new(), opts, &mut result);
        if outcome == PgOutcome::BudgetExceeded {
            assert!(result.num_nodes >= 400);
        }
    }
}
