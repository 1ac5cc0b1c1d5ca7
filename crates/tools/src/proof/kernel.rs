//! Proof kernel: material-level analysis of what captures and promotions
//! could transform the initial army into the goal army.
//!
//! The absence of a proof kernel proves the goal position unreachable. The
//! presence of one does not prove reachability; the later pipeline stages
//! try to realize the kernel as actual moves.

use std::collections::HashSet;

use engine_core::error::NotImplementedError;
use engine_core::position::Position;
use engine_core::types::{Color, Piece, PieceKind, Square};

use super::{ExtPkMove, PkMove, PkPiece};

const NODE_BUDGET: u64 = 2_000_000;

/// All pawns on one file, ordered bottom (rank 1 side) to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PawnColumn {
    /// Bit i set: the i-th pawn is white.
    colors: u8,
    /// Bit i set: the i-th pawn never moves.
    blocked: u8,
    len: u8,
}

impl PawnColumn {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn color(&self, i: usize) -> Color {
        if self.colors & (1 << i) != 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    pub fn is_blocked(&self, i: usize) -> bool {
        self.blocked & (1 << i) != 0
    }

    pub fn push(&mut self, c: Color, blocked: bool) {
        self.insert(self.len(), c, blocked);
    }

    pub fn insert(&mut self, i: usize, c: Color, blocked: bool) {
        debug_assert!(i <= self.len());
        debug_assert!(self.len() < 6);
        let low = (1u8 << i) - 1;
        self.colors =
            (self.colors & low) | ((self.colors & !low) << 1) | ((c.is_white() as u8) << i);
        self.blocked =
            (self.blocked & low) | ((self.blocked & !low) << 1) | ((blocked as u8) << i);
        self.len += 1;
    }

    pub fn remove(&mut self, i: usize) {
        debug_assert!(i < self.len());
        let low = (1u8 << i) - 1;
        self.colors = (self.colors & low) | ((self.colors >> 1) & !low);
        self.blocked = (self.blocked & low) | ((self.blocked >> 1) & !low);
        self.len -= 1;
    }

    /// Number of pawns of `c` that could still promote on this file: the
    /// run of unblocked own pawns at the promotion end of the column.
    pub fn promotion_run(&self, c: Color) -> usize {
        let n = self.len();
        let mut count = 0;
        if c.is_white() {
            for i in (0..n).rev() {
                if self.color(i) != c || self.is_blocked(i) {
                    break;
                }
                count += 1;
            }
        } else {
            for i in 0..n {
                if self.color(i) != c || self.is_blocked(i) {
                    break;
                }
                count += 1;
            }
        }
        count
    }

    fn key(&self) -> u16 {
        ((self.len as u16) << 12) | ((self.blocked as u16) << 6) | self.colors as u16
    }
}

/// Per-file facts that never change during the search.
#[derive(Debug, Clone, Copy, Default)]
struct FileInfo {
    /// Is the promotion square dark, per color.
    prom_dark: [bool; 2],
    /// Can a pawn starting on this file promote by moving Left / Forward /
    /// Right, per color.
    can_promote: [[bool; 3]; 2],
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct StateKey {
    columns: [u16; 8],
    cnt: [[i8; PkPiece::NUM]; 2],
}

/// Search outcome.
#[derive(Debug, Clone)]
pub enum KernelResult {
    /// No kernel exists: the position is unreachable. The prefix is the
    /// deepest line examined, kept as a debugging aid.
    Fail { forced_prefix: Vec<PkMove> },
    /// A kernel exists but could not be pinned to squares.
    ProofKernel { kernel: Vec<PkMove> },
    /// Kernel and extended kernel both exist.
    ExtProofKernel { kernel: Vec<PkMove>, ext: Vec<ExtPkMove> },
}

pub struct ProofKernel {
    columns: [PawnColumn; 8],
    goal_columns: [PawnColumn; 8],
    cnt: [[i32; PkPiece::NUM]; 2],
    goal_cnt: [[i32; PkPiece::NUM]; 2],
    blocked_cnt: [[i32; PkPiece::NUM]; 2],
    file_info: [FileInfo; 8],
    init_pos: Position,
    goal_pos: Position,
    blocked_mask: u64,

    path: Vec<PkMove>,
    deepest: Vec<PkMove>,
    memo: HashSet<StateKey>,
    nodes: u64,
    found_kernel: Option<Vec<PkMove>>,
    result_ext: Option<(Vec<PkMove>, Vec<ExtPkMove>)>,
}

fn count_pieces(pos: &Position, blocked_mask: u64) -> ([[i32; PkPiece::NUM]; 2], [[i32; PkPiece::NUM]; 2]) {
    let mut cnt = [[0i32; PkPiece::NUM]; 2];
    let mut blocked = [[0i32; PkPiece::NUM]; 2];
    for sq in Square::all() {
        let p = pos.piece_on(sq);
        if let (Some(c), Some(pk)) = (p.color(), PkPiece::from_piece(p, sq)) {
            cnt[c.index()][pk.index()] += 1;
            if blocked_mask & sq.bit() != 0 {
                blocked[c.index()][pk.index()] += 1;
            }
        }
    }
    (cnt, blocked)
}

fn build_columns(pos: &Position, blocked_mask: u64) -> [PawnColumn; 8] {
    let mut columns: [PawnColumn; 8] = Default::default();
    for file in 0..8u8 {
        for rank in 1..7u8 {
            let sq = Square::from_file_rank(file, rank);
            match pos.piece_on(sq) {
                Piece::WPawn => columns[file as usize].push(Color::White, blocked_mask & sq.bit() != 0),
                Piece::BPawn => columns[file as usize].push(Color::Black, blocked_mask & sq.bit() != 0),
                _ => {}
            }
        }
    }
    columns
}

impl ProofKernel {
    pub fn new(init_pos: &Position, goal_pos: &Position, blocked_mask: u64) -> ProofKernel {
        let (cnt, blocked_cnt) = count_pieces(init_pos, blocked_mask);
        let (goal_cnt, _) = count_pieces(goal_pos, 0);
        let columns = build_columns(init_pos, blocked_mask);
        let goal_columns = build_columns(goal_pos, blocked_mask);

        let mut file_info = [FileInfo::default(); 8];
        for f in 0..8usize {
            let info = &mut file_info[f];
            // White promotes on rank 7 (index), black on rank 0.
            info.prom_dark[Color::White.index()] = Square::from_file_rank(f as u8, 7).is_dark();
            info.prom_dark[Color::Black.index()] = Square::from_file_rank(f as u8, 0).is_dark();
            for c in [Color::White, Color::Black] {
                let prom_rank: u8 = if c.is_white() { 7 } else { 0 };
                for (d, delta) in [(0usize, -1i32), (1, 0), (2, 1)] {
                    let tf = f as i32 + delta;
                    if !(0..8).contains(&tf) {
                        continue;
                    }
                    let prom_sq = Square::from_file_rank(tf as u8, prom_rank);
                    // Promotion is impossible when a never-moving piece owns
                    // the promotion square.
                    info.can_promote[c.index()][d] = blocked_mask & prom_sq.bit() == 0;
                }
            }
        }

        ProofKernel {
            columns,
            goal_columns,
            cnt,
            goal_cnt,
            blocked_cnt,
            file_info,
            init_pos: init_pos.clone(),
            goal_pos: goal_pos.clone(),
            blocked_mask,
            path: Vec::new(),
            deepest: Vec::new(),
            memo: HashSet::new(),
            nodes: 0,
            found_kernel: None,
            result_ext: None,
        }
    }

    /// Pieces known to never move between the initial and goal positions:
    /// pawns standing on the same square in both, and the king/rook homes of
    /// goal castle rights.
    pub fn compute_blocked(init_pos: &Position, goal_pos: &Position) -> u64 {
        let mut blocked = 0u64;
        for sq in Square::all() {
            let p = init_pos.piece_on(sq);
            if !p.is_empty() && p == goal_pos.piece_on(sq) && p.kind() == Some(PieceKind::Pawn) {
                blocked |= sq.bit();
            }
        }
        use engine_core::position::{A1_CASTLE, A8_CASTLE, H1_CASTLE, H8_CASTLE};
        let mask = goal_pos.castle_mask();
        if mask & (A1_CASTLE | H1_CASTLE) != 0 {
            blocked |= Square::E1.bit();
        }
        if mask & A1_CASTLE != 0 {
            blocked |= Square::A1.bit();
        }
        if mask & H1_CASTLE != 0 {
            blocked |= Square::H1.bit();
        }
        if mask & (A8_CASTLE | H8_CASTLE) != 0 {
            blocked |= Square::E8.bit();
        }
        if mask & A8_CASTLE != 0 {
            blocked |= Square::A8.bit();
        }
        if mask & H8_CASTLE != 0 {
            blocked |= Square::H8.bit();
        }
        blocked
    }

    #[inline]
    fn excess(&self, c: Color, p: PkPiece) -> i32 {
        self.cnt[c.index()][p.index()] - self.goal_cnt[c.index()][p.index()]
    }

    fn moves_left(&self) -> i32 {
        let mut total = 0;
        for c in 0..2 {
            for p in 0..PkPiece::NUM {
                total += self.cnt[c][p] - self.goal_cnt[c][p];
            }
        }
        total
    }

    /// Piece-takes-piece moves still owed: one per surplus non-pawn piece.
    fn needed_piece_takes_piece(&self) -> i32 {
        let mut n = 0;
        for c in [Color::White, Color::Black] {
            for p in PkPiece::ALL {
                if p != PkPiece::Pawn {
                    n += self.excess(c, p).max(0);
                }
            }
        }
        n
    }

    fn total_deficit(&self, c: Color) -> i32 {
        PkPiece::ALL
            .iter()
            .filter(|&&p| p != PkPiece::Pawn)
            .map(|&p| (-self.excess(c, p)).max(0))
            .sum()
    }

    /// Monotone feasibility conditions; once violated they stay violated.
    fn feasible(&self) -> bool {
        for c in [Color::White, Color::Black] {
            let pawn_excess = self.excess(c, PkPiece::Pawn);
            if pawn_excess < 0 {
                return false; // pawns cannot be created
            }
            if pawn_excess < self.total_deficit(c) {
                return false; // not enough pawns to promote
            }
        }
        true
    }

    /// Strip options for one file: numbers of white pawns promoting off the
    /// top and black pawns promoting off the bottom that leave exactly the
    /// goal pattern ("is-complete" patterns).
    fn column_strips(&self, f: usize) -> Vec<(usize, usize)> {
        let cur = &self.columns[f];
        let goal = &self.goal_columns[f];
        let max_w = if self.file_info[f].can_promote[Color::White.index()][1] {
            cur.promotion_run(Color::White)
        } else {
            0
        };
        let max_b = if self.file_info[f].can_promote[Color::Black.index()][1] {
            cur.promotion_run(Color::Black)
        } else {
            0
        };
        let mut out = Vec::new();
        for kw in 0..=max_w {
            for kb in 0..=max_b {
                if kw + kb > cur.len() || cur.len() - kw - kb != goal.len() {
                    continue;
                }
                let ok = (0..goal.len()).all(|i| {
                    cur.color(kb + i) == goal.color(i) && cur.is_blocked(kb + i) == goal.is_blocked(i)
                });
                if ok {
                    out.push((kw, kb));
                }
            }
        }
        out
    }

    /// Exact goal test once only piece-takes-piece moves remain: every pawn
    /// column must reduce to its goal pattern through promotions alone, and
    /// the promotion set must cover the piece deficits, bishops on the right
    /// square color.
    fn is_goal(&self) -> bool {
        for c in [Color::White, Color::Black] {
            if self.excess(c, PkPiece::Pawn) != self.total_deficit(c) {
                return false;
            }
        }
        self.match_columns(0, [0; 4]).is_some()
    }

    /// Recursively pick a strip option per file; `acc` accumulates promotion
    /// capacity as [white_dark, white_light, black_dark, black_light].
    /// Returns the chosen strips when the bishop deficits fit.
    fn match_columns(&self, f: usize, acc: [i32; 4]) -> Option<[(usize, usize); 8]> {
        if f == 8 {
            for c in [Color::White, Color::Black] {
                let need_dark = (-self.excess(c, PkPiece::DarkBishop)).max(0);
                let need_light = (-self.excess(c, PkPiece::LightBishop)).max(0);
                let dark = acc[c.index() * 2];
                let light = acc[c.index() * 2 + 1];
                if dark < need_dark || light < need_light {
                    return None;
                }
                // Colorless promotions must fit in the remaining capacity.
                if dark + light < self.total_deficit(c) {
                    return None;
                }
            }
            return Some([(0, 0); 8]);
        }
        for (kw, kb) in self.column_strips(f) {
            let mut acc = acc;
            if self.file_info[f].prom_dark[Color::White.index()] {
                acc[0] += kw as i32;
            } else {
                acc[1] += kw as i32;
            }
            if self.file_info[f].prom_dark[Color::Black.index()] {
                acc[2] += kb as i32;
            } else {
                acc[3] += kb as i32;
            }
            if let Some(mut strips) = self.match_columns(f + 1, acc) {
                strips[f] = (kw, kb);
                return Some(strips);
            }
        }
        None
    }

    fn state_key(&self) -> StateKey {
        let mut columns = [0u16; 8];
        for (k, col) in columns.iter_mut().zip(&self.columns) {
            *k = col.key();
        }
        let mut cnt = [[0i8; PkPiece::NUM]; 2];
        for c in 0..2 {
            for p in 0..PkPiece::NUM {
                cnt[c][p] = self.cnt[c][p] as i8;
            }
        }
        StateKey { columns, cnt }
    }

    fn movable_pawns(&self, f: usize, c: Color) -> Vec<usize> {
        let col = &self.columns[f];
        (0..col.len()).filter(|&i| col.color(i) == c && !col.is_blocked(i)).collect()
    }

    fn capturable(&self, c: Color, p: PkPiece) -> bool {
        self.cnt[c.index()][p.index()] - self.blocked_cnt[c.index()][p.index()] > 0
    }

    /// Promotion targets worth generating: piece types the mover still
    /// lacks, with bishops restricted to the right square color.
    fn promotion_choices(&self, c: Color, to_file: usize) -> Vec<PkPiece> {
        let mut out = Vec::new();
        let dark = self.file_info[to_file].prom_dark[c.index()];
        for p in [PkPiece::Queen, PkPiece::Rook, PkPiece::Knight] {
            if self.excess(c, p) < 0 {
                out.push(p);
            }
        }
        let bishop = if dark { PkPiece::DarkBishop } else { PkPiece::LightBishop };
        if self.excess(c, bishop) < 0 {
            out.push(bishop);
        }
        out
    }

    fn generate_moves(&self) -> Vec<PkMove> {
        let mut moves = Vec::new();
        for c in [Color::White, Color::Black] {
            let opp = c.opponent();

            // Piece takes pawn.
            for f in 0..8 {
                let col = &self.columns[f];
                for j in 0..col.len() {
                    if col.color(j) == opp && !col.is_blocked(j) {
                        moves.push(PkMove::PieceTakesPawn { color: c, to_file: f as u8, to_idx: j as u8 });
                    }
                }
            }

            for f in 0..8usize {
                for &i in &self.movable_pawns(f, c) {
                    for (dir_idx, delta) in [(0usize, -1i32), (2, 1)] {
                        let tf = f as i32 + delta;
                        if !(0..8).contains(&tf) {
                            continue;
                        }
                        let tf = tf as usize;
                        let tcol = &self.columns[tf];

                        // Pawn takes pawn.
                        for j in 0..tcol.len() {
                            if tcol.color(j) == opp && !tcol.is_blocked(j) {
                                moves.push(PkMove::PawnTakesPawn {
                                    color: c,
                                    from_file: f as u8,
                                    from_idx: i as u8,
                                    to_file: tf as u8,
                                    to_idx: j as u8,
                                });
                            }
                        }

                        // A pawn can only capture-promote with no pawn ahead
                        // of it in its own column.
                        let topmost = if c.is_white() {
                            i + 1 == self.columns[f].len()
                        } else {
                            i == 0
                        };
                        let may_promote =
                            topmost && self.file_info[f].can_promote[c.index()][dir_idx];

                        // Pawn takes piece, entering the column or promoting.
                        for t in [PkPiece::Queen, PkPiece::Rook, PkPiece::DarkBishop, PkPiece::LightBishop, PkPiece::Knight] {
                            if !self.capturable(opp, t) {
                                continue;
                            }
                            if tcol.len() < 6 {
                                for j in 0..=tcol.len() {
                                    moves.push(PkMove::PawnTakesPiece {
                                        color: c,
                                        from_file: f as u8,
                                        from_idx: i as u8,
                                        taken: t,
                                        to_file: tf as u8,
                                        to_idx: j as u8,
                                        promotion: None,
                                    });
                                }
                            }
                            if may_promote {
                                for p in self.promotion_choices(c, tf) {
                                    moves.push(PkMove::PawnTakesPiece {
                                        color: c,
                                        from_file: f as u8,
                                        from_idx: i as u8,
                                        taken: t,
                                        to_file: tf as u8,
                                        to_idx: 0,
                                        promotion: Some(p),
                                    });
                                }
                            }
                        }

                        // Pawn takes a piece born from an enemy promotion.
                        for pf in 0..8usize {
                            if self.columns[pf].promotion_run(opp) == 0
                                || !self.file_info[pf].can_promote[opp.index()][1]
                            {
                                continue;
                            }
                            if tcol.len() < 6 {
                                for j in 0..=tcol.len() {
                                    moves.push(PkMove::PawnTakesPromoted {
                                        color: c,
                                        from_file: f as u8,
                                        from_idx: i as u8,
                                        other_promotion_file: pf as u8,
                                        to_file: tf as u8,
                                        to_idx: j as u8,
                                        promotion: None,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        moves
    }

    fn apply(&mut self, m: PkMove) {
        match m {
            PkMove::PawnTakesPawn { color, from_file, from_idx, to_file, to_idx } => {
                let opp = color.opponent();
                self.columns[from_file as usize].remove(from_idx as usize);
                let mut to_idx = to_idx as usize;
                if from_file == to_file {
                    unreachable!("pawn captures change file");
                }
                self.columns[to_file as usize].remove(to_idx);
                // Capturer takes the victim's place in the target column.
                let to_col = &mut self.columns[to_file as usize];
                to_idx = to_idx.min(to_col.len());
                to_col.insert(to_idx, color, false);
                self.cnt[opp.index()][PkPiece::Pawn.index()] -= 1;
            }
            PkMove::PawnTakesPiece { color, from_file, from_idx, taken, to_file, to_idx, promotion } => {
                let opp = color.opponent();
                self.columns[from_file as usize].remove(from_idx as usize);
                self.cnt[opp.index()][taken.index()] -= 1;
                match promotion {
                    Some(p) => {
                        self.cnt[color.index()][PkPiece::Pawn.index()] -= 1;
                        self.cnt[color.index()][p.index()] += 1;
                    }
                    None => {
                        let col = &mut self.columns[to_file as usize];
                        col.insert((to_idx as usize).min(col.len()), color, false);
                    }
                }
            }
            PkMove::PawnTakesPromoted { color, from_file, from_idx, other_promotion_file, to_file, to_idx, promotion } => {
                let opp = color.opponent();
                // The enemy pawn leaves its column through promotion...
                let pf = other_promotion_file as usize;
                let col = &self.columns[pf];
                let promote_idx = if opp.is_white() { col.len() - 1 } else { 0 };
                self.columns[pf].remove(promote_idx);
                self.cnt[opp.index()][PkPiece::Pawn.index()] -= 1;
                // ...and the promoted piece is captured by our pawn. Account
                // for the shift when both pawns shared a file.
                let mut from_idx = from_idx as usize;
                if pf == from_file as usize && promote_idx < from_idx {
                    from_idx -= 1;
                }
                self.columns[from_file as usize].remove(from_idx);
                match promotion {
                    Some(p) => {
                        self.cnt[color.index()][PkPiece::Pawn.index()] -= 1;
                        self.cnt[color.index()][p.index()] += 1;
                    }
                    None => {
                        let col = &mut self.columns[to_file as usize];
                        col.insert((to_idx as usize).min(col.len()), color, false);
                    }
                }
            }
            PkMove::PieceTakesPawn { color, to_file, to_idx } => {
                let opp = color.opponent();
                self.columns[to_file as usize].remove(to_idx as usize);
                self.cnt[opp.index()][PkPiece::Pawn.index()] -= 1;
            }
            PkMove::PieceTakesPiece { color, taken } => {
                let opp = color.opponent();
                self.cnt[opp.index()][taken.index()] -= 1;
            }
        }
    }

    /// The trailing piece-takes-piece moves implied by residual surplus.
    fn residual_piece_captures(&self) -> Vec<PkMove> {
        let mut out = Vec::new();
        for c in [Color::White, Color::Black] {
            for p in PkPiece::ALL {
                if p == PkPiece::Pawn {
                    continue;
                }
                for _ in 0..self.excess(c, p).max(0) {
                    out.push(PkMove::PieceTakesPiece { color: c.opponent(), taken: p });
                }
            }
        }
        out
    }

    fn dfs(&mut self) -> bool {
        self.nodes += 1;
        if self.nodes > NODE_BUDGET {
            return false;
        }
        if !self.feasible() {
            return false;
        }
        let moves_left = self.moves_left();
        let needed_pxp = self.needed_piece_takes_piece();
        if needed_pxp > moves_left {
            return false;
        }
        if moves_left == needed_pxp {
            if self.is_goal() {
                let mut kernel = self.path.clone();
                kernel.extend(self.residual_piece_captures());
                self.found_kernel = Some(kernel.clone());
                // Kernel found; accept it only if squares can be assigned.
                if let Some(ext) = super::sequence::build_ext_kernel(
                    &kernel,
                    &self.init_pos,
                    self.blocked_mask,
                    &self.goal_pos,
                ) {
                    self.result_ext = Some((kernel, ext));
                    return true;
                }
            }
            return false;
        }

        let key = self.state_key();
        if self.memo.contains(&key) {
            return false;
        }

        let saved_columns = self.columns;
        let saved_cnt = self.cnt;
        for m in self.generate_moves() {
            self.apply(m);
            self.path.push(m);
            if self.path.len() > self.deepest.len() {
                self.deepest = self.path.clone();
            }
            if self.dfs() {
                return true;
            }
            self.path.pop();
            self.columns = saved_columns;
            self.cnt = saved_cnt;
        }
        self.memo.insert(key);
        false
    }

    /// Run the kernel search.
    pub fn find_proof_kernel(&mut self) -> Result<KernelResult, NotImplementedError> {
        self.nodes = 0;
        self.path.clear();
        self.deepest.clear();
        self.memo.clear();
        self.found_kernel = None;
        self.result_ext = None;

        let solved = self.dfs();
        if self.nodes > NODE_BUDGET {
            return Err(NotImplementedError::new("proof kernel search budget exceeded"));
        }
        if solved {
            let (kernel, ext) = self.result_ext.take().expect("set on success");
            return Ok(KernelResult::ExtProofKernel { kernel, ext });
        }
        if let Some(kernel) = self.found_kernel.take() {
            return Ok(KernelResult::ProofKernel { kernel });
        }
        Ok(KernelResult::Fail { forced_prefix: std::mem::take(&mut self.deepest) })
    }

    /// Apply a kernel to a material inventory; test oracle for the invariant
    /// that a successful kernel reaches exactly the goal counts.
    pub fn replay_counts(init: &Position, kernel: &[PkMove]) -> [[i32; PkPiece::NUM]; 2] {
        let (mut cnt, _) = count_pieces(init, 0);
        for m in kernel {
            match *m {
                PkMove::PawnTakesPawn { color, .. } => {
                    cnt[color.opponent().index()][PkPiece::Pawn.index()] -= 1;
                }
                PkMove::PawnTakesPiece { color, taken, promotion, .. } => {
                    cnt[color.opponent().index()][taken.index()] -= 1;
                    if let Some(p) = promotion {
                        cnt[color.index()][PkPiece::Pawn.index()] -= 1;
                        cnt[color.index()][p.index()] += 1;
                    }
                }
                PkMove::PawnTakesPromoted { color, promotion, .. } => {
                    cnt[color.opponent().index()][PkPiece::Pawn.index()] -= 1;
                    if let Some(p) = promotion {
                        cnt[color.index()][PkPiece::Pawn.index()] -= 1;
                        cnt[color.index()][p.index()] += 1;
                    }
                }
                PkMove::PieceTakesPawn { color, .. } => {
                    cnt[color.opponent().index()][PkPiece::Pawn.index()] -= 1;
                }
                PkMove::PieceTakesPiece { color, taken } => {
                    cnt[color.opponent().index()][taken.index()] -= 1;
                }
            }
        }
        cnt
    }

    pub fn goal_counts(&self) -> &[[i32; PkPiece::NUM]; 2] {
        &self.goal_cnt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::position::START_POS_FEN;

    fn kernel_for(goal_fen: &str) -> (ProofKernel, KernelResult) {
        let init = Position::from_fen(START_POS_FEN).unwrap();
        let goal = Position::from_fen(goal_fen).unwrap();
        let blocked = ProofKernel::compute_blocked(&init, &goal);
        let mut pk = ProofKernel::new(&init, &goal, blocked);
        let res = pk.find_proof_kernel().unwrap();
        (pk, res)
    }

    #[test]
    fn start_to_start_is_trivially_solved() {
        let (_, res) = kernel_for(START_POS_FEN);
        match res {
            KernelResult::ExtProofKernel { kernel, ext } => {
                assert!(kernel.is_empty());
                assert!(ext.is_empty());
            }
            other => panic!("expected empty kernel, got {other:?}"),
        }
    }

    #[test]
    fn simple_capture_position_has_kernel() {
        // After 1.e4 d5 2.exd5: white pawn from e file captured on d5.
        let (_, res) = kernel_for("rnbqkbnr/ppp1pppp/8/3P4/8/8/PPPP1PPP/RNBQKBNR b KQkq - 0 2");
        match res {
            KernelResult::ExtProofKernel { kernel, .. } => {
                assert_eq!(kernel.len(), 1);
                match kernel[0] {
                    PkMove::PawnTakesPawn { color: Color::White, .. } => {}
                    ref other => panic!("expected white pawn takes pawn, got {other}"),
                }
            }
            other => panic!("expected kernel, got {other:?}"),
        }
    }

    #[test]
    fn three_same_color_bishops_is_illegal() {
        // Three white dark-squared bishops with all pawns still at home:
        // no promotion can have happened, so no kernel exists.
        let (_, res) = kernel_for("rnbqkbnr/pppppppp/8/8/2B1B3/4B3/PPPPPPPP/RN1QK1NR w KQkq - 0 1");
        assert!(matches!(res, KernelResult::Fail { .. }), "got {res:?}");
    }

    #[test]
    fn promotion_kernel_found_when_material_needs_it() {
        // White's a-pawn promoted to a queen; black lost the a8 rook and the
        // a7 pawn, white lost a rook. The kernel must clear the a file and
        // leave the promotion to the final strip.
        let (_, res) = kernel_for("1nbqkbnr/1ppppppp/8/8/8/8/1PPPPPPP/QNBQKBNR w K - 0 1");
        match res {
            KernelResult::ExtProofKernel { kernel, .. } | KernelResult::ProofKernel { kernel } => {
                assert!(!kernel.is_empty());
                assert!(kernel.iter().any(|m| matches!(
                    m,
                    PkMove::PieceTakesPawn { color: Color::White, to_file: 0, .. }
                )));
                // Two residual piece-for-piece trades: one rook each way.
                let pxp = kernel
                    .iter()
                    .filter(|m| matches!(m, PkMove::PieceTakesPiece { taken: PkPiece::Rook, .. }))
                    .count();
                assert_eq!(pxp, 2);
            }
            other => panic!("expected kernel, got {other:?}"),
        }
    }

    #[test]
    fn promotion_blocked_by_castle_rights_fails() {
        // Same material picture, but black keeps its army and long castling:
        // the a8 square can never host a white promotion, so no realizable
        // plan exists; at best an abstract kernel without square assignment.
        let (_, res) = kernel_for("rnbqkbnr/1ppppppp/8/8/8/8/1PPPPPPP/QNBQKBNR w Kq - 0 1");
        assert!(
            !matches!(res, KernelResult::ExtProofKernel { .. }),
            "unreachable position got an extended kernel: {res:?}"
        );
    }

    #[test]
    fn replay_counts_match_goal_on_success() {
        let goal_fen = "rnbqkbnr/ppp1pppp/8/3P4/8/8/PPPP1PPP/RNBQKBNR b KQkq - 0 2";
        let (pk, res) = kernel_for(goal_fen);
        let KernelResult::ExtProofKernel { kernel, .. } = res else {
            panic!("no kernel");
        };
        let counts = ProofKernel::replay_counts(&Position::from_fen(START_POS_FEN).unwrap(), &kernel);
        let goal = pk.goal_counts();
        for c in 0..2 {
            for p in 0..PkPiece::NUM {
                // Deficits are filled by promotions, which replay_counts
                // does not perform for final (non-capture) promotions; for
                // this capture-only kernel the counts match exactly.
                assert_eq!(counts[c][p], goal[c][p], "c={c} p={p}");
            }
        }
    }

    #[test]
    fn pawn_column_insert_remove() {
        let mut col = PawnColumn::default();
        col.push(Color::White, false);
        col.push(Color::Black, false);
        col.insert(1, Color::White, true);
        assert_eq!(col.len(), 3);
        assert_eq!(col.color(0), Color::White);
        assert_eq!(col.color(1), Color::White);
        assert!(col.is_blocked(1));
        assert_eq!(col.color(2), Color::Black);
        col.remove(1);
        assert_eq!(col.len(), 2);
        assert_eq!(col.color(1), Color::Black);
        assert!(!col.is_blocked(1));
    }

    #[test]
    fn promotion_run_counts_top_pawns() {
        let mut col = PawnColumn::default();
        col.push(Color::Black, false);
        col.push(Color::White, false);
        col.push(Color::White, false);
        assert_eq!(col.promotion_run(Color::White), 2);
        assert_eq!(col.promotion_run(Color::Black), 1);
        // A blocked pawn interrupts the run.
        let mut col = PawnColumn::default();
        col.push(Color::White, true);
        col.push(Color::White, false);
        assert_eq!(col.promotion_run(Color::White), 1);
    }

    #[test]
    fn blocked_pieces_cover_castling_and_fixed_pawns() {
        let init = Position::from_fen(START_POS_FEN).unwrap();
        let goal = Position::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap();
        let blocked = ProofKernel::compute_blocked(&init, &goal);
        assert_ne!(blocked & Square::E1.bit(), 0);
        assert_ne!(blocked & Square::A8.bit(), 0);
        assert_ne!(blocked & Square::from_str_coord("e2").unwrap().bit(), 0);
    }
}
