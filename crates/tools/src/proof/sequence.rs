//! Extended kernel construction and scheduling.
//!
//! `build_ext_kernel` pins a kernel's abstract moves to squares, producing
//! a sequence of `ExtPkMove`s. `PkSequence::improve` then repairs that
//! sequence: pawn moves are split into single steps, piece moves are
//! expanded into step paths around blockers, unknown piece identities are
//! assigned, and moves are reordered along a dependency graph when a path
//! is blocked.

use engine_core::position::Position;
use engine_core::types::{Color, Piece, PieceKind, Square};
use smallvec::SmallVec;

use super::shortest_path::{shortest_paths, ShortestPathData};
use super::{ExtPkMove, PkMove, PkPiece};

// ---------------------------------------------------------------------------
// Square-level kernel replay.

type SqColumn = SmallVec<[(Color, u8); 6]>; // (owner, rank), bottom to top

/// Pawn columns with concrete squares.
#[derive(Clone, Default)]
struct SqColumns {
    cols: [SqColumn; 8],
}

impl SqColumns {
    fn from_position(pos: &Position) -> SqColumns {
        let mut sc = SqColumns::default();
        for file in 0..8u8 {
            for rank in 1..7u8 {
                match pos.piece_on(Square::from_file_rank(file, rank)) {
                    Piece::WPawn => sc.cols[file as usize].push((Color::White, rank)),
                    Piece::BPawn => sc.cols[file as usize].push((Color::Black, rank)),
                    _ => {}
                }
            }
        }
        sc
    }

    /// Clear straight path for the pawn at `(file, from_rank)` moving to
    /// `to_rank` (exclusive of the start, inclusive of the target).
    fn path_clear(&self, file: usize, from_rank: u8, to_rank: u8) -> bool {
        let (lo, hi) = if from_rank < to_rank { (from_rank + 1, to_rank) } else { (to_rank, from_rank - 1) };
        self.cols[file].iter().all(|&(_, r)| r < lo || r > hi)
    }

    /// Advance a pawn within its column; the order of entries is invariant
    /// because pawns never pass each other.
    fn advance(&mut self, file: usize, idx: usize, to_rank: u8) {
        self.cols[file][idx].1 = to_rank;
    }
}

/// Insertion window: ranks strictly between the neighbors of slot `idx`
/// once `removed` (if any) is taken out.
fn rank_window(col: &[(Color, u8)], idx: usize) -> (u8, u8) {
    let lo = if idx == 0 { 0 } else { col[idx - 1].1 };
    let hi = if idx >= col.len() { 7 } else { col[idx].1 };
    (lo, hi)
}

struct ExtBuilder {
    sc: SqColumns,
    out: Vec<ExtPkMove>,
}

impl ExtBuilder {
    /// Emit the advance (if needed) and the diagonal capture for a pawn of
    /// `color` at column slot `(file, idx)` capturing on `(to_file, to_rank)`.
    fn pawn_capture(
        &mut self,
        color: Color,
        file: usize,
        idx: usize,
        to_file: usize,
        to_rank: u8,
        promotion: Option<PkPiece>,
    ) -> Option<Square> {
        let (_, cur_rank) = self.sc.cols[file][idx];
        let step: i16 = if color.is_white() { 1 } else { -1 };
        let need_rank = (to_rank as i16 - step) as u8;
        if need_rank != cur_rank {
            // Pawns cannot retreat.
            let forward_ok = if color.is_white() { need_rank > cur_rank } else { need_rank < cur_rank };
            if !forward_ok || !self.sc.path_clear(file, cur_rank, need_rank) {
                return None;
            }
            self.out.push(ExtPkMove::new(
                color,
                Some(PkPiece::Pawn),
                Some(Square::from_file_rank(file as u8, cur_rank)),
                false,
                Square::from_file_rank(file as u8, need_rank),
                None,
            ));
            self.sc.advance(file, idx, need_rank);
        }
        let to = Square::from_file_rank(to_file as u8, to_rank);
        self.out.push(ExtPkMove::new(
            color,
            Some(PkPiece::Pawn),
            Some(Square::from_file_rank(file as u8, need_rank)),
            true,
            to,
            promotion,
        ));
        self.sc.cols[file].remove(idx);
        Some(to)
    }

    /// Pick a capture rank for a pawn entering `to_file` at slot `to_idx`.
    fn choose_entry_rank(&self, color: Color, file: usize, idx: usize, to_file: usize, to_idx: usize) -> Option<u8> {
        let (_, cur_rank) = self.sc.cols[file][idx];
        let (lo, hi) = rank_window(&self.sc.cols[to_file], to_idx);
        let step: i16 = if color.is_white() { 1 } else { -1 };
        // Candidate capture ranks, nearest first.
        let mut r = cur_rank as i16 + step;
        while (1..=6).contains(&r) {
            let rr = r as u8;
            if rr > lo && rr < hi && self.sc.path_clear(file, cur_rank, (r - step) as u8) {
                return Some(rr);
            }
            if color.is_white() && rr >= hi {
                break;
            }
            if !color.is_white() && rr <= lo {
                break;
            }
            r += step;
        }
        None
    }
}

/// Turn a kernel into an extended kernel with concrete squares, or report
/// that no square assignment exists for this kernel.
pub fn build_ext_kernel(
    kernel: &[PkMove],
    init_pos: &Position,
    blocked_mask: u64,
    goal_pos: &Position,
) -> Option<Vec<ExtPkMove>> {
    let mut b = ExtBuilder { sc: SqColumns::from_position(init_pos), out: Vec::new() };

    for m in kernel {
        match *m {
            PkMove::PawnTakesPawn { color, from_file, from_idx, to_file, to_idx } => {
                let (f, i, tf, ti) =
                    (from_file as usize, from_idx as usize, to_file as usize, to_idx as usize);
                let (vict_color, vict_rank) = *b.sc.cols[tf].get(ti)?;
                if vict_color == color {
                    return None;
                }
                let step: i16 = if color.is_white() { 1 } else { -1 };
                let (_, cur_rank) = *b.sc.cols[f].get(i)?;
                // Try to capture the victim where it stands, else advance it.
                let mut capture_rank = None;
                let mut r = vict_rank as i16;
                loop {
                    if !(1..=6).contains(&r) {
                        break;
                    }
                    let need = (r - step) as u8;
                    let fwd_ok = if color.is_white() { need >= cur_rank } else { need <= cur_rank };
                    let victim_can = b.sc.path_clear(tf, vict_rank, r as u8) || r as u8 == vict_rank;
                    if fwd_ok && victim_can && b.sc.path_clear(f, cur_rank, need) {
                        capture_rank = Some(r as u8);
                        break;
                    }
                    // Victims walk toward the capturer.
                    r -= step;
                }
                let cr = capture_rank?;
                if cr != vict_rank {
                    b.out.push(ExtPkMove::new(
                        vict_color,
                        Some(PkPiece::Pawn),
                        Some(Square::from_file_rank(tf as u8, vict_rank)),
                        false,
                        Square::from_file_rank(tf as u8, cr),
                        None,
                    ));
                    b.sc.advance(tf, ti, cr);
                }
                b.sc.cols[tf].remove(ti);
                let to = b.pawn_capture(color, f, i, tf, cr, None)?;
                // The capturer joins the target column at the victim's slot.
                b.sc.cols[tf].insert(ti.min(b.sc.cols[tf].len()), (color, to.rank()));
            }
            PkMove::PawnTakesPiece { color, from_file, from_idx, taken, to_file, to_idx, promotion } => {
                let (f, i, tf, ti) =
                    (from_file as usize, from_idx as usize, to_file as usize, to_idx as usize);
                let to_rank = match promotion {
                    Some(_) => {
                        if color.is_white() {
                            7
                        } else {
                            0
                        }
                    }
                    None => b.choose_entry_rank(color, f, i, tf, ti)?,
                };
                let to = Square::from_file_rank(tf as u8, to_rank);
                // The victim piece arrives on the capture square first.
                b.out.push(ExtPkMove::new(
                    color.opponent(),
                    Some(taken),
                    None,
                    false,
                    to,
                    None,
                ));
                let to = b.pawn_capture(color, f, i, tf, to_rank, promotion)?;
                if promotion.is_none() {
                    b.sc.cols[tf].insert(ti.min(b.sc.cols[tf].len()), (color, to.rank()));
                }
            }
            PkMove::PawnTakesPromoted {
                color,
                from_file,
                from_idx,
                other_promotion_file,
                to_file,
                to_idx,
                promotion,
            } => {
                let (f, i, tf, ti) =
                    (from_file as usize, from_idx as usize, to_file as usize, to_idx as usize);
                let opp = color.opponent();
                let pf = other_promotion_file as usize;
                // The enemy pawn runs to promotion first.
                let pidx = if opp.is_white() { b.sc.cols[pf].len().checked_sub(1)? } else { 0 };
                let (pc, prank) = *b.sc.cols[pf].get(pidx)?;
                if pc != opp {
                    return None;
                }
                let prom_rank: u8 = if opp.is_white() { 7 } else { 0 };
                let step_ok = b.sc.path_clear(pf, prank, if opp.is_white() { 6 } else { 1 });
                if !step_ok {
                    return None;
                }
                let prom_sq = Square::from_file_rank(pf as u8, prom_rank);
                b.out.push(ExtPkMove::new(
                    opp,
                    Some(PkPiece::Pawn),
                    Some(Square::from_file_rank(pf as u8, prank)),
                    false,
                    prom_sq,
                    Some(PkPiece::Knight),
                ));
                b.sc.cols[pf].remove(pidx);
                let i = if pf == f && pidx < i { i - 1 } else { i };

                let to_rank = match promotion {
                    Some(_) => {
                        if color.is_white() {
                            7
                        } else {
                            0
                        }
                    }
                    None => b.choose_entry_rank(color, f, i, tf, ti)?,
                };
                let to = Square::from_file_rank(tf as u8, to_rank);
                // The fresh piece travels to its doom.
                b.out.push(ExtPkMove::new(opp, Some(PkPiece::Knight), Some(prom_sq), false, to, None));
                let to = b.pawn_capture(color, f, i, tf, to_rank, promotion)?;
                if promotion.is_none() {
                    b.sc.cols[tf].insert(ti.min(b.sc.cols[tf].len()), (color, to.rank()));
                }
            }
            PkMove::PieceTakesPawn { color, to_file, to_idx } => {
                let (tf, ti) = (to_file as usize, to_idx as usize);
                let &(vict_color, vict_rank) = b.sc.cols[tf].get(ti)?;
                if vict_color == color {
                    return None;
                }
                b.out.push(ExtPkMove::new(
                    color,
                    None,
                    None,
                    true,
                    Square::from_file_rank(tf as u8, vict_rank),
                    None,
                ));
                b.sc.cols[tf].remove(ti);
            }
            PkMove::PieceTakesPiece { color, taken } => {
                let victim_sq = pick_victim_square(goal_pos, init_pos, blocked_mask, color.opponent(), taken)?;
                b.out.push(ExtPkMove::new(color, None, None, true, victim_sq, None));
            }
        }
    }

    // Final promotions: surplus pawns walk to the last rank; the promotion
    // piece is decided later, when the whole line is known.
    let goal_sc = SqColumns::from_position(goal_pos);
    for f in 0..8usize {
        let cur = b.sc.cols[f].clone();
        let goal = &goal_sc.cols[f];
        let cur_pat: Vec<Color> = cur.iter().map(|&(c, _)| c).collect();
        let goal_pat: Vec<Color> = goal.iter().map(|&(c, _)| c).collect();
        let (kw, kb) = strip_counts(&cur_pat, &goal_pat)?;
        // White promotions, outermost pawn first.
        for n in 0..kw {
            let idx = cur.len() - 1 - n;
            let (c, r) = cur[idx];
            debug_assert!(c.is_white());
            b.out.push(ExtPkMove::new(
                Color::White,
                Some(PkPiece::Pawn),
                Some(Square::from_file_rank(f as u8, r)),
                false,
                Square::from_file_rank(f as u8, 7),
                None,
            ));
        }
        for n in 0..kb {
            let (c, r) = cur[n];
            debug_assert!(!c.is_white());
            b.out.push(ExtPkMove::new(
                Color::Black,
                Some(PkPiece::Pawn),
                Some(Square::from_file_rank(f as u8, r)),
                false,
                Square::from_file_rank(f as u8, 0),
                None,
            ));
        }
    }

    Some(b.out)
}

/// Strip counts turning `cur` into `goal` by removing white pawns from the
/// top and black pawns from the bottom.
fn strip_counts(cur: &[Color], goal: &[Color]) -> Option<(usize, usize)> {
    if cur.len() < goal.len() {
        return None;
    }
    for kb in 0..=(cur.len() - goal.len()) {
        let kw = cur.len() - goal.len() - kb;
        if cur[..kb].iter().all(|c| !c.is_white())
            && cur[cur.len() - kw..].iter().all(|c| c.is_white())
            && cur[kb..cur.len() - kw] == *goal
        {
            return Some((kw, kb));
        }
    }
    None
}

/// Square where a surplus piece of `color`/`taken` gets captured: prefer a
/// home square the piece type owns, excluding blocked squares; ambiguity is
/// broken toward the queenside.
fn pick_victim_square(
    goal_pos: &Position,
    init_pos: &Position,
    blocked_mask: u64,
    color: Color,
    taken: PkPiece,
) -> Option<Square> {
    let piece = taken.to_piece(color);
    let back: u8 = if color.is_white() { 0 } else { 7 };
    let mut candidates: Vec<Square> = Vec::new();
    for file in 0..8u8 {
        let sq = Square::from_file_rank(file, back);
        if init_pos.piece_on(sq) == piece && blocked_mask & sq.bit() == 0 {
            // Pieces still required on their home square in the goal must
            // not be sacrificed.
            if goal_pos.piece_on(sq) != piece {
                candidates.push(sq);
            }
        }
    }
    if let Some(&sq) = candidates.first() {
        if taken == PkPiece::DarkBishop || taken == PkPiece::LightBishop {
            let want_dark = taken == PkPiece::DarkBishop;
            return candidates.into_iter().find(|s| s.is_dark() == want_dark);
        }
        return Some(sq);
    }
    None
}

// ---------------------------------------------------------------------------
// Scheduling: the dependency graph and its repairs.

#[derive(Clone)]
struct MoveData {
    id: usize,
    mv: ExtPkMove,
    pseudo_legal: bool,
    depends_on: Vec<usize>,
}

#[derive(Clone, Default)]
struct Graph {
    nodes: Vec<MoveData>,
    next_id: usize,
}

impl Graph {
    fn add_node(&mut self, mv: ExtPkMove) {
        let id = self.next_id;
        self.next_id += 1;
        let mut md = MoveData { id, mv, pseudo_legal: false, depends_on: Vec::new() };

        if mv.piece == Some(PkPiece::Pawn) {
            md.pseudo_legal = true;
            if mv.capture && !self.nodes.is_empty() {
                let prev = &self.nodes[self.nodes.len() - 1];
                if mv.to == prev.mv.to {
                    md.depends_on.push(prev.id);
                }
            }
            if let Some(from) = mv.from {
                let mask = from.bit() | mv.to.bit();
                for prev in self.nodes.iter().rev() {
                    if prev.mv.piece == Some(PkPiece::Pawn) {
                        let pmask = prev.mv.from.map_or(0, |s| s.bit()) | prev.mv.to.bit();
                        if mask & pmask != 0 {
                            md.depends_on.push(prev.id);
                        }
                    }
                }
            }
        }
        self.nodes.push(md);
    }

    fn replace_node(&mut self, idx: usize, moves: &[ExtPkMove]) {
        if moves.is_empty() {
            self.nodes.remove(idx);
            return;
        }
        let old_id = self.nodes[idx].id;
        let depends_on = self.nodes[idx].depends_on.clone();

        let first_id = self.next_id;
        self.next_id += 1;
        self.nodes[idx] =
            MoveData { id: first_id, mv: moves[0], pseudo_legal: true, depends_on };

        let mut prev_id = first_id;
        let mut insert_at = idx + 1;
        for &mv in &moves[1..] {
            let id = self.next_id;
            self.next_id += 1;
            self.nodes.insert(
                insert_at,
                MoveData { id, mv, pseudo_legal: true, depends_on: vec![prev_id] },
            );
            prev_id = id;
            insert_at += 1;
        }

        // Dependencies on the replaced node now hang off its last piece.
        for md in &mut self.nodes {
            for d in &mut md.depends_on {
                if *d == old_id {
                    *d = prev_id;
                }
            }
        }
    }

    /// Depth-first topological sort; false when the dependencies cycle.
    fn topo_sort(&mut self) -> bool {
        let n = self.nodes.len();
        let mut id_to_idx = vec![usize::MAX; self.next_id];
        for (i, md) in self.nodes.iter().enumerate() {
            id_to_idx[md.id] = i;
        }
        let mut visited = vec![false; n];
        let mut on_path = vec![false; n];
        let mut result: Vec<MoveData> = Vec::with_capacity(n);
        for i in 0..n {
            if !self.sort_rec(i, &mut visited, &mut on_path, &id_to_idx, &mut result) {
                return false;
            }
        }
        self.nodes = result;
        true
    }

    fn sort_rec(
        &self,
        i: usize,
        visited: &mut [bool],
        on_path: &mut [bool],
        id_to_idx: &[usize],
        result: &mut Vec<MoveData>,
    ) -> bool {
        if on_path[i] {
            return false;
        }
        if visited[i] {
            return true;
        }
        visited[i] = true;
        on_path[i] = true;
        for &dep in &self.nodes[i].depends_on {
            let j = id_to_idx[dep];
            if j != usize::MAX && !self.sort_rec(j, visited, on_path, id_to_idx, result) {
                return false;
            }
        }
        on_path[i] = false;
        result.push(self.nodes[i].clone());
        true
    }
}

/// Apply an extended move to a square-accurate position. The side to move is
/// not tracked here; the proof-game search interleaves real tempo later.
fn apply_ext(pos: &mut Position, m: &ExtPkMove) -> bool {
    let Some(from) = m.from else {
        return false;
    };
    let p = pos.piece_on(from);
    if p.is_empty() || p.color() != Some(m.color) {
        return false;
    }
    let target = pos.piece_on(m.to);
    if m.capture {
        if target.is_empty() || target.color() == Some(m.color) {
            return false;
        }
    } else if !target.is_empty() {
        return false;
    }
    pos.set_piece(from, Piece::Empty);
    let placed = match m.promotion {
        Some(pk) => pk.to_piece(m.color),
        None => p,
    };
    pos.set_piece(m.to, placed);
    true
}

pub struct PkSequence {
    ext: Vec<ExtPkMove>,
    init_pos: Position,
    goal_pos: Position,
}

impl PkSequence {
    pub fn new(ext: Vec<ExtPkMove>, init_pos: &Position, goal_pos: &Position) -> PkSequence {
        PkSequence { ext, init_pos: init_pos.clone(), goal_pos: goal_pos.clone() }
    }

    pub fn moves(&self) -> &[ExtPkMove] {
        &self.ext
    }

    pub fn into_moves(self) -> Vec<ExtPkMove> {
        self.ext
    }

    /// Improve the sequence into single-step, square-consistent moves.
    pub fn improve(&mut self) {
        if self.ext.is_empty() {
            return;
        }
        self.split_pawn_moves();

        let mut graph = Graph::default();
        for &m in &self.ext {
            graph.add_node(m);
        }
        let pos = self.init_pos.clone();
        if self.improve_kernel(&mut graph, 0, &pos, 0) {
            self.ext = graph.nodes.iter().map(|md| md.mv).collect();
        }

        self.combine_pawn_moves();
    }

    /// Multi-square pawn advances become single steps; only the last step
    /// keeps the promotion.
    fn split_pawn_moves(&mut self) {
        let mut seq = Vec::with_capacity(self.ext.len());
        for &m in &self.ext {
            if m.is_straight_pawn_move() {
                let from = m.from.expect("straight pawn move has a source");
                let x = from.file();
                let y1 = from.rank() as i16;
                let y2 = m.to.rank() as i16;
                let d: i16 = if y1 < y2 { 1 } else { -1 };
                let mut y = y1 + d;
                let mut prev = y1;
                while y != y2 + d {
                    let mut step = m;
                    step.from = Some(Square::from_file_rank(x, prev as u8));
                    step.to = Square::from_file_rank(x, y as u8);
                    if y != y2 {
                        step.promotion = None;
                    }
                    seq.push(step);
                    prev = y;
                    y += d;
                }
            } else {
                seq.push(m);
            }
        }
        self.ext = seq;
    }

    /// Re-merge split double pushes from the starting rank.
    fn combine_pawn_moves(&mut self) {
        let mut seq: Vec<ExtPkMove> = Vec::with_capacity(self.ext.len());
        for &m in &self.ext {
            let mut merged = false;
            if let Some(m0) = seq.last() {
                if m.is_straight_pawn_move() && m0.is_straight_pawn_move() {
                    let (f0, f1) = (m0.from.unwrap(), m.from.unwrap());
                    if f1.file() == f0.file() && m0.to.rank() == f1.rank() {
                        let white = m.color.is_white();
                        let y0 = f0.rank();
                        let y1 = m.to.rank();
                        if y0 == (if white { 1 } else { 6 }) && y1 == (if white { 3 } else { 4 }) {
                            let mut two = m;
                            two.from = Some(f0);
                            *seq.last_mut().expect("nonempty") = two;
                            merged = true;
                        }
                    }
                }
            }
            if !merged {
                seq.push(m);
            }
        }
        self.ext = seq;
    }

    /// Recursive scheduling repair, mirroring the dependency-graph design:
    /// apply pawn moves; for piece moves, assign identities, expand paths,
    /// pull later pawn moves forward, or invent an unblocking pawn move.
    fn improve_kernel(&self, graph: &mut Graph, idx: usize, pos: &Position, depth: usize) -> bool {
        if depth > 64 {
            return false;
        }
        if idx >= graph.nodes.len() {
            return true;
        }

        let md = graph.nodes[idx].clone();
        let m = md.mv;

        if m.piece == Some(PkPiece::Pawn) {
            let mut tmp = pos.clone();
            if !apply_ext(&mut tmp, &m) {
                return false;
            }
            return self.improve_kernel(graph, idx + 1, &tmp, depth);
        }

        if !md.pseudo_legal {
            let mut m = m;
            if m.from.is_none() || m.piece.is_none() {
                if !assign_piece(graph, idx, pos) {
                    return false;
                }
                m = graph.nodes[idx].mv;
            }

            // Expand the move into steps around current blockers.
            {
                let mut tmp_graph = graph.clone();
                let blocked = pos.occupied() & !m.to.bit() & !m.from.map_or(0, |s| s.bit());
                if let Some(expanded) = expand_piece_move(&m, blocked) {
                    tmp_graph.replace_node(idx, &expanded);
                    if self.improve_kernel(&mut tmp_graph, idx, pos, depth + 1) {
                        *graph = tmp_graph;
                        return true;
                    }
                }
            }

            // Pull a later pawn move ahead of this one.
            for i in idx + 1..graph.nodes.len() {
                let em = graph.nodes[i].mv;
                if em.piece != Some(PkPiece::Pawn) || em.promotion.is_some() {
                    continue;
                }
                let mut tmp_graph = graph.clone();
                let dep_id = tmp_graph.nodes[i].id;
                tmp_graph.nodes[idx].depends_on.push(dep_id);
                if !tmp_graph.topo_sort() {
                    continue;
                }
                let Some(tmp_pos) = replay_until(&tmp_graph, idx, md.id, pos) else {
                    continue;
                };
                let blocked = tmp_pos.occupied() & !m.to.bit() & !m.from.map_or(0, |s| s.bit());
                if expand_piece_move(&m, blocked).is_some() {
                    if self.improve_kernel(&mut tmp_graph, idx, pos, depth + 1) {
                        *graph = tmp_graph;
                        return true;
                    }
                    return false;
                }
            }

            // Invent a pawn move that clears the path.
            for pawn_move in self.get_pawn_moves(graph, idx, pos) {
                let mut tmp_graph = graph.clone();
                tmp_graph.add_node(pawn_move);
                let dep_id = tmp_graph.nodes.last().expect("just added").id;
                tmp_graph.nodes[idx].depends_on.push(dep_id);
                if !tmp_graph.topo_sort() {
                    continue;
                }
                let Some(tmp_pos) = replay_until(&tmp_graph, idx, md.id, pos) else {
                    continue;
                };
                let blocked = tmp_pos.occupied() & !m.to.bit() & !m.from.map_or(0, |s| s.bit());
                if expand_piece_move(&m, blocked).is_some() {
                    if self.improve_kernel(&mut tmp_graph, idx, pos, depth + 1) {
                        *graph = tmp_graph;
                        return true;
                    }
                    return false;
                }
            }

            return false;
        }

        // Pseudo-legal single step: just apply it.
        let mut tmp = pos.clone();
        if !apply_ext(&mut tmp, &m) {
            return false;
        }
        self.improve_kernel(graph, idx + 1, &tmp, depth)
    }

    /// Candidate non-capture pawn moves that do not break the goal's pawn
    /// structure; used to clear a blocked piece path.
    fn get_pawn_moves(&self, graph: &Graph, idx: usize, in_pos: &Position) -> Vec<ExtPkMove> {
        // Keep only pawns and kings, then play out the remaining schedule to
        // see which pawns are still needed where.
        let mut tmp = in_pos.clone();
        for sq in Square::all() {
            let p = tmp.piece_on(sq);
            if !p.is_empty()
                && !matches!(p.kind(), Some(PieceKind::King) | Some(PieceKind::Pawn))
            {
                tmp.set_piece(sq, Piece::Empty);
            }
        }
        for md in &graph.nodes[idx..] {
            let m = &md.mv;
            let mut p = Piece::Empty;
            if let Some(from) = m.from {
                p = tmp.piece_on(from);
                tmp.set_piece(from, Piece::Empty);
            }
            if m.promotion.is_some() {
                p = Piece::Empty;
            }
            tmp.set_piece(m.to, p);
        }

        let count_behind = |pos: &Position, sq: Square, white: bool| -> u32 {
            let mask = if white {
                engine_core::bitboard::south_fill(sq.bit())
            } else {
                engine_core::bitboard::north_fill(sq.bit())
            };
            let pawns = pos.piece_bb(if white { Piece::WPawn } else { Piece::BPawn });
            (mask & pawns).count_ones()
        };

        let pawns_ok = |pos: &Position, white: bool, file: u8| -> bool {
            let goal_pawns = self
                .goal_pos
                .piece_bb(if white { Piece::WPawn } else { Piece::BPawn })
                & engine_core::bitboard::file_mask(file);
            engine_core::bitboard::squares(goal_pawns).all(|sq| {
                count_behind(pos, sq, white) >= count_behind(&self.goal_pos, sq, white)
            })
        };

        let mut out = Vec::new();
        for color in [Color::White, Color::Black] {
            let white = color.is_white();
            let pawns = tmp.piece_bb(if white { Piece::WPawn } else { Piece::BPawn });
            for sq in engine_core::bitboard::squares(pawns) {
                let x = sq.file();
                let y0 = sq.rank() as i16;
                for d in 1..=2i16 {
                    if d == 2 && y0 != (if white { 1 } else { 6 }) {
                        break;
                    }
                    let y1 = y0 + if white { d } else { -d };
                    if !(1..=6).contains(&y1) {
                        break;
                    }
                    let to = Square::from_file_rank(x, y1 as u8);
                    if !tmp.piece_on(to).is_empty() {
                        break;
                    }

                    let mut probe = tmp.clone();
                    probe.set_piece(sq, Piece::Empty);
                    probe.set_piece(to, Piece::make(color, PieceKind::Pawn));
                    if pawns_ok(&probe, white, x) {
                        out.push(ExtPkMove::new(
                            color,
                            Some(PkPiece::Pawn),
                            Some(sq),
                            false,
                            to,
                            None,
                        ));
                    }
                }
            }
        }
        out
    }
}

/// Replay graph moves from `idx` until the node with `stop_id` is reached.
fn replay_until(graph: &Graph, idx: usize, stop_id: usize, pos: &Position) -> Option<Position> {
    let mut tmp = pos.clone();
    for md in &graph.nodes[idx..] {
        if md.id == stop_id {
            return Some(tmp);
        }
        if !apply_ext(&mut tmp, &md.mv) {
            return None;
        }
    }
    Some(tmp)
}

/// Resolve which concrete piece performs a capture with unknown identity:
/// the nearest candidate of the moving color by shortest-path distance over
/// the current occupancy. Later moves of the same piece are re-anchored.
fn assign_piece(graph: &mut Graph, idx: usize, pos: &Position) -> bool {
    let m = graph.nodes[idx].mv;
    let mover = m.color;

    let mut best: Option<(u8, Square, PkPiece)> = None;
    for sq in engine_core::bitboard::squares(pos.color_bb(mover)) {
        let p = pos.piece_on(sq);
        let kind = match p.kind() {
            Some(PieceKind::Pawn) | Some(PieceKind::King) | None => continue,
            Some(k) => k,
        };
        if let Some(want) = m.piece {
            if want.to_kind() != kind {
                continue;
            }
        }
        // Castling anchors stay put.
        if matches!(sq, Square::A1 | Square::H1 | Square::A8 | Square::H8)
            && pos.castle_mask() != 0
            && kind == PieceKind::Rook
        {
            continue;
        }
        let pk = PkPiece::from_piece(p, sq).expect("non-king piece classifies");
        let blocked = pos.occupied() & !sq.bit() & !m.to.bit();
        let spd = shortest_paths(kind, m.to, blocked);
        match spd.distance(sq) {
            Some(d) if d > 0 => {
                if best.is_none_or(|(bd, bsq, _)| d < bd || (d == bd && sq < bsq)) {
                    best = Some((d, sq, pk));
                }
            }
            _ => {}
        }
    }

    let Some((_, from_sq, pk)) = best else {
        return false;
    };
    graph.nodes[idx].mv.piece = Some(pk);
    graph.nodes[idx].mv.from = Some(from_sq);

    // The piece has moved; its next appearance starts from the new square.
    let to = graph.nodes[idx].mv.to;
    for i in idx + 1..graph.nodes.len() {
        let nm = &mut graph.nodes[i].mv;
        if nm.color == mover && nm.piece == Some(pk) && nm.from == Some(from_sq) {
            nm.from = Some(to);
            break;
        }
    }
    true
}

/// Expand a piece move into a chain of single steps over `blocked` squares.
fn expand_piece_move(m: &ExtPkMove, blocked: u64) -> Option<Vec<ExtPkMove>> {
    let kind = m.piece?.to_kind();
    if kind == PieceKind::Pawn {
        return None;
    }
    let from = m.from?;
    let spd: ShortestPathData = shortest_paths(kind, m.to, blocked);
    spd.distance(from)?;

    let mut out = Vec::new();
    let mut at = from;
    while at != m.to {
        let nexts = spd.next_squares(kind, at, blocked);
        debug_assert!(nexts != 0);
        let next = engine_core::bitboard::first_square(nexts);
        let mut step = *m;
        step.from = Some(at);
        step.to = next;
        if next != m.to {
            step.capture = false;
        }
        out.push(step);
        at = next;
    }
    Some(out)
}
