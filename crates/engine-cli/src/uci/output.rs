//! UCI response formatting. Everything on stdout is protocol; diagnostics go
//! to the logger on stderr.

use engine_core::search::constants::{is_loss_score, is_win_score, MATE0};
use engine_core::search::{Bound, PvInfo};
use engine_core::text::move_to_uci;
use engine_core::types::Move;

/// Format a `score cp N` / `score mate N` fragment.
pub fn format_score(score: i32, bound: Option<Bound>) -> String {
    let mut s = if is_win_score(score) {
        let mate_moves = (MATE0 - score + 1) / 2;
        format!("score mate {mate_moves}")
    } else if is_loss_score(score) {
        let mate_moves = (MATE0 + score + 1) / 2;
        format!("score mate -{mate_moves}")
    } else {
        format!("score cp {score}")
    };
    match bound {
        Some(Bound::Lower) => s.push_str(" lowerbound"),
        Some(Bound::Upper) => s.push_str(" upperbound"),
        _ => {}
    }
    s
}

pub fn format_pv_info(info: &PvInfo) -> String {
    let nps = if info.time_ms > 0 { info.nodes * 1000 / info.time_ms } else { info.nodes };
    let pv: Vec<String> = info.pv.iter().map(|&m| move_to_uci(m)).collect();
    let mut line = format!(
        "info depth {} seldepth {} multipv {} {} nodes {} nps {} time {}",
        info.depth,
        info.sel_depth,
        info.multipv,
        format_score(info.score, info.bound),
        info.nodes,
        nps,
        info.time_ms,
    );
    if info.tb_hits > 0 {
        line.push_str(&format!(" tbhits {}", info.tb_hits));
    }
    line.push_str(&format!(" pv {}", pv.join(" ")));
    line
}

pub fn format_bestmove(best: Move, ponder: Option<Move>) -> String {
    match ponder {
        Some(p) => format!("bestmove {} ponder {}", move_to_uci(best), move_to_uci(p)),
        None => format!("bestmove {}", move_to_uci(best)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::types::{Piece, Square};

    #[test]
    fn cp_and_mate_scores() {
        assert_eq!(format_score(42, None), "score cp 42");
        assert_eq!(format_score(MATE0 - 1, None), "score mate 1");
        assert_eq!(format_score(MATE0 - 5, None), "score mate 3");
        assert_eq!(format_score(-(MATE0 - 4), None), "score mate -2");
        assert_eq!(format_score(10, Some(Bound::Lower)), "score cp 10 lowerbound");
        assert_eq!(format_score(10, Some(Bound::Upper)), "score cp 10 upperbound");
    }

    #[test]
    fn bestmove_lines() {
        let e2e4 = Move::new(Square::from_str_coord("e2").unwrap(), Square::from_str_coord("e4").unwrap(), Piece::Empty);
        let e7e5 = Move::new(Square::from_str_coord("e7").unwrap(), Square::from_str_coord("e5").unwrap(), Piece::Empty);
        assert_eq!(format_bestmove(e2e4, None), "bestmove e2e4");
        assert_eq!(format_bestmove(e2e4, Some(e7e5)), "bestmove e2e4 ponder e7e5");
    }

    #[test]
    fn info_line_shape() {
        let info = PvInfo {
            depth: 7,
            sel_depth: 12,
            multipv: 1,
            score: 33,
            bound: None,
            nodes: 10_000,
            tb_hits: 0,
            time_ms: 50,
            pv: vec![Move::new(Square::E1, Square::E4, Piece::Empty)],
        };
        let line = format_pv_info(&info);
        assert!(line.starts_with("info depth 7 seldepth 12 multipv 1 score cp 33"));
        assert!(line.contains("nps 200000"));
        assert!(line.ends_with("pv e1e4"));
    }
}
