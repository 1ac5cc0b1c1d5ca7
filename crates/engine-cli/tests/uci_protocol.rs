//! End-to-end protocol tests against the kestrel binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn engine(input: &str) -> assert_cmd::assert::Assert {
    Command::cargo_bin("kestrel").unwrap().write_stdin(input).timeout(std::time::Duration::from_secs(60)).assert()
}

#[test]
fn uci_handshake() {
    engine("uci\nquit\n")
        .success()
        .stdout(predicate::str::contains("id name Kestrel"))
        .stdout(predicate::str::contains("id author"))
        .stdout(predicate::str::contains("option name Hash type spin"))
        .stdout(predicate::str::contains("option name Threads type spin"))
        .stdout(predicate::str::contains("option name MultiPV type spin"))
        .stdout(predicate::str::contains("option name Strength type spin"))
        .stdout(predicate::str::contains("option name SyzygyPath type string"))
        .stdout(predicate::str::contains("uciok"));
}

#[test]
fn isready_answers_readyok() {
    engine("isready\nquit\n").success().stdout(predicate::str::contains("readyok"));
}

#[test]
fn go_depth_emits_bestmove() {
    engine("uci\nisready\nposition startpos\ngo depth 2\nquit\n")
        .success()
        .stdout(predicate::str::contains("info depth 1"))
        .stdout(predicate::str::is_match("bestmove [a-h][1-8][a-h][1-8]").unwrap());
}

#[test]
fn position_with_moves_searches() {
    engine("position startpos moves e2e4 e7e5\ngo depth 2\nquit\n")
        .success()
        .stdout(predicate::str::is_match("bestmove [a-h][1-8][a-h][1-8]").unwrap());
}

#[test]
fn malformed_commands_are_diagnosed_not_fatal() {
    engine("position fen not a fen\nisready\nquit\n")
        .success()
        .stdout(predicate::str::contains("info string"))
        .stdout(predicate::str::contains("readyok"));
}

#[test]
fn setoption_spin_and_button() {
    engine("setoption name Hash value 8\nsetoption name Clear Hash\nisready\nquit\n")
        .success()
        .stdout(predicate::str::contains("readyok"));
}

#[test]
fn searchmoves_restricts_root() {
    engine("position startpos\ngo depth 2 searchmoves a2a3\nquit\n")
        .success()
        .stdout(predicate::str::contains("bestmove a2a3"));
}

#[test]
fn stop_ends_infinite_search() {
    engine("position startpos\ngo infinite\nstop\nquit\n")
        .success()
        .stdout(predicate::str::is_match("bestmove [a-h][1-8][a-h][1-8]").unwrap());
}

#[test]
fn multithreaded_search_works() {
    engine("setoption name Threads value 3\nposition startpos\ngo depth 6\nquit\n")
        .success()
        .stdout(predicate::str::is_match("bestmove [a-h][1-8][a-h][1-8]").unwrap());
}

#[test]
fn mate_search_reports_mate_score() {
    engine("position fen 6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1\ngo depth 4\nquit\n")
        .success()
        .stdout(predicate::str::contains("score mate 1"))
        .stdout(predicate::str::contains("bestmove a1a8"));
}
