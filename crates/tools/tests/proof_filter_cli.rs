//! End-to-end tests for the proof-filter binary.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

const START_POS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

fn run_on(input: &str) -> assert_cmd::assert::Assert {
    let mut f = NamedTempFile::new().unwrap();
    write!(f, "{input}").unwrap();
    Command::cargo_bin("proof-filter")
        .unwrap()
        .arg(f.path())
        .timeout(std::time::Duration::from_secs(120))
        .assert()
}

#[test]
fn startpos_line_becomes_legal() {
    run_on(&format!("{START_POS_FEN}\n"))
        .success()
        .stdout(predicate::str::contains("legal:"))
        .stdout(predicate::str::contains(START_POS_FEN));
}

#[test]
fn one_ply_line_gets_a_proof() {
    run_on("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1\n")
        .success()
        .stdout(predicate::str::contains("legal: proof: e4"));
}

#[test]
fn illegal_line_is_marked() {
    run_on("rnbqkbnr/pppppppp/8/8/2B1B3/4B3/PPPPPPPP/RN1QK1NR w KQkq - 0 1\n")
        .success()
        .stdout(predicate::str::contains("illegal:"));
}

#[test]
fn malformed_line_is_diagnosed_not_fatal() {
    run_on("this is not a fen line\n")
        .success()
        .stderr(predicate::str::contains("invalid line format"));
}

#[test]
fn iterated_mode_writes_numbered_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = NamedTempFile::new().unwrap();
    writeln!(input, "{START_POS_FEN}").unwrap();
    let base = dir.path().join("out").to_string_lossy().to_string();
    Command::cargo_bin("proof-filter")
        .unwrap()
        .arg(input.path())
        .arg("--iterated")
        .arg(&base)
        .timeout(std::time::Duration::from_secs(120))
        .assert()
        .success();
    assert!(std::path::Path::new(&format!("{base}00")).exists());
    let content = std::fs::read_to_string(format!("{base}00")).unwrap();
    assert!(content.contains("legal:"), "content: {content}");
}

#[test]
fn parallel_jobs_accepted() {
    run_on(&format!("{START_POS_FEN}\n")).success();
    let mut f = NamedTempFile::new().unwrap();
    writeln!(f, "{START_POS_FEN}").unwrap();
    writeln!(f, "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1").unwrap();
    Command::cargo_bin("proof-filter")
        .unwrap()
        .arg(f.path())
        .args(["--jobs", "2"])
        .timeout(std::time::Duration::from_secs(120))
        .assert()
        .success()
        .stdout(predicate::str::contains("legal:").count(2));
}
