//! Kestrel UCI chess engine.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;

use engine_cli::control::EngineControl;
use engine_cli::flushing_logger::FlushingStderrWriter;
use engine_cli::options::default_options;
use engine_cli::uci::{parse_command, UciCommand};
use engine_cli::{ENGINE_AUTHOR, ENGINE_NAME};
use engine_core::position::Position;

#[derive(Parser, Debug)]
#[command(author, version, about = "Kestrel UCI chess engine", long_about = None)]
struct Args {
    /// Enable debug logging on stderr.
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(Box::new(FlushingStderrWriter::new())))
        .init();

    info!("{ENGINE_NAME} starting");

    let options = Arc::new(default_options());
    let mut control = EngineControl::new(options.clone());

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match parse_command(&line) {
            Ok(c) => c,
            Err(e) => {
                // One-line diagnostic, then carry on.
                println!("info string {e}");
                let _ = std::io::stdout().flush();
                continue;
            }
        };
        match cmd {
            UciCommand::Uci => {
                println!("id name {ENGINE_NAME}");
                println!("id author {ENGINE_AUTHOR}");
                print!("{}", options.describe_all());
                println!("uciok");
            }
            UciCommand::IsReady => println!("readyok"),
            UciCommand::UciNewGame => control.new_game(),
            UciCommand::SetOption { name, value } => {
                control.set_option(&name, value.as_deref());
            }
            UciCommand::Position { startpos, fen, moves } => {
                let base = if startpos {
                    Ok(Position::start())
                } else {
                    Position::from_fen(fen.as_deref().unwrap_or("")).map_err(|e| e.to_string())
                };
                match base.and_then(|pos| control.set_position(pos, &moves)) {
                    Ok(()) => {}
                    Err(e) => println!("info string bad position: {e}"),
                }
            }
            UciCommand::Go(params) => control.go(&params),
            UciCommand::Stop => control.stop(),
            UciCommand::PonderHit => control.ponder_hit(),
            UciCommand::Quit => break,
        }
        let _ = std::io::stdout().flush();
    }

    control.quit();
    info!("{ENGINE_NAME} exiting");
    Ok(())
}
