//! Proof-game filter command line.
//!
//! Reads FEN token lines, advances each through the proof-game pipeline and
//! writes the updated lines back. In iterated mode the output of each pass
//! feeds the next, into numbered files, until nothing changes.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use tools::proof::filter::ProofGameFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Decide whether chess positions are reachable from the start position", long_about = None)]
struct Args {
    /// Input file with one FEN token line per position; - for stdin.
    input: PathBuf,

    /// Output file; - for stdout. Ignored in iterated mode.
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Iterated mode: write numbered files <BASE>00, <BASE>01, ... until no
    /// line changes.
    #[arg(long, value_name = "BASE")]
    iterated: Option<String>,

    /// Drop previous path/status/fail/info state before the first pass.
    #[arg(long)]
    retry: bool,

    /// Worker threads for independent lines.
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Print per-pass status counts.
    #[arg(short, long)]
    progress: bool,
}

fn open_input(path: &PathBuf) -> Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        let f = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        Ok(Box::new(BufReader::new(f)))
    }
}

fn open_output(path: &PathBuf) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(BufWriter::new(io::stdout())))
    } else {
        let f = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Box::new(BufWriter::new(f)))
    }
}

/// Strip retry-able tokens from a line's text form.
fn strip_retry_tokens(line: &str) -> String {
    use tools::proof::filter::{Line, Token};
    match Line::parse(line) {
        Ok(mut l) => {
            l.erase(Token::Path);
            l.erase(Token::Status);
            l.erase(Token::Fail);
            l.erase(Token::Info);
            l.to_line()
        }
        Err(_) => line.to_string(),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let filter = ProofGameFilter::new();
    let start = Instant::now();

    match &args.iterated {
        None => {
            let input = open_input(&args.input)?;
            let mut output = open_output(&args.output)?;
            let content: Vec<String> = input.lines().collect::<io::Result<_>>()?;
            let text = if args.retry {
                content.iter().map(|l| strip_retry_tokens(l)).collect::<Vec<_>>().join("\n")
            } else {
                content.join("\n")
            };
            filter.run_one_iteration(
                text.as_bytes(),
                &mut output,
                args.jobs,
                args.progress,
                start,
            )?;
            output.flush()?;
        }
        Some(base) => {
            let input = open_input(&args.input)?;
            let mut content: Vec<String> = input.lines().collect::<io::Result<_>>()?;
            if args.retry {
                content = content.iter().map(|l| strip_retry_tokens(l)).collect();
            }
            let mut iter = 0usize;
            loop {
                let out_name = format!("{base}{iter:02}");
                let mut out = BufWriter::new(
                    File::create(&out_name).with_context(|| format!("cannot create {out_name}"))?,
                );
                let text = content.join("\n");
                let work_remains = filter.run_one_iteration(
                    text.as_bytes(),
                    &mut out,
                    args.jobs,
                    args.progress,
                    start,
                )?;
                out.flush()?;
                drop(out);
                if !work_remains {
                    break;
                }
                let f = File::open(&out_name)?;
                content = BufReader::new(f).lines().collect::<io::Result<_>>()?;
                iter += 1;
            }
        }
    }
    Ok(())
}
