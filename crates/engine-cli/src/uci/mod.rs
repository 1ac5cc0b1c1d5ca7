//! UCI command parsing and response formatting.

pub mod output;

/// `go` parameters, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoParams {
    pub wtime: Option<i64>,
    pub btime: Option<i64>,
    pub winc: i64,
    pub binc: i64,
    pub moves_to_go: Option<i32>,
    pub depth: Option<i32>,
    pub nodes: Option<i64>,
    pub mate: Option<i32>,
    pub movetime: Option<i64>,
    pub infinite: bool,
    pub ponder: bool,
    pub search_moves: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciCommand {
    Uci,
    IsReady,
    UciNewGame,
    SetOption { name: String, value: Option<String> },
    Position { startpos: bool, fen: Option<String>, moves: Vec<String> },
    Go(GoParams),
    Stop,
    PonderHit,
    Quit,
}

/// Malformed command line. The protocol loop prints the message and carries
/// on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UciParseError(pub String);

impl std::fmt::Display for UciParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot parse command: {}", self.0)
    }
}

impl std::error::Error for UciParseError {}

pub fn parse_command(line: &str) -> Result<UciCommand, UciParseError> {
    let mut tokens = line.split_whitespace().peekable();
    let cmd = loop {
        // Per the UCI spec, unknown leading tokens are skipped.
        match tokens.next() {
            None => return Err(UciParseError(line.to_string())),
            Some(t) => {
                if matches!(
                    t,
                    "uci" | "isready" | "ucinewgame" | "setoption" | "position" | "go" | "stop"
                        | "ponderhit" | "quit"
                ) {
                    break t;
                }
            }
        }
    };

    match cmd {
        "uci" => Ok(UciCommand::Uci),
        "isready" => Ok(UciCommand::IsReady),
        "ucinewgame" => Ok(UciCommand::UciNewGame),
        "stop" => Ok(UciCommand::Stop),
        "ponderhit" => Ok(UciCommand::PonderHit),
        "quit" => Ok(UciCommand::Quit),
        "setoption" => {
            // setoption name <name tokens> [value <value tokens>]
            if tokens.next() != Some("name") {
                return Err(UciParseError(line.to_string()));
            }
            let mut name_tokens = Vec::new();
            let mut value_tokens = Vec::new();
            let mut in_value = false;
            for t in tokens {
                if !in_value && t == "value" {
                    in_value = true;
                } else if in_value {
                    value_tokens.push(t);
                } else {
                    name_tokens.push(t);
                }
            }
            if name_tokens.is_empty() {
                return Err(UciParseError(line.to_string()));
            }
            let value = if in_value { Some(value_tokens.join(" ")) } else { None };
            Ok(UciCommand::SetOption { name: name_tokens.join(" "), value })
        }
        "position" => {
            let mut startpos = false;
            let mut fen = None;
            let mut moves = Vec::new();
            let mut saw_moves = false;
            match tokens.next() {
                Some("startpos") => startpos = true,
                Some("fen") => {
                    let mut fen_tokens = Vec::new();
                    while let Some(t) = tokens.next() {
                        if t == "moves" {
                            saw_moves = true;
                            break;
                        }
                        fen_tokens.push(t);
                    }
                    if fen_tokens.is_empty() {
                        return Err(UciParseError(line.to_string()));
                    }
                    fen = Some(fen_tokens.join(" "));
                }
                _ => return Err(UciParseError(line.to_string())),
            }
            if !saw_moves && tokens.peek() == Some(&"moves") {
                tokens.next();
                saw_moves = true;
            }
            if saw_moves {
                moves.extend(tokens.map(str::to_string));
            }
            Ok(UciCommand::Position { startpos, fen, moves })
        }
        "go" => {
            let mut p = GoParams::default();
            while let Some(t) = tokens.next() {
                match t {
                    "wtime" => p.wtime = Some(next_i64(&mut tokens, line)?),
                    "btime" => p.btime = Some(next_i64(&mut tokens, line)?),
                    "winc" => p.winc = next_i64(&mut tokens, line)?,
                    "binc" => p.binc = next_i64(&mut tokens, line)?,
                    "movestogo" => p.moves_to_go = Some(next_i64(&mut tokens, line)? as i32),
                    "depth" => p.depth = Some(next_i64(&mut tokens, line)? as i32),
                    "nodes" => p.nodes = Some(next_i64(&mut tokens, line)?),
                    "mate" => p.mate = Some(next_i64(&mut tokens, line)? as i32),
                    "movetime" => p.movetime = Some(next_i64(&mut tokens, line)?),
                    "infinite" => p.infinite = true,
                    "ponder" => p.ponder = true,
                    "searchmoves" => {
                        while let Some(&mv) = tokens.peek() {
                            if is_move_token(mv) {
                                p.search_moves.push(mv.to_string());
                                tokens.next();
                            } else {
                                break;
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(UciCommand::Go(p))
        }
        _ => unreachable!(),
    }
}

/// Long-algebraic shape: "e2e4" or "e7e8q".
fn is_move_token(s: &str) -> bool {
    let b = s.as_bytes();
    (b.len() == 4 || b.len() == 5)
        && b[0].is_ascii_lowercase()
        && (b'a'..=b'h').contains(&b[0])
        && (b'1'..=b'8').contains(&b[1])
        && (b'a'..=b'h').contains(&b[2])
        && (b'1'..=b'8').contains(&b[3])
}

fn next_i64(
    tokens: &mut std::iter::Peekable<std::str::SplitWhitespace<'_>>,
    line: &str,
) -> Result<i64, UciParseError> {
    tokens
        .next()
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| UciParseError(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_commands() {
        assert_eq!(parse_command("uci"), Ok(UciCommand::Uci));
        assert_eq!(parse_command("isready"), Ok(UciCommand::IsReady));
        assert_eq!(parse_command("quit"), Ok(UciCommand::Quit));
        assert_eq!(parse_command("   stop  "), Ok(UciCommand::Stop));
        assert!(parse_command("flurble").is_err());
        // Junk before a known token is skipped per the UCI spec.
        assert_eq!(parse_command("joho quit"), Ok(UciCommand::Quit));
    }

    #[test]
    fn setoption_with_spaces() {
        assert_eq!(
            parse_command("setoption name Clear Hash"),
            Ok(UciCommand::SetOption { name: "Clear Hash".into(), value: None })
        );
        assert_eq!(
            parse_command("setoption name SyzygyPath value /tb/wdl files"),
            Ok(UciCommand::SetOption { name: "SyzygyPath".into(), value: Some("/tb/wdl files".into()) })
        );
        assert!(parse_command("setoption value 3").is_err());
    }

    #[test]
    fn position_variants() {
        assert_eq!(
            parse_command("position startpos"),
            Ok(UciCommand::Position { startpos: true, fen: None, moves: vec![] })
        );
        assert_eq!(
            parse_command("position startpos moves e2e4 e7e5"),
            Ok(UciCommand::Position {
                startpos: true,
                fen: None,
                moves: vec!["e2e4".into(), "e7e5".into()]
            })
        );
        let c = parse_command("position fen 8/8/8/8/8/8/8/k1K5 b - - 0 1 moves a1a2").unwrap();
        assert_eq!(
            c,
            UciCommand::Position {
                startpos: false,
                fen: Some("8/8/8/8/8/8/8/k1K5 b - - 0 1".into()),
                moves: vec!["a1a2".into()]
            }
        );
        assert!(parse_command("position").is_err());
        assert!(parse_command("position fen").is_err());
    }

    #[test]
    fn go_parameters() {
        let c = parse_command("go wtime 30000 btime 29000 winc 100 binc 100 movestogo 12").unwrap();
        let UciCommand::Go(p) = c else { panic!() };
        assert_eq!(p.wtime, Some(30000));
        assert_eq!(p.btime, Some(29000));
        assert_eq!(p.winc, 100);
        assert_eq!(p.moves_to_go, Some(12));

        let UciCommand::Go(p) = parse_command("go infinite").unwrap() else { panic!() };
        assert!(p.infinite);

        let UciCommand::Go(p) = parse_command("go depth 9 nodes 1000 mate 4 movetime 250 ponder").unwrap()
        else {
            panic!()
        };
        assert_eq!(p.depth, Some(9));
        assert_eq!(p.nodes, Some(1000));
        assert_eq!(p.mate, Some(4));
        assert_eq!(p.movetime, Some(250));
        assert!(p.ponder);

        let UciCommand::Go(p) = parse_command("go searchmoves e2e4 d2d4 depth 3").unwrap() else {
            panic!()
        };
        assert_eq!(p.search_moves, vec!["e2e4", "d2d4"]);
        assert_eq!(p.depth, Some(3));

        assert!(parse_command("go wtime abc").is_err());
    }
}
