//! UCI wire protocol: outbound commands and tolerant parsing of engine output.
//!
//! Parsing never fails. Unknown lines become [`EngineLine::Other`] and unknown
//! tokens inside `info` lines are skipped, so newer engine output stays readable.

use std::fmt;
use std::time::Duration;

/// Commands sent to the engine, rendered one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciCommand {
    Uci,
    IsReady,
    SetOption { name: String, value: String },
    UciNewGame,
    Position { fen: String },
    Go {
        depth: Option<u32>,
        movetime: Option<Duration>,
    },
    Stop,
    Quit,
}

impl UciCommand {
    pub fn set_option(name: &str, value: impl ToString) -> Self {
        UciCommand::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UciCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UciCommand::Uci => f.write_str("uci"),
            UciCommand::IsReady => f.write_str("isready"),
            UciCommand::SetOption { name, value } => {
                write!(f, "setoption name {name} value {value}")
            }
            UciCommand::UciNewGame => f.write_str("ucinewgame"),
            UciCommand::Position { fen } => write!(f, "position fen {fen}"),
            UciCommand::Go { depth, movetime } => {
                f.write_str("go")?;
                if let Some(depth) = depth {
                    write!(f, " depth {depth}")?;
                }
                if let Some(movetime) = movetime {
                    write!(f, " movetime {}", movetime.as_millis())?;
                }
                if depth.is_none() && movetime.is_none() {
                    f.write_str(" infinite")?;
                }
                Ok(())
            }
            UciCommand::Stop => f.write_str("stop"),
            UciCommand::Quit => f.write_str("quit"),
        }
    }
}

/// Engine score, relative to the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// Centipawns, positive = side to move is better
    Centipawns(i32),
    /// Mate in N moves, positive = side to move mates
    Mate(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    Lower,
    Upper,
}

/// Fields of interest from one `info` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub multipv: Option<u32>,
    pub nodes: Option<u64>,
    pub score: Option<Score>,
    pub bound: Option<ScoreBound>,
    /// Principal variation in coordinate notation
    pub pv: Vec<String>,
}

impl InfoLine {
    /// Lines from secondary PV slots don't describe the best line.
    pub fn is_primary(&self) -> bool {
        self.multipv.map_or(true, |idx| idx == 1)
    }
}

/// One classified line of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    UciOk,
    ReadyOk,
    Info(InfoLine),
    BestMove {
        /// `None` for `bestmove (none)` in terminal positions
        best: Option<String>,
        ponder: Option<String>,
    },
    Other,
}

pub fn parse_line(line: &str) -> EngineLine {
    let trimmed = line.trim();
    let mut tokens = trimmed.split_whitespace();
    match tokens.next() {
        Some("uciok") => EngineLine::UciOk,
        Some("readyok") => EngineLine::ReadyOk,
        Some("info") => EngineLine::Info(parse_info(trimmed)),
        Some("bestmove") => {
            let best = tokens.next().and_then(coordinate_move);
            let ponder = match tokens.next() {
                Some("ponder") => tokens.next().and_then(coordinate_move),
                _ => None,
            };
            EngineLine::BestMove { best, ponder }
        }
        _ => EngineLine::Other,
    }
}

/// Parse the fields of an `info` line, skipping anything unrecognised.
pub fn parse_info(line: &str) -> InfoLine {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let mut info = InfoLine::default();
    let mut i = 0;

    while i < parts.len() {
        match parts[i] {
            "depth" => {
                info.depth = parse_at(&parts, i + 1);
                i += 2;
            }
            "seldepth" => {
                info.seldepth = parse_at(&parts, i + 1);
                i += 2;
            }
            "multipv" => {
                info.multipv = parse_at(&parts, i + 1);
                i += 2;
            }
            "nodes" => {
                info.nodes = parse_at(&parts, i + 1);
                i += 2;
            }
            "score" => {
                let value = parse_at::<i32>(&parts, i + 2);
                info.score = match (parts.get(i + 1).copied(), value) {
                    (Some("cp"), Some(cp)) => Some(Score::Centipawns(cp)),
                    (Some("mate"), Some(mate)) => Some(Score::Mate(mate)),
                    _ => info.score,
                };
                i += 3;
                match parts.get(i).copied() {
                    Some("lowerbound") => {
                        info.bound = Some(ScoreBound::Lower);
                        i += 1;
                    }
                    Some("upperbound") => {
                        info.bound = Some(ScoreBound::Upper);
                        i += 1;
                    }
                    _ => {}
                }
            }
            "pv" => {
                // PV runs to the end of the line
                info.pv = parts[i + 1..]
                    .iter()
                    .take_while(|part| coordinate_move(part).is_some())
                    .map(|part| part.to_string())
                    .collect();
                break;
            }
            // Free text follows; nothing after it is structured
            "string" => break,
            _ => i += 1,
        }
    }

    info
}

fn parse_at<T: std::str::FromStr>(parts: &[&str], idx: usize) -> Option<T> {
    parts.get(idx).and_then(|p| p.parse().ok())
}

/// Accept `e2e4` / `e7e8q`; reject `(none)`, `0000` and anything else.
fn coordinate_move(token: &str) -> Option<String> {
    let b = token.as_bytes();
    let square = |f: u8, r: u8| (b'a'..=b'h').contains(&f) && (b'1'..=b'8').contains(&r);
    let valid = match b.len() {
        4 => square(b[0], b[1]) && square(b[2], b[3]),
        5 => square(b[0], b[1]) && square(b[2], b[3]) && b"qrbn".contains(&b[4]),
        _ => false,
    };
    valid.then(|| token.to_string())
}
