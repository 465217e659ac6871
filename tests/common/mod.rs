//! Scripted in-memory UCI engine for session tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_engine::{EngineIo, EngineSession, SessionOptions, WatchdogLimits};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{sleep_until, Instant};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// How the fake engine answers one `go`.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Emit `info` lines at once, then `bestmove` after `delay`.
    Search {
        info: Vec<String>,
        bestmove: String,
        delay: Duration,
    },
    /// Emit `info` lines, then go silent. Answers `stop` with `bestmove` if
    /// set, `stop_delay` after the `stop` arrives.
    Hang {
        info: Vec<String>,
        answer_stop: Option<String>,
        stop_delay: Duration,
    },
    /// Close the output stream, as if the process died.
    Exit,
}

impl Reply {
    pub fn search(info: &[&str], bestmove: &str) -> Self {
        Reply::Search {
            info: info.iter().map(|s| s.to_string()).collect(),
            bestmove: bestmove.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn cp(cp: i32, best: &str) -> Self {
        Self::search(&[&format!("info depth 12 seldepth 18 score cp {cp} nodes 1000 pv {best}")], best)
    }

    pub fn delayed(self, by: Duration) -> Self {
        match self {
            Reply::Search { info, bestmove, .. } => Reply::Search {
                info,
                bestmove,
                delay: by,
            },
            other => other,
        }
    }

    pub fn hang(info: &[&str]) -> Self {
        Reply::Hang {
            info: info.iter().map(|s| s.to_string()).collect(),
            answer_stop: None,
            stop_delay: Duration::ZERO,
        }
    }

    /// Make a hanging search answer `stop` with `bestmove best`, `after` the stop.
    pub fn answering_stop(self, best: &str, after: Duration) -> Self {
        match self {
            Reply::Hang { info, .. } => Reply::Hang {
                info,
                answer_stop: Some(best.to_string()),
                stop_delay: after,
            },
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Normal,
    /// Never sends `uciok`
    Silent,
    /// Closes output on `uci`
    Exit,
}

/// Everything the fake engine received.
#[derive(Debug, Default)]
pub struct EngineLog {
    pub commands: Vec<String>,
    pub overlapping_go: bool,
}

impl EngineLog {
    pub fn positions(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|c| c.strip_prefix("position fen "))
            .map(str::to_string)
            .collect()
    }

    pub fn count(&self, cmd: &str) -> usize {
        self.commands.iter().filter(|c| c.as_str() == cmd).count()
    }
}

pub struct FakeEngine {
    replies: HashMap<String, Vec<Reply>>,
    default: Reply,
    handshake: Handshake,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            default: Reply::cp(20, "e2e4"),
            handshake: Handshake::Normal,
        }
    }

    /// Answer searches of `fen` with `reply`. Repeated calls for the same FEN
    /// queue replies; the last one is reused once the others are spent.
    pub fn reply(mut self, fen: &str, reply: Reply) -> Self {
        self.replies.entry(fen.trim().to_string()).or_default().push(reply);
        self
    }

    pub fn default_reply(mut self, reply: Reply) -> Self {
        self.default = reply;
        self
    }

    pub fn handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = handshake;
        self
    }

    fn reply_for(&mut self, fen: &str) -> Reply {
        match self.replies.get_mut(fen) {
            Some(queued) if queued.len() > 1 => queued.remove(0),
            Some(queued) if !queued.is_empty() => queued[0].clone(),
            _ => self.default.clone(),
        }
    }

    pub fn spawn(self) -> (EngineIo, Arc<Mutex<EngineLog>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let log = Arc::new(Mutex::new(EngineLog::default()));
        tokio::spawn(self.run(server, Arc::clone(&log)));
        (EngineIo::from_streams(client_read, client_write), log)
    }

    async fn run(mut self, server: tokio::io::DuplexStream, log: Arc<Mutex<EngineLog>>) {
        let (reader, mut writer) = tokio::io::split(server);
        let mut lines = BufReader::new(reader).lines();
        let mut fen = String::new();
        let mut searching = false;
        // Search completion, and a stop answer that is running late
        let mut due: Option<(Instant, String)> = None;
        let mut late: Option<(Instant, String)> = None;
        let mut answer_stop: Option<(String, Duration)> = None;

        loop {
            let deadline = [due.as_ref(), late.as_ref()]
                .into_iter()
                .flatten()
                .map(|(at, _)| *at)
                .min();
            let line = tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    _ => return,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let now = Instant::now();
                    if late.as_ref().is_some_and(|(at, _)| *at <= now) {
                        if let Some((_, best)) = late.take() {
                            send(&mut writer, &format!("bestmove {best}")).await;
                        }
                    } else if let Some((_, best)) = due.take() {
                        searching = false;
                        send(&mut writer, &format!("bestmove {best}")).await;
                    }
                    continue;
                }
            };

            log.lock().unwrap().commands.push(line.clone());
            match line.split_whitespace().next() {
                Some("uci") => match self.handshake {
                    Handshake::Normal => send(&mut writer, "id name FakeFish\nuciok").await,
                    Handshake::Silent => {}
                    Handshake::Exit => return,
                },
                Some("isready") => send(&mut writer, "readyok").await,
                Some("position") => {
                    fen = line.trim_start_matches("position fen ").trim().to_string();
                }
                Some("go") => {
                    if searching {
                        log.lock().unwrap().overlapping_go = true;
                    }
                    searching = true;
                    match self.reply_for(&fen) {
                        Reply::Search {
                            info,
                            bestmove,
                            delay,
                        } => {
                            for l in &info {
                                send(&mut writer, l).await;
                            }
                            due = Some((Instant::now() + delay, bestmove));
                        }
                        Reply::Hang {
                            info,
                            answer_stop: on_stop,
                            stop_delay,
                        } => {
                            for l in &info {
                                send(&mut writer, l).await;
                            }
                            answer_stop = on_stop.map(|best| (best, stop_delay));
                        }
                        Reply::Exit => return,
                    }
                }
                Some("stop") => {
                    searching = false;
                    if let Some((best, delay)) = answer_stop.take() {
                        if delay.is_zero() {
                            send(&mut writer, &format!("bestmove {best}")).await;
                        } else {
                            late = Some((Instant::now() + delay, best));
                        }
                    } else if let Some((_, best)) = due.take() {
                        send(&mut writer, &format!("bestmove {best}")).await;
                    }
                }
                Some("quit") => return,
                _ => {}
            }
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) {
    let _ = writer.write_all(format!("{text}\n").as_bytes()).await;
    let _ = writer.flush().await;
}

/// Short limits so watchdog paths resolve quickly.
pub fn test_options() -> SessionOptions {
    SessionOptions {
        limits: WatchdogLimits {
            idle: Duration::from_millis(200),
            hard: Duration::from_secs(2),
        },
        handshake_timeout: Duration::from_millis(500),
        stop_grace: Duration::from_millis(50),
        ..SessionOptions::default()
    }
}

/// Native session over a fake engine, already initialized.
pub async fn ready_session(engine: FakeEngine) -> (EngineSession, Arc<Mutex<EngineLog>>) {
    let (io, log) = engine.spawn();
    let session = EngineSession::with_io(io, test_options());
    session.initialize().await.expect("fake handshake failed");
    (session, log)
}

/// Locate a Stockfish binary: STOCKFISH_PATH, a local binary, then PATH.
pub fn find_stockfish() -> Option<String> {
    if let Ok(path) = std::env::var("STOCKFISH_PATH") {
        if std::path::Path::new(&path).exists() {
            return Some(path);
        }
    }
    for candidate in ["stockfish", "stockfish.exe"] {
        let local = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(candidate);
        if local.exists() {
            return Some(local.to_string_lossy().into_owned());
        }
    }
    if Command::new("stockfish")
        .arg("quit")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
    {
        return Some("stockfish".to_string());
    }
    None
}
