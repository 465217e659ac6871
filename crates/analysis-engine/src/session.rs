//! UCI engine session (async I/O)
//!
//! A session owns one engine process. `initialize` runs the handshake; after
//! that a driver task owns the pipes and runs queued analyses one at a time,
//! each bounded by a [`Watchdog`]. Callers talk to the driver only through the
//! analysis queue and the state channel.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chess::Board;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::accumulator::{Accumulator, AnalysisResult};
use crate::board_utils::{parse_fen, parse_uci_move};
use crate::config::{EngineConfig, SessionOptions};
use crate::error::AnalysisError;
use crate::pool::{PoolGovernor, PoolSlot};
use crate::queue::{self, AnalysisQueue, PendingAnalysis, QueueDrain, QueuedAnalysis};
use crate::uci::{parse_line, EngineLine, UciCommand};
use crate::watchdog::{Expiry, Watchdog};

/// How long `quit` gets before the process is killed.
const QUIT_GRACE: Duration = Duration::from_secs(2);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    AwaitingEngineReady,
    AwaitingSyncReady,
    Configured,
    Idle,
    Analyzing,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Long-lived instance outside the pool
    Native,
    /// Holds a pool slot for its whole life
    Pooled,
}

/// One position to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub fen: String,
    pub depth: u32,
    /// Optional wall-time budget, sent alongside the depth
    pub movetime: Option<Duration>,
}

impl AnalysisRequest {
    pub fn new(fen: &str, depth: u32) -> Self {
        Self {
            fen: fen.trim().to_string(),
            depth,
            movetime: None,
        }
    }

    pub fn with_movetime(mut self, movetime: Duration) -> Self {
        self.movetime = Some(movetime);
        self
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-oriented pipes to an engine, plus the process when there is one.
pub struct EngineIo {
    lines: Lines<BufReader<BoxedReader>>,
    writer: BoxedWriter,
    child: Option<Child>,
}

impl fmt::Debug for EngineIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineIo")
            .field("pid", &self.child.as_ref().and_then(|c| c.id()))
            .finish_non_exhaustive()
    }
}

impl EngineIo {
    /// Spawn an engine binary with piped stdin/stdout.
    pub fn spawn(path: &str) -> Result<Self, AnalysisError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(path, error = %e, "Failed to spawn engine");
                AnalysisError::Io(e)
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdout unavailable"))?;

        debug!(path, pid = child.id(), "Engine process spawned");
        let mut engine = Self::from_streams(stdout, stdin);
        engine.child = Some(child);
        Ok(engine)
    }

    /// Wrap arbitrary streams, e.g. an in-memory engine in tests.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        Self {
            lines: BufReader::new(reader).lines(),
            writer: Box::new(writer),
            child: None,
        }
    }

    async fn send(&mut self, cmd: &UciCommand) -> Result<(), AnalysisError> {
        let line = cmd.to_string();
        debug!(cmd = %line, "UCI <");
        self.writer.write_all(format!("{line}\n").as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next output line; `None` once the engine has closed its output.
    async fn next_line(&mut self) -> Result<Option<String>, AnalysisError> {
        let line = self.lines.next_line().await?;
        if let Some(line) = &line {
            trace!(line = line.trim(), "UCI >");
        }
        Ok(line)
    }

    /// Send `quit`, give the process a moment, then kill it.
    async fn shutdown(mut self) {
        let _ = self.send(&UciCommand::Quit).await;
        let _ = self.writer.shutdown().await;
        if let Some(mut child) = self.child.take() {
            if timeout(QUIT_GRACE, child.wait()).await.is_err() {
                warn!(pid = child.id(), "Engine ignored quit, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

struct Startup {
    io: EngineIo,
    drain: QueueDrain,
    slot: Option<PoolSlot>,
}

enum Lifecycle {
    Pending(Box<Startup>),
    Running {
        shutdown: oneshot::Sender<()>,
        driver: JoinHandle<()>,
    },
    Finished,
}

/// A handle to one engine instance.
pub struct EngineSession {
    id: u64,
    kind: SessionKind,
    options: SessionOptions,
    queue: AnalysisQueue,
    state: Arc<watch::Sender<SessionState>>,
    lifecycle: Mutex<Lifecycle>,
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl EngineSession {
    fn new(io: EngineIo, kind: SessionKind, options: SessionOptions, slot: Option<PoolSlot>) -> Self {
        let (queue, drain) = queue::channel();
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            options,
            queue,
            state: Arc::new(state),
            lifecycle: Mutex::new(Lifecycle::Pending(Box::new(Startup { io, drain, slot }))),
        }
    }

    /// Spawn a native engine outside the pool. Call [`initialize`](Self::initialize) next.
    pub fn native(config: &EngineConfig) -> Result<Self, AnalysisError> {
        let io = EngineIo::spawn(&config.stockfish_path)?;
        Ok(Self::with_io(io, config.session_options()))
    }

    /// Admit a slot from `governor`, then spawn the engine.
    pub fn pooled(config: &EngineConfig, governor: &Arc<PoolGovernor>) -> Result<Self, AnalysisError> {
        let slot = governor.admit()?;
        let io = EngineIo::spawn(&config.stockfish_path)?;
        Ok(Self::new(io, SessionKind::Pooled, config.session_options(), Some(slot)))
    }

    /// Spawn and initialize a native session.
    pub async fn start_native(config: &EngineConfig) -> Result<Self, AnalysisError> {
        let session = Self::native(config)?;
        session.initialize().await?;
        Ok(session)
    }

    pub fn with_io(io: EngineIo, options: SessionOptions) -> Self {
        Self::new(io, SessionKind::Native, options, None)
    }

    pub fn pooled_with_io(
        io: EngineIo,
        options: SessionOptions,
        governor: &Arc<PoolGovernor>,
    ) -> Result<Self, AnalysisError> {
        let slot = governor.admit()?;
        Ok(Self::new(io, SessionKind::Pooled, options, Some(slot)))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Analyses queued behind the one in flight.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    fn set_state(&self, state: SessionState) {
        debug!(session = self.id, ?state, "Session state");
        self.state.send_replace(state);
    }

    /// Run the UCI handshake and start serving analyses. Idempotent once ready.
    pub async fn initialize(&self) -> Result<(), AnalysisError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let startup = match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
            Lifecycle::Pending(startup) => startup,
            running @ Lifecycle::Running { .. } => {
                *lifecycle = running;
                return Ok(());
            }
            Lifecycle::Finished => {
                return Err(AnalysisError::EngineTerminated("session destroyed".to_string()))
            }
        };

        let Startup {
            mut io,
            mut drain,
            slot,
        } = *startup;

        if let Err(e) = self.handshake(&mut io).await {
            error!(session = self.id, error = %e, "Engine handshake failed");
            self.set_state(SessionState::Destroyed);
            drain.reject_all("engine handshake failed");
            io.shutdown().await;
            drop(slot);
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = Driver {
            session: self.id,
            io,
            drain,
            state: Arc::clone(&self.state),
            options: self.options.clone(),
            slot,
            shutdown: shutdown_rx,
            accumulator: Accumulator::default(),
            owes_bestmove: false,
        };
        *lifecycle = Lifecycle::Running {
            shutdown: shutdown_tx,
            driver: tokio::spawn(driver.run()),
        };
        info!(session = self.id, kind = ?self.kind, "Engine session ready");
        Ok(())
    }

    async fn handshake(&self, io: &mut EngineIo) -> Result<(), AnalysisError> {
        let failed = |e: AnalysisError| match e {
            AnalysisError::HandshakeFailure(_) => e,
            other => AnalysisError::HandshakeFailure(other.to_string()),
        };

        self.set_state(SessionState::AwaitingEngineReady);
        io.send(&UciCommand::Uci).await.map_err(failed)?;
        self.await_token(io, EngineLine::UciOk, "uciok").await.map_err(failed)?;

        self.set_state(SessionState::AwaitingSyncReady);
        io.send(&UciCommand::IsReady).await.map_err(failed)?;
        self.await_token(io, EngineLine::ReadyOk, "readyok").await.map_err(failed)?;

        self.set_state(SessionState::Configured);
        for cmd in [
            UciCommand::set_option("Hash", self.options.hash_mb),
            UciCommand::set_option("Threads", self.options.threads),
            UciCommand::UciNewGame,
        ] {
            io.send(&cmd).await.map_err(failed)?;
        }

        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Wait for a specific response line, bounded by the handshake timeout.
    async fn await_token(
        &self,
        io: &mut EngineIo,
        token: EngineLine,
        name: &str,
    ) -> Result<(), AnalysisError> {
        timeout(self.options.handshake_timeout, read_until(io, &token, name))
            .await
            .map_err(|_| {
                AnalysisError::HandshakeFailure(format!(
                    "no {name} within {:?}",
                    self.options.handshake_timeout
                ))
            })?
    }

    /// Queue an analysis without waiting for it.
    pub fn submit(&self, request: AnalysisRequest) -> Result<PendingAnalysis, AnalysisError> {
        match self.state() {
            SessionState::Idle | SessionState::Analyzing => {}
            SessionState::Destroyed => {
                return Err(AnalysisError::EngineTerminated("session destroyed".to_string()))
            }
            _ => return Err(AnalysisError::EngineNotInitialized),
        }
        let board = parse_fen(&request.fen)?;
        self.queue.enqueue(request, board)
    }

    pub async fn analyze_request(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.submit(request)?.wait().await
    }

    /// Analyze `fen` to `depth`, waiting behind any analyses already queued.
    pub async fn analyze(&self, fen: &str, depth: u32) -> Result<AnalysisResult, AnalysisError> {
        self.analyze_request(AnalysisRequest::new(fen, depth)).await
    }

    /// Stop the engine and fail everything still queued. Safe to call repeatedly.
    pub async fn destroy(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
            Lifecycle::Pending(startup) => {
                let Startup {
                    io,
                    mut drain,
                    slot,
                } = *startup;
                self.set_state(SessionState::Destroyed);
                drain.reject_all("session destroyed");
                io.shutdown().await;
                drop(slot);
                info!(session = self.id, "Engine session destroyed before start");
            }
            Lifecycle::Running { shutdown, driver } => {
                let _ = shutdown.send(());
                if let Err(e) = driver.await {
                    error!(session = self.id, error = %e, "Session driver panicked");
                    self.set_state(SessionState::Destroyed);
                }
            }
            Lifecycle::Finished => {}
        }
    }
}

async fn read_until(io: &mut EngineIo, token: &EngineLine, name: &str) -> Result<(), AnalysisError> {
    while let Some(line) = io.next_line().await? {
        if parse_line(&line) == *token {
            return Ok(());
        }
    }
    Err(AnalysisError::HandshakeFailure(format!(
        "engine exited before {name}"
    )))
}

/// Why the driver stopped.
#[derive(Debug)]
enum Exit {
    Destroyed,
    Dropped,
    Engine(String),
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Destroyed => f.write_str("session destroyed"),
            Exit::Dropped => f.write_str("session dropped"),
            Exit::Engine(reason) => f.write_str(reason),
        }
    }
}

enum SearchEnd {
    BestMove(AnalysisResult),
    Expired {
        expiry: Expiry,
        elapsed: Duration,
        salvaged: Option<AnalysisResult>,
    },
    Exit(Exit),
}

/// Owns the engine pipes once the handshake is done.
struct Driver {
    session: u64,
    io: EngineIo,
    drain: QueueDrain,
    state: Arc<watch::Sender<SessionState>>,
    options: SessionOptions,
    slot: Option<PoolSlot>,
    shutdown: oneshot::Receiver<()>,
    accumulator: Accumulator,
    /// A stopped search has not produced its `bestmove` yet. The next one
    /// read belongs to that search, whichever request is in flight.
    owes_bestmove: bool,
}

impl Driver {
    async fn run(mut self) {
        let exit = loop {
            tokio::select! {
                _ = &mut self.shutdown => break Exit::Destroyed,
                job = self.drain.next() => match job {
                    Some(job) => {
                        if let Err(exit) = self.run_job(job).await {
                            break exit;
                        }
                    }
                    None => break Exit::Dropped,
                },
                line = self.io.next_line() => match line {
                    Ok(Some(line)) => {
                        if self.owes_bestmove && matches!(parse_line(&line), EngineLine::BestMove { .. }) {
                            self.owes_bestmove = false;
                            debug!(session = self.session, "Late bestmove from stopped search discarded");
                        } else {
                            trace!(session = self.session, line = line.trim(), "Ignoring output while idle");
                        }
                    }
                    Ok(None) => break Exit::Engine("engine process exited".to_string()),
                    Err(e) => break Exit::Engine(format!("engine output unreadable: {e}")),
                },
            }
        };
        self.teardown(exit).await;
    }

    async fn run_job(&mut self, job: QueuedAnalysis) -> Result<(), Exit> {
        self.state.send_replace(SessionState::Analyzing);
        debug!(
            session = self.session,
            ticket = job.ticket,
            depth = job.request.depth,
            "Analysis started"
        );

        if let Err(exit) = self.settle_owed_bestmove().await {
            job.respond(Err(AnalysisError::EngineTerminated(exit.to_string())));
            return Err(exit);
        }

        match self.search(&job.request, &job.board).await {
            SearchEnd::BestMove(result) => {
                debug!(
                    session = self.session,
                    ticket = job.ticket,
                    eval = result.evaluation,
                    depth = result.depth,
                    source = ?result.source,
                    "Analysis complete"
                );
                self.state.send_replace(SessionState::Idle);
                job.respond(Ok(result));
                Ok(())
            }
            SearchEnd::Expired {
                expiry,
                elapsed,
                salvaged,
            } => {
                match salvaged {
                    Some(result) => {
                        warn!(
                            session = self.session,
                            ticket = job.ticket,
                            ?expiry,
                            depth = result.depth,
                            "Watchdog fired, returning partial result"
                        );
                        job.respond(Ok(result));
                    }
                    None => {
                        warn!(
                            session = self.session,
                            ticket = job.ticket,
                            ?expiry,
                            "Watchdog fired with nothing to salvage"
                        );
                        job.respond(Err(AnalysisError::AnalysisTimeout(elapsed)));
                    }
                }
                self.swallow_late_bestmove().await?;
                self.state.send_replace(SessionState::Idle);
                Ok(())
            }
            SearchEnd::Exit(exit) => {
                job.respond(Err(AnalysisError::EngineTerminated(exit.to_string())));
                Err(exit)
            }
        }
    }

    async fn search(&mut self, request: &AnalysisRequest, board: &Board) -> SearchEnd {
        let side_to_move = board.side_to_move();
        self.accumulator.reset();
        let commands = [
            UciCommand::Position {
                fen: request.fen.clone(),
            },
            UciCommand::Go {
                depth: Some(request.depth.max(1)),
                movetime: request.movetime,
            },
        ];
        for cmd in &commands {
            if let Err(e) = self.io.send(cmd).await {
                return SearchEnd::Exit(Exit::Engine(format!("failed to write to engine: {e}")));
            }
        }

        let mut watchdog = Watchdog::arm(self.options.limits);
        loop {
            tokio::select! {
                _ = &mut self.shutdown => {
                    let _ = self.io.send(&UciCommand::Stop).await;
                    return SearchEnd::Exit(Exit::Destroyed);
                }
                expiry = watchdog.expired() => {
                    let _ = self.io.send(&UciCommand::Stop).await;
                    let salvaged = self
                        .accumulator
                        .salvage(side_to_move)
                        .map(|result| self.legal_best_move(result, board));
                    return SearchEnd::Expired {
                        expiry,
                        elapsed: watchdog.elapsed(),
                        salvaged,
                    };
                }
                line = self.io.next_line() => match line {
                    Ok(Some(line)) => match parse_line(&line) {
                        EngineLine::Info(info) => {
                            watchdog.touch();
                            self.accumulator.apply(&info);
                        }
                        EngineLine::BestMove { best, .. } if self.owes_bestmove => {
                            self.owes_bestmove = false;
                            debug!(
                                session = self.session,
                                best = best.as_deref().unwrap_or("(none)"),
                                "Discarded bestmove owed by a stopped search"
                            );
                        }
                        EngineLine::BestMove { best, .. } => {
                            let result = self.accumulator.finish(best, side_to_move);
                            return SearchEnd::BestMove(self.legal_best_move(result, board));
                        }
                        _ => {}
                    },
                    Ok(None) => {
                        return SearchEnd::Exit(Exit::Engine(
                            "engine process exited mid-analysis".to_string(),
                        ));
                    }
                    Err(e) => {
                        return SearchEnd::Exit(Exit::Engine(format!("engine output unreadable: {e}")));
                    }
                },
            }
        }
    }

    /// Strip a best move that cannot be played on `board`.
    fn legal_best_move(&self, mut result: AnalysisResult, board: &Board) -> AnalysisResult {
        if let Some(best) = result.best_move.as_deref() {
            if parse_uci_move(board, best).is_none() {
                warn!(
                    session = self.session,
                    best,
                    fen = %board,
                    "Engine best move is not legal in the searched position, dropped"
                );
                result.best_move = None;
            }
        }
        result
    }

    /// After a forced `stop` the engine still owes a `bestmove`; eat it so the
    /// next search doesn't take it as its own. If it is slower than the stop
    /// grace, the debt carries over to the next search.
    async fn swallow_late_bestmove(&mut self) -> Result<(), Exit> {
        let grace = self.options.stop_grace;
        let io = &mut self.io;
        let wait = async {
            loop {
                match io.next_line().await {
                    Ok(Some(line)) => {
                        if matches!(parse_line(&line), EngineLine::BestMove { .. }) {
                            return Ok(());
                        }
                    }
                    Ok(None) => return Err(Exit::Engine("engine process exited after stop".to_string())),
                    Err(e) => return Err(Exit::Engine(format!("engine output unreadable: {e}"))),
                }
            }
        };
        match timeout(grace, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session = self.session, ?grace, "Engine did not answer stop in time");
                self.owes_bestmove = true;
                Ok(())
            }
        }
    }

    /// Before starting a search while a `bestmove` is still owed, sync with
    /// `isready` and give the stopped search up to the idle limit to finish.
    /// An engine that never answers `isready` is considered hung.
    async fn settle_owed_bestmove(&mut self) -> Result<(), Exit> {
        if !self.owes_bestmove {
            return Ok(());
        }
        if let Err(e) = self.io.send(&UciCommand::IsReady).await {
            return Err(Exit::Engine(format!("failed to write to engine: {e}")));
        }

        let deadline = Instant::now() + self.options.limits.idle.max(self.options.handshake_timeout);
        let mut ready = false;
        while !ready || self.owes_bestmove {
            let line = match timeout_at(deadline, self.io.next_line()).await {
                Ok(line) => line,
                Err(_) => break,
            };
            match line {
                Ok(Some(line)) => match parse_line(&line) {
                    EngineLine::ReadyOk => ready = true,
                    EngineLine::BestMove { .. } => {
                        self.owes_bestmove = false;
                        debug!(session = self.session, "Late bestmove from stopped search discarded");
                    }
                    _ => {}
                },
                Ok(None) => return Err(Exit::Engine("engine process exited".to_string())),
                Err(e) => return Err(Exit::Engine(format!("engine output unreadable: {e}"))),
            }
        }

        if !ready {
            return Err(Exit::Engine("engine stopped answering isready".to_string()));
        }
        if self.owes_bestmove {
            warn!(
                session = self.session,
                "Stopped search never answered, next bestmove will be discarded"
            );
        }
        Ok(())
    }

    async fn teardown(mut self, exit: Exit) {
        self.state.send_replace(SessionState::Destroyed);
        let reason = exit.to_string();
        let rejected = self.drain.reject_all(&reason);
        match exit {
            Exit::Engine(_) => {
                error!(session = self.session, reason = %reason, rejected, "Engine terminated")
            }
            _ => info!(session = self.session, reason = %reason, rejected, "Engine session closed"),
        }
        self.io.shutdown().await;
        if let Some(slot) = self.slot.as_mut() {
            slot.release();
        }
    }
}
