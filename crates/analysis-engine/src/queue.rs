//! Per-session FIFO of pending analyses.
//!
//! Callers enqueue through [`AnalysisQueue`]; the session driver pulls one job
//! at a time from [`QueueDrain`] and only asks for the next once the engine is
//! idle again. Jobs whose caller has gone away are skipped, never started.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chess::Board;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::accumulator::AnalysisResult;
use crate::error::AnalysisError;
use crate::session::AnalysisRequest;

pub type AnalysisReply = Result<AnalysisResult, AnalysisError>;

/// One unit of queued work.
#[derive(Debug)]
pub struct QueuedAnalysis {
    pub ticket: u64,
    pub request: AnalysisRequest,
    /// Parsed from `request.fen` at enqueue time
    pub board: Board,
    reply: oneshot::Sender<AnalysisReply>,
}

impl QueuedAnalysis {
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    pub fn respond(self, reply: AnalysisReply) {
        if self.reply.send(reply).is_err() {
            debug!(ticket = self.ticket, "Caller gone before result was delivered");
        }
    }
}

/// Handle to an analysis that has been queued but may not have started.
/// Dropping it before the driver reaches it cancels the analysis.
#[derive(Debug)]
pub struct PendingAnalysis {
    ticket: u64,
    rx: oneshot::Receiver<AnalysisReply>,
}

impl PendingAnalysis {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub async fn wait(self) -> AnalysisReply {
        self.rx.await.unwrap_or_else(|_| {
            Err(AnalysisError::EngineTerminated(
                "session closed before the analysis completed".to_string(),
            ))
        })
    }
}

/// Sending half, owned by the session.
#[derive(Debug)]
pub struct AnalysisQueue {
    tx: mpsc::UnboundedSender<QueuedAnalysis>,
    depth: Arc<AtomicUsize>,
    next_ticket: AtomicU64,
}

/// Receiving half, owned by the session driver.
#[derive(Debug)]
pub struct QueueDrain {
    rx: mpsc::UnboundedReceiver<QueuedAnalysis>,
    depth: Arc<AtomicUsize>,
}

pub fn channel() -> (AnalysisQueue, QueueDrain) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        AnalysisQueue {
            tx,
            depth: Arc::clone(&depth),
            next_ticket: AtomicU64::new(0),
        },
        QueueDrain { rx, depth },
    )
}

impl AnalysisQueue {
    pub fn enqueue(
        &self,
        request: AnalysisRequest,
        board: Board,
    ) -> Result<PendingAnalysis, AnalysisError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        let job = QueuedAnalysis {
            ticket,
            request,
            board,
            reply,
        };
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(AnalysisError::EngineTerminated(
                "session is no longer accepting work".to_string(),
            ));
        }
        debug!(ticket, pending = self.pending(), "Analysis queued");
        Ok(PendingAnalysis { ticket, rx })
    }

    /// Jobs queued but not yet picked up by the driver.
    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

impl QueueDrain {
    /// Next live job in submission order; `None` once every sender is gone.
    /// Cancel-safe: a job is only removed from the channel when returned or skipped.
    pub async fn next(&mut self) -> Option<QueuedAnalysis> {
        loop {
            let job = self.rx.recv().await?;
            self.depth.fetch_sub(1, Ordering::AcqRel);
            if job.is_abandoned() {
                debug!(ticket = job.ticket, "Skipping analysis abandoned by caller");
                continue;
            }
            return Some(job);
        }
    }

    /// Stop accepting work and fail everything still queued.
    pub fn reject_all(&mut self, reason: &str) -> usize {
        self.rx.close();
        let mut rejected = 0;
        while let Ok(job) = self.rx.try_recv() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            job.respond(Err(AnalysisError::EngineTerminated(reason.to_string())));
            rejected += 1;
        }
        rejected
    }
}
