//! UCI engine analysis: sessions, evaluation normalization, move quality and
//! whole-game analysis.

pub use chess;

pub mod accumulator;
pub mod analysis;
pub mod analyzer;
pub mod board_utils;
pub mod config;
pub mod error;
pub mod eval;
pub mod pool;
pub mod queue;
pub mod session;
pub mod uci;
pub mod watchdog;

pub use accumulator::{AnalysisResult, ResultSource};
pub use analysis::{classify_move, MoveQuality};
pub use analyzer::{GameAnalysisRecord, GameAnalyzer, GameSummary, Progress};
pub use config::{EngineConfig, SessionOptions};
pub use error::AnalysisError;
pub use eval::{normalize, Evaluation};
pub use pool::{PoolGovernor, PoolSlot};
pub use session::{AnalysisRequest, EngineIo, EngineSession, SessionKind, SessionState};
pub use watchdog::WatchdogLimits;
