//! Engine analysis error types

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("Engine handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("Engine not initialized")]
    EngineNotInitialized,

    #[error("Invalid position '{fen}': {reason}")]
    PositionInvalid { fen: String, reason: String },

    #[error("Analysis timed out after {0:?} with no usable result")]
    AnalysisTimeout(Duration),

    #[error("Engine terminated: {0}")]
    EngineTerminated(String),

    #[error("Engine pool exhausted ({active}/{ceiling} instances live)")]
    PoolExhausted { active: usize, ceiling: usize },

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Session-level failures after which no further analysis can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AnalysisError::HandshakeFailure(_)
                | AnalysisError::EngineNotInitialized
                | AnalysisError::EngineTerminated(_)
                | AnalysisError::Io(_)
        )
    }

    pub(crate) fn invalid_position(fen: &str, reason: impl ToString) -> Self {
        AnalysisError::PositionInvalid {
            fen: fen.to_string(),
            reason: reason.to_string(),
        }
    }
}
