//! Game input error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("Invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("Invalid coordinate move: {0}")]
    InvalidUci(String),

    #[error("Invalid SAN '{san}' at ply {ply}: {reason}")]
    InvalidSan {
        san: String,
        ply: usize,
        reason: String,
    },

    #[error("PGN contains no moves")]
    EmptyPgn,
}
