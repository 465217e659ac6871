//! Game input for engine analysis: move lists, PGN import and SAN rendering.

pub mod error;
pub mod game_data;
pub mod pgn;
pub mod san;

pub use error::GameError;
pub use game_data::{Game, GameMetadata, GameMove, STANDARD_START_FEN};
