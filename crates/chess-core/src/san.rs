//! SAN rendering for coordinate moves.

use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, File, Move, Square};

use crate::error::GameError;
use crate::game_data::GameMove;

/// Parse a FEN into a playable position.
pub fn position_from_fen(fen: &str) -> Result<Chess, GameError> {
    let parsed: Fen = fen.trim().parse().map_err(|e| GameError::InvalidFen {
        fen: fen.to_string(),
        reason: format!("{e}"),
    })?;
    parsed
        .into_position::<Chess>(CastlingMode::Standard)
        .map_err(|e| GameError::InvalidFen {
            fen: fen.to_string(),
            reason: format!("{e}"),
        })
}

/// Convert a single UCI move to SAN at a given position.
pub fn uci_to_san(pos: &Chess, uci_str: &str) -> Option<String> {
    let uci_move: UciMove = uci_str.parse().ok()?;
    let legal_move = uci_move.to_move(pos).ok()?;
    Some(San::from_move(pos, legal_move).to_string())
}

/// Convert a UCI move to SAN in the position described by `fen`.
pub fn fen_uci_to_san(fen: &str, uci_str: &str) -> Option<String> {
    let pos = position_from_fen(fen).ok()?;
    uci_to_san(&pos, uci_str)
}

/// Coordinate form of a legal shakmaty move (castling as king-to-destination).
pub fn game_move_from(mv: &Move) -> Option<GameMove> {
    match mv {
        Move::Normal {
            from,
            to,
            promotion,
            ..
        } => Some(GameMove::new(*from, *to, *promotion)),
        Move::EnPassant { from, to } => Some(GameMove::new(*from, *to, None)),
        Move::Castle { king, rook } => {
            let file = if rook.file() > king.file() {
                File::G
            } else {
                File::C
            };
            Some(GameMove::new(
                *king,
                Square::from_coords(file, king.rank()),
                None,
            ))
        }
        _ => None,
    }
}
