/// Board-state helpers: FEN validation, coordinate move parsing and application

use std::str::FromStr;

use chess::{Board, ChessMove, File, MoveGen, Piece, Rank, Square};
use chess_core::GameMove;

use crate::error::AnalysisError;

/// Parse and sanity-check a FEN before it goes anywhere near the engine.
pub fn parse_fen(fen: &str) -> Result<Board, AnalysisError> {
    let trimmed = fen.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::invalid_position(fen, "empty FEN"));
    }
    if trimmed.contains(['\n', '\r']) {
        return Err(AnalysisError::invalid_position(fen, "FEN spans multiple lines"));
    }
    Board::from_str(trimmed).map_err(|e| AnalysisError::invalid_position(fen, e))
}

pub fn to_fen(board: &Board) -> String {
    board.to_string()
}

/// Parse a coordinate move (`e2e4`, `e7e8q`) that is legal on `board`.
pub fn parse_uci_move(board: &Board, uci: &str) -> Option<ChessMove> {
    let bytes = uci.trim().as_bytes();
    if bytes.len() != 4 && bytes.len() != 5 {
        return None;
    }
    let square = |file: u8, rank: u8| {
        if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
            return None;
        }
        Some(Square::make_square(
            Rank::from_index((rank - b'1') as usize),
            File::from_index((file - b'a') as usize),
        ))
    };
    let from = square(bytes[0], bytes[1])?;
    let to = square(bytes[2], bytes[3])?;

    let promotion = match bytes.get(4) {
        None => None,
        Some(b'q' | b'Q') => Some(Piece::Queen),
        Some(b'r' | b'R') => Some(Piece::Rook),
        Some(b'b' | b'B') => Some(Piece::Bishop),
        Some(b'n' | b'N') => Some(Piece::Knight),
        Some(_) => return None,
    };

    let candidate = ChessMove::new(from, to, promotion);
    board.legal(candidate).then_some(candidate)
}

/// Play a coordinate move on a copy of `board`.
pub fn apply_uci(board: &Board, uci: &str) -> Option<Board> {
    parse_uci_move(board, uci).map(|m| board.make_move_new(m))
}

pub fn game_move_to_chess(board: &Board, game_move: &GameMove) -> Option<ChessMove> {
    parse_uci_move(board, &game_move.to_uci())
}

pub fn legal_move_count(board: &Board) -> usize {
    MoveGen::new_legal(board).len()
}
