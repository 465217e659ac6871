//! PGN parsing utilities — lightweight regex-based parser.

use regex::Regex;
use shakmaty::san::San;
use shakmaty::{Chess, Position};

use crate::error::GameError;
use crate::game_data::{Game, GameMetadata, GameMove, STANDARD_START_FEN};
use crate::san::{game_move_from, position_from_fen};

/// Parse a PGN string into a replayable `Game`.
/// SAN moves are resolved against the running position, so the returned
/// move list is legal from the start position.
pub fn parse_pgn(pgn: &str) -> Result<Game, GameError> {
    let metadata = GameMetadata {
        white: extract_header(pgn, "White").unwrap_or_else(|| "Unknown".to_string()),
        black: extract_header(pgn, "Black").unwrap_or_else(|| "Unknown".to_string()),
        result: extract_header(pgn, "Result").unwrap_or_else(|| "*".to_string()),
        date: extract_header(pgn, "Date"),
        event: extract_header(pgn, "Event"),
        eco: extract_header(pgn, "ECO"),
    };

    // A FEN header only counts with SetUp "1" or no SetUp at all
    let start_fen = match (extract_header(pgn, "SetUp"), extract_header(pgn, "FEN")) {
        (Some(setup), Some(fen)) if setup == "1" => Some(fen),
        (None, Some(fen)) => Some(fen),
        _ => None,
    }
    .filter(|fen| fen != STANDARD_START_FEN);

    let san_moves = extract_moves(pgn);
    if san_moves.is_empty() {
        return Err(GameError::EmptyPgn);
    }

    let mut pos = match &start_fen {
        Some(fen) => position_from_fen(fen)?,
        None => Chess::default(),
    };
    let moves = replay_san(&mut pos, &san_moves)?;

    Ok(Game {
        metadata,
        start_fen,
        moves,
    })
}

/// Resolve SAN moves one by one, advancing `pos`.
fn replay_san(pos: &mut Chess, san_moves: &[String]) -> Result<Vec<GameMove>, GameError> {
    let mut moves = Vec::with_capacity(san_moves.len());
    for (ply, san_str) in san_moves.iter().enumerate() {
        let invalid = |reason: String| GameError::InvalidSan {
            san: san_str.clone(),
            ply,
            reason,
        };
        let san: San = san_str.parse().map_err(|e| invalid(format!("{e}")))?;
        let mv = san.to_move(pos).map_err(|e| invalid(format!("{e}")))?;
        let game_move =
            game_move_from(&mv).ok_or_else(|| invalid("unsupported move".to_string()))?;
        pos.play_unchecked(mv);
        moves.push(game_move);
    }
    Ok(moves)
}

/// Extract SAN moves from PGN text (after removing headers, comments, variations).
fn extract_moves(pgn: &str) -> Vec<String> {
    // Remove headers
    let header_re = Regex::new(r"\[[^\]]*\]").unwrap();
    let no_headers = header_re.replace_all(pgn, "");

    // Remove comments
    let comment_re = Regex::new(r"\{[^}]*\}").unwrap();
    let no_comments = comment_re.replace_all(&no_headers, "");

    // Remove variations
    let variation_re = Regex::new(r"\([^)]*\)").unwrap();
    let no_variations = variation_re.replace_all(&no_comments, "");

    // Remove NAGs
    let nag_re = Regex::new(r"\$\d+").unwrap();
    let clean = nag_re.replace_all(&no_variations, "");

    let move_re =
        Regex::new(r"[KQRBN]?[a-h]?[1-8]?x?[a-h][1-8](?:=[QRBN])?|O-O-O|O-O").unwrap();

    move_re
        .find_iter(&clean)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Extract a string value from a PGN header (e.g. White, FEN).
pub fn extract_header(pgn: &str, header_name: &str) -> Option<String> {
    let pattern = format!(r#"\[{}\s+"([^"]*)"\]"#, regex::escape(header_name));
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(pgn)?.get(1)?.as_str().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
