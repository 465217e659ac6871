use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shakmaty::uci::UciMove;
use shakmaty::{Role, Square};

use crate::error::GameError;

pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMetadata {
    pub white: String,
    pub black: String,
    pub result: String, // "1-0", "0-1", "1/2-1/2", "*"
    pub date: Option<String>,
    pub event: Option<String>,
    pub eco: Option<String>,
}

/// A single played move in coordinate form. Castling is king-to-destination
/// (`e1g1`), the way UCI engines expect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GameMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

impl GameMove {
    pub fn new(from: Square, to: Square, promotion: Option<Role>) -> Self {
        Self {
            from,
            to,
            promotion,
        }
    }

    /// Coordinate notation, e.g. `e2e4` or `e7e8q`.
    pub fn to_uci(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GameMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(role) = self.promotion {
            write!(f, "{}", role.char())?;
        }
        Ok(())
    }
}

impl FromStr for GameMove {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uci: UciMove = s
            .trim()
            .parse()
            .map_err(|_| GameError::InvalidUci(s.to_string()))?;
        match uci {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => Ok(Self::new(from, to, promotion)),
            _ => Err(GameError::InvalidUci(s.to_string())),
        }
    }
}

/// An ordered list of moves from a start position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Game {
    pub metadata: GameMetadata,
    /// `None` means the standard starting position.
    pub start_fen: Option<String>,
    pub moves: Vec<GameMove>,
}

impl Game {
    /// Build a game from coordinate moves. Moves are parsed, not legality-checked.
    pub fn from_uci_moves(start_fen: Option<&str>, moves: &[&str]) -> Result<Self, GameError> {
        let moves = moves
            .iter()
            .map(|m| m.parse())
            .collect::<Result<Vec<GameMove>, _>>()?;
        Ok(Self {
            metadata: GameMetadata::default(),
            start_fen: start_fen.map(str::to_string),
            moves,
        })
    }

    pub fn start_fen(&self) -> &str {
        self.start_fen.as_deref().unwrap_or(STANDARD_START_FEN)
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}
