//! Evaluation normalization.
//!
//! Engines report scores relative to the side to move. Everything downstream
//! works in one canonical perspective: positive = good for White.

use chess::Color;
use serde::{Deserialize, Serialize};

use crate::uci::Score;

/// The side every normalized evaluation is expressed for.
pub const REFERENCE_SIDE: Color = Color::White;

/// Magnitude of a mate-in-0 surrogate; no evaluation exceeds it.
pub const MATE_SCORE: i32 = 10_000;

/// Surrogate shrinks by this much per move of mate distance.
pub const MATE_STEP: i32 = 100;

/// Beyond this distance all mates share the smallest surrogate (1000 cp).
pub const MAX_MATE_DISTANCE: i32 = 90;

/// A score in the canonical perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Centipawns, positive = White is better
    pub centipawns: i32,
    /// Mate distance in moves, positive = White mates
    pub mate: Option<i32>,
}

impl Evaluation {
    pub fn centipawns(cp: i32) -> Self {
        Self {
            centipawns: cp,
            mate: None,
        }
    }

    /// `+0.35`, `-1.20`, `#3`, `#-2`; a position that is already mate shows
    /// the result, `1-0` or `0-1`.
    pub fn display(&self) -> String {
        match self.mate {
            Some(0) if self.centipawns > 0 => "1-0".to_string(),
            Some(0) => "0-1".to_string(),
            Some(m) if self.centipawns < 0 => format!("#-{}", m.unsigned_abs()),
            Some(m) => format!("#{}", m.unsigned_abs()),
            None => format!("{:+.2}", self.centipawns as f64 / 100.0),
        }
    }
}

/// Centipawn surrogate for "mate in N" from the side to move's view.
///
/// `mate 0` means the side to move is already mated.
pub fn mate_to_cp(mate: i32) -> i32 {
    if mate == 0 {
        return -MATE_SCORE;
    }
    let distance = mate.abs().min(MAX_MATE_DISTANCE);
    mate.signum() * (MATE_SCORE - MATE_STEP * distance)
}

/// Convert a side-to-move score into the canonical perspective.
pub fn normalize(score: Score, side_to_move: Color) -> Evaluation {
    let flip = |v: i32| {
        if side_to_move == REFERENCE_SIDE {
            v
        } else {
            -v
        }
    };
    match score {
        Score::Centipawns(cp) => Evaluation::centipawns(flip(cp.clamp(-MATE_SCORE, MATE_SCORE))),
        Score::Mate(m) => Evaluation {
            centipawns: flip(mate_to_cp(m)),
            mate: Some(flip(m)),
        },
    }
}
