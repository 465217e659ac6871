/// Move quality classification and accuracy — pure functions only
/// (No session/engine/board dependencies)

use serde::{Deserialize, Serialize};

/// Classification thresholds (centipawn loss, inclusive upper bounds)
pub const THRESHOLD_BEST: i32 = 50;
pub const THRESHOLD_OKAY: i32 = 120;
pub const THRESHOLD_INACCURACY: i32 = 250;

/// A sign flip smaller than this is never worse than an inaccuracy
pub const SIGN_FLIP_WINDOW: i32 = 250;

/// Evaluations are clamped to +/- this before comparison (mate cap)
pub const EVAL_CAP: i32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveQuality {
    Best,
    Okay,
    Inaccuracy,
    Blunder,
}

impl MoveQuality {
    /// Contribution of one move to the weighted accuracy.
    pub fn weight(self) -> f64 {
        match self {
            MoveQuality::Best => 1.0,
            MoveQuality::Okay => 0.8,
            MoveQuality::Inaccuracy => 0.5,
            MoveQuality::Blunder => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MoveQuality::Best => "best",
            MoveQuality::Okay => "okay",
            MoveQuality::Inaccuracy => "inaccuracy",
            MoveQuality::Blunder => "blunder",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classifications {
    pub best: u32,
    pub okay: u32,
    pub inaccuracy: u32,
    pub blunder: u32,
}

impl Classifications {
    pub fn record(&mut self, quality: MoveQuality) {
        match quality {
            MoveQuality::Best => self.best += 1,
            MoveQuality::Okay => self.okay += 1,
            MoveQuality::Inaccuracy => self.inaccuracy += 1,
            MoveQuality::Blunder => self.blunder += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.best + self.okay + self.inaccuracy + self.blunder
    }
}

pub fn clamp_eval(eval: i32) -> i32 {
    eval.clamp(-EVAL_CAP, EVAL_CAP)
}

/// Distance between the best continuation and the played one, after the mate cap.
pub fn centipawn_loss(eval_after: i32, eval_best: i32) -> i32 {
    (clamp_eval(eval_best) - clamp_eval(eval_after)).abs()
}

fn is_sign_flip(eval_before: i32, eval_after: i32) -> bool {
    eval_before.signum() * eval_after.signum() < 0
}

/// Classify a played move from three canonical evaluations:
/// the position before it, after it, and after the engine's best move.
pub fn classify_move(eval_before: i32, eval_after: i32, eval_best: i32) -> MoveQuality {
    let after = clamp_eval(eval_after);
    let loss = centipawn_loss(eval_after, eval_best);

    if is_sign_flip(eval_before, after) && (after - eval_before).abs() < SIGN_FLIP_WINDOW {
        return MoveQuality::Inaccuracy;
    }

    if loss <= THRESHOLD_BEST {
        MoveQuality::Best
    } else if loss <= THRESHOLD_OKAY {
        MoveQuality::Okay
    } else if loss <= THRESHOLD_INACCURACY {
        MoveQuality::Inaccuracy
    } else {
        MoveQuality::Blunder
    }
}

/// Weighted accuracy in percent; an empty sequence is 100.
pub fn accuracy_from_qualities(qualities: &[MoveQuality]) -> u32 {
    if qualities.is_empty() {
        return 100;
    }
    let sum: f64 = qualities.iter().map(|q| q.weight()).sum();
    (100.0 * sum / qualities.len() as f64).round() as u32
}

pub fn average_cp_loss(total_cp_loss: i32, move_count: u32) -> f64 {
    if move_count == 0 {
        return 0.0;
    }
    total_cp_loss as f64 / move_count as f64
}

/// Continuous accuracy from average centipawn loss.
pub fn accuracy_from_acpl(acpl: f64) -> u32 {
    let acpl = acpl.max(0.0);
    let accuracy = 100.0 / (1.0 + (acpl / 8.0).powf(0.6));
    accuracy.clamp(0.0, 100.0).round() as u32
}
