//! In-progress search state and the result it turns into.

use chess::Color;
use serde::{Deserialize, Serialize};

use crate::eval::{normalize, Evaluation};
use crate::uci::{InfoLine, Score};

/// How a result came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Normal `bestmove` after at least one scored `info` line
    Engine,
    /// Watchdog fired; built from the last `info` line seen
    Salvaged,
    /// `bestmove` arrived with no scored `info` line (depth 1, eval 0)
    Degenerate,
    /// Analysis failed; placeholder kept by game analysis (depth 0, eval 0)
    Failed,
}

/// One finished analysis of one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Centipawns, positive = White is better
    pub evaluation: i32,
    /// Best move in coordinate notation; `None` in terminal positions
    pub best_move: Option<String>,
    pub depth: u32,
    /// Mate distance in moves, positive = White mates
    pub mate: Option<i32>,
    pub pv: Vec<String>,
    pub source: ResultSource,
}

impl AnalysisResult {
    pub(crate) fn failed() -> Self {
        Self {
            evaluation: 0,
            best_move: None,
            depth: 0,
            mate: None,
            pv: Vec::new(),
            source: ResultSource::Failed,
        }
    }

    /// `true` when the evaluation came out of a real search.
    pub fn is_reliable(&self) -> bool {
        matches!(self.source, ResultSource::Engine | ResultSource::Salvaged)
    }

    pub fn eval(&self) -> Evaluation {
        Evaluation {
            centipawns: self.evaluation,
            mate: self.mate,
        }
    }
}

/// Fields collected from `info` lines, last write wins.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    depth: Option<u32>,
    score: Option<Score>,
    pv: Vec<String>,
}

impl Accumulator {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn apply(&mut self, info: &InfoLine) {
        if !info.is_primary() {
            return;
        }
        if let Some(depth) = info.depth {
            self.depth = Some(depth);
        }
        if let Some(score) = info.score {
            self.score = Some(score);
        }
        if !info.pv.is_empty() {
            self.pv = info.pv.clone();
        }
    }

    /// Tentative best move: head of the latest principal variation.
    pub fn best_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }

    /// Finalize on `bestmove`. Always produces a result.
    pub fn finish(&self, best_move: Option<String>, side_to_move: Color) -> AnalysisResult {
        let best_move = best_move.or_else(|| self.best_move().map(str::to_string));
        match self.score {
            Some(score) => self.build(score, best_move, side_to_move, ResultSource::Engine),
            None => AnalysisResult {
                evaluation: 0,
                best_move,
                depth: self.depth.unwrap_or(1),
                mate: None,
                pv: self.pv.clone(),
                source: ResultSource::Degenerate,
            },
        }
    }

    /// Best-effort result when the engine stops responding; needs a move and a score.
    pub fn salvage(&self, side_to_move: Color) -> Option<AnalysisResult> {
        let score = self.score?;
        let best = self.best_move()?.to_string();
        Some(self.build(score, Some(best), side_to_move, ResultSource::Salvaged))
    }

    fn build(
        &self,
        score: Score,
        best_move: Option<String>,
        side_to_move: Color,
        source: ResultSource,
    ) -> AnalysisResult {
        let eval = normalize(score, side_to_move);
        AnalysisResult {
            evaluation: eval.centipawns,
            best_move,
            depth: self.depth.unwrap_or(1),
            mate: eval.mate,
            pv: self.pv.clone(),
            source,
        }
    }
}
