//! Whole-game analysis
//!
//! Analyzes every ply of a game on one session, then classifies each played
//! move against a reduced-depth lookahead of the engine's preferred move.

use std::collections::BTreeMap;

use chess::{Board, Color};
use chess_core::san::fen_uci_to_san;
use chess_core::Game;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::accumulator::AnalysisResult;
use crate::analysis::{
    accuracy_from_acpl, accuracy_from_qualities, average_cp_loss, centipawn_loss, classify_move,
    Classifications, MoveQuality,
};
use crate::board_utils::{game_move_to_chess, parse_fen, parse_uci_move, to_fen};
use crate::config::EngineConfig;
use crate::error::AnalysisError;
use crate::session::EngineSession;

/// Reported after every analyzed ply.
///
/// `total` counts the plies that will be analyzed: one per position reached
/// by the replayable moves, so M+1 for a fully legal game of M moves and
/// fewer when replay stops at an illegal move (see
/// [`GameAnalysisRecord::truncated_at`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// The move that led out of a ply, and how it compares to the engine's choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedMove {
    pub uci: String,
    pub san: Option<String>,
    pub is_white: bool,
    pub best_move: Option<String>,
    pub best_san: Option<String>,
    /// Lookahead evaluation after the best move; absent when classification was skipped
    pub eval_best: Option<i32>,
    pub quality: Option<MoveQuality>,
    pub cp_loss: Option<i32>,
}

/// One analyzed position. `played` is set on every ply but the last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlyAnalysis {
    pub ply: usize,
    pub fen: String,
    pub result: AnalysisResult,
    pub played: Option<PlayedMove>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameAnalysisRecord {
    /// Keyed by ply, 0 = starting position
    pub plies: BTreeMap<usize, PlyAnalysis>,
    /// Positions analyzed; equals the game length plus one unless truncated
    pub total_plies: usize,
    /// Index of the first game move that could not be replayed, if any
    pub truncated_at: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideSummary {
    pub moves: u32,
    pub classifications: Classifications,
    pub total_cp_loss: i32,
    pub average_cp_loss: f64,
    pub accuracy: u32,
    pub acpl_accuracy: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub white: SideSummary,
    pub black: SideSummary,
}

impl GameAnalysisRecord {
    pub fn get(&self, ply: usize) -> Option<&PlyAnalysis> {
        self.plies.get(&ply)
    }

    /// Qualities of classified moves, in game order.
    pub fn qualities(&self) -> impl Iterator<Item = (bool, MoveQuality)> + '_ {
        self.plies.values().filter_map(|ply| {
            let played = ply.played.as_ref()?;
            Some((played.is_white, played.quality?))
        })
    }

    /// Per-side counts and accuracy over classified moves.
    pub fn summary(&self) -> GameSummary {
        let mut white = (SideSummary::default(), Vec::new());
        let mut black = (SideSummary::default(), Vec::new());

        for played in self.plies.values().filter_map(|p| p.played.as_ref()) {
            let (Some(quality), Some(cp_loss)) = (played.quality, played.cp_loss) else {
                continue;
            };
            let (side, qualities) = if played.is_white { &mut white } else { &mut black };
            side.moves += 1;
            side.total_cp_loss += cp_loss;
            side.classifications.record(quality);
            qualities.push(quality);
        }

        let finish = |(mut side, qualities): (SideSummary, Vec<MoveQuality>)| {
            side.average_cp_loss = average_cp_loss(side.total_cp_loss, side.moves);
            side.accuracy = accuracy_from_qualities(&qualities);
            side.acpl_accuracy = accuracy_from_acpl(side.average_cp_loss);
            side
        };

        GameSummary {
            white: finish(white),
            black: finish(black),
        }
    }
}

/// Drives a session through a game.
#[derive(Debug)]
pub struct GameAnalyzer<'a> {
    session: &'a EngineSession,
    depth: u32,
    lookahead_depth: u32,
}

impl<'a> GameAnalyzer<'a> {
    /// Lookahead depth defaults to two thirds of `depth`.
    pub fn new(session: &'a EngineSession, depth: u32) -> Self {
        Self {
            session,
            depth: depth.max(1),
            lookahead_depth: (depth * 2 / 3).max(1),
        }
    }

    pub fn from_config(session: &'a EngineSession, config: &EngineConfig) -> Self {
        Self::new(session, config.analysis_depth)
            .with_lookahead_depth(config.effective_lookahead_depth())
    }

    /// Clamped to `1..=depth`.
    pub fn with_lookahead_depth(mut self, lookahead_depth: u32) -> Self {
        self.lookahead_depth = lookahead_depth.clamp(1, self.depth);
        self
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn lookahead_depth(&self) -> u32 {
        self.lookahead_depth
    }

    /// Analyze every ply of `game`, calling `on_progress` after each one.
    ///
    /// A ply whose analysis fails is kept as a `Failed` placeholder and the
    /// game continues. Only session-level failures abort.
    pub async fn analyze_game<F>(
        &self,
        game: &Game,
        mut on_progress: F,
    ) -> Result<GameAnalysisRecord, AnalysisError>
    where
        F: FnMut(Progress),
    {
        let (boards, moves, truncated_at) = replay(game)?;
        let total = boards.len();
        info!(
            session = self.session.id(),
            plies = total,
            depth = self.depth,
            lookahead_depth = self.lookahead_depth,
            "Starting game analysis"
        );

        let mut plies: BTreeMap<usize, PlyAnalysis> = BTreeMap::new();
        let mut lookahead: Option<Option<i32>> = None;

        for (ply, board) in boards.iter().enumerate() {
            let fen = to_fen(board);
            let result = self.analyze_ply(ply, &fen, self.depth).await?;

            if ply > 0 {
                if let Some(prev) = plies.get_mut(&(ply - 1)) {
                    let eval_best = lookahead.take().flatten();
                    classify(prev, &result, eval_best);
                }
            }

            let played = match moves.get(ply) {
                Some(uci) => {
                    lookahead = Some(self.lookahead(ply, board, &result).await?);
                    Some(PlayedMove {
                        uci: uci.clone(),
                        san: fen_uci_to_san(&fen, uci),
                        is_white: board.side_to_move() == Color::White,
                        best_move: result.best_move.clone(),
                        best_san: result
                            .best_move
                            .as_deref()
                            .and_then(|best| fen_uci_to_san(&fen, best)),
                        eval_best: None,
                        quality: None,
                        cp_loss: None,
                    })
                }
                None => None,
            };

            plies.insert(
                ply,
                PlyAnalysis {
                    ply,
                    fen,
                    result,
                    played,
                },
            );
            on_progress(Progress {
                completed: ply + 1,
                total,
            });
        }

        info!(session = self.session.id(), plies = total, "Game analysis complete");
        Ok(GameAnalysisRecord {
            plies,
            total_plies: total,
            truncated_at,
        })
    }

    async fn analyze_ply(
        &self,
        ply: usize,
        fen: &str,
        depth: u32,
    ) -> Result<AnalysisResult, AnalysisError> {
        match self.session.analyze(fen, depth).await {
            Ok(result) => {
                debug!(ply, eval = result.evaluation, depth = result.depth, "Ply analyzed");
                Ok(result)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(ply, fen, error = %e, "Ply analysis failed, continuing");
                Ok(AnalysisResult::failed())
            }
        }
    }

    /// Evaluation after the engine's best move from `board`, at reduced depth.
    /// `None` when there is nothing reliable to compare against.
    async fn lookahead(
        &self,
        ply: usize,
        board: &Board,
        result: &AnalysisResult,
    ) -> Result<Option<i32>, AnalysisError> {
        if !result.is_reliable() {
            return Ok(None);
        }
        let Some(best) = result.best_move.as_deref() else {
            return Ok(None);
        };
        let Some(best_move) = parse_uci_move(board, best) else {
            warn!(ply, best, "Engine best move is not legal here, skipping classification");
            return Ok(None);
        };

        let fen = to_fen(&board.make_move_new(best_move));
        match self.session.analyze(&fen, self.lookahead_depth).await {
            Ok(after_best) if after_best.is_reliable() => Ok(Some(after_best.evaluation)),
            Ok(_) => Ok(None),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(ply, error = %e, "Lookahead failed, skipping classification");
                Ok(None)
            }
        }
    }
}

fn classify(before: &mut PlyAnalysis, after: &AnalysisResult, eval_best: Option<i32>) {
    let Some(played) = before.played.as_mut() else {
        return;
    };
    let Some(eval_best) = eval_best else {
        return;
    };
    if !before.result.is_reliable() || !after.is_reliable() {
        return;
    }

    let quality = classify_move(before.result.evaluation, after.evaluation, eval_best);
    played.eval_best = Some(eval_best);
    played.cp_loss = Some(centipawn_loss(after.evaluation, eval_best));
    played.quality = Some(quality);
}

/// Boards for plies 0..=M and the coordinate moves between them. Stops at the
/// first move that is not legal in its position.
fn replay(game: &Game) -> Result<(Vec<Board>, Vec<String>, Option<usize>), AnalysisError> {
    let mut board = parse_fen(game.start_fen())?;
    let mut boards = vec![board];
    let mut moves = Vec::with_capacity(game.len());

    for (i, game_move) in game.moves.iter().enumerate() {
        let Some(chess_move) = game_move_to_chess(&board, game_move) else {
            warn!(index = i, uci = %game_move, "Illegal game move, truncating analysis");
            return Ok((boards, moves, Some(i)));
        };
        board = board.make_move_new(chess_move);
        boards.push(board);
        moves.push(game_move.to_uci());
    }
    Ok((boards, moves, None))
}
