//! Engine session protocol tests against the scripted fake engine.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_engine::{
    AnalysisError, AnalysisRequest, EngineSession, ResultSource, SessionKind, SessionState,
};
use common::{ready_session, test_options, FakeEngine, Handshake, Reply, START_FEN};

const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
const AFTER_D4: &str = "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR b KQkq - 0 1";
const AFTER_NF3: &str = "rnbqkbnr/pppppppp/8/8/8/5N2/PPPPPPPP/RNBQKB1R b KQkq - 1 1";

#[tokio::test]
async fn test_handshake_reaches_idle() {
    let (io, log) = FakeEngine::new().spawn();
    let session = EngineSession::with_io(io, test_options());
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(session.kind(), SessionKind::Native);

    session.initialize().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);

    // Second call is a no-op
    session.initialize().await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.count("uci"), 1);
    assert_eq!(log.count("isready"), 1);
    assert!(log.commands.contains(&"setoption name Hash value 64".to_string()));
    assert!(log.commands.contains(&"setoption name Threads value 1".to_string()));
    assert!(log.commands.contains(&"ucinewgame".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout() {
    let (io, _log) = FakeEngine::new().handshake(Handshake::Silent).spawn();
    let session = EngineSession::with_io(io, test_options());

    let err = session.initialize().await.unwrap_err();
    assert!(matches!(err, AnalysisError::HandshakeFailure(_)), "got {err:?}");
    assert_eq!(session.state(), SessionState::Destroyed);
}

#[tokio::test]
async fn test_handshake_engine_exit() {
    let (io, _log) = FakeEngine::new().handshake(Handshake::Exit).spawn();
    let session = EngineSession::with_io(io, test_options());

    let err = session.initialize().await.unwrap_err();
    assert!(matches!(err, AnalysisError::HandshakeFailure(_)), "got {err:?}");
}

#[tokio::test]
async fn test_analyze_before_initialize() {
    let (io, log) = FakeEngine::new().spawn();
    let session = EngineSession::with_io(io, test_options());

    let err = session.analyze(START_FEN, 10).await.unwrap_err();
    assert!(matches!(err, AnalysisError::EngineNotInitialized));
    assert!(log.lock().unwrap().commands.is_empty());
}

#[tokio::test]
async fn test_invalid_position_fails_fast() {
    let (session, log) = ready_session(FakeEngine::new()).await;

    for fen in ["", "not a fen", "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR x KQkq - 0 1"] {
        let err = session.analyze(fen, 10).await.unwrap_err();
        assert!(matches!(err, AnalysisError::PositionInvalid { .. }), "{fen:?} gave {err:?}");
    }
    assert!(log.lock().unwrap().positions().is_empty());
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_analyze_start_position() {
    let engine = FakeEngine::new().reply(
        START_FEN,
        Reply::search(
            &[
                "info depth 1 score cp 10 pv d2d4",
                "info depth 2 score cp 35 nodes 400 pv e2e4 e7e5",
            ],
            "e2e4 ponder e7e5",
        ),
    );
    let (session, log) = ready_session(engine).await;

    let result = session.analyze(START_FEN, 2).await.unwrap();
    assert_eq!(result.evaluation, 35);
    assert_eq!(result.depth, 2);
    assert_eq!(result.best_move.as_deref(), Some("e2e4"));
    assert_eq!(result.pv, vec!["e2e4", "e7e5"]);
    assert_eq!(result.source, ResultSource::Engine);
    assert_eq!(session.state(), SessionState::Idle);

    let log = log.lock().unwrap();
    assert!(log.commands.contains(&format!("position fen {START_FEN}")));
    assert!(log.commands.contains(&"go depth 2".to_string()));
}

#[tokio::test]
async fn test_black_to_move_is_negated() {
    let engine = FakeEngine::new()
        .reply(AFTER_E4, Reply::cp(50, "e7e5"))
        .reply(
            AFTER_D4,
            Reply::search(&["info depth 9 score mate 3 pv g8f6"], "g8f6"),
        );
    let (session, _log) = ready_session(engine).await;

    let result = session.analyze(AFTER_E4, 12).await.unwrap();
    assert_eq!(result.evaluation, -50);

    let result = session.analyze(AFTER_D4, 9).await.unwrap();
    assert_eq!(result.evaluation, -9_700);
    assert_eq!(result.mate, Some(-3));
}

#[tokio::test]
async fn test_bestmove_without_info_is_degenerate() {
    let engine = FakeEngine::new().reply(START_FEN, Reply::search(&[], "e2e4"));
    let (session, _log) = ready_session(engine).await;

    let result = session.analyze(START_FEN, 10).await.unwrap();
    assert_eq!(result.evaluation, 0);
    assert_eq!(result.depth, 1);
    assert_eq!(result.best_move.as_deref(), Some("e2e4"));
    assert_eq!(result.source, ResultSource::Degenerate);
    assert!(!result.is_reliable());
}

#[tokio::test]
async fn test_illegal_bestmove_is_not_reported() {
    // White's move offered for a Black-to-move position
    let engine = FakeEngine::new().reply(AFTER_E4, Reply::cp(40, "e2e4"));
    let (session, _log) = ready_session(engine).await;

    let result = session.analyze(AFTER_E4, 12).await.unwrap();
    assert_eq!(result.best_move, None);
    assert_eq!(result.evaluation, -40);
    assert_eq!(result.source, ResultSource::Engine);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_checkmated_position() {
    // Fool's mate, White to move and mated
    let mated = "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3";
    let engine = FakeEngine::new().reply(
        mated,
        Reply::search(&["info depth 0 score mate 0"], "(none)"),
    );
    let (session, _log) = ready_session(engine).await;

    let result = session.analyze(mated, 10).await.unwrap();
    assert_eq!(result.evaluation, -10_000);
    assert_eq!(result.best_move, None);
    assert_eq!(result.source, ResultSource::Engine);
}

#[tokio::test]
async fn test_queue_is_fifo_with_reversed_delays() {
    let engine = FakeEngine::new()
        .reply(AFTER_E4, Reply::cp(10, "e7e5").delayed(Duration::from_millis(60)))
        .reply(AFTER_D4, Reply::cp(20, "d7d5").delayed(Duration::from_millis(30)))
        .reply(AFTER_NF3, Reply::cp(30, "g8f6").delayed(Duration::from_millis(5)));
    let (session, log) = ready_session(engine).await;
    let session = Arc::new(session);

    let pending: Vec<_> = [AFTER_E4, AFTER_D4, AFTER_NF3]
        .iter()
        .map(|fen| session.submit(AnalysisRequest::new(fen, 12)).unwrap())
        .collect();
    assert!(session.pending() >= 2);

    let finished = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for p in pending {
        let finished = Arc::clone(&finished);
        handles.push(tokio::spawn(async move {
            let ticket = p.ticket();
            let result = p.wait().await.unwrap();
            finished.lock().unwrap().push((ticket, result.best_move));
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let finished = finished.lock().unwrap();
    let bests: Vec<_> = finished.iter().map(|(_, b)| b.as_deref().unwrap()).collect();
    assert_eq!(bests, vec!["e7e5", "d7d5", "g8f6"]);
    assert!(finished.windows(2).all(|w| w[0].0 < w[1].0));

    let log = log.lock().unwrap();
    assert_eq!(log.positions(), vec![AFTER_E4, AFTER_D4, AFTER_NF3]);
    assert!(!log.overlapping_go);
    assert_eq!(session.pending(), 0);
}

#[tokio::test]
async fn test_dropped_handle_is_never_started() {
    let engine = FakeEngine::new()
        .reply(AFTER_E4, Reply::cp(10, "e7e5").delayed(Duration::from_millis(50)))
        .reply(AFTER_D4, Reply::cp(20, "d7d5"));
    let (session, log) = ready_session(engine).await;

    let first = session.submit(AnalysisRequest::new(AFTER_E4, 12)).unwrap();
    let dropped = session.submit(AnalysisRequest::new(AFTER_D4, 12)).unwrap();
    drop(dropped);
    let third = session.submit(AnalysisRequest::new(AFTER_NF3, 12)).unwrap();

    first.wait().await.unwrap();
    third.wait().await.unwrap();
    assert_eq!(log.lock().unwrap().positions(), vec![AFTER_E4, AFTER_NF3]);
}

#[tokio::test]
async fn test_movetime_is_sent() {
    let (session, log) = ready_session(FakeEngine::new()).await;
    let request = AnalysisRequest::new(START_FEN, 8).with_movetime(Duration::from_millis(250));
    session.analyze_request(request).await.unwrap();
    assert!(log
        .lock()
        .unwrap()
        .commands
        .contains(&"go depth 8 movetime 250".to_string()));
}

#[tokio::test]
async fn test_engine_exit_rejects_queue() {
    let engine = FakeEngine::new().reply(AFTER_E4, Reply::Exit);
    let (session, _log) = ready_session(engine).await;
    let mut state = session.watch_state();

    let pending: Vec<_> = [AFTER_E4, AFTER_D4, AFTER_NF3]
        .iter()
        .map(|fen| session.submit(AnalysisRequest::new(fen, 12)).unwrap())
        .collect();
    for p in pending {
        let err = p.wait().await.unwrap_err();
        assert!(matches!(err, AnalysisError::EngineTerminated(_)), "got {err:?}");
        assert!(err.is_fatal());
    }

    state
        .wait_for(|s| *s == SessionState::Destroyed)
        .await
        .unwrap();
    let err = session.analyze(START_FEN, 10).await.unwrap_err();
    assert!(matches!(err, AnalysisError::EngineTerminated(_)));
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let engine = FakeEngine::new().reply(START_FEN, Reply::hang(&[]));
    let (session, _log) = ready_session(engine).await;

    let in_flight = session.submit(AnalysisRequest::new(START_FEN, 20)).unwrap();
    let queued = session.submit(AnalysisRequest::new(AFTER_E4, 20)).unwrap();
    tokio::task::yield_now().await;

    session.destroy().await;
    session.destroy().await;
    assert_eq!(session.state(), SessionState::Destroyed);

    assert!(matches!(
        in_flight.wait().await,
        Err(AnalysisError::EngineTerminated(_))
    ));
    assert!(matches!(
        queued.wait().await,
        Err(AnalysisError::EngineTerminated(_))
    ));
}

#[tokio::test]
async fn test_destroy_before_initialize() {
    let (io, log) = FakeEngine::new().spawn();
    let session = EngineSession::with_io(io, test_options());
    session.destroy().await;
    assert_eq!(session.state(), SessionState::Destroyed);
    assert!(matches!(
        session.initialize().await,
        Err(AnalysisError::EngineTerminated(_))
    ));
    assert_eq!(log.lock().unwrap().count("uci"), 0);
}
