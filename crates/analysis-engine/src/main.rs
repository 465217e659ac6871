//! Game analysis CLI
//!
//! Analyzes a PGN game (or a single FEN) with a local Stockfish and prints the
//! result as JSON on stdout. Logs go to stderr.
//!
//!   analyze-game <file.pgn> [--depth N]
//!   analyze-game --fen "<FEN>" [--depth N]

use analysis_engine::{EngineConfig, EngineSession, GameAnalyzer, Progress};
use anyhow::{bail, Context};
use serde_json::json;
use tracing::info;

enum Target {
    Pgn(String),
    Fen(String),
}

struct Args {
    target: Target,
    depth: Option<u32>,
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let depth = match flag_value(&args, "--depth") {
        Some(d) => Some(d.parse().with_context(|| format!("invalid --depth '{d}'"))?),
        None => None,
    };

    let target = if let Some(fen) = flag_value(&args, "--fen") {
        Target::Fen(fen)
    } else {
        let mut skip_next = false;
        let path = args.iter().find(|a| {
            if skip_next {
                skip_next = false;
                return false;
            }
            if a.starts_with("--") {
                skip_next = true;
                return false;
            }
            true
        });
        match path {
            Some(path) => Target::Pgn(path.clone()),
            None => bail!("usage: analyze-game <file.pgn> [--depth N] | --fen \"<FEN>\" [--depth N]"),
        }
    };

    Ok(Args { target, depth })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let _ = dotenvy::dotenv();

    let args = parse_args()?;
    let mut config = EngineConfig::from_env()?;
    if let Some(depth) = args.depth {
        config.analysis_depth = depth;
        config.validate()?;
    }
    info!(
        stockfish_path = %config.stockfish_path,
        depth = config.analysis_depth,
        "Config loaded"
    );

    let session = EngineSession::start_native(&config)
        .await
        .context("failed to start Stockfish")?;

    let output = match args.target {
        Target::Fen(fen) => {
            let result = session.analyze(&fen, config.analysis_depth).await;
            session.destroy().await;
            let result = result?;
            json!({
                "fen": fen,
                "result": result,
                "display": result.eval().display(),
            })
        }
        Target::Pgn(path) => {
            let pgn = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {path}"))?;
            let game = chess_core::pgn::parse_pgn(&pgn)?;
            info!(
                white = %game.metadata.white,
                black = %game.metadata.black,
                moves = game.len(),
                "Game loaded"
            );

            let analyzer = GameAnalyzer::from_config(&session, &config);
            let record = analyzer
                .analyze_game(&game, |Progress { completed, total }| {
                    info!(completed, total, "Progress");
                })
                .await;
            session.destroy().await;
            let record = record?;
            let summary = record.summary();
            json!({
                "metadata": game.metadata,
                "summary": summary,
                "analysis": record,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
