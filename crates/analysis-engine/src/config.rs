//! Engine configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AnalysisError;
use crate::pool::DEFAULT_POOL_CEILING;
use crate::watchdog::WatchdogLimits;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Path to Stockfish (or any UCI engine) binary
    pub stockfish_path: String,

    /// Transposition table size in MB
    pub hash_mb: u32,

    /// Search threads per engine instance
    pub threads: u32,

    /// Search depth for every ply of a game
    pub analysis_depth: u32,

    /// Reduced depth for the best-move lookahead used by classification.
    /// Capped at `analysis_depth`, see [`EngineConfig::effective_lookahead_depth`].
    pub lookahead_depth: u32,

    /// Watchdog idle limit (no info line) in milliseconds
    pub watchdog_idle_ms: u64,

    /// Watchdog hard limit (wall time per analysis) in milliseconds
    pub watchdog_hard_ms: u64,

    /// Max wait for each handshake token in milliseconds
    pub handshake_timeout_ms: u64,

    /// Max simultaneously live pooled sessions
    pub pool_ceiling: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stockfish_path: "/usr/local/bin/stockfish".to_string(),
            hash_mb: 64,
            threads: 1,
            analysis_depth: 14,
            lookahead_depth: 10,
            watchdog_idle_ms: 5_000,
            watchdog_hard_ms: 30_000,
            handshake_timeout_ms: 10_000,
            pool_ceiling: DEFAULT_POOL_CEILING,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AnalysisError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AnalysisError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            stockfish_path: lookup("STOCKFISH_PATH").unwrap_or(defaults.stockfish_path),
            hash_mb: parsed(&lookup, "ENGINE_HASH_MB").unwrap_or(defaults.hash_mb),
            threads: parsed(&lookup, "ENGINE_THREADS").unwrap_or(defaults.threads),
            analysis_depth: parsed(&lookup, "ANALYSIS_DEPTH").unwrap_or(defaults.analysis_depth),
            lookahead_depth: parsed(&lookup, "LOOKAHEAD_DEPTH").unwrap_or(defaults.lookahead_depth),
            watchdog_idle_ms: parsed(&lookup, "WATCHDOG_IDLE_MS").unwrap_or(defaults.watchdog_idle_ms),
            watchdog_hard_ms: parsed(&lookup, "WATCHDOG_HARD_MS").unwrap_or(defaults.watchdog_hard_ms),
            handshake_timeout_ms: parsed(&lookup, "HANDSHAKE_TIMEOUT_MS")
                .unwrap_or(defaults.handshake_timeout_ms),
            pool_ceiling: parsed(&lookup, "ENGINE_POOL_CEILING").unwrap_or(defaults.pool_ceiling),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.stockfish_path.trim().is_empty() {
            return Err(AnalysisError::Config("STOCKFISH_PATH is empty"));
        }
        if self.analysis_depth == 0 || self.lookahead_depth == 0 {
            return Err(AnalysisError::Config("search depths must be at least 1"));
        }
        if self.threads == 0 || self.hash_mb == 0 {
            return Err(AnalysisError::Config("ENGINE_THREADS and ENGINE_HASH_MB must be positive"));
        }
        if self.watchdog_idle_ms == 0 || self.watchdog_hard_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(AnalysisError::Config("timeouts must be positive"));
        }
        if self.pool_ceiling == 0 {
            return Err(AnalysisError::Config("ENGINE_POOL_CEILING must be positive"));
        }
        Ok(())
    }

    /// Lookahead depth actually searched: never deeper than the main search.
    pub fn effective_lookahead_depth(&self) -> u32 {
        self.lookahead_depth.min(self.analysis_depth)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            hash_mb: self.hash_mb,
            threads: self.threads,
            limits: WatchdogLimits {
                idle: Duration::from_millis(self.watchdog_idle_ms),
                hard: Duration::from_millis(self.watchdog_hard_ms),
            },
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            ..SessionOptions::default()
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

/// Per-session engine settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub hash_mb: u32,
    pub threads: u32,
    pub limits: WatchdogLimits,
    pub handshake_timeout: Duration,
    /// How long to wait for the late `bestmove` after a watchdog `stop`
    pub stop_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            hash_mb: 64,
            threads: 1,
            limits: WatchdogLimits::default(),
            handshake_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_millis(500),
        }
    }
}
