//! Per-analysis time limits.
//!
//! A [`Watchdog`] is armed when a search starts and polled alongside the
//! engine's output. Dropping it disarms it; there is no background timer.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogLimits {
    /// Max gap between two `info` lines
    pub idle: Duration,
    /// Max wall time for the whole search
    pub hard: Duration,
}

impl Default for WatchdogLimits {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(5),
            hard: Duration::from_secs(30),
        }
    }
}

/// Which limit fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Idle,
    Hard,
}

#[derive(Debug)]
pub struct Watchdog {
    limits: WatchdogLimits,
    started: Instant,
    last_activity: Instant,
}

impl Watchdog {
    pub fn arm(limits: WatchdogLimits) -> Self {
        let now = Instant::now();
        Self {
            limits,
            started: now,
            last_activity: now,
        }
    }

    /// Record engine progress; pushes the idle deadline back.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The earlier of the two deadlines.
    pub fn deadline(&self) -> (Instant, Expiry) {
        let idle = self.last_activity + self.limits.idle;
        let hard = self.started + self.limits.hard;
        if hard <= idle {
            (hard, Expiry::Hard)
        } else {
            (idle, Expiry::Idle)
        }
    }

    /// Resolves once a limit passes. Cancel-safe: recreate after every `touch`.
    pub async fn expired(&self) -> Expiry {
        let (at, expiry) = self.deadline();
        sleep_until(at).await;
        expiry
    }
}
