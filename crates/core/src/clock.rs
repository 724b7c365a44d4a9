//! Injectable time source
//!
//! All scheduling, lock-wait deadlines and observation timestamps go through
//! [`Clock`]. The production implementation is backed by `tokio::time`, so a
//! runtime started with paused time (`#[tokio::test(start_paused = true)]`)
//! drives every scenario deterministically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Monotonic clock with a wall-clock anchor.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic time since the clock's origin.
    fn elapsed(&self) -> Duration;

    /// Wall-clock time at a given monotonic offset.
    fn wall_at(&self, elapsed: Duration) -> DateTime<Utc>;

    /// Sleep for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Wall-clock time now.
    fn wall_now(&self) -> DateTime<Utc> {
        self.wall_at(self.elapsed())
    }

    /// Sleep until the monotonic offset `target`; returns immediately if it
    /// already passed.
    async fn sleep_until(&self, target: Duration) {
        let now = self.elapsed();
        if target > now {
            self.sleep(target - now).await;
        }
    }
}

/// [`Clock`] over `tokio::time`.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
    wall_origin: DateTime<Utc>,
}

impl TokioClock {
    /// Anchor at the current instant and wall time.
    pub fn new() -> Self {
        Self::with_wall_origin(Utc::now())
    }

    /// Anchor at the current instant with an explicit wall time, so reported
    /// timestamps are reproducible.
    pub fn with_wall_origin(wall_origin: DateTime<Utc>) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            wall_origin,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn elapsed(&self) -> Duration {
        tokio::time::Instant::now().duration_since(self.origin)
    }

    fn wall_at(&self, elapsed: Duration) -> DateTime<Utc> {
        let delta = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero());
        self.wall_origin + delta
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
