//! Run timeline and actor schedules
//!
//! Every actor in a run waits on one shared [`Timeline`] whose offsets are
//! relative to the run origin. No actor sleeps for a relative duration
//! computed on its own, so a late start never shifts later steps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use isoprobe_core::{Clock, ScenarioConfig};

/// Clock view anchored at a run's origin.
#[derive(Debug, Clone)]
pub struct Timeline {
    clock: Arc<dyn Clock>,
    origin: Duration,
}

impl Timeline {
    /// Anchor a new timeline at the clock's current instant.
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        let origin = clock.elapsed();
        Self { clock, origin }
    }

    /// Time since the run origin.
    pub fn offset(&self) -> Duration {
        self.clock.elapsed().saturating_sub(self.origin)
    }

    /// Wait until `offset` past the origin; returns at once if already past.
    pub async fn wait_until(&self, offset: Duration) {
        self.clock.sleep_until(self.origin + offset).await;
    }

    /// Sleep for a duration relative to now.
    pub async fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration).await;
    }

    /// Wall-clock time at a run offset.
    pub fn wall(&self, offset: Duration) -> DateTime<Utc> {
        self.clock.wall_at(self.origin + offset)
    }

    /// Underlying clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// When one reader issues its two reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderPlan {
    /// Begin and `read1`
    pub start: Duration,
    /// `read2`
    pub read2_at: Duration,
}

/// When writers begin and how long they hold their transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterPlan {
    /// Begin and update
    pub start: Duration,
    /// Time between update and commit
    pub hold: Duration,
}

/// Complete timing of a read-write conflict run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSchedule {
    /// Shared by every writer
    pub writer: WriterPlan,
    /// Plan for readers beyond `readers`
    pub default_reader: ReaderPlan,
    /// Per reader index (0-based) overrides
    pub readers: Vec<ReaderPlan>,
}

impl ConflictSchedule {
    /// Default schedule from configuration.
    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            writer: WriterPlan {
                start: Duration::ZERO,
                hold: Duration::from_millis(config.write_hold_ms),
            },
            default_reader: ReaderPlan {
                start: Duration::from_millis(config.reader_start_ms),
                read2_at: Duration::from_millis(config.read2_at_ms),
            },
            readers: Vec::new(),
        }
    }

    /// Plan for the reader at 0-based `index` on any node.
    pub fn reader(&self, index: usize) -> ReaderPlan {
        self.readers
            .get(index)
            .copied()
            .unwrap_or(self.default_reader)
    }
}
