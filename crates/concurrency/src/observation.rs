//! Captured observations and per-actor outcomes
//!
//! Everything here is plain data recorded by runners. Offsets are relative to
//! the run's [`Timeline`](crate::schedule::Timeline) origin.

use std::time::Duration;

use chrono::{DateTime, Utc};
use isoprobe_core::{ActorKey, IsolationLevel, NodeId, ProbeError, TitleRow, TitleUpdate};
use uuid::Uuid;

/// One read as the engine answered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadObservation {
    /// Session that issued the read
    pub session_id: Uuid,
    /// Target record
    pub tconst: String,
    /// Row returned, `None` when absent
    pub row: Option<TitleRow>,
    /// Offset when the read was issued
    pub started_at: Duration,
    /// Offset when the result came back
    pub captured_at: Duration,
    /// Wall time at capture
    pub captured_wall: DateTime<Utc>,
    /// `captured_at - started_at`
    pub duration: Duration,
}

/// One committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteObservation {
    /// Session that wrote
    pub session_id: Uuid,
    /// Target record
    pub tconst: String,
    /// Values written
    pub update: TitleUpdate,
    /// Offset when the transaction began
    pub begin_at: Duration,
    /// Offset when the commit returned
    pub commit_at: Duration,
    /// Wall time of the commit
    pub committed_wall: DateTime<Utc>,
    /// Rows affected by the update
    pub rows_affected: u64,
    /// `commit_at - begin_at`
    pub duration: Duration,
}

/// Anomaly flags of one reader, derived by [`crate::classify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderFlags {
    /// The slower read exceeded the blocking threshold
    pub blocked: bool,
    /// `read1` showed an uncommitted write
    pub dirty_read_detected: bool,
    /// Either read showed an uncommitted write
    pub saw_uncommitted_write: bool,
    /// The two reads disagreed
    pub non_repeatable_read: bool,
    /// A read was captured while a writer on the node had an open transaction
    pub read_during_write: bool,
}

/// Both reads of a successful reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderRecord {
    /// First read
    pub read1: ReadObservation,
    /// Second read, in the same transaction
    pub read2: ReadObservation,
    /// Classification
    pub flags: ReaderFlags,
}

/// What one reader or writer ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorOutcome<T> {
    /// Actor identity
    pub actor: ActorKey,
    /// Isolation level of the actor's session
    pub isolation: IsolationLevel,
    /// Offset when the actor started its work
    pub started_at: Duration,
    /// Offset when the actor finished, success or not
    pub ended_at: Duration,
    /// Wall time at `ended_at`
    pub timestamp: DateTime<Utc>,
    /// Observation on success, error otherwise
    pub result: Result<T, ProbeError>,
}

impl<T> ActorOutcome<T> {
    /// Node the actor ran on.
    pub fn node(&self) -> &NodeId {
        &self.actor.node
    }

    /// `ended_at - started_at`
    pub fn duration(&self) -> Duration {
        self.ended_at.saturating_sub(self.started_at)
    }

    /// Whether the actor succeeded.
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of a read-write reader.
pub type ReaderOutcome = ActorOutcome<ReaderRecord>;

/// Outcome of a read-write writer.
pub type WriterOutcome = ActorOutcome<WriteObservation>;

/// Outcome of a concurrent-read actor.
pub type ConcurrentReadOutcome = ActorOutcome<TitleRow>;

/// Post-run state of the target record on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Node read
    pub node: NodeId,
    /// Latest committed row, or the error hit while reading it
    pub result: Result<Option<TitleRow>, ProbeError>,
}
