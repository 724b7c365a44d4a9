//! Scenario run records

use chrono::{DateTime, Utc};
use isoprobe_core::IsolationLevel;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::session::SessionRecord;

/// Kind of scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Many readers at once, no writer
    ConcurrentRead,
    /// Writers holding an update open while readers read twice
    ReadWriteConflict,
    /// Selectable but without a defined contract
    Reserved,
}

impl ScenarioKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioKind::ConcurrentRead => "concurrent_read",
            ScenarioKind::ReadWriteConflict => "read_write_conflict",
            ScenarioKind::Reserved => "reserved",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every actor joined
    Completed,
    /// The scenario deadline expired
    TimedOut,
    /// The runner returned a top-level error
    Failed,
}

impl RunOutcome {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::TimedOut => "timed_out",
            RunOutcome::Failed => "failed",
        }
    }
}

/// A finished scenario run and what its runner produced.
#[derive(Debug, Clone)]
pub struct ScenarioRun<O> {
    /// Run identity
    pub id: Uuid,
    /// Scenario kind
    pub kind: ScenarioKind,
    /// Isolation level every session used
    pub isolation: IsolationLevel,
    /// Target record
    pub tconst: String,
    /// Close records of every session, in close order
    pub sessions: Vec<SessionRecord>,
    /// Wall time at the run origin
    pub started_at: DateTime<Utc>,
    /// Wall time when the last actor joined
    pub ended_at: DateTime<Utc>,
    /// Always `Completed` for a returned run
    pub outcome: RunOutcome,
    /// Runner output
    pub output: O,
}

impl<O> ScenarioRun<O> {
    /// Replace the output, keeping the run metadata.
    pub fn map_output<P>(self, f: impl FnOnce(O) -> P) -> ScenarioRun<P> {
        ScenarioRun {
            id: self.id,
            kind: self.kind,
            isolation: self.isolation,
            tconst: self.tconst,
            sessions: self.sessions,
            started_at: self.started_at,
            ended_at: self.ended_at,
            outcome: self.outcome,
            output: f(self.output),
        }
    }
}
