//! Response bodies
//!
//! Actor maps are keyed by [`ActorKey::display_key`]; this is the only place
//! actor keys become strings. `BTreeMap` keeps the JSON output ordered.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use isoprobe_concurrency::{
    AnomalyReport, ConcurrentReadOutcome, ConcurrentReadOutput, ConcurrentReadReport,
    NodeSnapshot, ReadObservation, ReadWriteOutput, ReaderOutcome, ScenarioRun, WriterOutcome,
};
use isoprobe_core::{ActorKey, IsolationLevel, NodeId, ProbeResult, TitleRow, TitleUpdate};

/// Seconds rounded to 0.1ms.
pub fn secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 10_000.0).round() / 10_000.0
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Structured actor identity echoed inside each entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorView {
    /// Node name
    pub node: NodeId,
    /// 1-based index on that node
    pub index: u32,
}

impl From<&ActorKey> for ActorView {
    fn from(key: &ActorKey) -> Self {
        Self {
            node: key.node.clone(),
            index: key.index,
        }
    }
}

/// Message and kind of a failed result, rendered as the `error` and
/// `error_kind` fields of an entry.
pub(crate) fn failure<T>(result: &ProbeResult<T>) -> (Option<String>, Option<&'static str>) {
    match result {
        Ok(_) => (None, None),
        Err(e) => (Some(e.to_string()), Some(e.kind().as_str())),
    }
}

/// Run metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunView {
    /// Run id
    pub id: Uuid,
    /// Scenario kind
    pub kind: &'static str,
    /// Wall time at the run origin
    pub started_at: DateTime<Utc>,
    /// Wall time at completion
    pub ended_at: DateTime<Utc>,
    /// Sessions opened and closed by the run
    pub sessions: usize,
}

impl RunView {
    /// Metadata of `run`.
    pub fn of<O>(run: &ScenarioRun<O>) -> Self {
        Self {
            id: run.id,
            kind: run.kind.as_str(),
            started_at: run.started_at,
            ended_at: run.ended_at,
            sessions: run.sessions.len(),
        }
    }
}

// ============================================================================
// Concurrent read
// ============================================================================

/// One concurrent-read actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcurrentReadEntry {
    /// Actor identity
    pub actor: ActorView,
    /// Whether the read succeeded
    pub success: bool,
    /// Row read
    pub data: Option<TitleRow>,
    /// Seconds from acquire to release
    pub duration: f64,
    /// Level used
    pub isolation_level: IsolationLevel,
    /// Wall time at the end of the read
    pub timestamp: DateTime<Utc>,
    /// Failure message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable kind name of the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl From<&ConcurrentReadOutcome> for ConcurrentReadEntry {
    fn from(o: &ConcurrentReadOutcome) -> Self {
        let (error, error_kind) = failure(&o.result);
        Self {
            actor: (&o.actor).into(),
            success: o.succeeded(),
            data: o.result.as_ref().ok().cloned(),
            duration: secs(o.duration()),
            isolation_level: o.isolation,
            timestamp: o.timestamp,
            error,
            error_kind,
        }
    }
}

/// `POST /test/concurrent-read` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcurrentReadResponse {
    /// Entries keyed `<node>_<index>`
    pub results: BTreeMap<String, ConcurrentReadEntry>,
    /// Agreement report
    pub analysis: ConcurrentReadReport,
    /// Run metadata
    pub run: RunView,
}

impl ConcurrentReadResponse {
    /// Assemble from a run's output.
    pub fn assemble(run: RunView, out: &ConcurrentReadOutput) -> Self {
        Self {
            results: out
                .results
                .iter()
                .map(|o| (o.actor.display_key(), o.into()))
                .collect(),
            analysis: out.report.clone(),
            run,
        }
    }
}

// ============================================================================
// Read-write conflict
// ============================================================================

/// One read of a reader. The row's columns sit at the top level of the
/// object, so `read2.runtime_minutes` addresses the value read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadView {
    /// Whether the row was visible to this read
    pub found: bool,
    /// Row returned
    #[serde(flatten)]
    pub row: Option<TitleRow>,
    /// Offset from run start when issued
    pub started_at_ms: u64,
    /// Offset from run start when returned
    pub captured_at_ms: u64,
    /// Wall time when returned
    pub timestamp: DateTime<Utc>,
    /// Seconds the read took
    pub duration: f64,
}

impl From<&ReadObservation> for ReadView {
    fn from(o: &ReadObservation) -> Self {
        Self {
            found: o.row.is_some(),
            row: o.row.clone(),
            started_at_ms: millis(o.started_at),
            captured_at_ms: millis(o.captured_at),
            timestamp: o.captured_wall,
            duration: secs(o.duration),
        }
    }
}

/// One reader of a read-write run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReaderEntry {
    /// Actor identity
    pub actor: ActorView,
    /// Whether both reads and the commit succeeded
    pub success: bool,
    /// First read
    pub read1: Option<ReadView>,
    /// Second read
    pub read2: Option<ReadView>,
    /// Slower read exceeded the blocking threshold
    pub blocked: bool,
    /// `read1` showed an uncommitted write
    pub dirty_read_detected: bool,
    /// Either read showed an uncommitted write
    pub saw_uncommitted_write: bool,
    /// The reads disagreed
    pub non_repeatable_read: bool,
    /// A read landed inside a writer's open transaction
    pub read_during_write: bool,
    /// Seconds from start to release
    pub duration: f64,
    /// Level used
    pub isolation_level: IsolationLevel,
    /// Wall time at the end
    pub timestamp: DateTime<Utc>,
    /// Failure message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable kind name of the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl From<&ReaderOutcome> for ReaderEntry {
    fn from(o: &ReaderOutcome) -> Self {
        let record = o.result.as_ref().ok();
        let flags = record.map(|r| r.flags).unwrap_or_default();
        let (error, error_kind) = failure(&o.result);
        Self {
            actor: (&o.actor).into(),
            success: o.succeeded(),
            read1: record.map(|r| (&r.read1).into()),
            read2: record.map(|r| (&r.read2).into()),
            blocked: flags.blocked,
            dirty_read_detected: flags.dirty_read_detected,
            saw_uncommitted_write: flags.saw_uncommitted_write,
            non_repeatable_read: flags.non_repeatable_read,
            read_during_write: flags.read_during_write,
            duration: secs(o.duration()),
            isolation_level: o.isolation,
            timestamp: o.timestamp,
            error,
            error_kind,
        }
    }
}

/// One writer of a read-write run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriterEntry {
    /// Actor identity
    pub actor: ActorView,
    /// Whether the update committed
    pub success: bool,
    /// Values written
    pub new_data: Option<TitleUpdate>,
    /// Rows affected by the update
    pub rows_affected: u64,
    /// Offset of begin
    pub begin_at_ms: Option<u64>,
    /// Offset of commit
    pub commit_at_ms: Option<u64>,
    /// Wall time of the commit
    pub committed_at: Option<DateTime<Utc>>,
    /// Seconds from begin to commit (or to failure)
    pub duration: f64,
    /// Level used
    pub isolation_level: IsolationLevel,
    /// Wall time at the end
    pub timestamp: DateTime<Utc>,
    /// Failure message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable kind name of the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl From<&WriterOutcome> for WriterEntry {
    fn from(o: &WriterOutcome) -> Self {
        let obs = o.result.as_ref().ok();
        let (error, error_kind) = failure(&o.result);
        Self {
            actor: (&o.actor).into(),
            success: o.succeeded(),
            new_data: obs.map(|w| w.update.clone()),
            rows_affected: obs.map_or(0, |w| w.rows_affected),
            begin_at_ms: obs.map(|w| millis(w.begin_at)),
            commit_at_ms: obs.map(|w| millis(w.commit_at)),
            committed_at: obs.map(|w| w.committed_wall),
            duration: secs(obs.map_or_else(|| o.duration(), |w| w.duration)),
            isolation_level: o.isolation,
            timestamp: o.timestamp,
            error,
            error_kind,
        }
    }
}

/// `results` of a read-write response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadWriteResults {
    /// Record before the run
    pub original_value: TitleRow,
    /// Post-run committed row per node; `null` when absent or unreadable
    pub final_values: BTreeMap<String, Option<TitleRow>>,
    /// Readers keyed `<node>_<index>`
    pub readers: BTreeMap<String, ReaderEntry>,
    /// Writers keyed `<node>_<index>`
    pub writers: BTreeMap<String, WriterEntry>,
}

/// `POST /test/read-write-conflict` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadWriteResponse {
    /// Observations
    pub results: ReadWriteResults,
    /// Anomaly report
    pub analysis: AnomalyReport,
    /// Run metadata
    pub run: RunView,
}

impl ReadWriteResponse {
    /// Assemble from a run's output.
    pub fn assemble(run: RunView, out: &ReadWriteOutput) -> Self {
        Self {
            results: ReadWriteResults {
                original_value: out.original.clone(),
                final_values: out.final_values.iter().map(final_value).collect(),
                readers: out
                    .readers
                    .iter()
                    .map(|o| (o.actor.display_key(), o.into()))
                    .collect(),
                writers: out
                    .writers
                    .iter()
                    .map(|o| (o.actor.display_key(), o.into()))
                    .collect(),
            },
            analysis: out.report.clone(),
            run,
        }
    }
}

fn final_value(snapshot: &NodeSnapshot) -> (String, Option<TitleRow>) {
    let row = snapshot.result.as_ref().ok().cloned().flatten();
    (snapshot.node.to_string(), row)
}

// ============================================================================
// Titles and health
// ============================================================================

/// Per-node result of an upsert or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeWriteResult {
    /// Whether this node accepted the write
    pub success: bool,
    /// Rows affected on this node
    pub rows_affected: u64,
    /// Failure message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable kind name of the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl From<&ProbeResult<u64>> for NodeWriteResult {
    fn from(result: &ProbeResult<u64>) -> Self {
        let (error, error_kind) = failure(result);
        Self {
            success: result.is_ok(),
            rows_affected: result.as_ref().map_or(0, |n| *n),
            error,
            error_kind,
        }
    }
}

/// `POST /title` and `DELETE /title/{tconst}` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleWriteResponse {
    /// At least one node accepted the write
    pub success: bool,
    /// Record written or deleted
    pub tconst: String,
    /// Summary
    pub message: String,
    /// Per-node results keyed by node name
    pub nodes: BTreeMap<String, NodeWriteResult>,
}

/// `GET /titles` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleListResponse {
    /// Rows of this page, newest `start_year` first
    pub data: Vec<TitleRow>,
    /// Rows matching the filter across all pages
    pub total: u64,
    /// 1-based page number
    pub page: u64,
    /// Page size
    pub limit: u64,
    /// Node that served the listing
    pub node: NodeId,
}

/// Health of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeHealth {
    /// Node answered a query
    pub online: bool,
    /// Committed rows, when the node answered
    pub record_count: Option<u64>,
    /// Sessions holding a permit
    pub sessions_in_use: usize,
    /// Session capacity
    pub capacity: usize,
    /// Why the node did not answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable kind name of that failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

/// `GET /health` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// Per-node health keyed by node name
    pub nodes: BTreeMap<String, NodeHealth>,
}
