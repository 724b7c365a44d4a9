//! Anomaly reports
//!
//! Deterministic summaries of a finished run. Nothing here reads the clock
//! or touches a node; the inputs are the observations a runner captured.

use std::time::Duration;

use isoprobe_core::{IsolationLevel, NodeId, TitleRow};

use crate::classify::snapshots_differ;
use crate::observation::{ConcurrentReadOutcome, NodeSnapshot, ReaderOutcome, WriterOutcome};

/// Summary of a read-write conflict run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AnomalyReport {
    /// Readers whose `read1` showed an uncommitted write
    pub dirty_reads_occurred: usize,
    /// Readers whose two reads disagreed
    pub non_repeatable_reads: usize,
    /// Readers classified as blocked
    pub blocking_occurred: usize,
    /// All post-run snapshots agree and none failed
    pub final_state_consistent_across_nodes: bool,
    /// Readers that completed
    pub readers_succeeded: usize,
    /// Writers that committed
    pub writers_succeeded: usize,
    /// Mean reader duration in seconds (0 when none succeeded)
    pub average_reader_duration: f64,
    /// Mean writer duration in seconds (0 when none succeeded)
    pub average_writer_duration: f64,
    /// Human-readable verdict
    pub explanation: String,
}

impl AnomalyReport {
    /// Build the report for a completed run.
    pub fn detect(
        isolation: IsolationLevel,
        readers: &[ReaderOutcome],
        writers: &[WriterOutcome],
        final_values: &[NodeSnapshot],
    ) -> Self {
        let records: Vec<_> = readers.iter().filter_map(|r| r.result.as_ref().ok()).collect();
        let dirty = records.iter().filter(|r| r.flags.dirty_read_detected).count();
        let non_repeatable = records.iter().filter(|r| r.flags.non_repeatable_read).count();
        let blocked = records.iter().filter(|r| r.flags.blocked).count();
        let consistent = final_state_consistent(final_values);

        let reader_durations: Vec<Duration> = readers
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| r.duration())
            .collect();
        let writer_durations: Vec<Duration> = writers
            .iter()
            .filter_map(|w| w.result.as_ref().ok().map(|obs| obs.duration))
            .collect();

        let explanation = explain(
            isolation,
            Counts {
                dirty,
                non_repeatable,
                blocked,
                readers: readers.len(),
                readers_ok: reader_durations.len(),
                writers: writers.len(),
                writers_ok: writer_durations.len(),
            },
            consistent,
        );

        Self {
            dirty_reads_occurred: dirty,
            non_repeatable_reads: non_repeatable,
            blocking_occurred: blocked,
            final_state_consistent_across_nodes: consistent,
            readers_succeeded: reader_durations.len(),
            writers_succeeded: writer_durations.len(),
            average_reader_duration: mean_secs(&reader_durations),
            average_writer_duration: mean_secs(&writer_durations),
            explanation,
        }
    }
}

struct Counts {
    dirty: usize,
    non_repeatable: usize,
    blocked: usize,
    readers: usize,
    readers_ok: usize,
    writers: usize,
    writers_ok: usize,
}

fn explain(isolation: IsolationLevel, c: Counts, consistent: bool) -> String {
    let mut parts = vec![format!(
        "{}: {}.",
        isolation.as_str(),
        isolation.guarantee()
    )];
    parts.push(format!(
        "Observed {} dirty read(s), {} non-repeatable read(s) and {} blocked reader(s) \
         across {}/{} successful readers and {}/{} successful writers.",
        c.dirty, c.non_repeatable, c.blocked, c.readers_ok, c.readers, c.writers_ok, c.writers
    ));
    if c.dirty > 0 && isolation.prevents_dirty_reads() {
        parts.push(format!(
            "Dirty reads contradict {}, which should never expose uncommitted data.",
            isolation.as_str()
        ));
    }
    if c.non_repeatable > 0 && isolation.prevents_non_repeatable_reads() {
        parts.push(format!(
            "Non-repeatable reads contradict {}, \
             which should keep reads stable within a transaction.",
            isolation.as_str()
        ));
    }
    if c.dirty > 0 && !isolation.prevents_dirty_reads() {
        parts.push("Readers saw the writer's uncommitted change, as this level allows.".into());
    }
    if c.blocked > 0 {
        parts.push("Some reads waited on the writer's locks.".into());
    }
    parts.push(if consistent {
        "Final state is consistent across nodes.".into()
    } else {
        "Final state differs across nodes or could not be read everywhere.".into()
    });
    parts.join(" ")
}

fn final_state_consistent(final_values: &[NodeSnapshot]) -> bool {
    let mut rows: Vec<Option<&TitleRow>> = Vec::with_capacity(final_values.len());
    for snapshot in final_values {
        match &snapshot.result {
            Ok(row) => rows.push(row.as_ref()),
            Err(_) => return false,
        }
    }
    rows.windows(2).all(|pair| !snapshots_differ(pair[0], pair[1]))
}

fn mean_secs(durations: &[Duration]) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    durations.iter().map(Duration::as_secs_f64).sum::<f64>() / durations.len() as f64
}

// ============================================================================
// Concurrent read
// ============================================================================

/// Agreement of a concurrent-read run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConcurrentReadReport {
    /// Every successful read returned the same content
    pub consistent: bool,
    /// Distinct nodes that took part, in name order
    pub nodes_tested: Vec<NodeId>,
    /// Human-readable verdict
    pub explanation: String,
}

impl ConcurrentReadReport {
    /// Build the report over a concurrent-read run's outcomes.
    pub fn detect(isolation: IsolationLevel, outcomes: &[ConcurrentReadOutcome]) -> Self {
        let rows: Vec<&TitleRow> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .collect();
        let consistent = rows.windows(2).all(|pair| pair[0].same_content(pair[1]));

        let mut nodes: Vec<NodeId> = outcomes.iter().map(|o| o.node().clone()).collect();
        nodes.sort();
        nodes.dedup();

        let failed = outcomes.len() - rows.len();
        let mut explanation = if consistent {
            format!(
                "All {} successful reads returned the same data under {}.",
                rows.len(),
                isolation.as_str()
            )
        } else {
            format!(
                "Data mismatch detected between successful reads under {}.",
                isolation.as_str()
            )
        };
        if failed > 0 {
            explanation.push_str(&format!(" {failed} read(s) failed."));
        }

        Self {
            consistent,
            nodes_tested: nodes,
            explanation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{
        ActorOutcome, ReadObservation, ReaderFlags, ReaderRecord, WriteObservation,
    };
    use chrono::Utc;
    use isoprobe_core::{ActorKey, NodeId, ProbeError, TitleUpdate};
    use uuid::Uuid;

    fn row(runtime: i32) -> TitleRow {
        TitleRow {
            tconst: "tt1".into(),
            title_type: "movie".into(),
            primary_title: "One".into(),
            genres: None,
            runtime_minutes: Some(runtime),
            start_year: None,
            last_updated: None,
        }
    }

    fn outcome<T>(node: &str, ms: u64, result: Result<T, ProbeError>) -> ActorOutcome<T> {
        ActorOutcome {
            actor: ActorKey::new(NodeId::new(node), 1),
            isolation: IsolationLevel::ReadUncommitted,
            started_at: Duration::ZERO,
            ended_at: Duration::from_millis(ms),
            timestamp: Utc::now(),
            result,
        }
    }

    fn obs(runtime: i32) -> ReadObservation {
        ReadObservation {
            session_id: Uuid::nil(),
            tconst: "tt1".into(),
            row: Some(row(runtime)),
            started_at: Duration::ZERO,
            captured_at: Duration::ZERO,
            captured_wall: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    fn reader(node: &str, flags: ReaderFlags, ms: u64) -> ReaderOutcome {
        outcome(
            node,
            ms,
            Ok(ReaderRecord {
                read1: obs(150),
                read2: obs(150),
                flags,
            }),
        )
    }

    fn writer(node: &str, ms: u64) -> WriterOutcome {
        outcome(
            node,
            ms,
            Ok(WriteObservation {
                session_id: Uuid::nil(),
                tconst: "tt1".into(),
                update: TitleUpdate::runtime(150),
                begin_at: Duration::ZERO,
                commit_at: Duration::from_millis(ms),
                committed_wall: Utc::now(),
                rows_affected: 1,
                duration: Duration::from_millis(ms),
            }),
        )
    }

    fn snapshot(node: &str, runtime: i32) -> NodeSnapshot {
        NodeSnapshot {
            node: NodeId::new(node),
            result: Ok(Some(row(runtime))),
        }
    }

    #[test]
    fn counts_and_averages() {
        let dirty = ReaderFlags {
            dirty_read_detected: true,
            saw_uncommitted_write: true,
            ..ReaderFlags::default()
        };
        let readers = vec![
            reader("node1", dirty, 400),
            reader("node2", ReaderFlags::default(), 200),
            outcome("node3", 10, Err(ProbeError::connection(&NodeId::new("node3"), "down"))),
        ];
        let writers = vec![writer("node1", 300), writer("node2", 300)];
        let finals = vec![snapshot("node1", 150), snapshot("node2", 150)];

        let report =
            AnomalyReport::detect(IsolationLevel::ReadUncommitted, &readers, &writers, &finals);
        assert_eq!(report.dirty_reads_occurred, 1);
        assert_eq!(report.readers_succeeded, 2);
        assert_eq!(report.writers_succeeded, 2);
        assert!((report.average_reader_duration - 0.3).abs() < 1e-9);
        assert!((report.average_writer_duration - 0.3).abs() < 1e-9);
        assert!(report.final_state_consistent_across_nodes);
        assert!(report.explanation.starts_with("READ_UNCOMMITTED"));
        assert!(!report.explanation.contains("contradict"));
    }

    #[test]
    fn contradiction_is_called_out() {
        let flags = ReaderFlags {
            non_repeatable_read: true,
            ..ReaderFlags::default()
        };
        let report = AnomalyReport::detect(
            IsolationLevel::RepeatableRead,
            &[reader("node1", flags, 400)],
            &[],
            &[],
        );
        assert_eq!(report.non_repeatable_reads, 1);
        assert!(report.explanation.contains("contradict REPEATABLE_READ"));
        assert_eq!(report.average_writer_duration, 0.0);
    }

    #[test]
    fn failed_or_divergent_snapshots_are_inconsistent() {
        let diverged = vec![snapshot("node1", 150), snapshot("node2", 1)];
        assert!(!final_state_consistent(&diverged));

        let failed = vec![
            snapshot("node1", 150),
            NodeSnapshot {
                node: NodeId::new("node2"),
                result: Err(ProbeError::connection(&NodeId::new("node2"), "down")),
            },
        ];
        assert!(!final_state_consistent(&failed));
        assert!(final_state_consistent(&[]));
    }

    #[test]
    fn concurrent_read_agreement() {
        let outcomes = vec![
            outcome("node1", 100, Ok(row(1))),
            outcome("node2", 100, Ok(row(1))),
            outcome("node2", 100, Err(ProbeError::not_found_on("tt1", &NodeId::new("node2")))),
        ];
        let report = ConcurrentReadReport::detect(IsolationLevel::ReadCommitted, &outcomes);
        assert!(report.consistent);
        assert_eq!(report.nodes_tested, [NodeId::new("node1"), NodeId::new("node2")]);
        assert!(report.explanation.contains("1 read(s) failed"));

        let mismatch = vec![outcome("node1", 100, Ok(row(1))), outcome("node2", 100, Ok(row(2)))];
        assert!(!ConcurrentReadReport::detect(IsolationLevel::ReadCommitted, &mismatch).consistent);
    }
}
