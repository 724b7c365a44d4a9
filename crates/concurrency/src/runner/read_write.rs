//! Read-write conflict: writers hold an uncommitted update open while
//! readers on the same nodes read the record twice.
//!
//! With the default schedule every writer begins at 0 and commits after the
//! hold; readers issue `read1` inside the hold and `read2` after the commit.
//! What each read returned, and how long it took, is up to the engine.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{join, join_all};
use isoprobe_core::{
    ActorKey, IsolationLevel, NodeId, ProbeError, ProbeResult, TitleRow, TitleUpdate,
};
use tracing::debug;

use super::{total_unavailability, RunContext, ScenarioParams, ScenarioRunner};
use crate::anomaly::AnomalyReport;
use crate::classify::{classify_reader, WriterWindow};
use crate::observation::{
    ActorOutcome, NodeSnapshot, ReadObservation, ReaderFlags, ReaderOutcome, ReaderRecord,
    WriteObservation, WriterOutcome,
};
use crate::run::ScenarioKind;
use crate::schedule::{ConflictSchedule, ReaderPlan, WriterPlan};
use crate::session::Session;

/// Input of a read-write conflict run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWriteParams {
    /// Target record
    pub tconst: String,
    /// Values the writers apply
    pub update: TitleUpdate,
    /// Level for every session
    pub isolation: IsolationLevel,
    /// Every node holding the record
    pub nodes: Vec<NodeId>,
    /// Readers on each node
    pub readers_per_node: u32,
    /// Writers on each node
    pub writers_per_node: u32,
    /// Record as resolved before the run
    pub original: TitleRow,
    /// Timing
    pub schedule: ConflictSchedule,
}

impl ScenarioParams for ReadWriteParams {
    fn tconst(&self) -> &str {
        &self.tconst
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

/// Result of a read-write conflict run.
#[derive(Debug, Clone)]
pub struct ReadWriteOutput {
    /// Record before the run
    pub original: TitleRow,
    /// Post-run committed state per node
    pub final_values: Vec<NodeSnapshot>,
    /// Readers ordered by node then index
    pub readers: Vec<ReaderOutcome>,
    /// Writers ordered by node then index
    pub writers: Vec<WriterOutcome>,
    /// Classification of the whole run
    pub report: AnomalyReport,
}

/// Runner for [`ScenarioKind::ReadWriteConflict`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadWriteRunner;

#[async_trait]
impl ScenarioRunner for ReadWriteRunner {
    const KIND: ScenarioKind = ScenarioKind::ReadWriteConflict;
    type Params = ReadWriteParams;
    type Outcome = ReadWriteOutput;

    async fn run(
        &self,
        ctx: &RunContext,
        params: &ReadWriteParams,
    ) -> ProbeResult<ReadWriteOutput> {
        let writer_futs = actors(&params.nodes, params.writers_per_node)
            .map(|actor| write(ctx, actor, params, params.schedule.writer));
        let reader_futs = actors(&params.nodes, params.readers_per_node).map(|actor| {
            let plan = params.schedule.reader(actor.index as usize - 1);
            read_twice(ctx, actor, params, plan)
        });

        let (writers, raw_readers) = join(join_all(writer_futs), join_all(reader_futs)).await;

        let errors = writers
            .iter()
            .map(|w| w.result.as_ref().err())
            .chain(raw_readers.iter().map(|r| r.result.as_ref().err()));
        if let Some(err) = total_unavailability(errors) {
            return Err(err);
        }

        let threshold = ctx.config.blocking_threshold();
        let readers: Vec<ReaderOutcome> = raw_readers
            .into_iter()
            .map(|raw| {
                let windows = WriterWindow::from_outcomes(
                    writers.iter().filter(|w| w.node() == raw.node()),
                );
                classify(raw, params, &windows, threshold)
            })
            .collect();

        let final_values =
            join_all(params.nodes.iter().map(|node| snapshot(ctx, node, params))).await;
        let report = AnomalyReport::detect(params.isolation, &readers, &writers, &final_values);

        debug!(
            target: "isoprobe::scenario",
            tconst = %params.tconst,
            dirty = report.dirty_reads_occurred,
            non_repeatable = report.non_repeatable_reads,
            blocked = report.blocking_occurred,
            "Read-write conflict classified"
        );

        Ok(ReadWriteOutput {
            original: params.original.clone(),
            final_values,
            readers,
            writers,
            report,
        })
    }
}

fn actors(nodes: &[NodeId], per_node: u32) -> impl Iterator<Item = ActorKey> + '_ {
    nodes
        .iter()
        .flat_map(move |node| (1..=per_node).map(move |i| ActorKey::new(node.clone(), i)))
}

// ============================================================================
// Writers
// ============================================================================

async fn write(
    ctx: &RunContext,
    actor: ActorKey,
    params: &ReadWriteParams,
    plan: WriterPlan,
) -> WriterOutcome {
    ctx.timeline.wait_until(plan.start).await;
    let started_at = ctx.timeline.offset();
    let result = match ctx.acquire(&actor.node, params.isolation).await {
        Ok(mut session) => {
            let result = update_and_hold(ctx, &mut session, params, plan.hold, started_at).await;
            session.release().await;
            result
        }
        Err(e) => Err(e),
    };
    let ended_at = ctx.timeline.offset();
    if let Err(e) = &result {
        debug!(target: "isoprobe::scenario", actor = %actor, error = %e, "Writer failed");
    }
    ActorOutcome {
        actor,
        isolation: params.isolation,
        started_at,
        ended_at,
        timestamp: ctx.timeline.wall(ended_at),
        result,
    }
}

async fn update_and_hold(
    ctx: &RunContext,
    session: &mut Session,
    params: &ReadWriteParams,
    hold: Duration,
    begin_at: Duration,
) -> ProbeResult<WriteObservation> {
    session.begin(false).await?;
    let rows_affected = session.update(&params.tconst, &params.update).await?;
    ctx.timeline.sleep(hold).await;
    session.commit().await?;
    let commit_at = ctx.timeline.offset();
    Ok(WriteObservation {
        session_id: session.id(),
        tconst: params.tconst.clone(),
        update: params.update.clone(),
        begin_at,
        commit_at,
        committed_wall: ctx.timeline.wall(commit_at),
        rows_affected,
        duration: commit_at.saturating_sub(begin_at),
    })
}

// ============================================================================
// Readers
// ============================================================================

/// Reader outcome before classification.
struct RawReader {
    actor: ActorKey,
    started_at: Duration,
    ended_at: Duration,
    timestamp: DateTime<Utc>,
    result: ProbeResult<(ReadObservation, ReadObservation)>,
}

impl RawReader {
    fn node(&self) -> &NodeId {
        &self.actor.node
    }
}

async fn read_twice(
    ctx: &RunContext,
    actor: ActorKey,
    params: &ReadWriteParams,
    plan: ReaderPlan,
) -> RawReader {
    ctx.timeline.wait_until(plan.start).await;
    let started_at = ctx.timeline.offset();
    let result = match ctx.acquire(&actor.node, params.isolation).await {
        Ok(mut session) => {
            let result = async {
                session.begin(true).await?;
                let read1 = observe(ctx, &mut session, &params.tconst).await?;
                ctx.timeline.wait_until(plan.read2_at).await;
                let read2 = observe(ctx, &mut session, &params.tconst).await?;
                session.commit().await?;
                Ok::<_, ProbeError>((read1, read2))
            }
            .await;
            session.release().await;
            result
        }
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        debug!(target: "isoprobe::scenario", actor = %actor, error = %e, "Reader failed");
    }
    let ended_at = ctx.timeline.offset();
    RawReader {
        actor,
        started_at,
        ended_at,
        timestamp: ctx.timeline.wall(ended_at),
        result,
    }
}

async fn observe(
    ctx: &RunContext,
    session: &mut Session,
    tconst: &str,
) -> ProbeResult<ReadObservation> {
    let started_at = ctx.timeline.offset();
    let row = session.read(tconst).await?;
    let captured_at = ctx.timeline.offset();
    Ok(ReadObservation {
        session_id: session.id(),
        tconst: tconst.to_string(),
        row,
        started_at,
        captured_at,
        captured_wall: ctx.timeline.wall(captured_at),
        duration: captured_at.saturating_sub(started_at),
    })
}

fn classify(
    raw: RawReader,
    params: &ReadWriteParams,
    windows: &[WriterWindow],
    threshold: Duration,
) -> ReaderOutcome {
    let result = raw.result.map(|(read1, read2)| {
        let flags: ReaderFlags = classify_reader(
            &read1,
            &read2,
            &params.original,
            &params.update,
            windows,
            threshold,
        );
        ReaderRecord { read1, read2, flags }
    });
    ActorOutcome {
        actor: raw.actor,
        isolation: params.isolation,
        started_at: raw.started_at,
        ended_at: raw.ended_at,
        timestamp: raw.timestamp,
        result,
    }
}

/// Latest committed state of the record on `node`, read in autocommit mode.
async fn snapshot(ctx: &RunContext, node: &NodeId, params: &ReadWriteParams) -> NodeSnapshot {
    let result = match ctx.acquire(node, IsolationLevel::ReadCommitted).await {
        Ok(mut session) => {
            let row = session.read(&params.tconst).await;
            session.release().await;
            row
        }
        Err(e) => Err(e),
    };
    NodeSnapshot {
        node: node.clone(),
        result,
    }
}
