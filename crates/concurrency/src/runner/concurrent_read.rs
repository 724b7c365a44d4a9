//! Concurrent read: several read-only transactions on the same record at
//! once, one or more per node.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use isoprobe_core::{ActorKey, IsolationLevel, NodeId, ProbeError, ProbeResult, TitleRow};
use tracing::debug;

use super::{total_unavailability, RunContext, ScenarioParams, ScenarioRunner};
use crate::anomaly::ConcurrentReadReport;
use crate::observation::ConcurrentReadOutcome;
use crate::run::ScenarioKind;

/// Input of a concurrent-read run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrentReadParams {
    /// Target record
    pub tconst: String,
    /// Level for every session
    pub isolation: IsolationLevel,
    /// Nodes to read from
    pub nodes: Vec<NodeId>,
    /// Readers on each node
    pub readers_per_node: u32,
}

impl ScenarioParams for ConcurrentReadParams {
    fn tconst(&self) -> &str {
        &self.tconst
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

/// Result of a concurrent-read run.
#[derive(Debug, Clone)]
pub struct ConcurrentReadOutput {
    /// One entry per actor, ordered by node then index
    pub results: Vec<ConcurrentReadOutcome>,
    /// Agreement between successful reads
    pub report: ConcurrentReadReport,
}

/// Runner for [`ScenarioKind::ConcurrentRead`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrentReadRunner;

#[async_trait]
impl ScenarioRunner for ConcurrentReadRunner {
    const KIND: ScenarioKind = ScenarioKind::ConcurrentRead;
    type Params = ConcurrentReadParams;
    type Outcome = ConcurrentReadOutput;

    async fn run(
        &self,
        ctx: &RunContext,
        params: &ConcurrentReadParams,
    ) -> ProbeResult<ConcurrentReadOutput> {
        let hold = ctx.config.concurrent_read_hold();
        let actors = params.nodes.iter().flat_map(|node| {
            (1..=params.readers_per_node).map(move |i| ActorKey::new(node.clone(), i))
        });

        let results = join_all(actors.map(|actor| read_once(ctx, actor, params, hold))).await;

        if let Some(err) = total_unavailability(results.iter().map(|r| r.result.as_ref().err())) {
            return Err(err);
        }
        let report = ConcurrentReadReport::detect(params.isolation, &results);
        Ok(ConcurrentReadOutput { results, report })
    }
}

async fn read_once(
    ctx: &RunContext,
    actor: ActorKey,
    params: &ConcurrentReadParams,
    hold: Duration,
) -> ConcurrentReadOutcome {
    let started_at = ctx.timeline.offset();
    let result = read_and_hold(ctx, &actor, params, hold).await;
    let ended_at = ctx.timeline.offset();
    if let Err(e) = &result {
        debug!(
            target: "isoprobe::scenario", actor = %actor, error = %e,
            "Concurrent reader failed"
        );
    }
    ConcurrentReadOutcome {
        isolation: params.isolation,
        started_at,
        ended_at,
        timestamp: ctx.timeline.wall(ended_at),
        result,
        actor,
    }
}

async fn read_and_hold(
    ctx: &RunContext,
    actor: &ActorKey,
    params: &ConcurrentReadParams,
    hold: Duration,
) -> ProbeResult<TitleRow> {
    let mut session = ctx.acquire(&actor.node, params.isolation).await?;
    let result = async {
        session.begin(true).await?;
        let row = session.read(&params.tconst).await?;
        ctx.timeline.sleep(hold).await;
        session.commit().await?;
        row.ok_or_else(|| ProbeError::not_found_on(&params.tconst, &actor.node))
    }
    .await;
    session.release().await;
    result
}
