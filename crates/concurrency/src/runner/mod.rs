//! Scenario runners
//!
//! Each scenario kind has one [`ScenarioRunner`]. A runner only schedules
//! actors and records what they observed; the
//! [`Orchestrator`](crate::orchestrator::Orchestrator) owns the timeline,
//! the deadline and session accounting for every kind.

use std::sync::Arc;

use async_trait::async_trait;
use isoprobe_core::{IsolationLevel, NodeId, ProbeError, ProbeResult, ScenarioConfig};

use crate::pool::ClusterPool;
use crate::run::ScenarioKind;
use crate::schedule::Timeline;
use crate::session::{Session, SessionLedger};

pub mod concurrent_read;
pub mod read_write;

pub use concurrent_read::{ConcurrentReadOutput, ConcurrentReadParams, ConcurrentReadRunner};
pub use read_write::{ReadWriteOutput, ReadWriteParams, ReadWriteRunner};

/// What every runner's parameters expose to the orchestrator.
pub trait ScenarioParams: Send + Sync {
    /// Target record
    fn tconst(&self) -> &str;
    /// Isolation level for every session
    fn isolation(&self) -> IsolationLevel;
}

/// One scenario kind.
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    /// Kind this runner implements.
    const KIND: ScenarioKind;
    /// Validated input.
    type Params: ScenarioParams;
    /// Runner output.
    type Outcome: Send;

    /// Execute one run. Per-actor failures belong in the outcome; an `Err`
    /// aborts the whole run.
    async fn run(&self, ctx: &RunContext, params: &Self::Params) -> ProbeResult<Self::Outcome>;
}

/// Everything a runner needs for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Session pools
    pub pool: Arc<ClusterPool>,
    /// Run timeline
    pub timeline: Timeline,
    /// Session accounting for this run
    pub ledger: SessionLedger,
    /// Timing and thresholds
    pub config: ScenarioConfig,
}

impl RunContext {
    /// Open a session tracked by this run.
    pub async fn acquire(&self, node: &NodeId, isolation: IsolationLevel) -> ProbeResult<Session> {
        self.pool.acquire(node, isolation, &self.ledger).await
    }
}

/// The first error when every actor failed for lack of a reachable node.
pub(crate) fn total_unavailability<'a>(
    errors: impl Iterator<Item = Option<&'a ProbeError>>,
) -> Option<ProbeError> {
    let mut first = None;
    let mut any = false;
    for error in errors {
        any = true;
        match error {
            Some(e) if e.is_unavailability() => {
                first.get_or_insert_with(|| e.clone());
            }
            _ => return None,
        }
    }
    if any {
        first
    } else {
        None
    }
}
