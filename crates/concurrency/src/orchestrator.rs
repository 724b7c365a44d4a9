//! Scenario orchestration
//!
//! The orchestrator wraps every runner the same way:
//! - Anchor a fresh [`Timeline`] and [`SessionLedger`]
//! - Race the runner against the scenario deadline
//! - On expiry drop the runner future, which drops every live session and so
//!   rolls back and releases each one synchronously
//! - Check that every session the run opened has closed

use std::sync::Arc;

use isoprobe_core::{Clock, ProbeError, ProbeResult, ScenarioConfig};
use tracing::{info, warn};
use uuid::Uuid;

use crate::pool::ClusterPool;
use crate::run::{RunOutcome, ScenarioKind, ScenarioRun};
use crate::runner::{
    ConcurrentReadOutput, ConcurrentReadParams, ConcurrentReadRunner, ReadWriteOutput,
    ReadWriteParams, ReadWriteRunner, RunContext, ScenarioParams, ScenarioRunner,
};
use crate::schedule::Timeline;
use crate::session::SessionLedger;

/// A scenario request with validated parameters.
#[derive(Debug, Clone)]
pub enum Scenario {
    /// Concurrent read
    ConcurrentRead(ConcurrentReadParams),
    /// Read-write conflict
    ReadWriteConflict(ReadWriteParams),
    /// Reserved third kind; has no contract
    Reserved,
}

impl Scenario {
    /// Kind of this scenario.
    pub fn kind(&self) -> ScenarioKind {
        match self {
            Scenario::ConcurrentRead(_) => ScenarioKind::ConcurrentRead,
            Scenario::ReadWriteConflict(_) => ScenarioKind::ReadWriteConflict,
            Scenario::Reserved => ScenarioKind::Reserved,
        }
    }
}

/// Output of a dispatched [`Scenario`].
#[derive(Debug, Clone)]
pub enum ScenarioOutput {
    /// Concurrent-read output
    ConcurrentRead(ConcurrentReadOutput),
    /// Read-write conflict output
    ReadWriteConflict(ReadWriteOutput),
}

/// Runs scenarios against a cluster.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pool: Arc<ClusterPool>,
    clock: Arc<dyn Clock>,
    config: ScenarioConfig,
}

impl Orchestrator {
    /// Orchestrator over `pool`.
    pub fn new(pool: Arc<ClusterPool>, clock: Arc<dyn Clock>, config: ScenarioConfig) -> Self {
        Self {
            pool,
            clock,
            config,
        }
    }

    /// Session pools.
    pub fn pool(&self) -> &Arc<ClusterPool> {
        &self.pool
    }

    /// Scenario configuration.
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Dispatch a scenario to its runner.
    ///
    /// # Errors
    ///
    /// - `ValidationError` for [`Scenario::Reserved`]
    /// - `TimeoutError` when the run outlives `scenario_timeout_ms`
    /// - Whatever top-level error the runner returns
    pub async fn run(&self, scenario: Scenario) -> ProbeResult<ScenarioRun<ScenarioOutput>> {
        match scenario {
            Scenario::ConcurrentRead(params) => Ok(self
                .run_with(&ConcurrentReadRunner, &params)
                .await?
                .map_output(ScenarioOutput::ConcurrentRead)),
            Scenario::ReadWriteConflict(params) => Ok(self
                .run_with(&ReadWriteRunner, &params)
                .await?
                .map_output(ScenarioOutput::ReadWriteConflict)),
            Scenario::Reserved => Err(ProbeError::validation(format!(
                "scenario kind {} has no defined contract",
                ScenarioKind::Reserved
            ))),
        }
    }

    /// Run one runner under the scenario deadline.
    pub async fn run_with<R: ScenarioRunner>(
        &self,
        runner: &R,
        params: &R::Params,
    ) -> ProbeResult<ScenarioRun<R::Outcome>> {
        let id = Uuid::new_v4();
        let ledger = SessionLedger::new(self.config.blocking_threshold());
        let timeline = Timeline::start(Arc::clone(&self.clock));
        let ctx = RunContext {
            pool: Arc::clone(&self.pool),
            timeline: timeline.clone(),
            ledger: ledger.clone(),
            config: self.config.clone(),
        };
        let deadline = self.config.scenario_timeout();

        info!(
            target: "isoprobe::scenario",
            run = %id, kind = %R::KIND, isolation = %params.isolation(), tconst = params.tconst(),
            "Scenario started"
        );

        let finished = {
            let work = runner.run(&ctx, params);
            tokio::pin!(work);
            tokio::select! {
                result = &mut work => Some(result),
                _ = self.clock.sleep(deadline) => None,
            }
        };

        let Some(result) = finished else {
            warn!(
                target: "isoprobe::scenario",
                run = %id, kind = %R::KIND,
                outcome = RunOutcome::TimedOut.as_str(),
                sessions_opened = ledger.opened(), sessions_closed = ledger.closed(),
                "Scenario timed out"
            );
            return Err(ProbeError::Timeout {
                elapsed_ms: deadline.as_millis() as u64,
            });
        };

        if !ledger.all_closed() {
            return Err(ProbeError::internal(format!(
                "run {id} left {} of {} sessions open",
                ledger.opened() - ledger.closed(),
                ledger.opened()
            )));
        }

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    target: "isoprobe::scenario",
                    run = %id, kind = %R::KIND,
                    outcome = RunOutcome::Failed.as_str(), error = %e,
                    "Scenario failed"
                );
                return Err(e);
            }
        };

        let ended = timeline.offset();
        info!(
            target: "isoprobe::scenario",
            run = %id, kind = %R::KIND,
            outcome = RunOutcome::Completed.as_str(),
            sessions = ledger.closed(), elapsed_ms = ended.as_millis() as u64,
            "Scenario completed"
        );

        Ok(ScenarioRun {
            id,
            kind: R::KIND,
            isolation: params.isolation(),
            tconst: params.tconst().to_string(),
            sessions: ledger.records(),
            started_at: timeline.wall(std::time::Duration::ZERO),
            ended_at: timeline.wall(ended),
            outcome: RunOutcome::Completed,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ConflictSchedule;
    use crate::session::SessionState;
    use isoprobe_core::{
        IsolationLevel, NodeConnector, NodeId, PoolConfig, TitleRow, TitleUpdate, TokioClock,
    };
    use isoprobe_storage::{MemoryConnector, MemoryNode};
    use std::time::Duration;

    fn row() -> TitleRow {
        TitleRow {
            tconst: "tt1".into(),
            title_type: "movie".into(),
            primary_title: "One".into(),
            genres: None,
            runtime_minutes: Some(10),
            start_year: None,
            last_updated: None,
        }
    }

    fn setup(config: ScenarioConfig) -> (Arc<MemoryNode>, Orchestrator) {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let node = MemoryNode::new(
            NodeId::new("node1"),
            Arc::clone(&clock),
            Duration::from_secs(30),
        );
        node.seed([row()]);
        let connector: Arc<dyn NodeConnector> = Arc::new(MemoryConnector::new(Arc::clone(&node)));
        let pool = Arc::new(
            ClusterPool::new(PoolConfig::default(), Arc::clone(&clock)).with_node(connector, 8),
        );
        (node, Orchestrator::new(pool, clock, config))
    }

    fn conflict_params(isolation: IsolationLevel, config: &ScenarioConfig) -> ReadWriteParams {
        ReadWriteParams {
            tconst: "tt1".into(),
            update: TitleUpdate::runtime(150),
            isolation,
            nodes: vec![NodeId::new("node1")],
            readers_per_node: 1,
            writers_per_node: 1,
            original: row(),
            schedule: ConflictSchedule::from_config(config),
        }
    }

    #[tokio::test]
    async fn reserved_kind_is_rejected() {
        let (_node, orchestrator) = setup(ScenarioConfig::default());
        let err = orchestrator.run(Scenario::Reserved).await.unwrap_err();
        assert!(matches!(err, ProbeError::Validation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_closes_every_session() {
        let config = ScenarioConfig::default();
        let (_node, orchestrator) = setup(config.clone());
        let params = conflict_params(IsolationLevel::ReadCommitted, &config);
        let run = orchestrator
            .run(Scenario::ReadWriteConflict(params))
            .await
            .unwrap();
        assert_eq!(run.kind, ScenarioKind::ReadWriteConflict);
        assert_eq!(run.outcome, RunOutcome::Completed);
        // writer, reader, post-run snapshot
        assert_eq!(run.sessions.len(), 3);
        assert!(run.sessions.iter().all(|s| s.final_state.is_terminal()));
        assert!(run
            .sessions
            .iter()
            .any(|s| s.final_state == SessionState::Committed));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rolls_back_and_frees_permits() {
        let config = ScenarioConfig {
            scenario_timeout_ms: 150,
            ..ScenarioConfig::default()
        };
        let (node, orchestrator) = setup(config.clone());
        let params = conflict_params(IsolationLevel::ReadUncommitted, &config);
        let err = orchestrator
            .run(Scenario::ReadWriteConflict(params))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Timeout { elapsed_ms: 150 });
        assert_eq!(orchestrator.pool().sessions_in_use(&NodeId::new("node1")), Some(0));
        assert_eq!(node.locked_rows(), 0);
        assert_eq!(node.snapshot("tt1").unwrap().runtime_minutes, Some(10));
    }
}
