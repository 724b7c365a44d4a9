//! Request controller
//!
//! The single entry point for every operation the HTTP surface exposes.
//! Each method validates its input, resolves which nodes hold the record,
//! dispatches to the orchestrator or runs a short autocommit session, and
//! assembles the response body.
//!
//! Nothing here knows about HTTP: errors come back as [`ProbeError`] and the
//! transport maps them with [`crate::convert`].

use std::collections::BTreeMap;
use std::sync::Arc;

use isoprobe_concurrency::{
    ClusterPool, ConcurrentReadParams, Orchestrator, ReadWriteParams, Scenario, ScenarioOutput,
    SessionLedger,
};
use isoprobe_core::{
    IsolationLevel, NewTitle, NodeId, ProbeError, ProbeResult, ScenarioConfig, TitleRow, Topology,
};
use tracing::{debug, info, warn};

use crate::request::{ConcurrentReadRequest, ListTitlesQuery, ReadWriteRequest};
use crate::response::{
    failure, ConcurrentReadResponse, HealthResponse, NodeHealth, NodeWriteResult,
    ReadWriteResponse, RunView, TitleListResponse, TitleWriteResponse,
};
use crate::validate;

/// Validates requests and drives scenarios and title operations.
#[derive(Debug, Clone)]
pub struct Controller {
    orchestrator: Orchestrator,
    topology: Arc<Topology>,
}

impl Controller {
    /// Controller over an orchestrator and the topology its pool was built from.
    pub fn new(orchestrator: Orchestrator, topology: Topology) -> Self {
        Self {
            orchestrator,
            topology: Arc::new(topology),
        }
    }

    /// Cluster layout.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn pool(&self) -> &Arc<ClusterPool> {
        self.orchestrator.pool()
    }

    fn scenario(&self) -> &ScenarioConfig {
        self.orchestrator.config()
    }

    /// Ledger for sessions that are not part of a scenario run.
    fn side_ledger(&self) -> SessionLedger {
        SessionLedger::new(self.scenario().blocking_threshold())
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    /// Run the concurrent-read scenario.
    pub async fn concurrent_read(
        &self,
        req: &ConcurrentReadRequest,
    ) -> ProbeResult<ConcurrentReadResponse> {
        let tconst = validate::tconst(&req.tconst)?;
        let isolation = validate::isolation(req.isolation_level.as_deref())?;
        let readers = validate::actor_count("readers", req.readers, 1)?;

        let (_, nodes) = self.locate(&tconst).await?;
        let params = ConcurrentReadParams {
            tconst,
            isolation,
            nodes,
            readers_per_node: readers,
        };

        let run = self
            .orchestrator
            .run(Scenario::ConcurrentRead(params))
            .await?;
        let view = RunView::of(&run);
        match &run.output {
            ScenarioOutput::ConcurrentRead(out) => Ok(ConcurrentReadResponse::assemble(view, out)),
            other => Err(unexpected_output("concurrent_read", other)),
        }
    }

    /// Run the read-write conflict scenario.
    pub async fn read_write_conflict(
        &self,
        req: &ReadWriteRequest,
    ) -> ProbeResult<ReadWriteResponse> {
        let config = self.scenario();
        let tconst = validate::tconst(&req.tconst)?;
        let isolation = validate::isolation(req.isolation_level.as_deref())?;
        validate::update(&req.new_data)?;
        let readers = validate::actor_count("readers", req.readers, config.readers_per_node)?;
        let writers = validate::actor_count("writers", req.writers, config.writers_per_node)?;
        let schedule = validate::schedule(req.schedule.as_ref(), config)?;

        let (original, nodes) = self.locate(&tconst).await?;
        let params = ReadWriteParams {
            tconst,
            update: req.new_data.clone(),
            isolation,
            nodes,
            readers_per_node: readers,
            writers_per_node: writers,
            original,
            schedule,
        };

        let run = self
            .orchestrator
            .run(Scenario::ReadWriteConflict(params))
            .await?;
        let view = RunView::of(&run);
        match &run.output {
            ScenarioOutput::ReadWriteConflict(out) => Ok(ReadWriteResponse::assemble(view, out)),
            other => Err(unexpected_output("read_write_conflict", other)),
        }
    }

    // ========================================================================
    // Titles
    // ========================================================================

    /// Insert or replace a title on its owning fragment and on the central
    /// node. Succeeds when at least one node accepted the write.
    pub async fn upsert_title(&self, title: &NewTitle) -> ProbeResult<TitleWriteResponse> {
        title.validate()?;
        let targets = self.write_targets(&title.title_type)?;
        let ledger = self.side_ledger();
        let mut results = Vec::with_capacity(targets.len());
        for node in targets {
            let result = self.upsert_on(&node, title, &ledger).await;
            results.push((node, result));
        }

        let (nodes, accepted) = tally("upsert", &title.tconst, results)?;
        info!(
            target: "isoprobe::executor",
            tconst = %title.tconst, accepted, targets = nodes.len(),
            "Title upserted"
        );
        Ok(TitleWriteResponse {
            success: true,
            tconst: title.tconst.clone(),
            message: format!(
                "title {} written to {accepted} of {} nodes",
                title.tconst,
                nodes.len()
            ),
            nodes,
        })
    }

    /// Delete a title from its owning fragment, then from the central node.
    /// Succeeds when at least one node accepted the delete.
    pub async fn delete_title(&self, tconst: &str) -> ProbeResult<TitleWriteResponse> {
        let tconst = validate::tconst(tconst)?;
        let (row, _) = self.locate(&tconst).await?;
        let targets = self.write_targets(&row.title_type)?;
        let ledger = self.side_ledger();
        let mut results = Vec::with_capacity(targets.len());
        for node in targets {
            let result = self.delete_on(&node, &tconst, &ledger).await;
            results.push((node, result));
        }

        let (nodes, accepted) = tally("delete", &tconst, results)?;
        info!(
            target: "isoprobe::executor",
            tconst = %tconst, accepted, targets = nodes.len(),
            "Title deleted"
        );
        Ok(TitleWriteResponse {
            success: true,
            message: format!("title {tconst} deleted from {accepted} of {} nodes", nodes.len()),
            tconst,
            nodes,
        })
    }

    /// One page of titles from the central node, newest `start_year` first.
    pub async fn list_titles(&self, raw: &ListTitlesQuery) -> ProbeResult<TitleListResponse> {
        let (page, query) = validate::listing(raw)?;
        let Some(central) = self.topology.central() else {
            return Err(ProbeError::internal("listing needs a central node"));
        };
        let node = central.id.clone();

        let ledger = self.side_ledger();
        let mut session = self
            .pool()
            .acquire(&node, IsolationLevel::ReadCommitted, &ledger)
            .await?;
        let result = session.list(&query).await;
        session.release().await;
        let listed = result?;

        debug!(
            target: "isoprobe::executor",
            node = %node, page, rows = listed.rows.len(), total = listed.total,
            "Titles listed"
        );
        Ok(TitleListResponse {
            data: listed.rows,
            total: listed.total,
            page,
            limit: query.limit,
            node,
        })
    }

    /// Latest committed row for `tconst`, central node first.
    pub async fn get_title(&self, tconst: &str) -> ProbeResult<TitleRow> {
        let tconst = validate::tconst(tconst)?;
        let (row, _) = self.locate(&tconst).await?;
        Ok(row)
    }

    /// Reachability, row count and pool usage of every node.
    pub async fn health(&self) -> HealthResponse {
        let ledger = self.side_ledger();
        let mut nodes = BTreeMap::new();
        for spec in self.topology.nodes() {
            let id = &spec.id;
            let sessions_in_use = self.pool().sessions_in_use(id).unwrap_or(0);
            let capacity = self.pool().capacity(id).unwrap_or(spec.capacity);
            let counted = self.count_on(id, &ledger).await;
            let (error, error_kind) = failure(&counted);
            let health = NodeHealth {
                online: counted.is_ok(),
                record_count: counted.ok(),
                sessions_in_use,
                capacity,
                error,
                error_kind,
            };
            nodes.insert(id.to_string(), health);
        }
        HealthResponse { nodes }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Owning fragment first, then the central node, without repeats.
    fn write_targets(&self, title_type: &str) -> ProbeResult<Vec<NodeId>> {
        let mut targets: Vec<NodeId> = Vec::with_capacity(2);
        if let Some(primary) = self.topology.primary_for(title_type) {
            targets.push(primary);
        }
        if let Some(central) = self.topology.central() {
            if !targets.contains(&central.id) {
                targets.push(central.id.clone());
            }
        }
        if targets.is_empty() {
            return Err(ProbeError::internal(format!(
                "no node can hold title type {title_type}"
            )));
        }
        Ok(targets)
    }

    /// Find the record and the nodes expected to hold it.
    ///
    /// Reads go to the central node first and fall back through the others
    /// in configuration order. If no node answered at all, the first
    /// unavailability error is returned instead of `NotFoundError`.
    async fn locate(&self, tconst: &str) -> ProbeResult<(TitleRow, Vec<NodeId>)> {
        let ledger = self.side_ledger();
        let mut order: Vec<&NodeId> = Vec::with_capacity(self.topology.nodes().len());
        if let Some(central) = self.topology.central() {
            order.push(&central.id);
        }
        for spec in self.topology.nodes() {
            if !order.contains(&&spec.id) {
                order.push(&spec.id);
            }
        }

        let mut answered = false;
        let mut unavailable = None;
        for node in order {
            match self.read_on(node, tconst, &ledger).await {
                Ok(Some(row)) => {
                    let nodes = self.topology.nodes_for(&row.title_type);
                    debug!(
                        target: "isoprobe::executor", tconst, node = %node, holders = nodes.len(),
                        "Title located"
                    );
                    return Ok((row, nodes));
                }
                Ok(None) => answered = true,
                Err(e) if e.is_unavailability() => {
                    debug!(
                        target: "isoprobe::executor", tconst, node = %node, error = %e,
                        "Node unavailable during lookup"
                    );
                    unavailable.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        match unavailable {
            Some(e) if !answered => Err(e),
            _ => Err(ProbeError::NotFound {
                tconst: tconst.to_string(),
                location: "any node".into(),
            }),
        }
    }

    async fn read_on(
        &self,
        node: &NodeId,
        tconst: &str,
        ledger: &SessionLedger,
    ) -> ProbeResult<Option<TitleRow>> {
        let mut session = self
            .pool()
            .acquire(node, IsolationLevel::ReadCommitted, ledger)
            .await?;
        let result = session.read(tconst).await;
        session.release().await;
        result
    }

    async fn upsert_on(
        &self,
        node: &NodeId,
        title: &NewTitle,
        ledger: &SessionLedger,
    ) -> ProbeResult<u64> {
        let mut session = self
            .pool()
            .acquire(node, IsolationLevel::ReadCommitted, ledger)
            .await?;
        let result = session.upsert(title).await;
        session.release().await;
        result
    }

    async fn delete_on(
        &self,
        node: &NodeId,
        tconst: &str,
        ledger: &SessionLedger,
    ) -> ProbeResult<u64> {
        let mut session = self
            .pool()
            .acquire(node, IsolationLevel::ReadCommitted, ledger)
            .await?;
        let result = session.delete(tconst).await;
        session.release().await;
        result
    }

    async fn count_on(&self, node: &NodeId, ledger: &SessionLedger) -> ProbeResult<u64> {
        let mut session = self
            .pool()
            .acquire(node, IsolationLevel::ReadCommitted, ledger)
            .await?;
        let result = session.count().await;
        session.release().await;
        result
    }
}

/// Per-node results keyed by node name, plus how many nodes accepted.
/// Fails with the first node error when none did.
fn tally(
    operation: &'static str,
    tconst: &str,
    results: Vec<(NodeId, ProbeResult<u64>)>,
) -> ProbeResult<(BTreeMap<String, NodeWriteResult>, usize)> {
    let mut nodes = BTreeMap::new();
    let mut first_error = None;
    for (node, result) in results {
        nodes.insert(node.to_string(), NodeWriteResult::from(&result));
        if let Err(e) = result {
            warn!(
                target: "isoprobe::executor", node = %node, tconst, operation, error = %e,
                "Write failed on node"
            );
            first_error.get_or_insert(e);
        }
    }
    let accepted = nodes.values().filter(|r| r.success).count();
    if accepted == 0 {
        return Err(first_error
            .unwrap_or_else(|| ProbeError::internal(format!("{operation} reached no node"))));
    }
    Ok((nodes, accepted))
}

fn unexpected_output(operation: &str, output: &ScenarioOutput) -> ProbeError {
    let got = match output {
        ScenarioOutput::ConcurrentRead(_) => "concurrent_read",
        ScenarioOutput::ReadWriteConflict(_) => "read_write_conflict",
    };
    ProbeError::internal(format!("{operation} dispatch produced {got} output"))
}
