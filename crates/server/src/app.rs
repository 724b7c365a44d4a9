//! Process-wide state: the in-process nodes and the controller over them.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use isoprobe_concurrency::{ClusterPool, Orchestrator};
use isoprobe_core::{Clock, NodeConnector, NodeId, ProbeConfig, TitleRow};
use isoprobe_executor::Controller;
use isoprobe_storage::{MemoryConnector, MemoryNode};
use tracing::info;

/// Everything a request handler can reach.
#[derive(Debug)]
pub struct AppState {
    controller: Controller,
    nodes: Vec<Arc<MemoryNode>>,
}

impl AppState {
    /// Build one in-memory node per configured node, a pool over them and
    /// the controller.
    pub fn build(config: &ProbeConfig, clock: Arc<dyn Clock>) -> Self {
        let topology = config.topology();
        let lock_wait = config.engine.lock_wait_timeout();

        let mut pool = ClusterPool::new(config.pool.clone(), Arc::clone(&clock));
        let mut nodes = Vec::with_capacity(topology.nodes().len());
        for spec in topology.nodes() {
            let node = MemoryNode::new(spec.id.clone(), Arc::clone(&clock), lock_wait);
            let connector: Arc<dyn NodeConnector> =
                Arc::new(MemoryConnector::new(Arc::clone(&node)));
            pool = pool.with_node(connector, spec.capacity);
            nodes.push(node);
        }

        let orchestrator = Orchestrator::new(Arc::new(pool), clock, config.scenario.clone());
        Self {
            controller: Controller::new(orchestrator, topology),
            nodes,
        }
    }

    /// Request controller.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// In-process node by name.
    pub fn node(&self, id: &NodeId) -> Option<&Arc<MemoryNode>> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Place each row on every node whose role holds its title type.
    /// Returns the number of placements.
    pub fn seed(&self, rows: Vec<TitleRow>) -> usize {
        let topology = self.controller.topology();
        let mut placed = 0;
        for node in &self.nodes {
            let Some(spec) = topology.get(node.id()) else {
                continue;
            };
            let share: Vec<TitleRow> = rows
                .iter()
                .filter(|r| spec.role.holds(&r.title_type))
                .cloned()
                .collect();
            placed += share.len();
            info!(target: "isoprobe::engine", node = %node.id(), rows = share.len(), "Node seeded");
            node.seed(share);
        }
        placed
    }
}

/// Read a JSON array of rows.
pub fn load_seed(path: &Path) -> anyhow::Result<Vec<TitleRow>> {
    let raw = std::fs::read(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing seed file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use isoprobe_core::TokioClock;
    use std::io::Write;

    #[tokio::test]
    async fn seed_file_places_rows_by_partition() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"tconst":"tt0000001","title_type":"movie","primary_title":"Carmencita",
                  "runtime_minutes":1}},
                {{"tconst":"tt0000002","title_type":"short",
                  "primary_title":"Le clown et ses chiens"}}
            ]"#
        )
        .unwrap();
        let rows = load_seed(file.path()).unwrap();
        assert_eq!(rows.len(), 2);

        let state = AppState::build(&ProbeConfig::default(), Arc::new(TokioClock::new()));
        assert_eq!(state.seed(rows), 4);
        let count = |n: &str| state.node(&NodeId::new(n)).unwrap().len();
        assert_eq!(count("node1"), 2);
        assert_eq!(count("node2"), 1);
        assert_eq!(count("node3"), 1);
    }

    #[test]
    fn malformed_seed_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();
        let err = load_seed(file.path()).unwrap_err();
        assert!(err.to_string().contains("parsing seed file"));
    }
}
