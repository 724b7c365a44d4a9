//! Shared cluster fixture.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use isoprobe::{
    Clock, ClusterPool, Controller, MemoryConnector, MemoryNode, NodeConnector, Orchestrator,
    ProbeConfig, ReadWriteRequest, TitleRow, TitleUpdate, TokioClock,
};

pub const TCONST: &str = "tt0000001";

/// Seeded movie: present on node1 (central) and node2 (movies).
pub fn carmencita() -> TitleRow {
    TitleRow {
        tconst: TCONST.into(),
        title_type: "movie".into(),
        primary_title: "Carmencita".into(),
        genres: Some("Documentary,Short".into()),
        runtime_minutes: Some(1),
        start_year: Some(1894),
        last_updated: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
    }
}

pub struct Cluster {
    pub nodes: Vec<Arc<MemoryNode>>,
    pub pool: Arc<ClusterPool>,
    pub controller: Controller,
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_config(ProbeConfig::default())
    }

    pub fn with_config(config: ProbeConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let topology = config.topology();
        let mut pool = ClusterPool::new(config.pool.clone(), Arc::clone(&clock));
        let mut nodes = Vec::new();
        for spec in topology.nodes() {
            let node = MemoryNode::new(
                spec.id.clone(),
                Arc::clone(&clock),
                config.engine.lock_wait_timeout(),
            );
            if spec.role.holds("movie") {
                node.seed([carmencita()]);
            }
            let connector: Arc<dyn NodeConnector> =
                Arc::new(MemoryConnector::new(Arc::clone(&node)));
            pool = pool.with_node(connector, spec.capacity);
            nodes.push(node);
        }
        let pool = Arc::new(pool);
        let orchestrator = Orchestrator::new(Arc::clone(&pool), clock, config.scenario.clone());
        Self {
            nodes,
            pool,
            controller: Controller::new(orchestrator, topology),
        }
    }

    pub fn node(&self, name: &str) -> &Arc<MemoryNode> {
        self.nodes
            .iter()
            .find(|n| n.id().as_str() == name)
            .unwrap()
    }

    pub fn assert_quiescent(&self) {
        for node in &self.nodes {
            assert_eq!(self.pool.sessions_in_use(node.id()), Some(0), "{}", node.id());
            assert_eq!(node.locked_rows(), 0, "{}", node.id());
        }
    }
}

pub fn runtime_request(isolation: &str, minutes: i32) -> ReadWriteRequest {
    ReadWriteRequest {
        tconst: TCONST.into(),
        new_data: TitleUpdate::runtime(minutes),
        isolation_level: Some(isolation.into()),
        readers: None,
        writers: None,
        schedule: None,
    }
}
