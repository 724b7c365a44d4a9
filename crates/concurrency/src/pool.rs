//! Per-node session pools
//!
//! Each node gets a semaphore sized to its capacity. A [`Session`] owns one
//! permit for its whole life, so the number of open sessions on a node never
//! exceeds its capacity no matter how a run ends.

use std::sync::Arc;

use isoprobe_core::{
    Clock, IsolationLevel, NodeConnector, NodeId, PoolConfig, ProbeError, ProbeResult,
};
use rustc_hash::FxHashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::session::{Session, SessionLedger};

struct NodePool {
    connector: Arc<dyn NodeConnector>,
    capacity: usize,
    permits: Arc<Semaphore>,
}

/// Session pools for every node in the cluster.
pub struct ClusterPool {
    nodes: FxHashMap<NodeId, NodePool>,
    order: Vec<NodeId>,
    config: PoolConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ClusterPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterPool")
            .field("nodes", &self.order)
            .field("config", &self.config)
            .finish()
    }
}

impl ClusterPool {
    /// Empty pool; add nodes with [`ClusterPool::with_node`].
    pub fn new(config: PoolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: FxHashMap::default(),
            order: Vec::new(),
            config,
            clock,
        }
    }

    /// Register a node reachable through `connector`, bounded to `capacity`
    /// concurrent sessions. Re-registering an id replaces it.
    pub fn with_node(mut self, connector: Arc<dyn NodeConnector>, capacity: usize) -> Self {
        let id = connector.node_id().clone();
        if !self.nodes.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.nodes.insert(
            id,
            NodePool {
                connector,
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
            },
        );
        self
    }

    /// Registered node ids in registration order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    /// Configured capacity of a node.
    pub fn capacity(&self, node: &NodeId) -> Option<usize> {
        self.nodes.get(node).map(|p| p.capacity)
    }

    /// Sessions currently holding a permit on a node.
    pub fn sessions_in_use(&self, node: &NodeId) -> Option<usize> {
        self.nodes
            .get(node)
            .map(|p| p.capacity - p.permits.available_permits())
    }

    /// Open a session on `node` at `isolation`, tracked by `ledger`.
    ///
    /// # Errors
    ///
    /// - `PoolExhausted` when no permit frees up in time (immediately when
    ///   `acquire_timeout_ms` is 0)
    /// - `ConnectionError` for unknown nodes, or when every connect attempt
    ///   fails
    pub async fn acquire(
        &self,
        node: &NodeId,
        isolation: IsolationLevel,
        ledger: &SessionLedger,
    ) -> ProbeResult<Session> {
        let pool = self
            .nodes
            .get(node)
            .ok_or_else(|| ProbeError::connection(node, "unknown node"))?;

        let permit = self.permit(node, pool).await?;
        let conn = self.connect(pool, isolation).await?;
        Ok(Session::open(
            node.clone(),
            conn,
            permit,
            Arc::clone(&self.clock),
            ledger.clone(),
        ))
    }

    /// Release a session. Equivalent to [`Session::release`].
    pub async fn release(&self, mut session: Session) {
        session.release().await;
    }

    async fn permit(&self, node: &NodeId, pool: &NodePool) -> ProbeResult<OwnedSemaphorePermit> {
        let exhausted = || ProbeError::PoolExhausted {
            node: node.clone(),
            capacity: pool.capacity,
        };
        let closed = |_| ProbeError::internal(format!("session pool for {node} is closed"));

        match self.config.acquire_timeout() {
            None => Arc::clone(&pool.permits)
                .try_acquire_owned()
                .map_err(|_| exhausted()),
            Some(wait) => {
                tokio::select! {
                    permit = Arc::clone(&pool.permits).acquire_owned() => permit.map_err(closed),
                    _ = self.clock.sleep(wait) => {
                        debug!(
                            target: "isoprobe::pool", %node, wait_ms = wait.as_millis() as u64,
                            "Permit wait expired"
                        );
                        Err(exhausted())
                    }
                }
            }
        }
    }

    async fn connect(
        &self,
        pool: &NodePool,
        isolation: IsolationLevel,
    ) -> ProbeResult<Box<dyn isoprobe_core::NodeConnection>> {
        let mut attempt = 0;
        loop {
            match pool.connector.connect(isolation).await {
                Ok(conn) => return Ok(conn),
                Err(e @ ProbeError::Connection { .. }) if attempt < self.config.connect_retries => {
                    attempt += 1;
                    warn!(
                        target: "isoprobe::pool",
                        node = %pool.connector.node_id(), attempt, error = %e,
                        "Connect failed, retrying"
                    );
                    self.clock.sleep(self.config.connect_retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
