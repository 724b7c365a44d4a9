//! Backend seam between the orchestrator and a node's storage engine
//!
//! The orchestrator only ever talks to a node through these two traits. It
//! opens a connection at an isolation level, drives a transaction, and
//! records what comes back. Visibility, locking and blocking are the
//! engine's business.
//!
//! ## Autocommit
//!
//! Operations issued while no transaction is open run in their own
//! implicit transaction, committed before the call returns.

use async_trait::async_trait;
use std::fmt;

use crate::error::ProbeResult;
use crate::isolation::IsolationLevel;
use crate::row::{NewTitle, TitlePage, TitleQuery, TitleRow, TitleUpdate};
use crate::topology::NodeId;

/// Engine-assigned transaction identifier, unique per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Connection factory for one node.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    /// Node this connector reaches.
    fn node_id(&self) -> &NodeId;

    /// Open a connection whose transactions run at `isolation`.
    ///
    /// # Errors
    ///
    /// `ConnectionError` when the node cannot be reached.
    async fn connect(&self, isolation: IsolationLevel) -> ProbeResult<Box<dyn NodeConnection>>;
}

/// One open connection. At most one transaction is active at a time.
#[async_trait]
pub trait NodeConnection: Send {
    /// Isolation level the connection was opened with.
    fn isolation(&self) -> IsolationLevel;

    /// Currently open transaction, if any.
    fn transaction_id(&self) -> Option<TxnId>;

    /// Start a transaction.
    async fn begin(&mut self, read_only: bool) -> ProbeResult<TxnId>;

    /// Plain (non-locking unless the level demands it) read by key.
    async fn read_title(&mut self, tconst: &str) -> ProbeResult<Option<TitleRow>>;

    /// Apply a partial update; returns rows affected (0 when absent or
    /// unchanged).
    async fn update_title(&mut self, tconst: &str, update: &TitleUpdate) -> ProbeResult<u64>;

    /// Insert or fully replace a row; returns rows affected (0 when the
    /// stored content is already identical).
    async fn upsert_title(&mut self, title: &NewTitle) -> ProbeResult<u64>;

    /// Remove a row; returns rows affected (0 when absent).
    async fn delete_title(&mut self, tconst: &str) -> ProbeResult<u64>;

    /// Number of committed rows visible to this connection.
    async fn count_titles(&mut self) -> ProbeResult<u64>;

    /// Committed rows visible to this connection, filtered, ordered and
    /// windowed by `query`.
    async fn list_titles(&mut self, query: &TitleQuery) -> ProbeResult<TitlePage>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> ProbeResult<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> ProbeResult<()>;

    /// Synchronous best-effort rollback for drop paths. Must not block.
    fn abort(&mut self);
}
