//! One in-process database node
//!
//! A [`MemoryNode`] owns a [`TitleTable`] behind a mutex and turns its
//! non-blocking `try_lock` into an async wait:
//!
//! 1. Register interest in `lock_released` *before* checking the lock, so a
//!    release between the check and the await is never missed
//! 2. On conflict, record a wait-for edge; a cycle fails fast as a deadlock
//! 3. Sleep until either a release notification or the lock-wait deadline
//!
//! The mutex is never held across an await point.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use isoprobe_core::{
    Clock, IsolationLevel, NodeConnection, NodeConnector, NodeId, ProbeError, ProbeResult,
    TitleRow, TxnId,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::connection::MemoryConnection;
use crate::table::{LockMode, TitleTable};

/// In-process node: versioned rows, row locks, online flag.
#[derive(Debug)]
pub struct MemoryNode {
    id: NodeId,
    pub(crate) table: Mutex<TitleTable>,
    lock_released: Notify,
    online: AtomicBool,
    next_txn: AtomicU64,
    clock: Arc<dyn Clock>,
    lock_wait_timeout: Duration,
}

impl MemoryNode {
    /// Create an empty, online node.
    pub fn new(id: NodeId, clock: Arc<dyn Clock>, lock_wait_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            table: Mutex::new(TitleTable::new()),
            lock_released: Notify::new(),
            online: AtomicBool::new(true),
            next_txn: AtomicU64::new(1),
            clock,
            lock_wait_timeout,
        })
    }

    /// Node identity.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Load committed rows without going through a transaction.
    pub fn seed(&self, rows: impl IntoIterator<Item = TitleRow>) {
        let mut table = self.table.lock();
        for row in rows {
            table.seed(row);
        }
    }

    /// Take the node offline or bring it back. Going offline wakes every lock
    /// waiter so it fails promptly instead of waiting out its deadline.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            debug!(
                target: "isoprobe::engine", node = %self.id, online,
                "Node availability changed"
            );
        }
        self.lock_released.notify_waiters();
    }

    /// Whether the node accepts connections.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Latest committed version of a row, outside any transaction.
    pub fn snapshot(&self, tconst: &str) -> Option<TitleRow> {
        self.table.lock().latest(tconst).cloned()
    }

    /// Number of committed rows.
    pub fn len(&self) -> u64 {
        self.table.lock().count_latest()
    }

    /// True when no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rows currently locked by any transaction.
    pub fn locked_rows(&self) -> usize {
        self.table.lock().locked_rows()
    }

    pub(crate) fn ensure_online(&self) -> ProbeResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ProbeError::connection(&self.id, "node is offline"))
        }
    }

    pub(crate) fn next_txn_id(&self) -> TxnId {
        TxnId(self.next_txn.fetch_add(1, Ordering::SeqCst))
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Acquire a row lock for `txn`, waiting up to the lock-wait timeout.
    ///
    /// # Errors
    ///
    /// - `ConflictError` on deadlock or when the wait times out
    /// - `ConnectionError` if the node goes offline while waiting
    pub(crate) async fn lock_row(&self, key: &str, txn: TxnId, mode: LockMode) -> ProbeResult<()> {
        let deadline = self.clock.elapsed() + self.lock_wait_timeout;
        let mut _waiting: Option<WaitRegistration<'_>> = None;

        loop {
            self.ensure_online()?;

            let notified = self.lock_released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut table = self.table.lock();
                match table.try_lock(key, txn, mode) {
                    Ok(()) => {
                        table.clear_wait(txn);
                        return Ok(());
                    }
                    Err(holder) => {
                        if table.register_wait(txn, holder) {
                            warn!(
                                target: "isoprobe::engine",
                                node = %self.id, %txn, %holder, key,
                                "Deadlock detected"
                            );
                            return Err(ProbeError::conflict(
                                &self.id,
                                format!("deadlock: {txn} waits on {holder} for {key}"),
                            ));
                        }
                    }
                }
            }
            if _waiting.is_none() {
                _waiting = Some(WaitRegistration { node: self, txn });
            }

            let now = self.clock.elapsed();
            if now >= deadline {
                return Err(self.lock_wait_expired(key, txn));
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = self.clock.sleep(deadline - now) => {
                    return Err(self.lock_wait_expired(key, txn));
                }
            }
        }
    }

    fn lock_wait_expired(&self, key: &str, txn: TxnId) -> ProbeError {
        debug!(target: "isoprobe::engine", node = %self.id, %txn, key, "Lock wait timeout");
        ProbeError::conflict(
            &self.id,
            format!(
                "lock wait timeout exceeded after {}ms on {key}",
                self.lock_wait_timeout.as_millis()
            ),
        )
    }

    /// End a transaction and wake lock waiters. Returns rows published.
    pub(crate) fn finish(&self, txn: TxnId, commit: bool) -> usize {
        let published = {
            let mut table = self.table.lock();
            if commit {
                table.commit(txn, self.clock.wall_now())
            } else {
                table.rollback(txn);
                0
            }
        };
        debug!(
            target: "isoprobe::engine", node = %self.id, %txn, commit, published,
            "Transaction finished"
        );
        self.lock_released.notify_waiters();
        published
    }
}

/// Clears a waiter's wait-for edge when the wait ends for any reason,
/// including the waiting future being dropped.
struct WaitRegistration<'a> {
    node: &'a MemoryNode,
    txn: TxnId,
}

impl Drop for WaitRegistration<'_> {
    fn drop(&mut self) {
        self.node.table.lock().clear_wait(self.txn);
    }
}

// ============================================================================
// Connector
// ============================================================================

/// [`NodeConnector`] for a [`MemoryNode`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    node: Arc<MemoryNode>,
}

impl MemoryConnector {
    /// Connector for `node`.
    pub fn new(node: Arc<MemoryNode>) -> Self {
        Self { node }
    }

    /// The node behind this connector.
    pub fn node(&self) -> &Arc<MemoryNode> {
        &self.node
    }
}

#[async_trait]
impl NodeConnector for MemoryConnector {
    fn node_id(&self) -> &NodeId {
        self.node.id()
    }

    async fn connect(&self, isolation: IsolationLevel) -> ProbeResult<Box<dyn NodeConnection>> {
        self.node.ensure_online()?;
        Ok(Box::new(MemoryConnection::new(
            Arc::clone(&self.node),
            isolation,
        )))
    }
}
