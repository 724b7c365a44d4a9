//! Transaction sessions
//!
//! A [`Session`] is one connection, one isolation level, one node and at most
//! one transaction, owned by exactly one scenario run. It holds the node's
//! pool permit for its whole life and gives it back when it closes.
//!
//! ## State machine
//!
//! ```text
//! Idle ──begin──▶ Active ◀──▶ Blocked
//!  │                 │
//!  │                 ├──commit──▶ Committed ─┐
//!  │                 ├──rollback▶ RolledBack ├──▶ Closed
//!  │                 └──error───▶ Failed ────┘
//!  └──release──▶ RolledBack ──▶ Closed
//! ```
//!
//! `Blocked` is transient: it is entered while a single operation outlasts
//! the run's blocking threshold and left when the operation returns.
//!
//! ## Release
//!
//! [`Session::release`] is idempotent. If a session is dropped without it
//! (for example when a scenario times out and its future is dropped), `Drop`
//! aborts the transaction synchronously and still records the close.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use isoprobe_core::{
    Clock, IsolationLevel, NewTitle, NodeConnection, NodeId, ProbeError, ProbeResult, TitlePage,
    TitleQuery, TitleRow, TitleUpdate, TxnId,
};
use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connected, no transaction yet
    Idle,
    /// Transaction open
    Active,
    /// An operation is taking longer than the blocking threshold
    Blocked,
    /// Transaction committed
    Committed,
    /// Transaction rolled back, or never started
    RolledBack,
    /// An operation failed; the transaction was discarded
    Failed,
    /// Connection closed and permit returned
    Closed,
}

impl SessionState {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Blocked => "blocked",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled_back",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        }
    }

    /// Committed, RolledBack or Failed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Committed | SessionState::RolledBack | SessionState::Failed
        )
    }

    fn accepts_operations(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a closed session leaves behind in its run's ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session identity
    pub session_id: Uuid,
    /// Owning node
    pub node: NodeId,
    /// Fixed isolation level
    pub isolation: IsolationLevel,
    /// Last engine transaction, if one was begun
    pub transaction_id: Option<TxnId>,
    /// Terminal state reached before closing
    pub final_state: SessionState,
    /// Whether any operation entered `Blocked`
    pub was_blocked: bool,
    /// Clock offset at acquisition
    pub opened_at: Duration,
    /// Clock offset at close
    pub closed_at: Duration,
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug)]
struct LedgerInner {
    blocking_threshold: Duration,
    opened: AtomicUsize,
    records: Mutex<Vec<SessionRecord>>,
}

/// Per-run accounting of sessions: how many were opened and what each one
/// ended as. Cheap to clone; all clones share state.
#[derive(Debug, Clone)]
pub struct SessionLedger {
    inner: Arc<LedgerInner>,
}

impl SessionLedger {
    /// Empty ledger; sessions it tracks report `Blocked` after `blocking_threshold`.
    pub fn new(blocking_threshold: Duration) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                blocking_threshold,
                opened: AtomicUsize::new(0),
                records: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Threshold after which an in-flight operation marks its session blocked.
    pub fn blocking_threshold(&self) -> Duration {
        self.inner.blocking_threshold
    }

    /// Sessions opened so far.
    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed so far.
    pub fn closed(&self) -> usize {
        self.inner.records.lock().len()
    }

    /// True when every opened session has closed.
    pub fn all_closed(&self) -> bool {
        self.opened() == self.closed()
    }

    /// Close records in close order.
    pub fn records(&self) -> Vec<SessionRecord> {
        self.inner.records.lock().clone()
    }

    fn note_open(&self) {
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn note_close(&self, record: SessionRecord) {
        self.inner.records.lock().push(record);
    }
}

// ============================================================================
// Session
// ============================================================================

/// One transaction session on one node. See the module docs.
pub struct Session {
    id: Uuid,
    node: NodeId,
    isolation: IsolationLevel,
    state: SessionState,
    was_blocked: bool,
    last_txn: Option<TxnId>,
    opened_at: Duration,
    conn: Option<Box<dyn NodeConnection>>,
    permit: Option<OwnedSemaphorePermit>,
    clock: Arc<dyn Clock>,
    ledger: SessionLedger,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("isolation", &self.isolation)
            .field("state", &self.state)
            .field("txn", &self.last_txn)
            .finish()
    }
}

impl Session {
    pub(crate) fn open(
        node: NodeId,
        conn: Box<dyn NodeConnection>,
        permit: OwnedSemaphorePermit,
        clock: Arc<dyn Clock>,
        ledger: SessionLedger,
    ) -> Self {
        ledger.note_open();
        let session = Self {
            id: Uuid::new_v4(),
            isolation: conn.isolation(),
            node,
            state: SessionState::Idle,
            was_blocked: false,
            last_txn: None,
            opened_at: clock.elapsed(),
            conn: Some(conn),
            permit: Some(permit),
            clock,
            ledger,
        };
        debug!(
            target: "isoprobe::session",
            session = %session.id, node = %session.node, isolation = %session.isolation,
            "Session opened"
        );
        session
    }

    /// Session identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Owning node.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Isolation level, fixed at creation.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Engine id of the current or last transaction.
    pub fn transaction_id(&self) -> Option<TxnId> {
        self.last_txn
    }

    /// Begin a transaction. Only valid from `Idle`.
    pub async fn begin(&mut self, read_only: bool) -> ProbeResult<TxnId> {
        if self.state != SessionState::Idle {
            return Err(self.misuse("begin"));
        }
        let conn = self.connection()?;
        match conn.begin(read_only).await {
            Ok(txn) => {
                self.last_txn = Some(txn);
                self.state = SessionState::Active;
                Ok(txn)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Read a row. Outside a transaction this runs in autocommit mode.
    pub async fn read(&mut self, tconst: &str) -> ProbeResult<Option<TitleRow>> {
        self.ensure_usable("read")?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(closed_connection(&self.node));
        };
        let result = watch_blocking(
            &mut self.state,
            &mut self.was_blocked,
            self.clock.as_ref(),
            self.ledger.blocking_threshold(),
            &self.node,
            conn.read_title(tconst),
        )
        .await;
        self.settle(result)
    }

    /// Apply a partial update; returns rows affected.
    pub async fn update(&mut self, tconst: &str, update: &TitleUpdate) -> ProbeResult<u64> {
        self.ensure_usable("update")?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(closed_connection(&self.node));
        };
        let result = watch_blocking(
            &mut self.state,
            &mut self.was_blocked,
            self.clock.as_ref(),
            self.ledger.blocking_threshold(),
            &self.node,
            conn.update_title(tconst, update),
        )
        .await;
        self.settle(result)
    }

    /// Insert or replace a row; returns rows affected.
    pub async fn upsert(&mut self, title: &NewTitle) -> ProbeResult<u64> {
        self.ensure_usable("upsert")?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(closed_connection(&self.node));
        };
        let result = watch_blocking(
            &mut self.state,
            &mut self.was_blocked,
            self.clock.as_ref(),
            self.ledger.blocking_threshold(),
            &self.node,
            conn.upsert_title(title),
        )
        .await;
        self.settle(result)
    }

    /// Delete a row; returns rows affected.
    pub async fn delete(&mut self, tconst: &str) -> ProbeResult<u64> {
        self.ensure_usable("delete")?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(closed_connection(&self.node));
        };
        let result = watch_blocking(
            &mut self.state,
            &mut self.was_blocked,
            self.clock.as_ref(),
            self.ledger.blocking_threshold(),
            &self.node,
            conn.delete_title(tconst),
        )
        .await;
        self.settle(result)
    }

    /// Count committed rows visible to this session.
    pub async fn count(&mut self) -> ProbeResult<u64> {
        self.ensure_usable("count")?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(closed_connection(&self.node));
        };
        let result = conn.count_titles().await;
        self.settle(result)
    }

    /// One window of the committed rows visible to this session.
    pub async fn list(&mut self, query: &TitleQuery) -> ProbeResult<TitlePage> {
        self.ensure_usable("list")?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(closed_connection(&self.node));
        };
        let result = conn.list_titles(query).await;
        self.settle(result)
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self) -> ProbeResult<()> {
        if self.state != SessionState::Active {
            return Err(self.misuse("commit"));
        }
        let conn = self.connection()?;
        match conn.commit().await {
            Ok(()) => {
                self.state = SessionState::Committed;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> ProbeResult<()> {
        if self.state != SessionState::Active {
            return Err(self.misuse("rollback"));
        }
        let conn = self.connection()?;
        match conn.rollback().await {
            Ok(()) => {
                self.state = SessionState::RolledBack;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Finish the session: roll back anything still open, close the
    /// connection, return the pool permit. Safe to call more than once.
    pub async fn release(&mut self) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Idle => self.state = SessionState::RolledBack,
            SessionState::Active | SessionState::Blocked => {
                if let Some(conn) = self.conn.as_mut() {
                    match conn.rollback().await {
                        Ok(()) => self.state = SessionState::RolledBack,
                        Err(e) => {
                            warn!(
                                target: "isoprobe::session", session = %self.id, error = %e,
                                "Rollback on release failed"
                            );
                            conn.abort();
                            self.state = SessionState::Failed;
                        }
                    }
                }
            }
            SessionState::Failed => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.abort();
                }
            }
            SessionState::Committed | SessionState::RolledBack => {}
        }
        self.close();
    }

    // ------------------------------------------------------------------------

    fn connection(&mut self) -> ProbeResult<&mut Box<dyn NodeConnection>> {
        let node = &self.node;
        self.conn.as_mut().ok_or_else(|| closed_connection(node))
    }

    fn ensure_usable(&self, op: &str) -> ProbeResult<()> {
        if self.state.accepts_operations() {
            Ok(())
        } else {
            Err(self.misuse(op))
        }
    }

    fn misuse(&self, op: &str) -> ProbeError {
        ProbeError::internal(format!(
            "cannot {op} session {} in state {}",
            self.id, self.state
        ))
    }

    fn settle<T>(&mut self, result: ProbeResult<T>) -> ProbeResult<T> {
        result.map_err(|e| self.fail(e))
    }

    /// Mark the transaction failed; autocommit failures leave nothing to
    /// discard, so an idle session stays idle.
    fn fail(&mut self, error: ProbeError) -> ProbeError {
        if self.state != SessionState::Idle {
            debug!(
                target: "isoprobe::session", session = %self.id, error = %error,
                "Session failed"
            );
            self.state = SessionState::Failed;
            if let Some(conn) = self.conn.as_mut() {
                conn.abort();
            }
        }
        error
    }

    fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let final_state = if self.state.is_terminal() {
            self.state
        } else {
            SessionState::RolledBack
        };
        // Connection first, so its transaction is gone before the permit is.
        self.conn.take();
        self.permit.take();
        self.state = SessionState::Closed;

        let record = SessionRecord {
            session_id: self.id,
            node: self.node.clone(),
            isolation: self.isolation,
            transaction_id: self.last_txn,
            final_state,
            was_blocked: self.was_blocked,
            opened_at: self.opened_at,
            closed_at: self.clock.elapsed(),
        };
        debug!(
            target: "isoprobe::session",
            session = %self.id, node = %self.node, final_state = %final_state,
            "Session closed"
        );
        self.ledger.note_close(record);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(conn) = self.conn.as_mut() {
            conn.abort();
        }
        if matches!(
            self.state,
            SessionState::Idle | SessionState::Active | SessionState::Blocked
        ) {
            self.state = SessionState::RolledBack;
        }
        self.close();
    }
}

fn closed_connection(node: &NodeId) -> ProbeError {
    ProbeError::internal(format!("session on {node} has no open connection"))
}

/// Drive `op`, flipping `state` to `Blocked` while it outlasts `threshold`.
async fn watch_blocking<T, F>(
    state: &mut SessionState,
    was_blocked: &mut bool,
    clock: &dyn Clock,
    threshold: Duration,
    node: &NodeId,
    op: F,
) -> ProbeResult<T>
where
    F: Future<Output = ProbeResult<T>>,
{
    tokio::pin!(op);
    tokio::select! {
        biased;
        result = &mut op => result,
        _ = clock.sleep(threshold) => {
            let previous = *state;
            *state = SessionState::Blocked;
            *was_blocked = true;
            debug!(
                target: "isoprobe::session", %node, threshold_ms = threshold.as_millis() as u64,
                "Operation blocked"
            );
            let result = op.await;
            *state = previous;
            result
        }
    }
}
