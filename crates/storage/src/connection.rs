//! Connections to a [`MemoryNode`] and per-level read visibility
//!
//! | Level            | Read sees                                          |
//! |------------------|----------------------------------------------------|
//! | READ UNCOMMITTED | own write, else anyone's staged write, else latest |
//! | READ COMMITTED   | own write, else latest committed                   |
//! | REPEATABLE READ  | own write, else snapshot taken at the first read   |
//! | SERIALIZABLE     | shared row lock, then own write or latest          |
//!
//! Writes always take the exclusive row lock and operate on the latest
//! committed version. A staged deletion reads as an absent row.
//!
//! Counts and listings are non-locking scans of committed rows: the
//! transaction's snapshot under REPEATABLE READ, otherwise the latest commit.

use std::sync::Arc;

use async_trait::async_trait;
use isoprobe_core::{
    IsolationLevel, NewTitle, NodeConnection, ProbeError, ProbeResult, TitlePage, TitleQuery,
    TitleRow, TitleUpdate, TxnId,
};

use crate::node::MemoryNode;
use crate::table::{LockMode, TitleTable};

#[derive(Debug, Clone, Copy)]
struct OpenTxn {
    id: TxnId,
    read_only: bool,
    snapshot: Option<u64>,
}

/// What a write does to the row it locked.
enum RowChange {
    Keep,
    Put(TitleRow),
    Delete,
}

/// A connection to one [`MemoryNode`].
///
/// Dropping the connection rolls back any open transaction.
#[derive(Debug)]
pub struct MemoryConnection {
    node: Arc<MemoryNode>,
    isolation: IsolationLevel,
    txn: Option<OpenTxn>,
}

impl MemoryConnection {
    pub(crate) fn new(node: Arc<MemoryNode>, isolation: IsolationLevel) -> Self {
        Self {
            node,
            isolation,
            txn: None,
        }
    }

    fn open(&mut self, read_only: bool) -> TxnId {
        let id = self.node.next_txn_id();
        self.txn = Some(OpenTxn {
            id,
            read_only,
            snapshot: None,
        });
        id
    }

    fn writable_txn(&self) -> ProbeResult<Option<TxnId>> {
        match self.txn {
            Some(txn) if txn.read_only => Err(ProbeError::validation(format!(
                "cannot write in read-only transaction {}",
                txn.id
            ))),
            Some(txn) => Ok(Some(txn.id)),
            None => Ok(None),
        }
    }

    async fn read_in_txn(&mut self, tconst: &str) -> ProbeResult<Option<TitleRow>> {
        let Some(txn) = self.txn.as_mut() else {
            return Ok(self.read_autocommit(tconst));
        };
        let id = txn.id;

        if self.isolation == IsolationLevel::Serializable {
            self.node.lock_row(tconst, id, LockMode::Shared).await?;
        }

        let table = self.node.table.lock();
        if let Some(own) = table.staged_by(tconst, id) {
            return Ok(own.cloned());
        }
        let row = match self.isolation {
            IsolationLevel::ReadUncommitted => dirty(&table, tconst),
            IsolationLevel::ReadCommitted | IsolationLevel::Serializable => {
                table.latest(tconst).cloned()
            }
            IsolationLevel::RepeatableRead => {
                let seq = *txn.snapshot.get_or_insert_with(|| table.commit_seq());
                table.as_of(tconst, seq).cloned()
            }
        };
        drop(table);
        Ok(row)
    }

    fn read_autocommit(&self, tconst: &str) -> Option<TitleRow> {
        let table = self.node.table.lock();
        match self.isolation {
            IsolationLevel::ReadUncommitted => dirty(&table, tconst),
            _ => table.latest(tconst).cloned(),
        }
    }

    /// Lock the row and stage `build(current)` when it changes anything.
    async fn write_row<F>(&mut self, txn: TxnId, tconst: &str, build: F) -> ProbeResult<u64>
    where
        F: FnOnce(Option<&TitleRow>) -> RowChange + Send,
    {
        self.node.lock_row(tconst, txn, LockMode::Exclusive).await?;
        self.node.ensure_online()?;

        let mut table = self.node.table.lock();
        let current = match table.staged_by(tconst, txn) {
            Some(staged) => staged.cloned(),
            None => table.latest(tconst).cloned(),
        };
        let next = match build(current.as_ref()) {
            RowChange::Keep => return Ok(0),
            RowChange::Put(next) if current.as_ref().is_some_and(|c| c.same_content(&next)) => {
                return Ok(0)
            }
            RowChange::Put(next) => Some(next),
            RowChange::Delete if current.is_none() => return Ok(0),
            RowChange::Delete => None,
        };
        table.stage(tconst, txn, next);
        Ok(1)
    }

    /// Run a write inside the open transaction, or inside an implicit one
    /// that is committed (or rolled back on error) before returning.
    async fn autocommit_write<F>(&mut self, tconst: &str, build: F) -> ProbeResult<u64>
    where
        F: FnOnce(Option<&TitleRow>) -> RowChange + Send,
    {
        self.node.ensure_online()?;
        if let Some(txn) = self.writable_txn()? {
            return self.write_row(txn, tconst, build).await;
        }

        let txn = self.open(false);
        match self.write_row(txn, tconst, build).await {
            Ok(affected) => match self.commit().await {
                Ok(()) => Ok(affected),
                Err(e) => {
                    self.abort();
                    Err(e)
                }
            },
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl NodeConnection for MemoryConnection {
    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn transaction_id(&self) -> Option<TxnId> {
        self.txn.map(|t| t.id)
    }

    async fn begin(&mut self, read_only: bool) -> ProbeResult<TxnId> {
        self.node.ensure_online()?;
        if let Some(txn) = self.txn {
            return Err(ProbeError::internal(format!(
                "transaction {} already open on {}",
                txn.id,
                self.node.id()
            )));
        }
        Ok(self.open(read_only))
    }

    async fn read_title(&mut self, tconst: &str) -> ProbeResult<Option<TitleRow>> {
        self.node.ensure_online()?;
        self.read_in_txn(tconst).await
    }

    async fn update_title(&mut self, tconst: &str, update: &TitleUpdate) -> ProbeResult<u64> {
        let update = update.clone();
        self.autocommit_write(tconst, move |current| {
            current.map_or(RowChange::Keep, |row| RowChange::Put(update.apply(row)))
        })
        .await
    }

    async fn upsert_title(&mut self, title: &NewTitle) -> ProbeResult<u64> {
        title.validate()?;
        let title = title.clone();
        let key = title.tconst.clone();
        self.autocommit_write(&key, move |current| {
            RowChange::Put(title.to_row(current.and_then(|c| c.last_updated)))
        })
        .await
    }

    async fn delete_title(&mut self, tconst: &str) -> ProbeResult<u64> {
        self.autocommit_write(tconst, |_| RowChange::Delete).await
    }

    async fn count_titles(&mut self) -> ProbeResult<u64> {
        self.node.ensure_online()?;
        let table = self.node.table.lock();
        let count = match scan_snapshot(self.isolation, &mut self.txn, &table) {
            Some(seq) => table.count_as_of(seq),
            None => table.count_latest(),
        };
        drop(table);
        Ok(count)
    }

    async fn list_titles(&mut self, query: &TitleQuery) -> ProbeResult<TitlePage> {
        self.node.ensure_online()?;
        let table = self.node.table.lock();
        let seq = scan_snapshot(self.isolation, &mut self.txn, &table);
        let rows: Vec<TitleRow> = table
            .scan(seq)
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        drop(table);
        Ok(query.window(rows))
    }

    async fn commit(&mut self) -> ProbeResult<()> {
        let Some(txn) = self.txn else {
            return Ok(());
        };
        self.node.ensure_online()?;
        self.txn = None;
        self.node.finish(txn.id, true);
        Ok(())
    }

    async fn rollback(&mut self) -> ProbeResult<()> {
        // A lost connection rolls back server-side too, so this never fails.
        self.abort();
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(txn) = self.txn.take() {
            self.node.finish(txn.id, false);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.abort();
    }
}

/// READ UNCOMMITTED view: anyone's staged write, else the latest commit.
fn dirty(table: &TitleTable, key: &str) -> Option<TitleRow> {
    match table.staged_any(key) {
        Some(staged) => staged.cloned(),
        None => table.latest(key).cloned(),
    }
}

fn scan_snapshot(
    isolation: IsolationLevel,
    txn: &mut Option<OpenTxn>,
    table: &TitleTable,
) -> Option<u64> {
    match (isolation, txn.as_mut()) {
        (IsolationLevel::RepeatableRead, Some(txn)) => {
            Some(*txn.snapshot.get_or_insert_with(|| table.commit_seq()))
        }
        _ => None,
    }
}
