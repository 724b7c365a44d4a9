//! Versioned title table with row locks
//!
//! Plain data structure, no waiting and no clock. The node wraps it in a
//! mutex and implements blocking on top of the `try_*` lock calls.
//!
//! # Design
//!
//! - Committed versions: per-key chain ordered by commit sequence; a
//!   deletion commits a tombstone (`row: None`) so older snapshots still
//!   see the row
//! - Staged writes: at most one per key (the exclusive lock holder's)
//! - Row locks: one exclusive holder or any number of shared holders
//! - Wait-for edges: used to detect deadlocks between lock waiters

use chrono::{DateTime, Utc};
use isoprobe_core::{TitleRow, TxnId};
use rustc_hash::{FxHashMap, FxHashSet};

/// One committed version of a row. `None` marks a deletion.
#[derive(Debug, Clone)]
pub(crate) struct CommittedVersion {
    pub(crate) seq: u64,
    pub(crate) row: Option<TitleRow>,
}

/// Uncommitted write staged by the exclusive lock holder. `None` stages a
/// deletion.
#[derive(Debug, Clone)]
pub(crate) struct StagedWrite {
    pub(crate) txn: TxnId,
    pub(crate) row: Option<TitleRow>,
}

#[derive(Debug, Default)]
struct RowLock {
    exclusive: Option<TxnId>,
    shared: FxHashSet<TxnId>,
}

impl RowLock {
    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

/// Requested lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

/// The table of one node.
#[derive(Debug, Default)]
pub(crate) struct TitleTable {
    rows: FxHashMap<String, Vec<CommittedVersion>>,
    staged: FxHashMap<String, StagedWrite>,
    locks: FxHashMap<String, RowLock>,
    waits: FxHashMap<TxnId, TxnId>,
    commit_seq: u64,
}

impl TitleTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the most recent commit.
    pub(crate) fn commit_seq(&self) -> u64 {
        self.commit_seq
    }

    /// Insert committed rows directly, bypassing transactions.
    pub(crate) fn seed(&mut self, row: TitleRow) {
        self.commit_seq += 1;
        let seq = self.commit_seq;
        self.rows
            .entry(row.tconst.clone())
            .or_default()
            .push(CommittedVersion {
                seq,
                row: Some(row),
            });
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Latest committed version.
    pub(crate) fn latest(&self, key: &str) -> Option<&TitleRow> {
        self.rows
            .get(key)
            .and_then(|versions| visible(versions, None))
    }

    /// Newest version committed at or before `seq`.
    pub(crate) fn as_of(&self, key: &str, seq: u64) -> Option<&TitleRow> {
        self.rows
            .get(key)
            .and_then(|versions| visible(versions, Some(seq)))
    }

    /// Write staged by `txn`, if any. The inner `None` is a staged deletion.
    pub(crate) fn staged_by(&self, key: &str, txn: TxnId) -> Option<Option<&TitleRow>> {
        self.staged
            .get(key)
            .filter(|w| w.txn == txn)
            .map(|w| w.row.as_ref())
    }

    /// Write staged by any transaction.
    pub(crate) fn staged_any(&self, key: &str) -> Option<Option<&TitleRow>> {
        self.staged.get(key).map(|w| w.row.as_ref())
    }

    /// Every row visible at `seq`, or at the latest commit when `None`.
    pub(crate) fn scan(&self, seq: Option<u64>) -> impl Iterator<Item = &TitleRow> + '_ {
        self.rows
            .values()
            .filter_map(move |versions| visible(versions, seq))
    }

    /// Rows visible at `seq`.
    pub(crate) fn count_as_of(&self, seq: u64) -> u64 {
        self.scan(Some(seq)).count() as u64
    }

    /// Rows visible at the latest commit.
    pub(crate) fn count_latest(&self) -> u64 {
        self.scan(None).count() as u64
    }

    // ========================================================================
    // Locks
    // ========================================================================

    /// Take or re-enter a lock. On failure returns one conflicting holder.
    pub(crate) fn try_lock(&mut self, key: &str, txn: TxnId, mode: LockMode) -> Result<(), TxnId> {
        let lock = self.locks.entry(key.to_string()).or_default();
        if let Some(holder) = lock.exclusive {
            if holder != txn {
                return Err(holder);
            }
            // Exclusive covers shared.
            return Ok(());
        }
        match mode {
            LockMode::Shared => {
                lock.shared.insert(txn);
                Ok(())
            }
            LockMode::Exclusive => {
                if let Some(other) = lock.shared.iter().copied().find(|t| *t != txn) {
                    return Err(other);
                }
                lock.shared.remove(&txn);
                lock.exclusive = Some(txn);
                Ok(())
            }
        }
    }

    /// Record that `waiter` waits on `holder`. Returns true if this closes a
    /// cycle, in which case the edge is not kept.
    pub(crate) fn register_wait(&mut self, waiter: TxnId, holder: TxnId) -> bool {
        let mut cursor = holder;
        let mut hops = 0;
        while let Some(next) = self.waits.get(&cursor).copied() {
            if next == waiter {
                return true;
            }
            cursor = next;
            hops += 1;
            if hops > self.waits.len() {
                break;
            }
        }
        if holder == waiter {
            return true;
        }
        self.waits.insert(waiter, holder);
        false
    }

    pub(crate) fn clear_wait(&mut self, waiter: TxnId) {
        self.waits.remove(&waiter);
    }

    // ========================================================================
    // Writes and transaction end
    // ========================================================================

    /// Stage a write, or a deletion when `row` is `None`. Caller must hold
    /// the exclusive lock.
    pub(crate) fn stage(&mut self, key: &str, txn: TxnId, row: Option<TitleRow>) {
        self.staged
            .insert(key.to_string(), StagedWrite { txn, row });
    }

    /// Publish `txn`'s staged writes stamped with `stamp`, then release its
    /// locks. Returns the number of rows published.
    pub(crate) fn commit(&mut self, txn: TxnId, stamp: DateTime<Utc>) -> usize {
        let keys: Vec<String> = self
            .staged
            .iter()
            .filter(|(_, w)| w.txn == txn)
            .map(|(k, _)| k.clone())
            .collect();
        let mut published = 0;
        if !keys.is_empty() {
            self.commit_seq += 1;
            let seq = self.commit_seq;
            for key in keys {
                if let Some(mut write) = self.staged.remove(&key) {
                    if let Some(row) = write.row.as_mut() {
                        row.last_updated = Some(stamp);
                    }
                    self.rows
                        .entry(key)
                        .or_default()
                        .push(CommittedVersion {
                            seq,
                            row: write.row,
                        });
                    published += 1;
                }
            }
        }
        self.release(txn);
        published
    }

    /// Discard `txn`'s staged writes and release its locks.
    pub(crate) fn rollback(&mut self, txn: TxnId) {
        self.staged.retain(|_, w| w.txn != txn);
        self.release(txn);
    }

    fn release(&mut self, txn: TxnId) {
        self.locks.retain(|_, lock| {
            if lock.exclusive == Some(txn) {
                lock.exclusive = None;
            }
            lock.shared.remove(&txn);
            !lock.is_free()
        });
        self.waits.remove(&txn);
    }

    /// Number of keys with any lock held (for tests and health).
    pub(crate) fn locked_rows(&self) -> usize {
        self.locks.len()
    }
}

/// Row of the newest version at or before `seq`; `None` when that version
/// is a tombstone or the row did not exist yet.
fn visible(versions: &[CommittedVersion], seq: Option<u64>) -> Option<&TitleRow> {
    let version = match seq {
        Some(seq) => versions.iter().rev().find(|v| v.seq <= seq),
        None => versions.last(),
    };
    version.and_then(|v| v.row.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tconst: &str, runtime: i32) -> TitleRow {
        TitleRow {
            tconst: tconst.into(),
            title_type: "movie".into(),
            primary_title: "Test".into(),
            genres: None,
            runtime_minutes: Some(runtime),
            start_year: Some(2000),
            last_updated: None,
        }
    }

    #[test]
    fn as_of_returns_version_visible_at_sequence() {
        let mut table = TitleTable::new();
        table.seed(row("tt1", 10));
        let snap = table.commit_seq();

        assert!(table.try_lock("tt1", TxnId(1), LockMode::Exclusive).is_ok());
        table.stage("tt1", TxnId(1), Some(row("tt1", 20)));
        assert_eq!(table.commit(TxnId(1), Utc::now()), 1);

        assert_eq!(table.as_of("tt1", snap).unwrap().runtime_minutes, Some(10));
        assert_eq!(table.latest("tt1").unwrap().runtime_minutes, Some(20));
        assert!(table.latest("tt1").unwrap().last_updated.is_some());
    }

    #[test]
    fn exclusive_blocks_shared_and_exclusive() {
        let mut table = TitleTable::new();
        table.seed(row("tt1", 10));
        table.try_lock("tt1", TxnId(1), LockMode::Exclusive).unwrap();

        assert_eq!(table.try_lock("tt1", TxnId(2), LockMode::Shared), Err(TxnId(1)));
        assert_eq!(
            table.try_lock("tt1", TxnId(2), LockMode::Exclusive),
            Err(TxnId(1))
        );
        // Re-entry by the holder is fine.
        assert!(table.try_lock("tt1", TxnId(1), LockMode::Shared).is_ok());
    }

    #[test]
    fn shared_blocks_exclusive_but_allows_upgrade_when_alone() {
        let mut table = TitleTable::new();
        table.try_lock("tt1", TxnId(1), LockMode::Shared).unwrap();
        table.try_lock("tt1", TxnId(2), LockMode::Shared).unwrap();
        assert!(table.try_lock("tt1", TxnId(1), LockMode::Exclusive).is_err());

        table.rollback(TxnId(2));
        assert!(table.try_lock("tt1", TxnId(1), LockMode::Exclusive).is_ok());
    }

    #[test]
    fn rollback_discards_staged_write_and_frees_locks() {
        let mut table = TitleTable::new();
        table.seed(row("tt1", 10));
        table.try_lock("tt1", TxnId(7), LockMode::Exclusive).unwrap();
        table.stage("tt1", TxnId(7), Some(row("tt1", 99)));
        assert_eq!(
            table.staged_any("tt1").flatten().unwrap().runtime_minutes,
            Some(99)
        );

        table.rollback(TxnId(7));
        assert!(table.staged_any("tt1").is_none());
        assert_eq!(table.latest("tt1").unwrap().runtime_minutes, Some(10));
        assert_eq!(table.locked_rows(), 0);
    }

    #[test]
    fn wait_cycle_is_detected() {
        let mut table = TitleTable::new();
        assert!(!table.register_wait(TxnId(1), TxnId(2)));
        assert!(!table.register_wait(TxnId(2), TxnId(3)));
        assert!(table.register_wait(TxnId(3), TxnId(1)));
        table.clear_wait(TxnId(1));
        assert!(!table.register_wait(TxnId(3), TxnId(1)));
    }

    #[test]
    fn count_as_of_ignores_later_inserts() {
        let mut table = TitleTable::new();
        table.seed(row("tt1", 1));
        let snap = table.commit_seq();
        table.seed(row("tt2", 2));
        assert_eq!(table.count_as_of(snap), 1);
        assert_eq!(table.count_latest(), 2);
    }

    #[test]
    fn committed_deletion_hides_row_from_later_snapshots_only() {
        let mut table = TitleTable::new();
        table.seed(row("tt1", 10));
        table.seed(row("tt2", 20));
        let before = table.commit_seq();

        table.try_lock("tt1", TxnId(3), LockMode::Exclusive).unwrap();
        table.stage("tt1", TxnId(3), None);
        assert_eq!(table.staged_by("tt1", TxnId(3)), Some(None));
        assert!(table.latest("tt1").is_some());

        assert_eq!(table.commit(TxnId(3), Utc::now()), 1);
        assert!(table.latest("tt1").is_none());
        assert_eq!(table.as_of("tt1", before).unwrap().runtime_minutes, Some(10));
        assert_eq!(table.count_latest(), 1);
        assert_eq!(table.count_as_of(before), 2);
        let keys: Vec<_> = table.scan(None).map(|r| r.tconst.as_str()).collect();
        assert_eq!(keys, ["tt2"]);
    }
}
