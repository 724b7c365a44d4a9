//! Transaction isolation levels
//!
//! The four ANSI levels, ordered from weakest to strongest. The ordering is
//! meaningful: `level >= IsolationLevel::ReadCommitted` means dirty reads are
//! ruled out by the engine's contract.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ProbeError;

/// Isolation level a transaction session is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum IsolationLevel {
    /// May observe other transactions' uncommitted writes.
    ReadUncommitted,
    /// Observes only committed data; each read sees the latest commit.
    #[default]
    ReadCommitted,
    /// Reads within one transaction return the same snapshot.
    RepeatableRead,
    /// Transactions behave as if executed one after another.
    Serializable,
}

impl IsolationLevel {
    /// All levels, weakest first.
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// Canonical wire name, e.g. `READ_COMMITTED`.
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ_UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ_COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE_READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Whether the level's contract forbids observing uncommitted writes.
    pub fn prevents_dirty_reads(self) -> bool {
        self >= IsolationLevel::ReadCommitted
    }

    /// Whether the level's contract forbids two reads in one transaction
    /// returning different committed values.
    pub fn prevents_non_repeatable_reads(self) -> bool {
        self >= IsolationLevel::RepeatableRead
    }

    /// One-line statement of what the level guarantees.
    pub fn guarantee(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => {
                "may see uncommitted changes of concurrent transactions (dirty reads possible)"
            }
            IsolationLevel::ReadCommitted => {
                "only sees committed data; a re-read may observe a newer commit"
            }
            IsolationLevel::RepeatableRead => {
                "the same read returns the same result for the whole transaction"
            }
            IsolationLevel::Serializable => {
                "full isolation; concurrent transactions appear to run one after another"
            }
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = ProbeError;

    /// Accepts `READ_COMMITTED`, `READ COMMITTED`, `read-committed` and
    /// any mix of case and `_`/space/`-` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        match normalized.as_str() {
            "READ_UNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "READ_COMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLE_READ" => Ok(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            _ => Err(ProbeError::validation(format!(
                "unrecognized isolation level '{}'",
                s
            ))),
        }
    }
}

impl Serialize for IsolationLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IsolationLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
