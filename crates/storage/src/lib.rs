//! In-process node engine for isoprobe
//!
//! Each [`MemoryNode`] is a small transactional store holding title rows:
//! - MVCC versions per row, so repeatable-read snapshots are cheap
//! - Shared and exclusive row locks with deadline-bounded waits
//! - Deadlock detection over wait-for edges
//! - An online flag to simulate a node going down
//!
//! It implements the [`isoprobe_core::NodeConnector`] seam, so the
//! orchestrator never knows it is not talking to a remote server.

#![warn(clippy::all)]

pub mod connection;
pub mod node;
mod table;

pub use connection::MemoryConnection;
pub use node::{MemoryConnector, MemoryNode};
