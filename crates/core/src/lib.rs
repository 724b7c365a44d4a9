//! Core types for isoprobe
//!
//! This crate holds everything the other layers agree on:
//! - Isolation levels and their expected guarantees
//! - Title rows, partial updates and node placement
//! - The error taxonomy shared by runners, controller and HTTP surface
//! - The injectable [`Clock`] all timing goes through
//! - The [`NodeConnector`] / [`NodeConnection`] backend seam
//! - Configuration loaded from TOML

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod isolation;
pub mod row;
pub mod topology;

pub use backend::{NodeConnection, NodeConnector, TxnId};
pub use clock::{Clock, TokioClock};
pub use config::{
    ConfigError, EngineConfig, NodeConfig, PoolConfig, ProbeConfig, ScenarioConfig, ServerConfig,
};
pub use error::{ErrorKind, ProbeError, ProbeResult};
pub use isolation::IsolationLevel;
pub use row::{NewTitle, TitlePage, TitleQuery, TitleRow, TitleUpdate};
pub use topology::{ActorKey, NodeId, NodeRole, NodeSpec, Partition, Topology};
