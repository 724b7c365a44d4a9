//! isoprobe
//!
//! Exercises the four standard isolation levels against a small cluster of
//! relational nodes and reports which anomalies each level actually allows.
//!
//! This crate re-exports the public surface of the workspace crates:
//! - [`isoprobe_core`]: rows, isolation levels, errors, clock, configuration
//! - [`isoprobe_storage`]: the in-process transactional node
//! - [`isoprobe_concurrency`]: pools, sessions, runners, anomaly detection
//! - [`isoprobe_executor`]: request validation, controller, response bodies

// Core types
pub use isoprobe_core::{
    ActorKey, Clock, ErrorKind, IsolationLevel, NewTitle, NodeConnection, NodeConnector, NodeId,
    NodeRole, NodeSpec, Partition, PoolConfig, ProbeConfig, ProbeError, ProbeResult,
    ScenarioConfig, TitlePage, TitleQuery, TitleRow, TitleUpdate, TokioClock, Topology,
};

// In-process nodes
pub use isoprobe_storage::{MemoryConnector, MemoryNode};

// Scenario engine
pub use isoprobe_concurrency::{
    AnomalyReport, ClusterPool, ConcurrentReadParams, ConcurrentReadReport, ConflictSchedule,
    Orchestrator, ReadWriteParams, ReaderPlan, Scenario, ScenarioKind, ScenarioOutput,
    ScenarioRun, SessionLedger, SessionState, WriterPlan,
};

// Request handling
pub use isoprobe_executor::{
    ConcurrentReadRequest, ConcurrentReadResponse, Controller, HealthResponse, ListTitlesQuery,
    ReadWriteRequest, ReadWriteResponse, ReaderScheduleRequest, ScheduleRequest,
    TitleListResponse, TitleWriteResponse,
};
