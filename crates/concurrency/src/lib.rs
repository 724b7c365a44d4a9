//! Scenario orchestration for isoprobe
//!
//! This crate drives concurrent transactions against cluster nodes and turns
//! what they observed into anomaly reports:
//! - [`ClusterPool`]: bounded per-node session pools
//! - [`Session`]: one transaction on one node, released on every exit path
//! - [`Timeline`]: the single schedule every actor in a run waits on
//! - [`runner`]: one [`ScenarioRunner`] per scenario kind
//! - [`classify`] and [`anomaly`]: pure classification of observations
//! - [`Orchestrator`]: deadline, dispatch and session accounting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod anomaly;
pub mod classify;
pub mod observation;
pub mod orchestrator;
pub mod pool;
pub mod run;
pub mod runner;
pub mod schedule;
pub mod session;

pub use anomaly::{AnomalyReport, ConcurrentReadReport};
pub use observation::{
    ActorOutcome, ConcurrentReadOutcome, NodeSnapshot, ReadObservation, ReaderFlags,
    ReaderOutcome, ReaderRecord, WriteObservation, WriterOutcome,
};
pub use orchestrator::{Orchestrator, Scenario, ScenarioOutput};
pub use pool::ClusterPool;
pub use run::{RunOutcome, ScenarioKind, ScenarioRun};
pub use runner::{
    ConcurrentReadOutput, ConcurrentReadParams, ConcurrentReadRunner, ReadWriteOutput,
    ReadWriteParams, ReadWriteRunner, RunContext, ScenarioParams, ScenarioRunner,
};
pub use schedule::{ConflictSchedule, ReaderPlan, Timeline, WriterPlan};
pub use session::{Session, SessionLedger, SessionRecord, SessionState};
