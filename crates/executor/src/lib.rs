//! Request handling for isoprobe
//!
//! Sits between the HTTP surface and the scenario engine:
//! - [`request`]: inbound JSON bodies
//! - [`validate`]: checks every request before a run starts
//! - [`controller`]: dispatches scenarios and title reads, writes and listings
//! - [`response`]: outbound JSON bodies
//! - [`convert`]: top-level error to status mapping
//!
//! Transport-agnostic: nothing in this crate depends on the HTTP stack.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod convert;
pub mod request;
pub mod response;
pub mod validate;

pub use controller::Controller;
pub use convert::{error_body, status_code};
pub use request::{
    parse_json, AvailabilityRequest, ConcurrentReadRequest, ListTitlesQuery, ReadWriteRequest,
    ReaderScheduleRequest, ScheduleRequest,
};
pub use response::{
    ConcurrentReadResponse, HealthResponse, NodeHealth, NodeWriteResult, ReadWriteResponse,
    RunView, TitleListResponse, TitleWriteResponse,
};
