//! Error to HTTP status mapping.
//!
//! Anomalies are never errors: they travel inside 2xx bodies. Only failures
//! that prevented a run (or a title operation) from producing a result map
//! to non-2xx statuses.

use isoprobe_core::{ErrorKind, ProbeError};

/// HTTP status code for a top-level error.
pub fn status_code(err: &ProbeError) -> u16 {
    match err.kind() {
        ErrorKind::Validation => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict => 409,
        ErrorKind::PoolExhausted | ErrorKind::Connection => 503,
        ErrorKind::Timeout => 504,
        ErrorKind::Internal => 500,
    }
}

/// Plain-text body for a top-level error.
pub fn error_body(err: &ProbeError) -> String {
    err.to_string()
}
