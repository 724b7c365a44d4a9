//! Scenario test suite
//!
//! End-to-end checks of the isolation guarantees and resource behavior the
//! harness reports, driven through the controller against an in-process
//! three-node cluster on paused tokio time.
//!
//! ```bash
//! cargo test --test scenarios
//! ```

mod test_utils;

mod concurrent_read;
mod read_write_conflict;
mod timeout;
mod upsert;
