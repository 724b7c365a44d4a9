//! Reader classification
//!
//! Pure functions from captured observations to anomaly flags. They never
//! look at the isolation level: a flag says what was observed, and the
//! anomaly report compares that against what the level promises.

use std::time::Duration;

use isoprobe_core::{TitleRow, TitleUpdate};

use crate::observation::{ReadObservation, ReaderFlags, WriterOutcome};

/// Span during which a writer on some node had its transaction open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterWindow {
    /// Offset when the writer began
    pub begin: Duration,
    /// Offset of its commit, or of its end if it never committed
    pub end: Duration,
    /// Whether the write was committed
    pub committed: bool,
}

impl WriterWindow {
    /// Windows of the writers in `writers`.
    pub fn from_outcomes<'a>(writers: impl IntoIterator<Item = &'a WriterOutcome>) -> Vec<Self> {
        writers
            .into_iter()
            .map(|w| match &w.result {
                Ok(obs) => WriterWindow {
                    begin: obs.begin_at,
                    end: obs.commit_at,
                    committed: true,
                },
                Err(_) => WriterWindow {
                    begin: w.started_at,
                    end: w.ended_at,
                    committed: false,
                },
            })
            .collect()
    }

    /// `begin <= at < end`
    pub fn contains(&self, at: Duration) -> bool {
        self.begin <= at && at < self.end
    }
}

/// The slower of the two reads took longer than `threshold`.
pub fn is_blocked(read1: Duration, read2: Duration, threshold: Duration) -> bool {
    read1.max(read2) > threshold
}

/// Whether two snapshots disagree. An absent row differs from a present one.
pub fn snapshots_differ(a: Option<&TitleRow>, b: Option<&TitleRow>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => !a.same_content(b),
        (None, None) => false,
        _ => true,
    }
}

/// Whether `read` captured a write that was not yet committed: it shows the
/// new values, differs from the original, was captured before any writer on
/// its node committed, and inside an open writer window on that node.
pub fn shows_uncommitted(
    read: &ReadObservation,
    original: &TitleRow,
    update: &TitleUpdate,
    windows: &[WriterWindow],
) -> bool {
    let Some(row) = read.row.as_ref() else {
        return false;
    };
    if !update.is_reflected_in(row) || row.same_content(original) {
        return false;
    }
    let at = read.captured_at;
    let before_any_commit = windows
        .iter()
        .filter(|w| w.committed)
        .all(|w| at < w.end);
    before_any_commit && windows.iter().any(|w| w.contains(at))
}

/// Whether `at` falls inside any writer window.
pub fn during_write(at: Duration, windows: &[WriterWindow]) -> bool {
    windows.iter().any(|w| w.contains(at))
}

/// Every flag of one reader. `windows` must only hold writers on the
/// reader's node.
pub fn classify_reader(
    read1: &ReadObservation,
    read2: &ReadObservation,
    original: &TitleRow,
    update: &TitleUpdate,
    windows: &[WriterWindow],
    blocking_threshold: Duration,
) -> ReaderFlags {
    let dirty1 = shows_uncommitted(read1, original, update, windows);
    ReaderFlags {
        blocked: is_blocked(read1.duration, read2.duration, blocking_threshold),
        dirty_read_detected: dirty1,
        saw_uncommitted_write: dirty1 || shows_uncommitted(read2, original, update, windows),
        non_repeatable_read: snapshots_differ(read1.row.as_ref(), read2.row.as_ref()),
        read_during_write: during_write(read1.captured_at, windows)
            || during_write(read2.captured_at, windows),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn original() -> TitleRow {
        TitleRow {
            tconst: "tt0000001".into(),
            title_type: "short".into(),
            primary_title: "Carmencita".into(),
            genres: None,
            runtime_minutes: Some(1),
            start_year: Some(1894),
            last_updated: None,
        }
    }

    fn read(runtime: i32, started_ms: u64, captured_ms: u64) -> ReadObservation {
        let mut row = original();
        row.runtime_minutes = Some(runtime);
        ReadObservation {
            session_id: Uuid::nil(),
            tconst: row.tconst.clone(),
            row: Some(row),
            started_at: Duration::from_millis(started_ms),
            captured_at: Duration::from_millis(captured_ms),
            captured_wall: Utc::now(),
            duration: Duration::from_millis(captured_ms - started_ms),
        }
    }

    fn window(begin: u64, end: u64, committed: bool) -> WriterWindow {
        WriterWindow {
            begin: Duration::from_millis(begin),
            end: Duration::from_millis(end),
            committed,
        }
    }

    #[test]
    fn dirty_read_inside_open_window() {
        let flags = classify_reader(
            &read(150, 100, 100),
            &read(150, 400, 400),
            &original(),
            &TitleUpdate::runtime(150),
            &[window(0, 300, true)],
            Duration::from_millis(50),
        );
        assert!(flags.dirty_read_detected);
        assert!(flags.saw_uncommitted_write);
        assert!(flags.read_during_write);
        assert!(!flags.non_repeatable_read);
        assert!(!flags.blocked);
    }

    #[test]
    fn read_after_commit_is_not_dirty() {
        let flags = classify_reader(
            &read(1, 100, 100),
            &read(150, 400, 400),
            &original(),
            &TitleUpdate::runtime(150),
            &[window(0, 300, true)],
            Duration::from_millis(50),
        );
        assert!(!flags.dirty_read_detected);
        assert!(!flags.saw_uncommitted_write);
        assert!(flags.non_repeatable_read);
        assert!(flags.read_during_write);
    }

    #[test]
    fn blocked_read_released_by_commit() {
        // Serializable-style: read1 waits for the writer and returns at commit.
        let flags = classify_reader(
            &read(150, 100, 300),
            &read(150, 400, 400),
            &original(),
            &TitleUpdate::runtime(150),
            &[window(0, 300, true)],
            Duration::from_millis(50),
        );
        assert!(flags.blocked);
        assert!(!flags.dirty_read_detected);
        assert!(!flags.read_during_write);
    }

    #[test]
    fn new_values_equal_to_original_are_not_dirty() {
        let flags = classify_reader(
            &read(1, 100, 100),
            &read(1, 400, 400),
            &original(),
            &TitleUpdate::runtime(1),
            &[window(0, 300, true)],
            Duration::from_millis(50),
        );
        assert!(!flags.saw_uncommitted_write);
    }

    #[test]
    fn rolled_back_writer_still_opens_a_window() {
        let r = read(150, 100, 100);
        assert!(shows_uncommitted(
            &r,
            &original(),
            &TitleUpdate::runtime(150),
            &[window(0, 250, false)]
        ));
    }

    #[test]
    fn absent_rows() {
        assert!(!snapshots_differ(None, None));
        assert!(snapshots_differ(Some(&original()), None));
        let mut r = read(150, 0, 0);
        r.row = None;
        assert!(!shows_uncommitted(
            &r,
            &original(),
            &TitleUpdate::runtime(150),
            &[window(0, 300, false)]
        ));
    }

    proptest! {
        #[test]
        fn blocked_iff_slower_read_exceeds_threshold(
            a in 0u64..1000,
            b in 0u64..1000,
            t in 0u64..1000,
        ) {
            let (a_ms, b_ms) = (Duration::from_millis(a), Duration::from_millis(b));
            let blocked = is_blocked(a_ms, b_ms, Duration::from_millis(t));
            prop_assert_eq!(blocked, a.max(b) > t);
        }

        #[test]
        fn no_window_means_never_dirty(runtime in 2i32..500, at in 0u64..1000) {
            let r = read(runtime, 0, at);
            prop_assert!(!shows_uncommitted(&r, &original(), &TitleUpdate::runtime(runtime), &[]));
        }

        #[test]
        fn capture_after_every_commit_is_never_dirty(end in 1u64..500, extra in 0u64..500) {
            let r = read(150, 0, end + extra);
            let windows = [window(0, end, true)];
            prop_assert!(!shows_uncommitted(
                &r,
                &original(),
                &TitleUpdate::runtime(150),
                &windows
            ));
        }
    }
}
