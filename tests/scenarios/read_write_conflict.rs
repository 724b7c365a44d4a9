//! Read-write conflict scenario: what each level lets a reader see while a
//! writer holds an uncommitted update.

use crate::test_utils::*;
use isoprobe::{IsolationLevel, ReaderScheduleRequest, ScheduleRequest};

#[tokio::test(start_paused = true)]
async fn read_uncommitted_reports_dirty_reads() {
    let cluster = Cluster::new();
    let resp = cluster
        .controller
        .read_write_conflict(&runtime_request("READ_UNCOMMITTED", 150))
        .await
        .unwrap();

    let reader = &resp.results.readers["node1_1"];
    assert!(reader.success);
    assert!(reader.dirty_read_detected);
    assert_eq!(
        reader.read1.as_ref().unwrap().row.as_ref().unwrap().runtime_minutes,
        Some(150)
    );
    assert!(resp.analysis.dirty_reads_occurred > 0);
    cluster.assert_quiescent();
}

#[tokio::test(start_paused = true)]
async fn committed_levels_never_read_dirty() {
    for level in ["READ_COMMITTED", "REPEATABLE_READ", "SERIALIZABLE"] {
        let cluster = Cluster::new();
        let resp = cluster
            .controller
            .read_write_conflict(&runtime_request(level, 150))
            .await
            .unwrap();
        assert_eq!(resp.analysis.dirty_reads_occurred, 0, "{level}");
        for (key, reader) in &resp.results.readers {
            assert!(reader.success, "{level} {key}");
            assert!(!reader.dirty_read_detected, "{level} {key}");
        }
        assert!(resp.analysis.final_state_consistent_across_nodes, "{level}");
        cluster.assert_quiescent();
    }
}

#[tokio::test(start_paused = true)]
async fn read_committed_allows_non_repeatable_reads() {
    let cluster = Cluster::new();
    let resp = cluster
        .controller
        .read_write_conflict(&runtime_request("read committed", 150))
        .await
        .unwrap();
    let reader = &resp.results.readers["node2_1"];
    assert!(reader.non_repeatable_read);
    assert!(resp.analysis.non_repeatable_reads > 0);
}

#[tokio::test(start_paused = true)]
async fn repeatable_levels_keep_reads_stable_across_a_commit() {
    for level in [IsolationLevel::RepeatableRead, IsolationLevel::Serializable] {
        let cluster = Cluster::new();
        let resp = cluster
            .controller
            .read_write_conflict(&runtime_request(level.as_str(), 150))
            .await
            .unwrap();
        for (key, reader) in &resp.results.readers {
            assert!(!reader.non_repeatable_read, "{level} {key}");
        }
        assert_eq!(resp.analysis.non_repeatable_reads, 0, "{level}");
        // The writer still committed.
        assert_eq!(
            cluster.node("node1").snapshot(TCONST).unwrap().runtime_minutes,
            Some(150)
        );
    }
}

#[tokio::test(start_paused = true)]
async fn serializable_readers_wait_for_the_writer() {
    let cluster = Cluster::new();
    let resp = cluster
        .controller
        .read_write_conflict(&runtime_request("SERIALIZABLE", 150))
        .await
        .unwrap();
    let reader = &resp.results.readers["node1_1"];
    assert!(reader.blocked);
    assert!(resp.analysis.blocking_occurred > 0);
    // The blocked read returned the committed value.
    assert_eq!(
        reader.read1.as_ref().unwrap().row.as_ref().unwrap().runtime_minutes,
        Some(150)
    );
}

#[tokio::test(start_paused = true)]
async fn read_committed_timeline_end_to_end() {
    let cluster = Cluster::new();
    let mut req = runtime_request("READ_COMMITTED", 150);
    req.readers = Some(2);
    // Writer begins at 200ms and commits at 300ms.
    req.schedule = Some(ScheduleRequest {
        writer_start_ms: Some(200),
        write_hold_ms: Some(100),
        readers: vec![
            ReaderScheduleRequest {
                start_ms: 0,
                read2_ms: 50,
            },
            ReaderScheduleRequest {
                start_ms: 60,
                read2_ms: 600,
            },
        ],
    });

    let resp = cluster.controller.read_write_conflict(&req).await.unwrap();
    let original = carmencita();

    // Finished before the writer began.
    let early = &resp.results.readers["node1_1"];
    assert_eq!(early.read1.as_ref().unwrap().row.as_ref(), Some(&original));
    assert!(!early.non_repeatable_read);
    assert!(!early.read_during_write);

    // read2 strictly after the commit.
    let late = &resp.results.readers["node1_2"];
    let read2 = late.read2.as_ref().unwrap();
    assert!(read2.started_at_ms > resp.results.writers["node1_1"].commit_at_ms.unwrap());
    assert_eq!(read2.row.as_ref().unwrap().runtime_minutes, Some(150));
    assert!(late.non_repeatable_read);
}

#[tokio::test(start_paused = true)]
async fn committed_write_is_visible_with_newer_timestamp() {
    let cluster = Cluster::new();
    let resp = cluster
        .controller
        .read_write_conflict(&runtime_request("REPEATABLE READ", 150))
        .await
        .unwrap();

    for node in ["node1", "node2"] {
        let writer = &resp.results.writers[&format!("{node}_1")];
        assert!(writer.success);
        assert_eq!(writer.rows_affected, 1);

        let fresh = cluster.controller.get_title(TCONST).await.unwrap();
        assert_eq!(fresh.runtime_minutes, Some(150));
        let stored = cluster.node(node).snapshot(TCONST).unwrap();
        assert!(stored.last_updated > carmencita().last_updated, "{node}");
        assert_eq!(
            resp.results.final_values[node].as_ref().unwrap().runtime_minutes,
            Some(150)
        );
    }
}

#[tokio::test(start_paused = true)]
async fn several_writers_per_node_serialize_on_the_row_lock() {
    let cluster = Cluster::new();
    let mut req = runtime_request("READ_COMMITTED", 150);
    req.writers = Some(2);
    let resp = cluster.controller.read_write_conflict(&req).await.unwrap();

    let w1 = &resp.results.writers["node1_1"];
    let w2 = &resp.results.writers["node1_2"];
    assert!(w1.success && w2.success);
    // Same content: whichever commits second changes nothing.
    let mut affected = [w1.rows_affected, w2.rows_affected];
    affected.sort_unstable();
    assert_eq!(affected, [0, 1]);
    assert_eq!(resp.analysis.writers_succeeded, resp.results.writers.len());
    cluster.assert_quiescent();
}
