//! Concurrent-read scenario.

use crate::test_utils::*;
use isoprobe::{ConcurrentReadRequest, IsolationLevel, ProbeError};

fn request(isolation: &str, readers: Option<u32>) -> ConcurrentReadRequest {
    ConcurrentReadRequest {
        tconst: TCONST.into(),
        isolation_level: Some(isolation.into()),
        readers,
    }
}

#[tokio::test(start_paused = true)]
async fn quiet_record_reads_consistently_at_every_level() {
    let cluster = Cluster::new();
    for level in IsolationLevel::ALL {
        let resp = cluster
            .controller
            .concurrent_read(&request(level.as_str(), None))
            .await
            .unwrap();
        assert!(resp.analysis.consistent, "{level}");
        let tested: Vec<&str> = resp.analysis.nodes_tested.iter().map(|n| n.as_str()).collect();
        assert_eq!(tested, ["node1", "node2"], "{level}");
        assert_eq!(resp.results.len(), 2);
        for entry in resp.results.values() {
            assert!(entry.success);
            assert_eq!(entry.isolation_level, level);
            assert_eq!(entry.data.as_ref().unwrap().primary_title, "Carmencita");
        }
    }
    cluster.assert_quiescent();
}

#[tokio::test(start_paused = true)]
async fn unreachable_node_fails_only_its_own_entries() {
    let cluster = Cluster::new();
    cluster.node("node2").set_online(false);

    let resp = cluster
        .controller
        .concurrent_read(&request("READ COMMITTED", Some(2)))
        .await
        .unwrap();

    for key in ["node1_1", "node1_2"] {
        assert!(resp.results[key].success, "{key}");
    }
    for key in ["node2_1", "node2_2"] {
        let entry = &resp.results[key];
        assert!(!entry.success, "{key}");
        assert_eq!(entry.error_kind, Some("ConnectionError"));
        let error = entry.error.as_deref().unwrap();
        assert!(error.contains("node2"), "{error}");
    }
    cluster.assert_quiescent();
}

#[tokio::test(start_paused = true)]
async fn every_node_down_is_a_top_level_error() {
    let cluster = Cluster::new();
    for node in &cluster.nodes {
        node.set_online(false);
    }
    let err = cluster
        .controller
        .concurrent_read(&request("SERIALIZABLE", None))
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::Connection { .. }), "{err}");
}

#[tokio::test(start_paused = true)]
async fn unknown_level_is_rejected_before_any_session() {
    let cluster = Cluster::new();
    let err = cluster
        .controller
        .concurrent_read(&request("CHAOS", None))
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::Validation { .. }));
    cluster.assert_quiescent();
}
