//! Scenario deadline and pool pressure.

use crate::test_utils::*;
use isoprobe::{ConcurrentReadRequest, PoolConfig, ProbeConfig, ProbeError, ScenarioConfig};

#[tokio::test(start_paused = true)]
async fn expired_run_rolls_back_and_releases_everything() {
    let config = ProbeConfig {
        scenario: ScenarioConfig {
            scenario_timeout_ms: 200,
            ..ScenarioConfig::default()
        },
        ..ProbeConfig::default()
    };
    let cluster = Cluster::with_config(config);

    // Default schedule holds the write until 300ms.
    let err = cluster
        .controller
        .read_write_conflict(&runtime_request("READ_UNCOMMITTED", 150))
        .await
        .unwrap_err();
    assert_eq!(err, ProbeError::Timeout { elapsed_ms: 200 });

    cluster.assert_quiescent();
    for node in ["node1", "node2"] {
        assert_eq!(
            cluster.node(node).snapshot(TCONST).unwrap().runtime_minutes,
            Some(1),
            "{node}"
        );
    }

    // The cluster is fully usable afterwards.
    let health = cluster.controller.health().await;
    assert!(health.nodes.values().all(|n| n.online && n.sessions_in_use == 0));
}

fn tight_pool(acquire_timeout_ms: u64) -> Cluster {
    let mut config = ProbeConfig {
        pool: PoolConfig {
            acquire_timeout_ms,
            ..PoolConfig::default()
        },
        ..ProbeConfig::default()
    };
    for node in &mut config.nodes {
        node.capacity = 1;
    }
    Cluster::with_config(config)
}

fn two_readers() -> ConcurrentReadRequest {
    ConcurrentReadRequest {
        tconst: TCONST.into(),
        isolation_level: None,
        readers: Some(2),
    }
}

#[tokio::test(start_paused = true)]
async fn exhausted_pool_fails_fast() {
    let cluster = tight_pool(0);
    let resp = cluster.controller.concurrent_read(&two_readers()).await.unwrap();

    for node in ["node1", "node2"] {
        let entries = [
            &resp.results[&format!("{node}_1")],
            &resp.results[&format!("{node}_2")],
        ];
        assert_eq!(entries.iter().filter(|e| e.success).count(), 1, "{node}");
        let failed = entries.iter().find(|e| !e.success).unwrap();
        assert_eq!(failed.error_kind, Some("PoolExhausted"));
    }
    cluster.assert_quiescent();
}

#[tokio::test(start_paused = true)]
async fn waiting_acquire_outlasts_a_short_hold() {
    // Readers hold for 100ms; the second waits up to 500ms for the permit.
    let cluster = tight_pool(500);
    let resp = cluster.controller.concurrent_read(&two_readers()).await.unwrap();
    assert!(resp.results.values().all(|e| e.success));
    assert!(resp.analysis.consistent);
    cluster.assert_quiescent();
}
