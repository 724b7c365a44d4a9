//! Title upserts and deletes across the central node and the owning
//! fragment, and the paged listing served by the central node.

use crate::test_utils::*;
use isoprobe::{ConcurrentReadRequest, ListTitlesQuery, NewTitle, ProbeError};

fn short() -> NewTitle {
    NewTitle {
        tconst: "tt0000005".into(),
        title_type: "short".into(),
        primary_title: "Blacksmith Scene".into(),
        start_year: Some(1893),
        runtime_minutes: Some(1),
        genres: Some("Comedy,Short".into()),
    }
}

#[tokio::test(start_paused = true)]
async fn identical_upserts_leave_the_row_unchanged() {
    let cluster = Cluster::new();
    let first = cluster.controller.upsert_title(&short()).await.unwrap();
    assert!(first.success);
    assert_eq!(first.nodes["node1"].rows_affected, 1);
    assert_eq!(first.nodes["node3"].rows_affected, 1);
    let read1 = cluster.controller.get_title("tt0000005").await.unwrap();

    let second = cluster.controller.upsert_title(&short()).await.unwrap();
    assert!(second.nodes.values().all(|n| n.success && n.rows_affected == 0));
    let read2 = cluster.controller.get_title("tt0000005").await.unwrap();
    assert_eq!(read1, read2);
    cluster.assert_quiescent();
}

#[tokio::test(start_paused = true)]
async fn rows_land_on_central_and_matching_fragment_only() {
    let cluster = Cluster::new();
    let resp = cluster.controller.upsert_title(&short()).await.unwrap();
    let mut targets: Vec<_> = resp.nodes.keys().cloned().collect();
    targets.sort();
    assert_eq!(targets, ["node1", "node3"]);
    assert!(cluster.node("node2").snapshot("tt0000005").is_none());
    assert!(cluster.node("node3").snapshot("tt0000005").is_some());
}

#[tokio::test(start_paused = true)]
async fn changed_content_refreshes_last_updated() {
    let cluster = Cluster::new();
    let mut title = NewTitle {
        tconst: TCONST.into(),
        title_type: "movie".into(),
        primary_title: "Carmencita".into(),
        start_year: Some(1894),
        runtime_minutes: Some(2),
        genres: Some("Documentary,Short".into()),
    };
    cluster.controller.upsert_title(&title).await.unwrap();
    let row = cluster.node("node2").snapshot(TCONST).unwrap();
    assert_eq!(row.runtime_minutes, Some(2));
    assert!(row.last_updated > carmencita().last_updated);

    title.primary_title = "  ".into();
    let err = cluster.controller.upsert_title(&title).await.unwrap_err();
    assert!(matches!(err, ProbeError::Validation { .. }));
}

#[tokio::test(start_paused = true)]
async fn upsert_fails_only_when_no_target_accepts() {
    let cluster = Cluster::new();
    cluster.node("node3").set_online(false);
    let resp = cluster.controller.upsert_title(&short()).await.unwrap();
    assert!(resp.nodes["node1"].success);
    let failed = &resp.nodes["node3"];
    assert!(!failed.success);
    assert_eq!(failed.error_kind, Some("ConnectionError"));
    assert!(!failed.error.as_deref().unwrap_or_default().is_empty());

    cluster.node("node1").set_online(false);
    let err = cluster.controller.upsert_title(&short()).await.unwrap_err();
    assert!(err.is_unavailability());
}

#[tokio::test(start_paused = true)]
async fn deleted_title_leaves_listing_and_scenarios() {
    let cluster = Cluster::new();
    cluster.controller.upsert_title(&short()).await.unwrap();
    let all = ListTitlesQuery::default();
    assert_eq!(cluster.controller.list_titles(&all).await.unwrap().total, 2);

    let deleted = cluster.controller.delete_title("tt0000005").await.unwrap();
    assert!(deleted.success);
    assert_eq!(deleted.nodes["node3"].rows_affected, 1);
    assert_eq!(deleted.nodes["node1"].rows_affected, 1);

    let listing = cluster.controller.list_titles(&all).await.unwrap();
    assert_eq!(listing.total, 1);
    assert_eq!(listing.data[0].tconst, TCONST);

    let req = ConcurrentReadRequest {
        tconst: "tt0000005".into(),
        isolation_level: None,
        readers: None,
    };
    let err = cluster.controller.concurrent_read(&req).await.unwrap_err();
    assert!(matches!(err, ProbeError::NotFound { .. }), "{err}");
    cluster.assert_quiescent();
}
