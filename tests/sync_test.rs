//! Synchronizer integration tests against a recording mock downstream.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use common::{start_mock_downstream, start_mock_with_statuses, wait_for};
use core_config_adapter::sync::{CoreMapper, SyncError, SyncKind, Synchronizer};
use core_config_adapter::tree::Path;

/// A site with one device group and no slices, so each reconciliation
/// issues exactly one push.
fn single_group_tree(mtu: u64) -> Value {
    json!({
        "site": [{
            "site-id": "acme-site",
            "imsi-definition": {
                "mcc": 315, "mnc": 10, "enterprise": 789,
                "format": "CCCNNNEEESSSSSS"
            },
            "ip-domain": [{
                "ip-domain-id": "pool", "subnet": "10.0.0.0/24", "mtu": mtu
            }],
            "device-group": [{
                "device-group-id": "g1",
                "ip-domain-id": "pool",
                "imsis": [{"name": "r", "imsi-range-from": 1, "imsi-range-to": 2}]
            }]
        }]
    })
}

fn synchronizer_for(base_url: &str, retry_ms: u64) -> Arc<Synchronizer> {
    let mapper = Arc::new(CoreMapper::new(base_url, base_url));
    let mut sync = Synchronizer::new(mapper).unwrap();
    sync.set_retry_interval(Duration::from_millis(retry_ms));
    Arc::new(sync)
}

async fn drain(sync: &Arc<Synchronizer>) {
    let sync = sync.clone();
    assert!(
        wait_for(move || sync.busy() == 0, Duration::from_secs(5)).await,
        "synchronizer did not drain"
    );
}

#[tokio::test]
async fn test_push_reaches_downstream() {
    let mock = start_mock_downstream(200).await;
    let sync = synchronizer_for(&mock.base_url(), 50);
    sync.start();

    sync.synchronize(&single_group_tree(1400), SyncKind::Apply, None)
        .await
        .unwrap();
    drain(&sync).await;

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/v1/device-group/g1");
    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["imsis"], json!(["000000000000001", "000000000000002"]));
    assert_eq!(body["ip-domain-expanded"]["mtu"], json!(1400));
    assert_eq!(sync.cache().len(), 1);
}

#[tokio::test]
async fn test_failed_push_retries_until_success() {
    let mock = start_mock_with_statuses(vec![500, 200]).await;
    let sync = synchronizer_for(&mock.base_url(), 50);
    sync.start();

    sync.synchronize(&single_group_tree(1400), SyncKind::Apply, None)
        .await
        .unwrap();
    drain(&sync).await;

    assert_eq!(mock.request_count(), 2);
    assert_eq!(sync.cache().len(), 1);
}

#[tokio::test]
async fn test_unchanged_content_is_not_repushed() {
    let mock = start_mock_downstream(200).await;
    let sync = synchronizer_for(&mock.base_url(), 50);
    sync.start();

    let tree = single_group_tree(1400);
    sync.synchronize(&tree, SyncKind::Apply, None).await.unwrap();
    drain(&sync).await;
    assert_eq!(mock.request_count(), 1);

    sync.synchronize(&tree, SyncKind::Apply, None).await.unwrap();
    drain(&sync).await;
    assert_eq!(mock.request_count(), 1);
}

#[tokio::test]
async fn test_forced_repushes_unchanged_content() {
    let mock = start_mock_downstream(200).await;
    let sync = synchronizer_for(&mock.base_url(), 50);
    sync.start();

    let tree = single_group_tree(1400);
    sync.synchronize(&tree, SyncKind::Apply, None).await.unwrap();
    drain(&sync).await;
    assert_eq!(mock.request_count(), 1);

    sync.synchronize(&tree, SyncKind::Forced, None).await.unwrap();
    drain(&sync).await;
    assert_eq!(mock.request_count(), 2);
}

#[tokio::test]
async fn test_forced_repush_survives_coalescing() {
    let mock = start_mock_downstream(200).await;
    let sync = synchronizer_for(&mock.base_url(), 50);
    sync.start();

    let tree = single_group_tree(1400);
    sync.synchronize(&tree, SyncKind::Apply, None).await.unwrap();
    drain(&sync).await;
    assert_eq!(mock.request_count(), 1);

    // Enqueue Forced and Apply back to back; however the mailbox
    // coalesces them, the forced re-push of unchanged content must land.
    sync.synchronize(&tree, SyncKind::Forced, None).await.unwrap();
    sync.synchronize(&tree, SyncKind::Apply, None).await.unwrap();
    drain(&sync).await;
    assert_eq!(mock.request_count(), 2);
}

#[tokio::test]
async fn test_newer_snapshot_supersedes_retry() {
    let mock = start_mock_with_statuses(vec![500, 200]).await;
    let sync = synchronizer_for(&mock.base_url(), 300);
    sync.start();

    sync.synchronize(&single_group_tree(1400), SyncKind::Apply, None)
        .await
        .unwrap();
    // Let the first attempt fail, then enqueue a newer snapshot while the
    // worker is sleeping out its retry interval.
    tokio::time::sleep(Duration::from_millis(100)).await;
    sync.synchronize(&single_group_tree(9000), SyncKind::Apply, None)
        .await
        .unwrap();
    drain(&sync).await;

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    // The retry carried the newer snapshot, not the failed one.
    let last: Value = serde_json::from_str(&requests[1].body).unwrap();
    assert_eq!(last["ip-domain-expanded"]["mtu"], json!(9000));
}

#[tokio::test]
async fn test_delete_is_pushed_synchronously() {
    let mock = start_mock_downstream(200).await;
    let sync = synchronizer_for(&mock.base_url(), 50);
    // Worker intentionally not started; delete must not depend on it.

    let path = Path::parse("/site[site-id=acme-site]/device-group[device-group-id=g1]").unwrap();
    sync.synchronize(&json!({}), SyncKind::Delete, Some(&path))
        .await
        .unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "DELETE");
    assert_eq!(requests[0].path, "/v1/device-group/g1");
}

#[tokio::test]
async fn test_subfield_delete_issues_no_entity_delete() {
    let mock = start_mock_downstream(200).await;
    let sync = synchronizer_for(&mock.base_url(), 50);

    // Removing one field of a slice must not delete the slice downstream.
    let path = Path::parse("/site[site-id=acme-site]/slice[slice-id=s1]/mbr").unwrap();
    sync.synchronize(&json!({}), SyncKind::Delete, Some(&path))
        .await
        .unwrap();
    assert_eq!(mock.request_count(), 0);
}

#[tokio::test]
async fn test_delete_of_absent_entity_succeeds() {
    let mock = start_mock_downstream(404).await;
    let sync = synchronizer_for(&mock.base_url(), 50);

    let path = Path::parse("/site[site-id=acme-site]/slice[slice-id=s1]").unwrap();
    sync.synchronize(&json!({}), SyncKind::Delete, Some(&path))
        .await
        .unwrap();
    assert_eq!(mock.request_count(), 1);
    assert_eq!(mock.requests()[0].path, "/v1/network-slice/s1");
}

#[tokio::test]
async fn test_delete_failure_is_reported() {
    let mock = start_mock_downstream(500).await;
    let sync = synchronizer_for(&mock.base_url(), 50);

    let path = Path::parse("/site[site-id=acme-site]/device-group[device-group-id=g1]").unwrap();
    let err = sync
        .synchronize(&json!({}), SyncKind::Delete, Some(&path))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Push(_)));
}

#[tokio::test]
async fn test_slice_push_targets_core_and_upf() {
    let core = start_mock_downstream(200).await;
    let upf = start_mock_downstream(200).await;
    let mapper = Arc::new(CoreMapper::new(&core.base_url(), &upf.base_url()));
    let sync = Arc::new(Synchronizer::new(mapper).unwrap());
    sync.start();

    let mut tree = single_group_tree(1400);
    tree["site"][0]["upf"] = json!([
        {"upf-id": "u1", "address": "upf.example.com", "port": 8805}
    ]);
    tree["site"][0]["slice"] = json!([{
        "slice-id": "s1", "sst": 1, "sd": "010203",
        "device-group": ["g1"], "upf-id": "u1",
        "mbr": {"uplink": 100, "downlink": 200}
    }]);

    sync.synchronize(&tree, SyncKind::Apply, None).await.unwrap();
    drain(&sync).await;

    let core_paths: Vec<String> = core.requests().iter().map(|r| r.path.clone()).collect();
    assert!(core_paths.contains(&"/v1/device-group/g1".to_string()));
    assert!(core_paths.contains(&"/v1/network-slice/s1".to_string()));

    let upf_requests = upf.requests();
    assert_eq!(upf_requests.len(), 1);
    assert_eq!(upf_requests[0].path, "/v1/config/network-slices");
    let body: Value = serde_json::from_str(&upf_requests[0].body).unwrap();
    assert_eq!(body["slice-name"], json!("s1"));
}
