//! HttpRemoteClient against an in-process authority.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{dead_base_url, item, FakeAuthority, TOKEN};
use fieldstock_core::{Record, RecordStatus, Snapshot, SnapshotEntity};
use fieldstock_sync::{
    EnvToken, HttpRemoteClient, ReachabilityProbe, RemoteConfig, RemoteSyncClient,
    TransportError,
};

fn record_for(payload: &fieldstock_core::EntityPayload) -> Record {
    let now = chrono::Utc::now();
    Record {
        id: "0191f0c2-7f00-7000-8000-000000000001".into(),
        entity_kind: payload.kind(),
        entity_id: payload.entity_id().to_string(),
        payload: payload.to_value(),
        schema_version: payload.kind().schema_version(),
        status: RecordStatus::Pending,
        attempt_count: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
        synced_at: None,
    }
}

#[tokio::test]
async fn test_push_record_sends_versioned_body_and_headers() {
    let authority = FakeAuthority::start().await;
    let client = authority.client();
    let record = record_for(&item("itm-1", 42));

    client.push_record(&record).await.unwrap();

    let pushes = authority.state.pushes();
    assert_eq!(pushes.len(), 1);
    let push = &pushes[0];
    assert_eq!(push.endpoint, "inventory");
    assert_eq!(push.idempotency_key.as_deref(), Some(record.id.as_str()));
    assert_eq!(push.authorization, Some(format!("Bearer {}", TOKEN)));
    assert_eq!(push.body["item_id"], "itm-1");
    assert_eq!(push.body["quantity"], 42);
    assert_eq!(push.body["schema_version"], 2);
}

#[tokio::test]
async fn test_error_body_is_passed_through() {
    let authority = FakeAuthority::start().await;
    authority.state.fail("itm-9");
    let client = authority.client();

    let err = client.push_record(&record_for(&item("itm-9", 1))).await.unwrap_err();
    assert_eq!(
        err,
        TransportError::Http {
            status: 500,
            message: "database is locked".into(),
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_rejected_token_is_http_401() {
    let authority = FakeAuthority::start().await;
    *authority.state.required_token.lock().unwrap() = Some("another-token".into());

    let err = authority
        .client()
        .push_record(&record_for(&item("itm-1", 1)))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(authority.state.pushes().is_empty());
}

#[tokio::test]
async fn test_missing_env_token_fails_before_sending() {
    let authority = FakeAuthority::start().await;
    let client = HttpRemoteClient::new(
        RemoteConfig::new(&authority.base_url).unwrap(),
        Some(Arc::new(EnvToken::new("FIELDSTOCK_HTTP_TEST_TOKEN_UNSET"))),
    )
    .unwrap();

    let err = client.push_record(&record_for(&item("itm-1", 1))).await.unwrap_err();
    assert!(matches!(err, TransportError::Auth(_)));
    assert!(authority.state.pushes().is_empty());
}

#[tokio::test]
async fn test_snapshot_download_and_upload() {
    let authority = FakeAuthority::start().await;
    let snapshot = Snapshot::new(vec![SnapshotEntity::from_payload(&item("itm-1", 5))]);
    let blob = snapshot.encode().unwrap();
    *authority.state.snapshot.lock().unwrap() = blob.clone();

    let client = authority.client();
    let pulled = client.pull_snapshot().await.unwrap();
    assert_eq!(pulled, blob);

    client.push_snapshot(pulled).await.unwrap();
    let uploaded = authority.state.uploaded.lock().unwrap().clone().unwrap();
    assert_eq!(Snapshot::decode(&uploaded).unwrap(), snapshot);
}

#[tokio::test]
async fn test_unreachable_authority() {
    let client = HttpRemoteClient::new(RemoteConfig::new(&dead_base_url().await).unwrap(), None)
        .unwrap();

    let err = client.push_record(&record_for(&item("itm-1", 1))).await.unwrap_err();
    assert!(matches!(err, TransportError::Unreachable(_)), "got {:?}", err);
    assert!(err.is_connectivity());
    assert!(!client.probe().await);
}

#[tokio::test]
async fn test_slow_authority_times_out() {
    let authority = FakeAuthority::start().await;
    *authority.state.delay.lock().unwrap() = Some(Duration::from_secs(2));

    let client = authority.client_with(
        RemoteConfig::new(&authority.base_url)
            .unwrap()
            .request_timeout(Duration::from_millis(200)),
    );

    let err = client.push_record(&record_for(&item("itm-1", 1))).await.unwrap_err();
    assert_eq!(err, TransportError::Timeout(Duration::from_millis(200)));
}

#[tokio::test]
async fn test_probe_reaches_live_authority() {
    let authority = FakeAuthority::start().await;
    assert!(authority.client().probe().await);
}
