mod flaky_store;

use chrono::NaiveDate;
use dailystats::publish::STAGING_PREFIX;
use dailystats::{PartitionLocation, PublishError, Publisher, TargetPartition};
use flaky_store::FlakyStore;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

fn location() -> PartitionLocation {
    TargetPartition::for_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).location(
        "shopify",
        "shopify_daily_stats",
        "csv",
    )
}

async fn keys(store: &Arc<dyn ObjectStore>) -> Vec<String> {
    let mut keys: Vec<String> = store
        .list(None)
        .map_ok(|meta| meta.location.to_string())
        .try_collect()
        .await
        .unwrap();
    keys.sort();
    keys
}

#[tokio::test]
async fn test_staging_cleanup_failure_keeps_the_publish() {
    let store: Arc<dyn ObjectStore> =
        Arc::new(FlakyStore::new().failing_delete_under(STAGING_PREFIX));
    let publisher = Publisher::new(store.clone());
    let location = location();

    let receipt = publisher
        .publish_bytes(b"order_date\n".to_vec(), &location)
        .await
        .unwrap();
    assert_eq!(receipt.key, location.key);
    assert_eq!(receipt.bytes, 11);

    // The leftover staging object sits outside every partition
    let keys = keys(&store).await;
    assert_eq!(keys.len(), 2);
    assert!(keys[0].starts_with(&format!("{STAGING_PREFIX}/")));
    assert_eq!(keys[1], location.key);
    assert!(publisher.exists(&location.prefix).await.unwrap());
}

#[tokio::test]
async fn test_failed_copy_removes_staging_object() {
    let store: Arc<dyn ObjectStore> = Arc::new(FlakyStore::new().failing_copy());
    let publisher = Publisher::new(store.clone());

    let err = publisher
        .publish_bytes(b"payload".to_vec(), &location())
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::ObjectStore(_)));
    assert!(keys(&store).await.is_empty());
}

#[tokio::test]
async fn test_failed_sweep_removes_staging_object() {
    let location = location();
    let store: Arc<dyn ObjectStore> =
        Arc::new(FlakyStore::new().failing_delete_under(&location.prefix));
    let stale = format!("{}/old.csv", location.prefix);
    let _ = store
        .put(&ObjectPath::from(stale.as_str()), PutPayload::from_static(b"old"))
        .await
        .unwrap();
    let publisher = Publisher::new(store.clone());

    let err = publisher
        .publish_bytes(b"payload".to_vec(), &location)
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::ObjectStore(_)));

    // New data is in place, the stale file could not be swept
    let mut expected = vec![location.key.clone(), stale];
    expected.sort();
    assert_eq!(keys(&store).await, expected);
}

#[tokio::test]
async fn test_failed_stage_leaves_partition_untouched() {
    let location = location();
    let store: Arc<dyn ObjectStore> =
        Arc::new(FlakyStore::new().failing_put_under(STAGING_PREFIX));
    let previous = ObjectPath::from(location.key.as_str());
    let _ = store
        .put(&previous, PutPayload::from_static(b"previous"))
        .await
        .unwrap();
    let publisher = Publisher::new(store.clone());

    assert!(publisher
        .publish_bytes(b"payload".to_vec(), &location)
        .await
        .is_err());
    assert_eq!(keys(&store).await, vec![location.key.clone()]);
    let kept = store.get(&previous).await.unwrap().bytes().await.unwrap();
    assert_eq!(kept.as_ref(), b"previous");
}
