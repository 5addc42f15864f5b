mod helpers;

use helpers::{TEST_BUCKET, lister, payload, reader};
use s3reader::{
    InMemoryStorage, OutputFormat, Payload, ReadingConfig, StoreError, download_keys,
    download_keys_to_memory, download_prefixes, list_object_keys,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn seeded_storage() -> InMemoryStorage {
    let storage = InMemoryStorage::new().with_page_size(2);
    storage
        .put_object(TEST_BUCKET, "logs/2024/a.json", payload(1500))
        .await;
    storage
        .put_object(TEST_BUCKET, "logs/2024/b.json", payload(10))
        .await;
    storage
        .put_object(TEST_BUCKET, "logs/2025/c.json", payload(200_000))
        .await;
    storage
        .put_object(TEST_BUCKET, "other/d.json", payload(7))
        .await;
    storage
}

#[tokio::test]
async fn test_download_keys_writes_files() {
    let storage = Arc::new(seeded_storage().await);
    let reader = reader(storage, ReadingConfig::default());
    let dir = tempfile::tempdir().unwrap();

    let keys = vec!["logs/2024/a.json".to_string(), "other/d.json".to_string()];
    let outcomes = download_keys(
        &reader,
        TEST_BUCKET,
        &keys,
        dir.path(),
        4,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].key, "logs/2024/a.json");
    assert_eq!(outcomes[0].result.as_ref().unwrap(), &1500);

    let written = std::fs::read(dir.path().join("logs/2024/a.json")).unwrap();
    assert_eq!(written.as_slice(), &payload(1500)[..]);
    let written = std::fs::read(dir.path().join("other/d.json")).unwrap();
    assert_eq!(written.len(), 7);
}

#[tokio::test]
async fn test_download_reports_failures_per_key() {
    let storage = Arc::new(seeded_storage().await);
    let reader = reader(storage, ReadingConfig::default());
    let dir = tempfile::tempdir().unwrap();

    let keys = vec![
        "missing.json".to_string(),
        "../escape.json".to_string(),
        "other/d.json".to_string(),
    ];
    let outcomes = download_keys(
        &reader,
        TEST_BUCKET,
        &keys,
        dir.path(),
        2,
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(
        outcomes[0].result,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        outcomes[1].result,
        Err(StoreError::InvalidInput(_))
    ));
    assert!(outcomes[2].result.is_ok(), "Other keys should still download");
    assert!(!dir.path().parent().unwrap().join("escape.json").exists());
}

#[tokio::test]
async fn test_download_prefixes() {
    let storage: Arc<InMemoryStorage> = Arc::new(seeded_storage().await);
    let lister = lister(storage.clone(), 2);
    let reader = reader(storage, ReadingConfig::default());
    let dir = tempfile::tempdir().unwrap();

    let outcomes = download_prefixes(
        &lister,
        &reader,
        TEST_BUCKET,
        &["logs/".to_string()],
        dir.path(),
        16,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let keys: Vec<&str> = outcomes.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(
        keys,
        vec!["logs/2024/a.json", "logs/2024/b.json", "logs/2025/c.json"]
    );
    assert!(outcomes.iter().all(|o| o.result.is_ok()));

    let written = std::fs::read(dir.path().join("logs/2025/c.json")).unwrap();
    assert_eq!(written.len(), 200_000);
    assert!(!dir.path().join("other").exists());
}

#[tokio::test]
async fn test_download_cancelled() {
    let storage = Arc::new(seeded_storage().await);
    let reader = reader(storage, ReadingConfig::default());
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let keys = vec!["other/d.json".to_string()];
    let outcomes = download_keys(&reader, TEST_BUCKET, &keys, dir.path(), 1, cancel).await;

    assert!(matches!(outcomes[0].result, Err(StoreError::Cancelled)));
}

async fn json_storage() -> InMemoryStorage {
    let storage = InMemoryStorage::new();
    storage
        .put_object(TEST_BUCKET, "events/1.json", r#"{"id": 1, "tags": ["a"]}"#.into())
        .await;
    storage
        .put_object(TEST_BUCKET, "events/2.json", "[1, 2, 3]".into())
        .await;
    storage
        .put_object(TEST_BUCKET, "events/broken.json", "{not json".into())
        .await;
    storage
}

#[tokio::test]
async fn test_download_to_memory_as_json() {
    let reader = reader(Arc::new(json_storage().await), ReadingConfig::default());

    let keys = vec![
        "events/2.json".to_string(),
        "events/broken.json".to_string(),
        "events/1.json".to_string(),
    ];
    let outcomes = download_keys_to_memory(
        &reader,
        TEST_BUCKET,
        &keys,
        OutputFormat::Json,
        4,
        CancellationToken::new(),
    )
    .await;

    let order: Vec<&str> = outcomes.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(order, keys, "Outcomes follow the order of the keys");

    assert_eq!(
        outcomes[0].result.as_ref().unwrap(),
        &Payload::Json(serde_json::json!([1, 2, 3]))
    );
    assert!(matches!(
        &outcomes[1].result,
        Err(StoreError::InvalidJson { key, .. }) if key == "events/broken.json"
    ));
    assert_eq!(
        outcomes[2].result.as_ref().unwrap(),
        &Payload::Json(serde_json::json!({"id": 1, "tags": ["a"]}))
    );
}

#[tokio::test]
async fn test_download_to_memory_as_bytes() {
    let storage = Arc::new(json_storage().await);
    let lister = lister(storage.clone(), 10);
    let reader = reader(storage, ReadingConfig::default());

    let keys = list_object_keys(
        &lister,
        TEST_BUCKET,
        &["events/".to_string()],
        2,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let outcomes = download_keys_to_memory(
        &reader,
        TEST_BUCKET,
        &keys,
        OutputFormat::Bytes,
        2,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[2].key, "events/broken.json");
    assert_eq!(
        outcomes[2].result.as_ref().unwrap(),
        &Payload::Bytes(b"{not json".to_vec()),
        "Bytes mode does not decode"
    );
}

#[tokio::test]
async fn test_download_to_memory_missing_key() {
    let reader = reader(Arc::new(json_storage().await), ReadingConfig::default());

    let outcomes = download_keys_to_memory(
        &reader,
        TEST_BUCKET,
        &["events/none.json".to_string()],
        OutputFormat::default(),
        1,
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(outcomes[0].result, Err(StoreError::NotFound { .. })));
}
