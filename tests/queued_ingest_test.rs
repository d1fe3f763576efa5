//! Queued ingestion path: uploads, queue messages, and resource rotation.

use bytes::Bytes;
use ingest_broker::client::{IngestClient, IngestionOutcome, QueuedIngestClient};
use ingest_broker::config::BrokerConfig;
use ingest_broker::error::{IngestError, ResourceError};
use ingest_broker::manager::ResourceManager;
use ingest_broker::mocks::{MockManagementClient, MockStorageClient};
use ingest_broker::source::{BlobSource, Compression, DataFormat, IngestionProperties, StreamSource};
use std::sync::Arc;
use std::time::Duration;

async fn manager_for(accounts: &[&str]) -> Arc<ResourceManager> {
    let mgmt = Arc::new(MockManagementClient::new());
    mgmt.enqueue_resources(Ok(MockManagementClient::listing_for_accounts(accounts)));
    mgmt.enqueue_token(Ok(MockManagementClient::token_result("tok-1")));
    let manager = Arc::new(ResourceManager::start(mgmt, &BrokerConfig::default()));
    manager
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();
    manager
}

fn props() -> IngestionProperties {
    IngestionProperties::new("telemetry", "events", DataFormat::Csv)
}

#[tokio::test(start_paused = true)]
async fn test_upload_and_enqueue_happy_path() {
    let manager = manager_for(&["acca"]).await;
    let storage = Arc::new(MockStorageClient::new());
    let client = QueuedIngestClient::new(manager.clone(), storage.clone(), 3);

    let source_id = uuid::Uuid::new_v4();
    let payload = Bytes::from_static(b"a,b\n1,2\n");
    let source = StreamSource::from_bytes(payload.clone()).with_source_id(source_id);
    let result = client.ingest_from_stream(source, &props()).await.unwrap();

    assert_eq!(result.source_id, source_id);
    let uploads = storage.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].payload, payload);
    assert!(uploads[0]
        .blob_name
        .starts_with(&format!("telemetry__events__{source_id}")));
    // Uncompressed text is compressed in transit.
    assert!(uploads[0].compress);
    assert!(uploads[0].blob_name.ends_with(".csv.gz"));

    let posts = storage.posts();
    assert_eq!(posts.len(), 1);
    let message: serde_json::Value = serde_json::from_str(&posts[0].message).unwrap();
    assert_eq!(message["databaseName"], "telemetry");
    assert_eq!(message["tableName"], "events");
    assert_eq!(message["rawDataSize"], payload.len() as u64);
    assert_eq!(message["additionalProperties"]["format"], "csv");
    assert_eq!(message["flushImmediately"], false);
    // The queued blob path carries the container credential for the service.
    let blob_path = message["blobPath"].as_str().unwrap();
    assert!(blob_path.contains("sig=csecret"));
    assert!(blob_path.contains(&format!("telemetry__events__{source_id}")));

    match result.outcome {
        IngestionOutcome::Queued { blob_path } => {
            // The reported path is credential free.
            assert!(!blob_path.contains("sig="));
        }
        other => panic!("expected Queued, got {other:?}"),
    }
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_already_compressed_payload_is_not_recompressed() {
    let manager = manager_for(&["acca"]).await;
    let storage = Arc::new(MockStorageClient::new());
    let client = QueuedIngestClient::new(manager.clone(), storage.clone(), 3);

    let source = StreamSource::from_bytes(Bytes::from_static(b"\x1f\x8bgzdata"))
        .with_compression(Compression::Gzip);
    client.ingest_from_stream(source, &props()).await.unwrap();

    let uploads = storage.uploads();
    assert!(!uploads[0].compress);
    assert!(uploads[0].blob_name.ends_with(".csv.gz"));
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_account_rotates_to_the_next() {
    let manager = manager_for(&["acca", "accb"]).await;
    let storage = Arc::new(MockStorageClient::new());
    storage.fail_account("acca");
    let client = QueuedIngestClient::new(manager.clone(), storage.clone(), 3);

    let source = StreamSource::from_bytes(Bytes::from_static(b"a,b\n"));
    let result = client.ingest_from_stream(source, &props()).await.unwrap();

    assert!(matches!(result.outcome, IngestionOutcome::Queued { .. }));
    let uploads = storage.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].account, "accb");
    assert_eq!(storage.posts()[0].account, "accb");
    // The failure was fed back into the ranking.
    assert!(manager.account_score("acca") < manager.account_score("accb"));
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_all_accounts_failing_exhausts_the_rotation() {
    let manager = manager_for(&["acca", "accb"]).await;
    let storage = Arc::new(MockStorageClient::new());
    storage.fail_account("acca");
    storage.fail_account("accb");
    let client = QueuedIngestClient::new(manager.clone(), storage.clone(), 3);

    let source = StreamSource::from_bytes(Bytes::from_static(b"a,b\n"));
    let err = client.ingest_from_stream(source, &props()).await.unwrap_err();

    match err {
        IngestError::Resource(ResourceError::Exhausted {
            attempts, history, ..
        }) => {
            assert_eq!(attempts, 3);
            assert_eq!(history.len(), 3);
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_blob_source_is_enqueued_in_place() {
    let manager = manager_for(&["acca"]).await;
    let storage = Arc::new(MockStorageClient::new());
    let client = QueuedIngestClient::new(manager.clone(), storage.clone(), 3);

    let blob = BlobSource::new("https://ext.blob.example.net/data/day1.csv?sig=s")
        .with_exact_size(2048);
    let result = client.ingest_from_blob(blob, &props()).await.unwrap();

    assert!(storage.uploads().is_empty());
    let posts = storage.posts();
    assert_eq!(posts.len(), 1);
    let message: serde_json::Value = serde_json::from_str(&posts[0].message).unwrap();
    assert_eq!(message["rawDataSize"], 2048);
    assert_eq!(
        message["blobPath"],
        "https://ext.blob.example.net/data/day1.csv?sig=s"
    );
    match result.outcome {
        IngestionOutcome::Queued { blob_path } => {
            assert_eq!(blob_path, "https://ext.blob.example.net/data/day1.csv");
        }
        other => panic!("expected Queued, got {other:?}"),
    }
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_ingest_from_file_reads_and_uploads() {
    let manager = manager_for(&["acca"]).await;
    let storage = Arc::new(MockStorageClient::new());
    let client = QueuedIngestClient::new(manager.clone(), storage.clone(), 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.csv");
    std::fs::write(&path, b"a,b\n1,2\n").unwrap();

    let result = client
        .ingest_from_file(ingest_broker::source::FileSource::new(&path), &props())
        .await
        .unwrap();

    assert!(matches!(result.outcome, IngestionOutcome::Queued { .. }));
    let uploads = storage.uploads();
    assert_eq!(uploads[0].payload.as_ref(), b"a,b\n1,2\n");
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_file_is_a_source_error() {
    let manager = manager_for(&["acca"]).await;
    let storage = Arc::new(MockStorageClient::new());
    let client = QueuedIngestClient::new(manager.clone(), storage.clone(), 3);

    let err = client
        .ingest_from_file(
            ingest_broker::source::FileSource::new("/no/such/file.csv"),
            &props(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Source(_)));
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejects_invalid_properties() {
    let manager = manager_for(&["acca"]).await;
    let storage = Arc::new(MockStorageClient::new());
    let client = QueuedIngestClient::new(manager.clone(), storage.clone(), 3);

    let bad = IngestionProperties::new("", "events", DataFormat::Csv);
    let source = StreamSource::from_bytes(Bytes::from_static(b"a,b\n"));
    let err = client.ingest_from_stream(source, &bad).await.unwrap_err();
    assert!(matches!(err, IngestError::Config(_)));
    assert!(storage.uploads().is_empty());
    manager.close().await;
}
