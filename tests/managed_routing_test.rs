//! End-to-end routing behavior of the managed streaming client.

use bytes::Bytes;
use ingest_broker::client::{IngestClient, IngestionOutcome, ManagedStreamingIngestClient};
use ingest_broker::config::BrokerConfig;
use ingest_broker::error::{BackendError, IngestError};
use ingest_broker::manager::ResourceManager;
use ingest_broker::mocks::{MockManagementClient, MockStorageClient, MockStreamingBackend};
use ingest_broker::policy::{QueuingPolicy, MAX_STREAMING_SIZE};
use ingest_broker::retry::ExponentialRetry;
use ingest_broker::source::{BlobSource, DataFormat, FileSource, IngestionProperties, StreamSource};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    manager: Arc<ResourceManager>,
    storage: Arc<MockStorageClient>,
    streaming: Arc<MockStreamingBackend>,
    client: ManagedStreamingIngestClient,
}

async fn harness() -> Harness {
    let mgmt = Arc::new(MockManagementClient::new());
    mgmt.enqueue_resources(Ok(MockManagementClient::listing_for_accounts(&[
        "acca", "accb",
    ])));
    mgmt.enqueue_token(Ok(MockManagementClient::token_result("tok-1")));

    let config = BrokerConfig::builder()
        .streaming_retry(ExponentialRetry {
            attempts: 3,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        })
        .build()
        .unwrap();

    let manager = Arc::new(ResourceManager::start(mgmt, &config));
    manager
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();

    let storage = Arc::new(MockStorageClient::new());
    let streaming = Arc::new(MockStreamingBackend::new());
    let client = ManagedStreamingIngestClient::new(
        manager.clone(),
        storage.clone(),
        streaming.clone(),
        &config,
    );
    Harness {
        manager,
        storage,
        streaming,
        client,
    }
}

fn props() -> IngestionProperties {
    IngestionProperties::new("telemetry", "events", DataFormat::Csv)
}

#[tokio::test(start_paused = true)]
async fn test_small_payload_streams_on_first_attempt() {
    let h = harness().await;
    let payload = Bytes::from_static(b"a,b\n1,2\n");
    let result = h
        .client
        .ingest_from_stream(StreamSource::from_bytes(payload.clone()), &props())
        .await
        .unwrap();

    assert_eq!(result.outcome, IngestionOutcome::Streamed { attempts: 1 });
    let calls = h.streaming.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload.as_deref(), Some(payload.as_ref()));
    assert_eq!(calls[0].database, "telemetry");
    assert!(h.storage.uploads().is_empty());
    assert!(h.storage.posts().is_empty());
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_oversize_payload_goes_straight_to_queue() {
    let h = harness().await;
    // Uncompressed CSV over the 4MB threshold.
    let payload = Bytes::from(vec![b'x'; 5 * 1024 * 1024]);
    let result = h
        .client
        .ingest_from_stream(StreamSource::from_bytes(payload.clone()), &props())
        .await
        .unwrap();

    assert!(matches!(result.outcome, IngestionOutcome::Queued { .. }));
    assert!(h.streaming.calls().is_empty());
    let uploads = h.storage.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].payload, payload);
    assert_eq!(h.storage.posts().len(), 1);
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_with_backoff_then_succeed() {
    let h = harness().await;
    h.streaming.enqueue_transient_failures(2);

    let payload = Bytes::from_static(b"a,b\n1,2\n");
    let start = tokio::time::Instant::now();
    let result = h
        .client
        .ingest_from_stream(StreamSource::from_bytes(payload.clone()), &props())
        .await
        .unwrap();

    assert_eq!(result.outcome, IngestionOutcome::Streamed { attempts: 3 });
    // 100ms after the first failure, 200ms after the second.
    assert_eq!(start.elapsed(), Duration::from_millis(300));

    let calls = h.streaming.calls();
    assert_eq!(calls.len(), 3);
    // Every attempt replays the identical bytes.
    for call in &calls {
        assert_eq!(call.payload.as_deref(), Some(payload.as_ref()));
    }
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_attempts_fall_back_to_queue_byte_identical() {
    let h = harness().await;
    h.streaming.enqueue_transient_failures(3);

    let payload = Bytes::from_static(b"a,b\n1,2\n3,4\n");
    let result = h
        .client
        .ingest_from_stream(StreamSource::from_bytes(payload.clone()), &props())
        .await
        .unwrap();

    assert!(matches!(result.outcome, IngestionOutcome::Queued { .. }));
    assert_eq!(h.streaming.calls().len(), 3);
    let uploads = h.storage.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].payload, payload);
    assert_eq!(h.storage.posts().len(), 1);
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_propagates_without_fallback() {
    let h = harness().await;
    h.streaming.enqueue(Err(BackendError::Permanent {
        code: Some("BadRequest".to_string()),
        message: "malformed payload".to_string(),
    }));

    let err = h
        .client
        .ingest_from_stream(StreamSource::from_bytes(Bytes::from_static(b"oops")), &props())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Backend(_)));
    assert!(err.is_permanent());
    assert_eq!(h.streaming.calls().len(), 1);
    assert!(h.storage.uploads().is_empty());
    assert!(h.storage.posts().is_empty());
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_size_stream_over_ceiling_is_queued_intact() {
    let h = harness().await;
    let payload = Bytes::from(vec![b'y'; (MAX_STREAMING_SIZE + 7) as usize]);
    let source = StreamSource::new(std::io::Cursor::new(payload.clone()));

    let result = h.client.ingest_from_stream(source, &props()).await.unwrap();

    assert!(matches!(result.outcome, IngestionOutcome::Queued { .. }));
    assert!(h.streaming.calls().is_empty());
    let uploads = h.storage.uploads();
    assert_eq!(uploads.len(), 1);
    // The buffered prefix and the stream remainder were re-stitched.
    assert_eq!(uploads[0].payload, payload);
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_request_ids_carry_source_and_attempt() {
    let h = harness().await;
    h.streaming.enqueue_transient_failures(1);

    let source_id = uuid::Uuid::new_v4();
    let source = StreamSource::from_bytes(Bytes::from_static(b"a,b\n"))
        .with_source_id(source_id);
    h.client.ingest_from_stream(source, &props()).await.unwrap();

    let calls = h.streaming.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0].client_request_id,
        format!("RIC.ingest_from_stream;{source_id};1")
    );
    assert_eq!(
        calls[1].client_request_id,
        format!("RIC.ingest_from_stream;{source_id};2")
    );
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_small_blob_streams_and_falls_back_when_exhausted() {
    let h = harness().await;
    h.streaming.enqueue_transient_failures(3);

    let blob = BlobSource::new("https://acca.blob.example.net/temp/b1?sig=s")
        .with_exact_size(1024);
    let result = h.client.ingest_from_blob(blob, &props()).await.unwrap();

    match result.outcome {
        IngestionOutcome::Queued { blob_path } => {
            // The credential never leaks into the outcome.
            assert_eq!(blob_path, "https://acca.blob.example.net/temp/b1");
        }
        other => panic!("expected Queued, got {other:?}"),
    }
    assert_eq!(h.streaming.calls().len(), 3);
    // Enqueued in place, no second upload.
    assert!(h.storage.uploads().is_empty());
    assert_eq!(h.storage.posts().len(), 1);
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_large_blob_is_enqueued_without_streaming() {
    let h = harness().await;
    let blob = BlobSource::new("https://acca.blob.example.net/temp/big?sig=s")
        .with_exact_size(64 * 1024 * 1024);
    let result = h.client.ingest_from_blob(blob, &props()).await.unwrap();

    assert!(matches!(result.outcome, IngestionOutcome::Queued { .. }));
    assert!(h.streaming.calls().is_empty());
    assert_eq!(h.storage.posts().len(), 1);
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_policy_factor_widens_the_direct_path() {
    let mgmt = Arc::new(MockManagementClient::new());
    mgmt.enqueue_resources(Ok(MockManagementClient::listing_for_accounts(&["acca"])));
    mgmt.enqueue_token(Ok(MockManagementClient::token_result("tok-1")));

    // A factor of 2 doubles the threshold, letting a 5MB CSV stream.
    let config = BrokerConfig::builder()
        .queuing_policy(QueuingPolicy::with_factor(2.0))
        .build()
        .unwrap();
    let manager = Arc::new(ResourceManager::start(mgmt, &config));
    manager
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap();

    let storage = Arc::new(MockStorageClient::new());
    let streaming = Arc::new(MockStreamingBackend::new());
    let client =
        ManagedStreamingIngestClient::new(manager.clone(), storage.clone(), streaming.clone(), &config);

    let payload = Bytes::from(vec![b'x'; 5 * 1024 * 1024]);
    let result = client
        .ingest_from_stream(StreamSource::from_bytes(payload), &props())
        .await
        .unwrap();

    assert_eq!(result.outcome, IngestionOutcome::Streamed { attempts: 1 });
    assert!(storage.uploads().is_empty());
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_declared_file_size_skips_streaming_and_carries_into_the_message() {
    let h = harness().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.csv.gz");
    std::fs::write(&path, [0x1f, 0x8b, 0x08, 0x00, 0x01, 0x02]).unwrap();

    // A tiny gzip file declared to hold 64MB of raw data never gets a
    // streaming attempt.
    let source = FileSource::new(&path).with_raw_size(64 * 1024 * 1024);
    let result = h.client.ingest_from_file(source, &props()).await.unwrap();

    assert!(matches!(result.outcome, IngestionOutcome::Queued { .. }));
    assert!(h.streaming.calls().is_empty());
    let uploads = h.storage.uploads();
    assert_eq!(uploads.len(), 1);
    // Already gzipped, not recompressed in transit.
    assert!(!uploads[0].compress);

    let posts = h.storage.posts();
    let message: serde_json::Value = serde_json::from_str(&posts[0].message).unwrap();
    assert_eq!(message["rawDataSize"], 64u64 * 1024 * 1024);
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_file_metadata_size_routes_to_queue_without_streaming() {
    let h = harness().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.csv");
    // 5MB of uncompressed CSV on disk, no declared size.
    std::fs::write(&path, vec![b'x'; 5 * 1024 * 1024]).unwrap();

    let result = h
        .client
        .ingest_from_file(FileSource::new(&path), &props())
        .await
        .unwrap();

    assert!(matches!(result.outcome, IngestionOutcome::Queued { .. }));
    assert!(h.streaming.calls().is_empty());
    assert_eq!(h.storage.uploads().len(), 1);
    h.manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_undeclared_gzip_stream_is_sniffed_before_routing() {
    let h = harness().await;
    // 512KB that opens with the gzip magic bytes but carries no declared
    // compression. Uncompressed CSV of this size would stream; recognized
    // as gzip it estimates past the threshold and queues.
    let mut bytes = vec![b'x'; 512 * 1024];
    bytes[0] = 0x1f;
    bytes[1] = 0x8b;
    let payload = Bytes::from(bytes);

    let result = h
        .client
        .ingest_from_stream(
            StreamSource::new(std::io::Cursor::new(payload.clone())),
            &props(),
        )
        .await
        .unwrap();

    assert!(matches!(result.outcome, IngestionOutcome::Queued { .. }));
    assert!(h.streaming.calls().is_empty());
    let uploads = h.storage.uploads();
    assert_eq!(uploads.len(), 1);
    assert!(!uploads[0].compress);
    assert!(uploads[0].blob_name.ends_with(".csv.gz"));
    assert_eq!(uploads[0].payload, payload);
    h.manager.close().await;
}
