use std::time::Duration;

use cardstream_core::wire::{ClassifiedPayload, RequestItem};
use cardstream_services::{CompletedResponse, SessionError};

use crate::*;

fn named(name: &str) -> RequestItem {
    RequestItem::Named(name.to_string())
}

/// Five streams, two of which never get an answer, then the server goes
/// away. The batch must fail instead of hanging.
#[tokio::test]
async fn server_shutdown_with_streams_pending_fails_the_batch() {
    let server = TestServer::start(slow_catalog(), 100).await.unwrap();
    let client = server.client().await.unwrap();

    let items = vec![
        named("Counterspell"),
        named("Slow Card"),
        named("Lightning Bolt"),
        named("Slower Card"),
        named("Nonexistent Card XYZ"),
    ];
    let mut sink: Vec<CompletedResponse> = Vec::new();

    let batch = client.run_batch(items, &mut sink);
    let shutdown = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        server.stop().await;
    };
    let (result, ()) = tokio::time::timeout(PROMPTLY, async { tokio::join!(batch, shutdown) })
        .await
        .expect("batch must resolve once the connection is gone");

    assert!(
        matches!(result, Err(SessionError::ConnectionClosed(_))),
        "unexpected result {result:?}"
    );
    assert!(sink.len() <= 3);
    assert!(sink
        .iter()
        .all(|r| r.request != named("Slow Card") && r.request != named("Slower Card")));
}

#[tokio::test]
async fn batch_deadline_aborts_and_closes_the_connection() {
    let server = TestServer::start(slow_catalog(), 100).await.unwrap();
    let mut settings = server.settings();
    settings.batch_timeout_secs = 1;
    let client = server.client_with(settings).await.unwrap();

    let mut sink: Vec<CompletedResponse> = Vec::new();
    let result = tokio::time::timeout(
        PROMPTLY,
        client.run_batch(vec![named("Counterspell"), named("Slow Card")], &mut sink),
    )
    .await
    .expect("deadline must fire");

    assert_eq!(result, Err(SessionError::DeadlineExceeded(Duration::from_secs(1))));
    assert!(sink.len() <= 1);

    // The connection was torn down with the batch.
    let mut later: Vec<CompletedResponse> = Vec::new();
    let second = tokio::time::timeout(PROMPTLY, client.run_batch(vec![named("Counterspell")], &mut later))
        .await
        .expect("second batch must not hang");
    assert!(second.is_err());

    server.stop().await;
}

#[tokio::test]
async fn stream_exhaustion_fails_the_batch() {
    let server = TestServer::start(slow_catalog(), 2).await.unwrap();
    let mut settings = server.settings();
    settings.stream_open_timeout_ms = 300;
    let client = server.client_with(settings).await.unwrap();

    let items = vec![named("Slow Card"), named("Slower Card"), named("Counterspell")];
    let mut sink: Vec<CompletedResponse> = Vec::new();
    let result = tokio::time::timeout(PROMPTLY, client.run_batch(items, &mut sink))
        .await
        .expect("allocation failure must surface");

    assert!(
        matches!(result, Err(SessionError::ResourceExhausted(_))),
        "unexpected result {result:?}"
    );
    assert!(sink.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn upstream_failure_is_contained_to_its_stream() {
    let server = TestServer::start(catalog(), 100).await.unwrap();
    let client = server.client().await.unwrap();

    let mut sink: Vec<CompletedResponse> = Vec::new();
    let report = tokio::time::timeout(
        PROMPTLY,
        client.run_batch(vec![named("Broken Card"), named("Lightning Bolt")], &mut sink),
    )
    .await
    .expect("batch should finish")
    .unwrap();
    assert_eq!(report.responses, 2);

    for response in &sink {
        match (&response.request, &response.outcome) {
            (RequestItem::Named(name), Ok(ClassifiedPayload::ErrorText(text))) if name == "Broken Card" => {
                assert!(text.starts_with("Failed to fetch image for 'Broken Card'"), "{text}")
            }
            (RequestItem::Named(name), Ok(ClassifiedPayload::SingleImage(_))) if name == "Lightning Bolt" => {}
            other => panic!("unexpected response {other:?}"),
        }
    }

    client.close().await;
    server.stop().await;
}
