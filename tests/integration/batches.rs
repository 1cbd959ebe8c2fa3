use cardstream_core::wire::{ClassifiedPayload, RequestItem, DUAL_IMAGE_LEN, REQUEST_TOO_LARGE_CODE};
use cardstream_services::{insecure_client_config, CompletedResponse};
use quinn::{VarInt, WriteError};

use crate::*;

fn named(name: &str) -> RequestItem {
    RequestItem::Named(name.to_string())
}

fn response_for<'a>(sink: &'a [CompletedResponse], request: &RequestItem) -> &'a CompletedResponse {
    sink.iter()
        .find(|r| &r.request == request)
        .unwrap_or_else(|| panic!("no response for {request}"))
}

#[tokio::test]
async fn mixed_batch_is_attributed_per_request() {
    let server = TestServer::start(catalog(), 100).await.unwrap();
    let client = server.client().await.unwrap();

    let items = vec![
        named("Counterspell"),
        named("Huntmaster of the Fells"),
        named("Nonexistent Card XYZ"),
        RequestItem::Random,
    ];
    let mut sink: Vec<CompletedResponse> = Vec::new();
    let report = tokio::time::timeout(PROMPTLY, client.run_batch(items, &mut sink))
        .await
        .expect("batch should finish")
        .unwrap();

    assert_eq!(report.responses, 4);
    assert_eq!(sink.len(), 4);

    match &response_for(&sink, &named("Counterspell")).outcome {
        Ok(ClassifiedPayload::SingleImage(face)) => assert!(face.iter().all(|b| *b == b'c')),
        other => panic!("expected a single image, got {other:?}"),
    }

    match &response_for(&sink, &named("Huntmaster of the Fells")).outcome {
        Ok(ClassifiedPayload::DualImage { front, back }) => {
            assert_eq!(front.len() + back.len(), DUAL_IMAGE_LEN);
            assert!(front.iter().all(|b| *b == b'f'));
            assert!(back.iter().all(|b| *b == b'b'));
        }
        other => panic!("expected a dual image, got {other:?}"),
    }

    assert_eq!(
        response_for(&sink, &named("Nonexistent Card XYZ")).outcome,
        Ok(ClassifiedPayload::ErrorText(
            "No card by the name 'Nonexistent Card XYZ' found...".into()
        ))
    );

    // The random draw may land on the broken entry, so it only has to be
    // answered.
    assert!(sink.iter().any(|r| r.request == RequestItem::Random));

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn random_draws_are_images() {
    let entries = vec![
        CatalogEntry::single("Counterspell", "c-counterspell"),
        CatalogEntry::double("Huntmaster of the Fells", "f-huntmaster", "b-ravager"),
    ];
    let server = TestServer::start(entries, 100).await.unwrap();
    let client = server.client().await.unwrap();

    let mut sink: Vec<CompletedResponse> = Vec::new();
    let report = tokio::time::timeout(
        PROMPTLY,
        client.run_batch(vec![RequestItem::Random; 8], &mut sink),
    )
    .await
    .expect("batch should finish")
    .unwrap();

    assert_eq!(report.responses, 8);
    let mut streams: Vec<u64> = sink.iter().map(|r| r.stream).collect();
    streams.sort_unstable();
    streams.dedup();
    assert_eq!(streams.len(), 8, "every request gets its own stream");
    assert!(sink
        .iter()
        .all(|r| matches!(&r.outcome, Ok(payload) if payload.is_image())));

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn empty_batch_resolves_immediately() {
    let server = TestServer::start(catalog(), 100).await.unwrap();
    let client = server.client().await.unwrap();

    let mut sink: Vec<CompletedResponse> = Vec::new();
    let report = tokio::time::timeout(PROMPTLY, client.run_batch(Vec::new(), &mut sink))
        .await
        .expect("empty batch must not wait")
        .unwrap();
    assert_eq!(report.responses, 0);
    assert!(sink.is_empty());

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn connection_serves_consecutive_batches() {
    let server = TestServer::start(catalog(), 100).await.unwrap();
    let client = server.client().await.unwrap();

    for name in ["Lightning Bolt", "Counterspell"] {
        let mut sink: Vec<CompletedResponse> = Vec::new();
        let report = tokio::time::timeout(PROMPTLY, client.run_batch(vec![named(name)], &mut sink))
            .await
            .expect("batch should finish")
            .unwrap();
        assert_eq!(report.responses, 1);
        assert!(matches!(
            sink[0].outcome,
            Ok(ClassifiedPayload::SingleImage(_))
        ));
    }

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn oversized_request_gets_error_text() {
    let server = TestServer::start(catalog(), 100).await.unwrap();
    let client = server.client().await.unwrap();

    let mut sink: Vec<CompletedResponse> = Vec::new();
    let huge = named(&"x".repeat(MAX_REQUEST_BYTES * 2));
    tokio::time::timeout(PROMPTLY, client.run_batch(vec![huge], &mut sink))
        .await
        .expect("batch should finish")
        .unwrap();

    assert_eq!(
        sink[0].outcome,
        Ok(ClassifiedPayload::ErrorText(format!(
            "Request exceeds {MAX_REQUEST_BYTES} bytes"
        )))
    );

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn request_far_past_the_limit_still_gets_error_text() {
    let server = TestServer::start(catalog(), 100).await.unwrap();
    let client = server.client().await.unwrap();

    let mut sink: Vec<CompletedResponse> = Vec::new();
    let huge = named(&"x".repeat(4 * 1024 * 1024));
    let report = tokio::time::timeout(PROMPTLY, client.run_batch(vec![huge], &mut sink))
        .await
        .expect("batch should finish")
        .unwrap();

    assert_eq!(report.responses, 1);
    assert_eq!(
        sink[0].outcome,
        Ok(ClassifiedPayload::ErrorText(format!(
            "Request exceeds {MAX_REQUEST_BYTES} bytes"
        )))
    );

    client.close().await;
    server.stop().await;
}

/// A peer that never finishes its request is told to stop sending once the
/// limit is crossed, and still receives the error response.
#[tokio::test]
async fn server_stops_reading_past_the_limit() {
    let server = TestServer::start(catalog(), 100).await.unwrap();
    let mut endpoint = quinn::Endpoint::client("127.0.0.1:0".parse().unwrap()).unwrap();
    endpoint.set_default_client_config(insecure_client_config().unwrap());
    let connection = endpoint.connect(server.addr, "localhost").unwrap().await.unwrap();
    let (mut send, mut recv) = connection.open_bi().await.unwrap();

    let chunk = vec![b'x'; 64 * 1024];
    let stopped = tokio::time::timeout(PROMPTLY, async {
        loop {
            if let Err(e) = send.write_all(&chunk).await {
                return e;
            }
        }
    })
    .await
    .expect("server must stop the request stream");
    assert!(
        matches!(stopped, WriteError::Stopped(code) if code == VarInt::from_u32(REQUEST_TOO_LARGE_CODE)),
        "unexpected write error {stopped:?}"
    );

    let response = tokio::time::timeout(PROMPTLY, recv.read_to_end(usize::MAX))
        .await
        .expect("response should arrive")
        .unwrap();
    assert!(response.starts_with(format!("Request exceeds {MAX_REQUEST_BYTES} bytes").as_bytes()));

    connection.close(VarInt::from_u32(0), b"done");
    endpoint.wait_idle().await;
    server.stop().await;
}
