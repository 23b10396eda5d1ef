//! Tests for the mail provider HTTP client.
//!
//! Uses a local wiremock server to exercise acceptance, rejection, timeout,
//! and connection-failure categorization without touching a real provider.

use std::{sync::Arc, time::Duration};

use courier_core::MailPayload;
use courier_delivery::{
    error::DeliveryError,
    store::{mem::MemoryQueueStore, QueueStore},
    ClientConfig, EnqueueOptions, Enqueuer, MailApiClient, Processor,
};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn payload() -> MailPayload {
    let mut payload = MailPayload::plain(
        "Activate your account",
        "<p>yay!</p>",
        "sender@example.com",
        "user@example.com",
    );
    payload.cc = vec!["cc@example.com".to_string()];
    payload
}

#[tokio::test]
async fn accepted_submission_returns_receipt_with_provider_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(serde_json::json!({
            "subject": "Activate your account",
            "from": ["sender@example.com"],
            "to": ["user@example.com"],
            "cc": ["cc@example.com"],
            "content_type": "text/plain",
            "charset": "UTF-8",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "msg-42"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = MailApiClient::new(ClientConfig::new(format!("{}/messages", server.uri()))).unwrap();

    let receipt = client.submit(&payload()).await.expect("submission should be accepted");
    assert_eq!(receipt.provider_id.as_deref(), Some("msg-42"));

    server.verify().await;
}

#[tokio::test]
async fn missing_provider_id_is_tolerated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let client = MailApiClient::new(ClientConfig::new(format!("{}/messages", server.uri()))).unwrap();

    let receipt = client.submit(&payload()).await.expect("2xx without a body is still accepted");
    assert_eq!(receipt.provider_id, None);
}

#[tokio::test]
async fn api_token_is_sent_as_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config =
        ClientConfig::new(format!("{}/messages", server.uri())).with_api_token("secret-token");
    let client = MailApiClient::new(config).unwrap();

    client.submit(&payload()).await.expect("authenticated submission should be accepted");

    server.verify().await;
}

#[tokio::test]
async fn provider_rejection_maps_to_rejected_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(550).set_body_string("mailbox unavailable"))
        .mount(&server)
        .await;

    let client = MailApiClient::new(ClientConfig::new(format!("{}/messages", server.uri()))).unwrap();

    let error = client.submit(&payload()).await.expect_err("5xx must be a rejection");
    match error {
        DeliveryError::Rejected { status_code, body } => {
            assert_eq!(status_code, 550);
            assert_eq!(body, "mailbox unavailable");
        },
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_provider_maps_to_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut config = ClientConfig::new(format!("{}/messages", server.uri()));
    config.timeout = Duration::from_millis(50);
    let client = MailApiClient::new(config).unwrap();

    let error = client.submit(&payload()).await.expect_err("request must time out");
    assert!(matches!(error, DeliveryError::Timeout { .. }));
}

#[tokio::test]
async fn unreachable_provider_maps_to_network_error() {
    // Nothing listens on port 1.
    let client = MailApiClient::new(ClientConfig::new("http://127.0.0.1:1/messages")).unwrap();

    let error = client.submit(&payload()).await.expect_err("connection must fail");
    assert!(matches!(error, DeliveryError::Network { .. }));
}

#[tokio::test]
async fn rejected_submission_releases_message_for_retry() {
    // End to end: processor + real HTTP client + failing provider.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryQueueStore::new());
    let enqueuer = Enqueuer::new(store.clone());
    let stored = enqueuer.enqueue(payload(), EnqueueOptions::default()).await.unwrap();

    let client = Arc::new(
        MailApiClient::new(ClientConfig::new(format!("{}/messages", server.uri()))).unwrap(),
    );
    let processor = Processor::new(store.clone(), client);

    let outcome = processor.process_batch(100).await.unwrap();
    assert_eq!(outcome.requeued, 1);

    let after = store.find(stored.id).await.unwrap().unwrap();
    assert_eq!(after.attempts, 1);
    assert!(!after.locked);

    server.verify().await;
}
