use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use bytes::Bytes;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::router;
use crate::broker::memory::MemoryBroker;
use crate::broker::open_sender;
use crate::client::Publisher;
use crate::config::{BrokerSettings, ConnectionDescriptor};

async fn setup() -> (MemoryBroker, Router) {
    let settings = BrokerSettings::new(
        ConnectionDescriptor::new("localhost", "tester", "secret"),
        "orders",
        "worker-a",
    );
    let broker = MemoryBroker::new();
    broker.provision(&settings);
    let publisher = Publisher::new(open_sender(&broker, &settings).await.unwrap());
    (broker, router(Arc::new(publisher)))
}

async fn post(app: &Router, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/publish")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_publish_valid_message() {
    let (broker, app) = setup().await;

    let (status, body) = post(&app, r#"{"message":"hello"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "Message published" }));
    assert_eq!(broker.sent("orders"), vec![Bytes::from_static(b"hello")]);
}

#[tokio::test]
async fn test_payload_is_forwarded_verbatim() {
    let (broker, app) = setup().await;
    let message = "naïve \"quoted\" {json} ✓";

    let (status, _) = post(&app, &json!({ "message": message }).to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(broker.sent("orders"), vec![Bytes::from(message.as_bytes().to_vec())]);
}

#[tokio::test]
async fn test_extra_fields_are_ignored() {
    let (broker, app) = setup().await;

    let (status, _) = post(&app, r#"{"message":"hi","priority":3}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(broker.sent("orders").len(), 1);
}

#[tokio::test]
async fn test_malformed_bodies_are_rejected_without_sending() {
    let (broker, app) = setup().await;

    for body in [r#"{"bogus":"x"}"#, "not json", r#"{"message":5}"#, ""] {
        let (status, reply) = post(&app, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert_eq!(reply, json!({ "error": "Invalid request format" }));
    }
    assert!(broker.sent("orders").is_empty());
}

#[tokio::test]
async fn test_missing_content_type_is_rejected() {
    let (broker, app) = setup().await;
    let request = Request::builder()
        .method("POST")
        .uri("/publish")
        .body(Body::from(r#"{"message":"hello"}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(broker.sent("orders").is_empty());
}

#[tokio::test]
async fn test_send_failure_maps_to_500_and_keeps_serving() {
    let (broker, app) = setup().await;
    broker.update_faults(|f| f.sever_senders = true);

    let (status, body) = post(&app, r#"{"message":"hello"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to publish message" }));
    assert!(broker.sent("orders").is_empty());

    broker.update_faults(|f| f.sever_senders = false);
    let (status, _) = post(&app, r#"{"message":"recovered"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(broker.sent("orders"), vec![Bytes::from_static(b"recovered")]);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (_broker, app) = setup().await;
    let request = Request::builder()
        .method("POST")
        .uri("/nope")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
