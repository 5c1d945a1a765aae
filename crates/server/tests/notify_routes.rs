// HTTP routes exercised in-process with tower::ServiceExt::oneshot.
//
// WebSocket behaviour needs a real socket and lives in relay.rs.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use contested_server::{notify::NotifyResponse, router, AppState, StaticTokens};
use contested_shared::{InboundMessage, ProblemDetails};
use serde_json::json;
use tower::ServiceExt;

fn state() -> AppState {
    AppState::new(Arc::new(StaticTokens::default()), 16)
}

fn notify_request(body: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/notify")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("x-contested-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn problem(resp: axum::response::Response) -> ProblemDetails {
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn notify_publishes_on_the_user_channel() {
    let state = state();
    let mut rx = state.channels.subscribe("user:42").await;

    let body = json!({"user_id": "42", "payload": {"kind": "offer", "id": 9}}).to_string();
    let resp = router(state.clone())
        .oneshot(notify_request(&body, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let summary: NotifyResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(summary.channel, "user:42");
    assert_eq!(summary.delivered, 1);

    let frame = rx.recv().await.unwrap();
    let message = InboundMessage::decode(&frame).unwrap();
    assert_eq!(message.message_type, "notification");
    assert_eq!(message.channel(), Some("user:42"));
    assert_eq!(message.payload["payload"]["kind"], "offer");
}

#[tokio::test]
async fn notify_without_subscribers_delivers_nothing() {
    let body = json!({"user_id": "7", "payload": null}).to_string();
    let resp = router(state())
        .oneshot(notify_request(&body, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let summary: NotifyResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(summary.delivered, 0);
}

#[tokio::test]
async fn notify_requires_the_configured_key() {
    let app = router(state().with_notify_key("s3cret"));
    let body = json!({"user_id": "42", "payload": {}}).to_string();

    let resp = app
        .clone()
        .oneshot(notify_request(&body, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(problem(resp).await.status, 401);

    let resp = app
        .clone()
        .oneshot(notify_request(&body, Some("wrong")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(notify_request(&body, Some("s3cret")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn malformed_notify_bodies_are_problem_details() {
    let resp = router(state())
        .oneshot(notify_request("{not json", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(problem(resp).await.detail.is_some());

    let body = json!({"user_id": "  ", "payload": {}}).to_string();
    let resp = router(state())
        .oneshot(notify_request(&body, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        problem(resp).await.detail.as_deref(),
        Some("user_id must not be empty")
    );
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let resp = router(state())
        .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(problem(resp).await.title, "Not Found");
}

#[tokio::test]
async fn ws_route_requires_an_upgrade() {
    let resp = router(state())
        .oneshot(Request::builder().uri("/api/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();
    // No hyper upgrade extension in oneshot requests, so the extractor rejects.
    assert!(resp.status().is_client_error());
    assert_ne!(resp.status(), StatusCode::NOT_FOUND);
}
