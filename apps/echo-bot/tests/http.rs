use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use bot_builder::storage::shared_memory_storage;
use bot_builder::{CloudAdapter, ConfigurationBotFrameworkAuthentication};
use echo_bot::{AppState, EchoBot, build_router};
use serde_json::{Value, json};
use tower::ServiceExt;

fn router(app_id: &str, password: &str) -> axum::Router {
    let auth = ConfigurationBotFrameworkAuthentication::new(app_id, password);
    build_router(AppState {
        adapter: Arc::new(CloudAdapter::new(Arc::new(auth))),
        bot: Arc::new(EchoBot::new(shared_memory_storage())),
    })
}

fn post_activity(activity: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/messages")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(activity.to_string()))
        .unwrap()
}

fn activity(kind: &str) -> Value {
    json!({
        "type": kind,
        "id": "1",
        "channelId": "test",
        "serviceUrl": "https://test.com",
        "from": { "id": "user1" },
        "recipient": { "id": "bot" },
        "conversation": { "id": "c1" },
        "text": "hi"
    })
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_answers_ok() {
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = router("", "").oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn missing_authorization_is_rejected_when_credentials_are_set() {
    let resp = router("app-id", "secret")
        .oneshot(post_activity(activity("message")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expect_replies_returns_the_buffered_replies() {
    let mut message = activity("message");
    message["deliveryMode"] = json!("expectReplies");

    let resp = router("", "").oneshot(post_activity(message)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["activities"][0]["text"], "What is your name?");
}

#[tokio::test]
async fn unhandled_invokes_answer_not_implemented() {
    let mut invoke = activity("invoke");
    invoke["name"] = json!("custom/unknown");

    let resp = router("", "").oneshot(post_activity(invoke)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}
