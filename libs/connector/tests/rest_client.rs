use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bot_connector::{
    ConnectorApi, ConnectorError, MicrosoftAppCredentials, RestConnectorClient,
    RestUserTokenClient, UserTokenApi,
};
use bot_schema::Activity;
use serde_json::{Value, json};
use tokio::net::TcpListener;

async fn send(Path(conversation): Path<String>, headers: HeaderMap, Json(activity): Json<Value>) -> impl IntoResponse {
    if conversation == "busy" {
        return (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "3")], "slow down").into_response();
    }
    let authorized = headers.contains_key(header::AUTHORIZATION);
    Json(json!({ "id": format!("{conversation}:{}:{authorized}", activity["text"].as_str().unwrap_or_default()) }))
        .into_response()
}

async fn reply(Path((conversation, activity_id)): Path<(String, String)>) -> Json<Value> {
    Json(json!({ "id": format!("{conversation}/{activity_id}") }))
}

async fn members() -> Json<Value> {
    Json(json!([{ "id": "user1", "name": "Ann" }, { "id": "bot" }]))
}

async fn spawn_channel_service() -> SocketAddr {
    let router = Router::new()
        .route("/v3/conversations/{conversation}/activities", post(send))
        .route("/v3/conversations/{conversation}/activities/{activity}", post(reply))
        .route("/v3/conversations/{conversation}/members", get(members))
        .route(
            "/api/usertoken/GetToken",
            get(|| async { StatusCode::NOT_FOUND }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn anonymous() -> Arc<MicrosoftAppCredentials> {
    Arc::new(MicrosoftAppCredentials::anonymous())
}

#[tokio::test]
async fn sends_and_replies_without_a_token_when_anonymous() {
    let addr = spawn_channel_service().await;
    let client =
        RestConnectorClient::new(reqwest::Client::new(), &format!("http://{addr}"), anonymous()).unwrap();

    let sent = client
        .send_to_conversation("conv 1", &Activity::message("hi"))
        .await
        .unwrap();
    assert_eq!(sent.id, "conv 1:hi:false");

    let replied = client
        .reply_to_activity("c1", "a1", &Activity::message("re"))
        .await
        .unwrap();
    assert_eq!(replied.id, "c1/a1");

    let members = client.get_conversation_members("c1").await.unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].name.as_deref(), Some("Ann"));
}

#[tokio::test]
async fn throttling_surfaces_status_and_retry_after() {
    let addr = spawn_channel_service().await;
    let client =
        RestConnectorClient::new(reqwest::Client::new(), &format!("http://{addr}/"), anonymous()).unwrap();

    let err = client
        .send_to_conversation("busy", &Activity::message("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Remote { .. }));
    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn missing_user_tokens_are_none() {
    let addr = spawn_channel_service().await;
    let client =
        RestUserTokenClient::new(reqwest::Client::new(), &format!("http://{addr}"), anonymous()).unwrap();

    let token = client
        .get_user_token("user1", "github", "test", None)
        .await
        .unwrap();
    assert!(token.is_none());
}
