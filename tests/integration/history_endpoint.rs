// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! `GET /messages/{counterpart_id}` and `/health` over real HTTP.

use std::sync::Arc;

use reqwest::StatusCode;
use wingchat_proto::Identity;
use wingchat_proto::message::Message;
use wingchat_server::http::IDENTITY_HEADER;
use wingchat_server::server::{ServerState, start_server_with_state};

async fn start() -> (String, Arc<ServerState>) {
    let state = Arc::new(ServerState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn history_requires_identity_header() {
    let (base, _state) = start().await;
    let client = reqwest::Client::new();

    let missing = client.get(format!("{base}/messages/bob")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let blank = client
        .get(format!("{base}/messages/bob"))
        .header(IDENTITY_HEADER, " ")
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = blank.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn history_is_ascending_and_scoped_to_the_pair() {
    let (base, state) = start().await;
    let alice = Identity::new("alice");
    let bob = Identity::new("bob");
    let carol = Identity::new("carol");
    state.conversations.append(&alice, &bob, "first");
    state.conversations.append(&carol, &bob, "elsewhere");
    state.conversations.append(&bob, &alice, "second");

    let response = reqwest::Client::new()
        .get(format!("{base}/messages/alice"))
        .header(IDENTITY_HEADER, "bob")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let history: Vec<Message> = response.json().await.unwrap();
    let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["first", "second"]);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn unknown_conversation_is_empty() {
    let (base, _state) = start().await;
    let history: Vec<Message> = reqwest::Client::new()
        .get(format!("{base}/messages/nobody"))
        .header(IDENTITY_HEADER, "bob")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn health_answers_ok() {
    let (base, _state) = start().await;
    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}
