use serde_json::Value;

use chatline_shared::{UserId, UserProfile};

use super::{ids, TestServer};

#[tokio::test]
async fn health_needs_no_credentials() {
    let server = TestServer::start().await;
    let body: Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "chatline");
}

#[tokio::test]
async fn api_rejects_missing_or_invalid_tokens_uniformly() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let ghost = server.token("ghost");
    for token in [None, Some("garbage"), Some(ghost.as_str())] {
        let mut request = client.get(server.url("/api/messages/users"));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        assert_eq!(response.status().as_u16(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "authentication failed");
    }
}

#[tokio::test]
async fn user_list_excludes_caller() {
    let server = TestServer::start().await;
    let users: Vec<UserProfile> = reqwest::Client::new()
        .get(server.url("/api/messages/users"))
        .bearer_auth(server.token("alice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<_> = users.into_iter().map(|u| u.id).collect();
    assert_eq!(names, ids(&["bob", "carol"]));
}

#[tokio::test]
async fn history_is_ordered_and_covers_both_directions() {
    let server = TestServer::start().await;
    server.send("alice", "bob", "one").await;
    server.send("bob", "alice", "two").await;
    server.send("alice", "carol", "elsewhere").await;
    server.send("alice", "bob", "three").await;

    let texts: Vec<_> = server
        .history("bob", "alice")
        .await
        .into_iter()
        .filter_map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn invalid_sends_are_client_errors() {
    let server = TestServer::start().await;

    let empty = server.send("alice", "bob", "   ").await;
    assert_eq!(empty.status().as_u16(), 400);

    let unknown = server.send("alice", "nobody", "hi").await;
    assert_eq!(unknown.status().as_u16(), 400);

    let bad_image = reqwest::Client::new()
        .post(server.url("/api/messages/send/bob"))
        .bearer_auth(server.token("alice"))
        .json(&serde_json::json!({ "image": "https://example.com/cat.png" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_image.status().as_u16(), 400);

    assert_eq!(server.store.message_count().await, 0);
}

#[tokio::test]
async fn presence_endpoint_reports_online_set() {
    let server = TestServer::start().await;
    let _bob = server.connect_online("bob").await;

    let online: Vec<UserId> = reqwest::Client::new()
        .get(server.url("/api/presence"))
        .bearer_auth(server.token("alice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(online, ids(&["bob"]));
}
