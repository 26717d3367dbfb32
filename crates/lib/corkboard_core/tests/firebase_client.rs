//! Hosted client against a local HTTP stub.

use std::sync::Arc;
use std::time::Duration;

use corkboard_core::backend::CommentBackend;
use corkboard_core::backend::firebase::FirebaseClient;
use corkboard_core::board::Board;
use corkboard_core::config::ClientConfig;
use corkboard_core::models::NewComment;
use corkboard_core::storage::MemoryStore;
use serde_json::json;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        api_key: Some("test-key".into()),
        database_url: Some(server.uri()),
        auth_url: server.uri(),
        token_url: server.uri(),
        request_timeout: Duration::from_secs(5),
        list_retries: 1,
        ..ClientConfig::default()
    }
}

fn password_response(user_id: &str, email: &str, id_token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "localId": user_id,
        "email": email,
        "idToken": id_token,
        "refreshToken": format!("refresh-{user_id}"),
    }))
}

#[tokio::test]
async fn registering_another_account_keeps_the_signed_in_token() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/accounts:signInWithPassword"))
        .respond_with(password_response("uA", "a@x.com", "TOKEN_A"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/accounts:signUp"))
        .respond_with(password_response("uB", "b@x.com", "TOKEN_B"))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/users/uB.json"))
        .and(query_param("auth", "TOKEN_B"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "email": "b@x.com" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/comments/[^/]+\.json$"))
        .and(query_param("auth", "TOKEN_A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/comments.json"))
        .and(query_param("auth", "TOKEN_A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::Value::Null))
        .mount(&server)
        .await;

    let config = config(&server);
    let client = Arc::new(FirebaseClient::new(&config).unwrap());
    let board = Board::with_backend(client, Arc::new(MemoryStore::new()), &config);

    board.sign_in("a@x.com", "secret1").await.unwrap();
    let registered = board.register("b@x.com", "secret1").await.unwrap();
    assert_eq!(registered.user_id, "uB");
    assert_eq!(board.session().user_id(), Some("uA"));

    board.post("hello").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    for request in requests
        .iter()
        .filter(|r| r.url.path().starts_with("/comments"))
    {
        let query = request.url.query().unwrap_or_default();
        assert!(query.contains("auth=TOKEN_A"), "{}", request.url);
    }
}

#[tokio::test]
async fn create_is_conditional_and_accepts_an_existing_record() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/comments/[^/]+\.json$"))
        .and(header("if-match", "null_etag"))
        .respond_with(ResponseTemplate::new(412).set_body_json(json!({
            "authorUserId": "u1",
            "authorEmail": "a@x.com",
            "comment": "hello",
            "createdAt": 1_700_000_000_000_i64,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = FirebaseClient::new(&config(&server)).unwrap();
    client
        .put(&NewComment::new("u1", "hello", "a@x.com"))
        .await
        .unwrap();
}
