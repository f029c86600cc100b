// ABOUTME: Tests for the Mattermost adapter against local HTTP and WebSocket stubs
// ABOUTME: Checks request paths, token handling, error messages and event forwarding

use futures_util::{SinkExt, StreamExt};
use mattermostd::mattermost::{websocket, MattermostClient};
use mattermostd_core::model::UserStatus;
use mattermostd_core::Backend;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
struct Recorded {
    request_line: String,
    headers: Vec<String>,
    body: String,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_lowercase());
        self.headers
            .iter()
            .find(|h| h.to_lowercase().starts_with(&prefix))
            .map(|h| h[prefix.len()..].trim().to_string())
    }
}

type Requests = Arc<Mutex<Vec<Recorded>>>;

fn response(status: &str, extra_headers: &[&str], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {}\r\nContent-Type: application/json\r\n", status);
    for header in extra_headers {
        out.push_str(header);
        out.push_str("\r\n");
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    out
}

/// Answer requests in order with `responses`, recording each request
async fn http_stub(responses: Vec<String>) -> (String, Requests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = listener.local_addr().unwrap().to_string();
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let recorded = recorded.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut reader = BufReader::new(read);
                loop {
                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let mut headers = Vec::new();
                    let mut length = 0;
                    loop {
                        let mut line = String::new();
                        reader.read_line(&mut line).await.unwrap();
                        let line = line.trim_end().to_string();
                        if line.is_empty() {
                            break;
                        }
                        if let Some(value) = line.to_lowercase().strip_prefix("content-length:") {
                            length = value.trim().parse().unwrap();
                        }
                        headers.push(line);
                    }
                    let mut body = vec![0; length];
                    reader.read_exact(&mut body).await.unwrap();
                    recorded.lock().unwrap().push(Recorded {
                        request_line: request_line.trim_end().to_string(),
                        headers,
                        body: String::from_utf8(body).unwrap(),
                    });
                    let reply = queue
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or_else(|| response("500 Internal Server Error", &[], "{}"));
                    write.write_all(reply.as_bytes()).await.unwrap();
                }
            });
        }
    });
    (server, requests)
}

fn client(server: &str) -> MattermostClient {
    MattermostClient::new(reqwest::Client::new(), server, true)
}

const LOGIN_OK: &str = r#"{"id":"u1","username":"me","email":"me@example.org"}"#;

#[tokio::test]
async fn test_login_stores_token_for_later_requests() {
    let (server, requests) = http_stub(vec![
        response("200 OK", &["Token: tok123"], LOGIN_OK),
        response("200 OK", &[], r#"[{"id":"t1","name":"dev","display_name":"Dev"}]"#),
    ])
    .await;
    let client = client(&server);

    let user = client.login("me", "secret").await.unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(user.username, "me");

    let teams = client.teams_for_user("u1").await.unwrap();
    assert_eq!(teams[0].display_name, "Dev");

    let requests = requests.lock().unwrap().clone();
    assert_eq!(requests[0].request_line, "POST /api/v4/users/login HTTP/1.1");
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["login_id"], "me");
    assert_eq!(body["password"], "secret");
    assert_eq!(requests[0].header("authorization"), None);

    assert_eq!(requests[1].request_line, "GET /api/v4/users/u1/teams HTTP/1.1");
    assert_eq!(
        requests[1].header("authorization").as_deref(),
        Some("Bearer tok123")
    );
}

#[tokio::test]
async fn test_login_without_token_fails() {
    let (server, _) = http_stub(vec![response("200 OK", &[], LOGIN_OK)]).await;
    let err = client(&server).login("me", "pw").await.unwrap_err();
    assert!(err.to_string().contains("without session token"));
}

#[tokio::test]
async fn test_api_error_message_is_reported() {
    let (server, _) = http_stub(vec![response(
        "401 Unauthorized",
        &[],
        r#"{"id":"api.user.login.invalid_credentials_email_username","message":"Enter a valid email or username and/or password.","status_code":401}"#,
    )])
    .await;

    let err = client(&server).login("me", "wrong").await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("401"), "{}", message);
    assert!(message.contains("Enter a valid email or username"), "{}", message);
}

#[tokio::test]
async fn test_posts_after_query() {
    let (server, requests) = http_stub(vec![response(
        "200 OK",
        &[],
        r#"{"order":["p2"],"posts":{"p2":{"id":"p2","channel_id":"c1","user_id":"u2","create_at":2000,"message":"hi"}},"next_post_id":"","prev_post_id":"p1"}"#,
    )])
    .await;

    let posts = client(&server).posts_after("c1", "p1", 0, 60).await.unwrap();

    assert_eq!(posts.order, vec!["p2".to_string()]);
    assert_eq!(posts.posts["p2"].message, "hi");
    assert_eq!(
        requests.lock().unwrap()[0].request_line,
        "GET /api/v4/channels/c1/posts?page=0&per_page=60&after=p1 HTTP/1.1"
    );
}

#[tokio::test]
async fn test_write_operations() {
    let ok = || response("200 OK", &[], "{}");
    let (server, requests) = http_stub(vec![
        ok(),
        response("200 OK", &[], r#"{"status":"OK"}"#),
        ok(),
        response("200 OK", &[], r#"{"id":"p9","channel_id":"c1","message":"yo"}"#),
        response("200 OK", &[], r#"{"link":"https://files/f1"}"#),
    ])
    .await;
    let client = client(&server);

    client.add_channel_member("c1", "u2").await.unwrap();
    client.remove_channel_member("c1", "u2").await.unwrap();
    client.update_user_status("u1", UserStatus::Dnd).await.unwrap();
    let post = client.create_post("c1", "yo").await.unwrap();
    let link = client.file_link("f1").await.unwrap();

    assert_eq!(post.id, "p9");
    assert_eq!(link, "https://files/f1");
    let requests = requests.lock().unwrap().clone();
    let lines: Vec<&str> = requests.iter().map(|r| r.request_line.as_str()).collect();
    assert_eq!(
        lines,
        vec![
            "POST /api/v4/channels/c1/members HTTP/1.1",
            "DELETE /api/v4/channels/c1/members/u2 HTTP/1.1",
            "PUT /api/v4/users/u1/status HTTP/1.1",
            "POST /api/v4/posts HTTP/1.1",
            "GET /api/v4/files/f1/link HTTP/1.1",
        ]
    );
    let status: serde_json::Value = serde_json::from_str(&requests[2].body).unwrap();
    assert_eq!(status["status"], "dnd");
}

#[tokio::test]
async fn test_event_stream_requires_login() {
    assert!(client("127.0.0.1:1").open_event_stream().await.is_err());
}

#[tokio::test]
async fn test_websocket_authenticates_and_forwards_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        let challenge = match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => text.as_str().to_string(),
            other => panic!("unexpected frame {:?}", other),
        };
        socket
            .send(Message::Text(r#"{"status":"OK","seq_reply":1}"#.into()))
            .await
            .unwrap();
        socket
            .send(Message::Text(
                r#"{"event":"channel_created","data":{"channel_id":"c9"},"seq":1}"#.into(),
            ))
            .await
            .unwrap();
        socket.close(None).await.unwrap();
        challenge
    });

    let url = format!("ws://{}/api/v4/websocket", address);
    let mut stream = websocket::connect(&url, "tok123").await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), stream.events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event, "channel_created");
    assert_eq!(event.data_str("channel_id"), "c9");

    let end = tokio::time::timeout(Duration::from_secs(2), stream.events.next())
        .await
        .unwrap();
    assert!(end.is_none());

    let challenge: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
    assert_eq!(challenge["action"], "authentication_challenge");
    assert_eq!(challenge["data"]["token"], "tok123");
}
