use axum::http::StatusCode;
use axum_test::TestServer;
use chatwrap::models::StoredMessage;
use chatwrap::openai::ModelClient;
use chatwrap::repl::run_ask;
use chatwrap::web_server::{router, AppState};
use chatwrap::{BackendClient, ChatConfig};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn state_with_model(api_url: &str) -> AppState {
    AppState::new(
        ChatConfig::new(Some("sk-test".to_string()), api_url),
        ModelClient::new(),
    )
}

fn test_server(state: AppState) -> TestServer {
    TestServer::new(router(state)).unwrap()
}

async fn mock_model_stream(chunks: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"id": "1", "choices": [{"index": 0, "delta": {"content": chunk}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_post_message_validation() {
    let server = test_server(state_with_model("http://127.0.0.1:9"));

    let response = server
        .post("/messages")
        .json(&json!({"message": "", "userId": "u"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "Message cannot be empty");

    let response = server.post("/messages").json(&json!({"message": "hi"})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "UserId cannot be empty");

    let response = server
        .post("/messages")
        .json(&json!({"message": "x".repeat(501), "userId": "u"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "Invalid Character Size");

    let response = server.post("/messages").text("not json").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "Invalid JSON");
}

#[tokio::test]
async fn test_post_message_approved_and_listed() {
    let server = test_server(state_with_model("http://127.0.0.1:9"));

    let response = server
        .post("/messages")
        .json(&json!({"message": "What is Rust?", "userId": "alice"}))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["status"], "approved");
    assert!(body["messageId"].as_str().unwrap().starts_with("msg_"));

    server
        .post("/messages")
        .json(&json!({"message": "Another", "userId": "bob"}))
        .await
        .assert_status_ok();

    let all = server.get("/messages").await.json::<Vec<StoredMessage>>();
    assert_eq!(all.len(), 2);

    let alice = server.get("/chat-history/alice").await.json::<Vec<StoredMessage>>();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].message_content, "What is Rust?");
    assert!(!alice[0].flagged);
}

#[tokio::test]
async fn test_forbidden_keywords_flag_message() {
    let state = state_with_model("http://127.0.0.1:9");
    let server = test_server(state.clone());

    let response = server.post("/keywords").json(&json!({"keywords": []})).await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .post("/keywords")
        .json(&json!({"keywords": ["Password", "secret"]}))
        .await;
    response.assert_status(StatusCode::CREATED);
    assert_eq!(response.json::<Value>()["count"], 2);
    assert_eq!(
        server.get("/keywords").await.json::<Vec<String>>(),
        vec!["password", "secret"]
    );

    let response = server
        .post("/messages")
        .json(&json!({"message": "my password is hunter2", "userId": "alice"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body = response.json::<Value>();
    assert_eq!(body["error"], "Message contains forbidden keywords");
    assert_eq!(body["foundKeywords"], json!(["password"]));

    let message_id = body["messageId"].as_str().unwrap();
    let stored = state.messages.by_id(message_id).unwrap();
    assert!(stored.flagged);

    let response = server
        .get("/ask-chatgpt")
        .add_query_param("userId", "alice")
        .add_query_param("messageId", message_id)
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_char_limit_can_be_changed() {
    let server = test_server(state_with_model("http://127.0.0.1:9"));
    assert_eq!(server.get("/char-limit").await.json::<Value>(), json!({"charLimit": 500}));

    server
        .post("/char-limit")
        .json(&json!({"charLimit": 5}))
        .await
        .assert_status_ok();

    let response = server
        .post("/messages")
        .json(&json!({"message": "too long", "userId": "u"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let server = test_server(state_with_model("http://127.0.0.1:9"));
    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({"status": "ok"}));
}

#[tokio::test]
async fn test_ask_validates_parameters_and_ownership() {
    let state = state_with_model("http://127.0.0.1:9");
    let server = test_server(state.clone());

    server
        .get("/ask-chatgpt")
        .add_query_param("messageId", "m")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .get("/ask-chatgpt")
        .add_query_param("userId", "u")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .get("/ask-chatgpt")
        .add_query_param("userId", "u")
        .add_query_param("messageId", "missing")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    state.messages.add(StoredMessage {
        message_id: "msg_1".to_string(),
        user_id: "alice".to_string(),
        flagged: false,
        message_content: "hi".to_string(),
    });
    server
        .get("/ask-chatgpt")
        .add_query_param("userId", "mallory")
        .add_query_param("messageId", "msg_1")
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_ask_streams_model_output() {
    let model = mock_model_stream(&["Hello", " world"]).await;
    let state = state_with_model(&model.uri());
    state.messages.add(StoredMessage {
        message_id: "msg_1".to_string(),
        user_id: "alice".to_string(),
        flagged: false,
        message_content: "Say hello".to_string(),
    });
    let server = test_server(state);

    let response = server
        .get("/ask-chatgpt")
        .add_query_param("userId", "alice")
        .add_query_param("messageId", "msg_1")
        .await;
    response.assert_status_ok();
    let text = response.text();

    let connection = text.find("event: connection").unwrap();
    let first = text.find("data: Hello").unwrap();
    let second = text.find("data:  world").unwrap();
    let done = text.find("event: done").unwrap();
    assert!(connection < first && first < second && second < done);
    assert!(!text.contains("event: error"));
}

#[tokio::test]
async fn test_ask_reports_model_failure_as_error_event() {
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&model)
        .await;
    let state = state_with_model(&model.uri());
    state.messages.add(StoredMessage {
        message_id: "msg_1".to_string(),
        user_id: "alice".to_string(),
        flagged: false,
        message_content: "Say hello".to_string(),
    });
    let server = test_server(state);

    let text = server
        .get("/ask-chatgpt")
        .add_query_param("userId", "alice")
        .add_query_param("messageId", "msg_1")
        .await
        .text();
    assert!(text.contains("event: connection"));
    assert!(text.contains("event: error"));
    assert!(text.contains("OpenAI API error: 500"));
    assert!(!text.contains("event: done"));
}

#[tokio::test]
async fn test_client_round_trip_through_backend() {
    let model = mock_model_stream(&["Rust ", "is ", "fun"]).await;
    let app = router(state_with_model(&model.uri()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    let client = BackendClient::new(&format!("http://{}", addr)).unwrap();
    assert!(client.check_health().await);

    let mut output = Vec::new();
    run_ask(&client, "alice", "What is Rust?", &mut output)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(output).unwrap(), "Rust is fun\n");

    let history = client.chat_history("alice").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message_content, "What is Rust?");
}

#[tokio::test]
async fn test_ask_streams_crlf_delta_as_data_lines() {
    let model = mock_model_stream(&["line1\r\nline2"]).await;
    let state = state_with_model(&model.uri());
    state.messages.add(StoredMessage {
        message_id: "msg_1".to_string(),
        user_id: "alice".to_string(),
        flagged: false,
        message_content: "Two lines please".to_string(),
    });
    let server = test_server(state);

    let response = server
        .get("/ask-chatgpt")
        .add_query_param("userId", "alice")
        .add_query_param("messageId", "msg_1")
        .await;
    response.assert_status_ok();
    let text = response.text();
    assert!(!text.contains('\r'));
    assert!(text.contains("data: line1\ndata: line2\n"));
    assert!(text.contains("event: done"));
}

#[tokio::test]
async fn test_ask_reports_crlf_error_page_as_error_event() {
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(502)
                .set_body_string("<html>\r\n<center>502 Bad Gateway</center>\r\n</html>\r\n"),
        )
        .mount(&model)
        .await;
    let state = state_with_model(&model.uri());
    state.messages.add(StoredMessage {
        message_id: "msg_1".to_string(),
        user_id: "alice".to_string(),
        flagged: false,
        message_content: "Say hello".to_string(),
    });
    let server = test_server(state);

    let text = server
        .get("/ask-chatgpt")
        .add_query_param("userId", "alice")
        .add_query_param("messageId", "msg_1")
        .await
        .text();
    assert!(!text.contains('\r'));
    assert!(text.contains("event: error"));
    assert!(text.contains("OpenAI API error: 502"));
    assert!(text.contains("data: <center>502 Bad Gateway</center>"));
    assert!(!text.contains("event: done"));
}
