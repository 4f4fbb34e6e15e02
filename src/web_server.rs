use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    serve, Json, Router,
};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::ChatConfig;
use crate::constants;
use crate::error::ChatError;
use crate::helpers::generate_message_id;
use crate::message_store::{KeywordSet, MessageStore};
use crate::models::{ApiMessage, CharLimit, CompletionRequest, KeywordRequest, Role, StoredMessage};
use crate::openai::ModelClient;

const STREAM_SYSTEM_PROMPT: &str = r#"Task Instructions:
You will be provided with a question from the user, and you need to provide an answer based on the data provided.
If the question can be answered with the data provided, you should provide a direct answer.
If the question requires reasoning or analysis, you should provide a detailed explanation of your reasoning process and the steps you took to arrive at your answer.
Your answer should always be structured and use fun emojis."#;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub messages: Arc<MessageStore>,
    pub keywords: Arc<KeywordSet>,
    char_limit: Arc<AtomicUsize>,
    model: ModelClient,
    config: Arc<ChatConfig>,
    cors_origin: HeaderValue,
}

impl AppState {
    pub fn new(config: ChatConfig, model: ModelClient) -> Self {
        Self {
            messages: Arc::new(MessageStore::new()),
            keywords: Arc::new(KeywordSet::new()),
            char_limit: Arc::new(AtomicUsize::new(constants::DEFAULT_CHAR_LIMIT)),
            model,
            config: Arc::new(config),
            cors_origin: HeaderValue::from_static("http://localhost:8080"),
        }
    }

    pub fn with_cors_origin(mut self, origin: &str) -> Result<Self> {
        self.cors_origin = HeaderValue::from_str(origin)
            .with_context(|| format!("Invalid CORS origin '{}'", origin))?;
        Ok(self)
    }

    pub fn char_limit(&self) -> usize {
        self.char_limit.load(Ordering::Relaxed)
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

// Missing fields are treated as empty so they get the specific error below.
#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "userId")]
    user_id: String,
}

async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<MessagePayload>, JsonRejection>,
) -> Response {
    let Ok(Json(payload)) = payload else {
        return bad_request("Invalid JSON");
    };

    if payload.message.is_empty() {
        return bad_request("Message cannot be empty");
    }
    if payload.message.chars().count() > state.char_limit() {
        return bad_request("Invalid Character Size");
    }
    if payload.user_id.is_empty() {
        return bad_request("UserId cannot be empty");
    }

    let found_keywords = state.keywords.find_in(&payload.message);
    let message = StoredMessage {
        message_id: generate_message_id(),
        user_id: payload.user_id,
        flagged: !found_keywords.is_empty(),
        message_content: payload.message,
    };
    let message_id = message.message_id.clone();
    state.messages.add(message);

    if !found_keywords.is_empty() {
        warn!(%message_id, ?found_keywords, "Message flagged");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Message contains forbidden keywords",
                "messageId": message_id,
                "foundKeywords": found_keywords,
                "message": "Your message has been saved but contains prohibited content",
            })),
        )
            .into_response();
    }

    info!(%message_id, "Message accepted");
    Json(json!({
        "messageId": message_id,
        "message": "Message posted successfully",
        "status": "approved",
    }))
    .into_response()
}

async fn get_messages(State(state): State<AppState>) -> Json<Vec<StoredMessage>> {
    Json(state.messages.all())
}

async fn get_chat_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<StoredMessage>> {
    Json(state.messages.by_user(&user_id))
}

async fn get_char_limit(State(state): State<AppState>) -> Json<CharLimit> {
    Json(CharLimit {
        char_limit: state.char_limit(),
    })
}

async fn post_char_limit(
    State(state): State<AppState>,
    payload: Result<Json<CharLimit>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(limit)) => {
            info!(char_limit = limit.char_limit, "Character limit updated");
            state.char_limit.store(limit.char_limit, Ordering::Relaxed);
            Json(limit).into_response()
        }
        Err(rejection) => bad_request(&rejection.body_text()),
    }
}

async fn get_keywords(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.keywords.all())
}

async fn post_keywords(
    State(state): State<AppState>,
    payload: Result<Json<KeywordRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        return bad_request("Invalid JSON. Expected { \"keywords\": [\"word1\", \"word2\"] }");
    };
    if request.keywords.is_empty() {
        return bad_request("The 'keywords' array cannot be empty.");
    }

    state.keywords.add_words(&request.keywords);
    (
        StatusCode::CREATED,
        Json(json!({
            "message": "Keywords added",
            "count": request.keywords.len(),
        })),
    )
        .into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskParams {
    user_id: Option<String>,
    message_id: Option<String>,
}

enum Phase {
    Connect(BoxStream<'static, Result<String, ChatError>>),
    Streaming(BoxStream<'static, Result<String, ChatError>>),
    Finished,
}

/// SSE fields may not carry `\r`; CRLF and lone CR become `\n`, which the
/// encoder splits into several `data:` lines.
fn event_data(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// `connection`, then one `data` event per delta, then `done`. A failure
/// emits a single `error` event and ends the stream.
fn completion_events(
    deltas: BoxStream<'static, Result<String, ChatError>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Phase::Connect(deltas), |phase| async move {
        match phase {
            Phase::Connect(deltas) => Some((
                Event::default().event("connection").data("Connected to OpenAI stream"),
                Phase::Streaming(deltas),
            )),
            Phase::Streaming(mut deltas) => match deltas.next().await {
                Some(Ok(text)) => Some((
                    Event::default().event("data").data(event_data(&text)),
                    Phase::Streaming(deltas),
                )),
                Some(Err(e)) => {
                    warn!(error = %e, "Completion stream failed");
                    Some((
                        Event::default().event("error").data(event_data(&format!("Error: {}", e))),
                        Phase::Finished,
                    ))
                }
                None => Some((Event::default().event("done").data("Stream completed"), Phase::Finished)),
            },
            Phase::Finished => None,
        }
    })
    .map(Ok)
}

async fn ask_chatgpt(State(state): State<AppState>, Query(params): Query<AskParams>) -> Response {
    let Some(user_id) = params.user_id.filter(|id| !id.is_empty()) else {
        return bad_request("userId parameter is required");
    };
    let Some(message_id) = params.message_id.filter(|id| !id.is_empty()) else {
        return bad_request("messageId parameter is required");
    };

    let Some(message) = state.messages.by_id(&message_id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Message not found" }))).into_response();
    };
    if message.user_id != user_id {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Message does not belong to the specified user" })),
        )
            .into_response();
    }
    if message.flagged {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Message contains forbidden keywords" })),
        )
            .into_response();
    }

    info!(%message_id, %user_id, "Streaming completion");
    let request = CompletionRequest::streaming(
        constants::CHAT_MODEL,
        vec![
            ApiMessage::new(Role::System, STREAM_SYSTEM_PROMPT),
            ApiMessage::new(Role::User, message.message_content),
        ],
    );
    let deltas = match state.config.api_key() {
        Some(api_key) => state.model.stream(&state.config.api_url, api_key, &request).await,
        None => Err(ChatError::MissingApiKey),
    };
    let deltas = deltas.unwrap_or_else(|e| stream::once(async move { Err(e) }).boxed());

    Sse::new(completion_events(deltas))
        .keep_alive(KeepAlive::default())
        .into_response()
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(state.cors_origin.clone())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::CONTENT_LENGTH])
        .allow_credentials(true);

    Router::new()
        .route("/messages", get(get_messages).post(post_message))
        .route("/chat-history/:user_id", get(get_chat_history))
        .route("/char-limit", get(get_char_limit).post(post_char_limit))
        .route("/keywords", get(get_keywords).post(post_keywords))
        .route("/ask-chatgpt", get(ask_chatgpt))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

pub async fn start_web_server(port: u16, state: AppState) -> Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Backend listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_data_strips_carriage_returns() {
        assert_eq!(event_data("a\r\nb\rc\nd"), "a\nb\nc\nd");
        assert_eq!(event_data("plain"), "plain");
    }
}
