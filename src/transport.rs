use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tracing::{error, instrument, warn};
use url::{ParseError, Url};

use crate::constants;
use crate::error::ChatError;
use crate::models::{SendMessageRequest, StoredMessage};

/// One event received from the backend's answer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event: String,
    pub data: String,
}

impl StreamEvent {
    pub fn is_done(&self) -> bool {
        self.event == "done"
    }

    pub fn is_error(&self) -> bool {
        self.event == "error"
    }
}

/// A not-yet-opened server-push stream. Building one does no I/O.
#[derive(Debug, Clone)]
pub struct EventStreamHandle {
    http: Client,
    url: Url,
}

impl EventStreamHandle {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Opens the stream. Reading events is left to the caller.
    pub async fn connect(self) -> Result<BoxStream<'static, Result<StreamEvent, ChatError>>, ChatError> {
        let response = self
            .http
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message_from(response).await;
            return Err(ChatError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let events = response.bytes_stream().eventsource().map(|event| match event {
            Ok(event) => Ok(StreamEvent {
                event: event.event,
                data: event.data,
            }),
            Err(e) => Err(ChatError::Stream(e.to_string())),
        });
        Ok(events.boxed())
    }
}

/// Pulls a `message` (or `error`) field out of an error body.
async fn error_message_from(response: reqwest::Response) -> String {
    response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| {
            body.get("message")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unknown error".to_string())
}

/// Client for the companion backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: Url,
    http: Client,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, ChatError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            http: Client::new(),
        })
    }

    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(&constants::BACKEND_URL)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        Ok(self.base_url.join(path)?)
    }

    #[instrument(skip(self, text))]
    pub async fn send_message(&self, text: &str, user_id: &str) -> Result<Value, ChatError> {
        let body = SendMessageRequest {
            message: text.to_string(),
            user_id: user_id.to_string(),
        };
        let response = self
            .http
            .post(self.endpoint("messages")?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Error sending message");
                e
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Value>().await?);
        }

        let message = error_message_from(response).await;
        let err = ChatError::Backend {
            status: status.as_u16(),
            message,
        };
        error!(error = %err, "Error sending message");
        Err(err)
    }

    pub fn open_stream(&self, user_id: &str, message_id: &str) -> Result<EventStreamHandle, ChatError> {
        let mut url = self.endpoint("ask-chatgpt")?;
        url.query_pairs_mut()
            .append_pair("userId", user_id)
            .append_pair("messageId", message_id);
        Ok(EventStreamHandle {
            http: self.http.clone(),
            url,
        })
    }

    /// Never fails: any problem means the backend is unavailable.
    pub async fn check_health(&self) -> bool {
        let url = match self.endpoint("health") {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Backend health check failed");
                return false;
            }
        };
        match self
            .http
            .get(url)
            .timeout(constants::HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "Backend health check failed");
                false
            }
            Err(e) => {
                error!(error = %e, "Backend health check failed");
                false
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn chat_history(&self, user_id: &str) -> Result<Vec<StoredMessage>, ChatError> {
        let mut url = self.endpoint("chat-history/")?;
        url.path_segments_mut()
            .map_err(|_| ChatError::Url(ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(user_id);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let err = ChatError::Backend {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown error").to_string(),
            };
            error!(error = %err, "Error fetching chat history");
            return Err(err);
        }
        Ok(response.json().await?)
    }
}
