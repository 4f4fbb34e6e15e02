use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use futures::future;
use reqwest::{Client, StatusCode};
use tracing::{debug, error, instrument, warn};

use crate::constants;
use crate::error::ChatError;
use crate::models::{CompletionChunk, CompletionRequest, CompletionResponse};

/// Thin HTTP client for an OpenAI-compatible chat completion API.
#[derive(Debug, Clone)]
pub struct ModelClient {
    http: Client,
}

impl Default for ModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelClient {
    pub fn new() -> Self {
        let http = match Client::builder().timeout(constants::MODEL_TIMEOUT).build() {
            Ok(http) => http,
            Err(e) => {
                warn!(error = %e, "Failed to build model HTTP client; falling back to one without a timeout");
                Client::new()
            }
        };
        Self { http }
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    #[instrument(skip(self, api_key, request), fields(model = %request.model, messages = request.messages.len()))]
    pub async fn complete(
        &self,
        api_url: &str,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ChatError> {
        let response = self
            .http
            .post(api_url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Model API request failed");
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion = response.json::<CompletionResponse>().await?;
        debug!(id = %completion.id, choices = completion.choices.len(), "Received completion");
        Ok(completion)
    }

    /// Streams the text deltas of a completion. The stream ends at `[DONE]`;
    /// chunks that fail to parse are skipped.
    #[instrument(skip(self, api_key, request), fields(model = %request.model))]
    pub async fn stream(
        &self,
        api_url: &str,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<String, ChatError>>, ChatError> {
        let response = self
            .http
            .post(api_url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Model API stream request failed");
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let deltas = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| future::ready(!matches!(event, Ok(e) if e.data.trim() == "[DONE]")))
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => match serde_json::from_str::<CompletionChunk>(&event.data) {
                        Ok(chunk) => chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|choice| choice.delta.content)
                            .filter(|content| !content.is_empty())
                            .map(Ok),
                        Err(e) => {
                            warn!(data = %event.data, error = %e, "Skipping unparsable stream chunk");
                            None
                        }
                    },
                    Err(e) => Some(Err(ChatError::Stream(e.to_string()))),
                })
            });

        Ok(deltas.boxed())
    }

    pub async fn validate_api_key(&self, models_url: &str, api_key: &str) -> Result<(), ChatError> {
        let response = self.http.get(models_url).bearer_auth(api_key).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED => Err(ChatError::InvalidApiKey),
            status => Err(ChatError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
