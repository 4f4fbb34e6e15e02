// Wire and display shapes shared by the client, the orchestrator and the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation, as kept in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::at(role, content, Utc::now())
    }

    pub fn at(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A single prompt entry in the model API's format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: String,
}

impl ApiMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(
        model: impl Into<String>,
        messages: Vec<ApiMessage>,
        max_tokens: u32,
        temperature: f32,
        stream: bool,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
            stream,
        }
    }

    /// Streaming request with the API's default sampling parameters.
    pub fn streaming(model: impl Into<String>, messages: Vec<ApiMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Non-streaming completion envelope. `Default` is the empty envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One `data:` payload of a streaming completion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32, total: u32) -> Self {
        Self {
            prompt,
            completion,
            total,
        }
    }
}

impl From<&Usage> for TokenUsage {
    fn from(usage: &Usage) -> Self {
        Self::new(
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total_tokens,
        )
    }
}

/// A message ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedChatMessage {
    pub content: String,
    pub html_content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub token_usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    pub is_error: bool,
    #[serde(default)]
    pub title: Option<String>,
}

impl FormattedChatMessage {
    pub fn new(content: impl Into<String>, html_content: impl Into<String>, role: Role) -> Self {
        Self {
            content: content.into(),
            html_content: html_content.into(),
            role,
            timestamp: Utc::now(),
            token_usage: None,
            finish_reason: None,
            is_error: false,
            title: None,
        }
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::at(self.role, self.content.clone(), self.timestamp)
    }
}

/// A model reply split into its optional title and the rendered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub title: Option<String>,
    pub body: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message: String,
    pub user_id: String,
}

/// A user message as stored by the companion backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub message_id: String,
    pub user_id: String,
    pub flagged: bool,
    pub message_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharLimit {
    pub char_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRequest {
    pub keywords: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completion_request_wire_format() {
        let request = CompletionRequest::new(
            "gpt-4o-mini",
            vec![ApiMessage::new(Role::System, "be nice")],
            1000,
            0.5,
            false,
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "system", "content": "be nice"}],
                "max_tokens": 1000,
                "temperature": 0.5,
                "stream": false
            })
        );
    }

    #[test]
    fn test_streaming_request_omits_sampling() {
        let request = CompletionRequest::streaming("m", vec![]);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("temperature").is_none());
        assert_eq!(value["stream"], json!(true));
    }

    #[test]
    fn test_empty_response_envelope() {
        let response = CompletionResponse::default();
        assert!(response.id.is_empty());
        assert!(response.choices.is_empty());
        assert_eq!(response.usage.total_tokens, 0);

        let parsed: CompletionResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_send_message_request_uses_camel_case() {
        let request = SendMessageRequest {
            message: "hi".into(),
            user_id: "user_1".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"message": "hi", "userId": "user_1"})
        );
    }

    #[test]
    fn test_formatted_message_builders() {
        let message = FormattedChatMessage::new("hi", "<p>hi</p>", Role::Assistant)
            .with_token_usage(TokenUsage::new(1, 2, 3))
            .with_finish_reason("stop")
            .with_error(true);
        assert_eq!(message.token_usage, Some(TokenUsage::new(1, 2, 3)));
        assert_eq!(message.finish_reason.as_deref(), Some("stop"));
        assert!(message.is_error);
        assert_eq!(message.to_chat_message().content, "hi");
    }
}
