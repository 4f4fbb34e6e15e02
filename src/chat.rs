// Chat orchestration: prompt construction, model calls, reply formatting.

use std::collections::HashMap;

use pulldown_cmark::{html, Options, Parser};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::config::ChatConfig;
use crate::constants;
use crate::error::ChatError;
use crate::helpers::escape_html;
use crate::models::{
    ApiMessage, AssistantReply, ChatMessage, CompletionRequest, CompletionResponse,
    FormattedChatMessage, Role, TokenUsage,
};
use crate::openai::ModelClient;

const BASE_SYSTEM_PROMPT: &str = r#"Task Instructions:
You will be provided with a question from the user, and you need to provide an answer based on the data provided.
If the question can be answered with the data provided, you should provide a direct answer.
If the question requires reasoning or analysis, you should provide a detailed explanation of your reasoning process and the steps you took to arrive at your answer.
Your answer should always be structured and use fun emojis.
You should also provide a concise title for your response, it should be the very first thing you provide in your message,
and it should be formatted like this title="your title should be here" you should 2 $$ after it i.e it should look something like this
title="Todo list creation"$$your response should be here, you should only return the title for the first message in the conversation"#;

const TITLE_OPEN: &str = "title=\"";
const TITLE_CLOSE: &str = "\"$$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKey {
    Code(u16),
    Default,
}

lazy_static::lazy_static! {
    static ref CANNED_ERRORS: HashMap<StatusKey, &'static str> = {
        let mut m = HashMap::new();
        m.insert(StatusKey::Code(429), "I'm currently experiencing high demand. Please try again in a few moments, or check your OpenAI API quota if you're using your own key.");
        m.insert(StatusKey::Code(401), "There seems to be an authentication issue with the API. Please check your API key.");
        m.insert(StatusKey::Code(403), "Access forbidden. Please check your API key permissions.");
        m.insert(StatusKey::Code(500), "The AI service is temporarily unavailable. Please try again later.");
        m.insert(StatusKey::Default, "I encountered an unexpected error. Please try again or contact support if the issue persists.");
        m
    };
}

/// User-facing text for a failed model call.
pub fn error_message(status: Option<u16>) -> &'static str {
    status
        .and_then(|code| CANNED_ERRORS.get(&StatusKey::Code(code)))
        .or_else(|| CANNED_ERRORS.get(&StatusKey::Default))
        .copied()
        .unwrap_or_default()
}

pub fn is_greeting(message: &ChatMessage) -> bool {
    message.role == Role::Assistant
        && constants::GREETING_PHRASES
            .iter()
            .any(|phrase| message.content.contains(phrase))
}

pub fn system_prompt(config: &ChatConfig) -> String {
    if config.additional_data.is_empty() {
        return BASE_SYSTEM_PROMPT.to_string();
    }
    match serde_json::to_string_pretty(&config.additional_data) {
        Ok(json) => format!("{}\n\nAdditional context data: {}", BASE_SYSTEM_PROMPT, json),
        Err(e) => {
            error!(error = %e, "Failed to serialize additional context data");
            BASE_SYSTEM_PROMPT.to_string()
        }
    }
}

/// System instruction, then at most the last `HISTORY_WINDOW` non-greeting
/// turns in their original order, then the new user message.
pub fn build_prompt(history: &[ChatMessage], new_message: &str, config: &ChatConfig) -> Vec<ApiMessage> {
    let kept: Vec<&ChatMessage> = history.iter().filter(|m| !is_greeting(m)).collect();
    let window = &kept[kept.len().saturating_sub(constants::HISTORY_WINDOW)..];

    let mut messages = Vec::with_capacity(window.len() + 2);
    messages.push(ApiMessage::new(Role::System, system_prompt(config)));
    messages.extend(window.iter().map(|m| {
        let role = match m.role {
            Role::Assistant => Role::Assistant,
            _ => Role::User,
        };
        ApiMessage::new(role, m.content.clone())
    }));
    messages.push(ApiMessage::new(Role::User, new_message));
    messages
}

pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(markdown, options);
    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);
    html_output
}

/// Splits a `title="..."$$body` reply into title and body, then renders the
/// body. Replies without the marker are all body.
pub fn parse_assistant_reply(text: &str) -> AssistantReply {
    let (title, body) = match split_title(text) {
        Some((title, body)) => (Some(title.to_string()), body),
        None => (None, text),
    };
    AssistantReply {
        title,
        body: body.to_string(),
        html: render_markdown(body),
    }
}

fn split_title(text: &str) -> Option<(&str, &str)> {
    let start = text.find(TITLE_OPEN)? + TITLE_OPEN.len();
    let rest = &text[start..];
    let end = rest.find(TITLE_CLOSE)?;
    let title = rest[..end].trim();
    let body = rest[end + TITLE_CLOSE.len()..].trim_start();
    Some((title, body))
}

struct ModelReply {
    content: String,
    usage: TokenUsage,
    finish_reason: Option<String>,
}

fn first_choice(response: CompletionResponse) -> Result<ModelReply, ChatError> {
    let usage = TokenUsage::from(&response.usage);
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::InvalidResponse("no choices".to_string()))?;
    let content = choice
        .message
        .content
        .ok_or_else(|| ChatError::InvalidResponse("empty message".to_string()))?;
    Ok(ModelReply {
        content,
        usage,
        finish_reason: choice.finish_reason,
    })
}

/// Talks to the model on behalf of one chat session. Calls through one
/// instance are spaced at least `API_CALL_DELAY` apart.
pub struct ChatService {
    client: ModelClient,
    last_call: Mutex<Option<Instant>>,
}

impl Default for ChatService {
    fn default() -> Self {
        Self::new(ModelClient::new())
    }
}

impl ChatService {
    pub fn new(client: ModelClient) -> Self {
        Self {
            client,
            last_call: Mutex::new(None),
        }
    }

    /// Waits out the remainder of the spacing window, then stamps now.
    pub async fn check_rate_limit(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < constants::API_CALL_DELAY {
                let wait = constants::API_CALL_DELAY - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Spacing model call");
                tokio::time::sleep(wait).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    async fn fetch_reply(
        &self,
        api_key: &str,
        message: &str,
        history: &[ChatMessage],
        config: &ChatConfig,
    ) -> Result<ModelReply, ChatError> {
        self.check_rate_limit().await;

        let request = CompletionRequest::new(
            constants::CHAT_MODEL,
            build_prompt(history, message, config),
            constants::MAX_TOKENS,
            constants::TEMPERATURE,
            false,
        );
        let response = self.client.complete(&config.api_url, api_key, &request).await?;
        first_choice(response)
    }

    /// Returns the model's text, or a canned explanation when the call failed.
    /// Only a missing API key is reported as an error.
    #[instrument(skip_all, fields(history = history.len()))]
    pub async fn call_model(
        &self,
        message: &str,
        history: &[ChatMessage],
        config: &ChatConfig,
    ) -> Result<String, ChatError> {
        let api_key = config.api_key().ok_or(ChatError::MissingApiKey)?;
        match self.fetch_reply(api_key, message, history, config).await {
            Ok(reply) => Ok(reply.content),
            Err(e) => {
                error!(error = %e, "OpenAI API error");
                Ok(error_message(e.status()).to_string())
            }
        }
    }

    /// Like [`call_model`](Self::call_model), but returns the formatted
    /// assistant message with usage and title attached.
    #[instrument(skip_all, fields(history = history.len()))]
    pub async fn respond(
        &self,
        message: &str,
        history: &[ChatMessage],
        config: &ChatConfig,
    ) -> Result<FormattedChatMessage, ChatError> {
        let api_key = config.api_key().ok_or(ChatError::MissingApiKey)?;
        match self.fetch_reply(api_key, message, history, config).await {
            Ok(reply) => {
                info!(total_tokens = reply.usage.total, "Model replied");
                let mut formatted = self
                    .assistant_message(&reply.content, false)
                    .with_token_usage(reply.usage);
                formatted.finish_reason = reply.finish_reason;
                Ok(formatted)
            }
            Err(e) => {
                error!(error = %e, "OpenAI API error");
                Ok(self.assistant_message(error_message(e.status()), true))
            }
        }
    }

    pub fn welcome_message(&self) -> FormattedChatMessage {
        FormattedChatMessage::new(
            constants::WELCOME_MESSAGE,
            format!("<p>{}</p>", constants::WELCOME_MESSAGE),
            Role::Assistant,
        )
    }

    pub fn user_message(&self, content: &str) -> FormattedChatMessage {
        FormattedChatMessage::new(content, format!("<p>{}</p>", escape_html(content)), Role::User)
    }

    pub fn assistant_message(&self, content: &str, is_error: bool) -> FormattedChatMessage {
        let reply = parse_assistant_reply(content);
        FormattedChatMessage::new(reply.body, reply.html, Role::Assistant)
            .with_error(is_error)
            .with_title(reply.title)
    }
}
