pub mod chat;
pub mod config;
pub mod constants;
pub mod error;
pub mod helpers;
pub mod message_store;
pub mod models;
pub mod openai;
pub mod repl;
pub mod storage;
pub mod transport;
pub mod web_server;

use serde::{Deserialize, Serialize};

use crate::helpers::{format_timestamp, generate_chat_id};
use crate::models::{ChatMessage, FormattedChatMessage, Role};

pub use crate::chat::ChatService;
pub use crate::config::ChatConfig;
pub use crate::error::{ChatError, StorageError};
pub use crate::transport::BackendClient;

/// One chat session: the history re-sent to the model and what is shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub history: Vec<ChatMessage>,
    pub display: Vec<FormattedChatMessage>,
}

impl Conversation {
    /// Starts with the welcome message on display; it never enters history.
    pub fn new(user_id: String, welcome: FormattedChatMessage) -> Self {
        Self {
            id: generate_chat_id(),
            user_id,
            title: None,
            history: Vec::new(),
            display: vec![welcome],
        }
    }

    pub fn push_user(&mut self, message: FormattedChatMessage) {
        self.history.push(message.to_chat_message());
        self.display.push(message);
    }

    /// Error replies are shown but kept out of history.
    pub fn push_assistant(&mut self, message: FormattedChatMessage) {
        if self.title.is_none() {
            if let Some(title) = message.title.clone() {
                self.set_title(title);
            }
        }
        if !message.is_error {
            self.history.push(message.to_chat_message());
        }
        self.display.push(message);
    }

    /// Only the first title sticks.
    pub fn set_title(&mut self, title: String) {
        if self.title.is_none() && !title.trim().is_empty() {
            self.title = Some(title);
        }
    }

    pub fn transcript(&self) -> String {
        self.display
            .iter()
            .map(|msg| {
                let sender = match msg.role {
                    Role::User => "You",
                    Role::Assistant => "Assistant",
                    Role::System => "System",
                };
                format!("{} {}: {}", format_timestamp(&msg.timestamp), sender, msg.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
