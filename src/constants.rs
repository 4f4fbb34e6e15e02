// Endpoints and tuning knobs. Anything that differs between deployments can be
// overridden from the environment (or a .env file loaded at startup).

use std::env;
use std::time::Duration;

lazy_static::lazy_static! {
    pub static ref BACKEND_URL: String = env::var("CHATWRAP_BACKEND_URL").unwrap_or_else(|_| "http://localhost:8081".to_string());
    pub static ref OPENAI_API_URL: String = env::var("OPENAI_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
    pub static ref OPENAI_MODELS_URL: String = env::var("OPENAI_MODELS_URL").unwrap_or_else(|_| "https://api.openai.com/v1/models".to_string());
    pub static ref OPENAI_API_KEY: Option<String> = env::var("OPENAI_API_KEY").ok().filter(|key| !key.trim().is_empty());
    pub static ref STORAGE_PATH: String = env::var("CHATWRAP_STORAGE_PATH").unwrap_or_else(|_| ".chatwrap/storage.json".to_string());
    pub static ref CORS_ORIGIN: String = env::var("CHATWRAP_CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:8080".to_string());
}

pub const CHAT_MODEL: &str = "gpt-4o-mini";
pub const MAX_TOKENS: u32 = 1000;
pub const TEMPERATURE: f32 = 0.7;

/// Minimum spacing between two model calls made through one `ChatService`.
pub const API_CALL_DELAY: Duration = Duration::from_millis(1000);

/// How many prior turns are re-sent to the model.
pub const HISTORY_WINDOW: usize = 10;

/// Canned assistant greetings that are never re-sent as context.
pub const GREETING_PHRASES: [&str; 2] = ["Hello! I'm here to help", "How can I assist you today?"];

pub const WELCOME_MESSAGE: &str = "Hello! I'm your AI assistant. How can I help you today?";

pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
pub const MODEL_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_CHAR_LIMIT: usize = 500;
pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_TRUNCATE_LENGTH: usize = 50;

// Storage keys used by the interactive client.
pub const USER_ID_KEY: &str = "userId";
pub const CONVERSATION_KEY: &str = "conversation";
