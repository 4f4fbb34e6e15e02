use std::fmt;

use serde_json::{Map, Value};

use crate::constants;

/// Per-session settings for talking to the model API.
#[derive(Clone, Default)]
pub struct ChatConfig {
    api_key: Option<String>,
    pub api_url: String,
    /// Extra context serialized into the system prompt.
    pub additional_data: Map<String, Value>,
}

impl ChatConfig {
    pub fn new(api_key: Option<String>, api_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            api_url: api_url.into(),
            additional_data: Map::new(),
        }
    }

    /// Reads `OPENAI_API_KEY` and `OPENAI_API_URL`.
    pub fn from_env() -> Self {
        Self::new(
            constants::OPENAI_API_KEY.clone(),
            constants::OPENAI_API_URL.as_str(),
        )
    }

    pub fn with_additional_data(mut self, data: Map<String, Value>) -> Self {
        self.additional_data = data;
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("additional_data", &self.additional_data)
            .finish()
    }
}
