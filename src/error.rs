use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("OpenAI API key not provided")]
    MissingApiKey,

    /// Non-2xx answer from the companion backend.
    #[error("HTTP error! status: {status}, message: {message}")]
    Backend { status: u16, message: String },

    /// Non-2xx answer from the model API.
    #[error("OpenAI API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("invalid OpenAI API key")]
    InvalidApiKey,

    #[error("Invalid response from OpenAI: {0}")]
    InvalidResponse(String),

    #[error("error reading stream: {0}")]
    Stream(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ChatError {
    /// HTTP status attached to the failure, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatError::Backend { status, .. } | ChatError::Api { status, .. } => Some(*status),
            ChatError::InvalidApiKey => Some(401),
            ChatError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage data is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage quota exceeded: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
