use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    pub code: Option<String>,
    pub message: String,
    pub param: Option<String>,
    pub event_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] tungstenite::http::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Realtime API error: {0:?}")]
    Api(ServerError),

    #[error("Provider session failed: {0}")]
    Provider(String),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("The queue has been completed and accepts no more writes")]
    QueueClosed,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Participant {0} was already started")]
    AlreadyStarted(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Invalid client event: {0}")]
    InvalidClientEvent(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Conversation store error: {0}")]
    Store(String),
}

impl Error {
    /// Cancellation is reported separately from faults and never logged above info.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
