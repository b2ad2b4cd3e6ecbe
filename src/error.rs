//! Error types for Sightline gateway

use thiserror::Error;

/// Result type alias for Sightline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Sightline gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Frame could not be digested (empty or malformed image data)
    #[error("undigestable frame: {0}")]
    Undigestable(String),

    /// Frame capture or encoding error
    #[error("frame error: {0}")]
    Frame(String),

    /// Stream transport error (chunk write failure, premature close)
    #[error("transport error: {0}")]
    Transport(String),

    /// A stream is already open for this participant and topic
    #[error("topic busy: {participant}/{topic}")]
    TopicBusy { participant: String, topic: String },

    /// A network-facing operation exceeded its time bound
    #[error("timed out: {0}")]
    Timeout(String),

    /// Operation abandoned because its owner was cancelled
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Realtime conversational engine error
    #[error("engine error: {0}")]
    Engine(String),

    /// Conversational session could not be opened for a participant
    #[error("session open failed for {participant}: {reason}")]
    SessionOpen { participant: String, reason: String },

    /// Participant already has an active session
    #[error("participant already active: {0}")]
    AlreadyActive(String),

    /// No session exists for the participant
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    /// Coordinator has not been started
    #[error("coordinator not started")]
    NotStarted,

    /// Tool registration error
    #[error("tool error: {0}")]
    Tool(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Image decode/encode error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// WebSocket client error
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
