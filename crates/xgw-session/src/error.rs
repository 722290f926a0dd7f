//! Session error types.

use thiserror::Error;
use xgw_core::ChannelHandle;

/// Setup-time configuration errors. Fatal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing field: {0}")]
    Missing(&'static str),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Duplicate channel tag: {0}")]
    DuplicateTag(String),

    #[error("Channel limit reached ({0})")]
    TooManyChannels(usize),

    #[error("Not an order channel: {0}")]
    NotOrderChannel(ChannelHandle),
}

/// Errors ending one connection attempt or session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Login timed out after {0} ms")]
    LoginTimeout(u64),

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// Short label for reconnect metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "connect_failed",
            Self::ConnectionClosed(_) => "closed",
            Self::LoginTimeout(_) => "login_timeout",
            Self::LoginRejected(_) => "login_rejected",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Tungstenite(_) => "transport",
            Self::Json(_) => "decode",
        }
    }
}

/// Why a request could not be handed to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Malformed request; retrying cannot help.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// No live link. The caller may buffer for replay.
    #[error("Channel disconnected")]
    Disconnected,

    /// Live link, but its outbound buffer is full.
    #[error("Outbound buffer full")]
    Backpressure,

    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelHandle),
}

impl SendError {
    /// Whether buffering for replay after reconnect is appropriate.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Backpressure)
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
