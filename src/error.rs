use std::error::Error;
use std::fmt;
use std::sync::PoisonError;

#[derive(Debug)]
pub enum RedchatError {
    // Room lifecycle errors
    JoinFailed { room: String, reason: String },

    // Broker errors
    SubscribeFailed { room: String, reason: String },
    UnsubscribeFailed { room: String, reason: String },
    PublishFailed { room: String, reason: String },

    // Messages errors
    DecodeError(String),
    MessageParseError(String),
    MessageTooLarge(usize),

    // Shared state errors
    LockPoisoned(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for RedchatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JoinFailed { room, reason } => write!(f, "Failed to join room {}: {}", room, reason),
            Self::SubscribeFailed { room, reason } => {
                write!(f, "Broker subscribe failed for room {}: {}", room, reason)
            }
            Self::UnsubscribeFailed { room, reason } => {
                write!(f, "Broker unsubscribe failed for room {}: {}", room, reason)
            }
            Self::PublishFailed { room, reason } => {
                write!(f, "Broker publish failed for room {}: {}", room, reason)
            }
            Self::DecodeError(msg) => write!(f, "Payload decode error: {}", msg),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::MessageTooLarge(size) => write!(f, "Message too large: {} bytes", size),
            Self::LockPoisoned(msg) => write!(f, "Lock poisoned: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RedchatError {}

impl RedchatError {
    /// Short machine-readable code sent to clients in `error` events
    pub fn code(&self) -> &'static str {
        match self {
            Self::JoinFailed { .. } => "join_failed",
            Self::SubscribeFailed { .. } => "subscribe_failed",
            Self::UnsubscribeFailed { .. } => "unsubscribe_failed",
            Self::PublishFailed { .. } => "publish_failed",
            Self::DecodeError(_) => "decode_error",
            Self::MessageParseError(_) => "invalid_message",
            Self::MessageTooLarge(_) => "message_too_large",
            Self::LockPoisoned(_) => "internal_error",
            Self::ConfigError(_) => "config_error",
        }
    }
}

impl<T> From<PoisonError<T>> for RedchatError {
    fn from(err: PoisonError<T>) -> Self {
        RedchatError::LockPoisoned(err.to_string())
    }
}

// Generic result type for Redchat
pub type Result<T> = std::result::Result<T, RedchatError>;
