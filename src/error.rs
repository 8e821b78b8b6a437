//! Pub/Sub Error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PubSubError {
    #[error("Not connected: no live transport session")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Maximum reconnection attempts ({attempts}) reached")]
    MaxReconnectAttemptsExceeded { attempts: u32 },

    #[error("Access denied to channel {channel}")]
    AccessDenied { channel: String },

    #[error("Subscription error on {channel}: {message}")]
    Subscription { channel: String, message: String },

    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    #[error("Invalid endpoint: {0:?}")]
    InvalidEndpoint(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PubSubError {
    /// Whether a later attempt against the same transport may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PubSubError::NotConnected => true,
            PubSubError::Transport(_) => true,
            PubSubError::Io(_) => true,
            PubSubError::Subscription { message, .. } if message.contains("timeout") => true,
            _ => false,
        }
    }
}

// Serialized as the display string so errors can cross a JSON boundary
impl serde::Serialize for PubSubError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PubSubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PubSubError::Transport("reset by peer".into()).is_retryable());
        assert!(PubSubError::NotConnected.is_retryable());
        assert!(PubSubError::Subscription {
            channel: "room-1".into(),
            message: "subscribe timeout".into(),
        }
        .is_retryable());
        assert!(!PubSubError::AccessDenied {
            channel: "room-1".into()
        }
        .is_retryable());
        assert!(!PubSubError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_serializes_as_message() {
        let json = serde_json::to_string(&PubSubError::NotConnected).unwrap();
        assert_eq!(json, "\"Not connected: no live transport session\"");
    }
}
