//! Error types for a3s-broadcast

use thiserror::Error;

/// Errors that can occur in the broadcast engine
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish or bind against a channel that was never declared
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Bind or subscribe against a queue that was never declared
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// Re-declaration with parameters that differ from the existing object
    #[error("Conflicting declaration for '{name}': {reason}")]
    DeclareConflict {
        name: String,
        reason: String,
    },

    /// Publish failure
    #[error("Failed to publish event to channel '{channel}': {reason}")]
    Publish {
        channel: String,
        reason: String,
    },

    /// Subscribe failure
    #[error("Failed to subscribe to queue '{queue}': {reason}")]
    Subscribe {
        queue: String,
        reason: String,
    },

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Provider-specific backend error
    #[error("Broker error: {0}")]
    Broker(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Action rejected by the publisher before it reached the broker
    #[error("Invalid action: {0}")]
    Validation(String),

    /// A consumer policy failed to process an event
    #[error("Handler '{role}' failed: {reason}")]
    Handler {
        role: String,
        reason: String,
    },

    /// Audit record store read/write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for broadcast operations
pub type Result<T> = std::result::Result<T, BroadcastError>;
