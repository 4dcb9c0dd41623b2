// flapwatch/src/error.rs
//
// Engine error taxonomy. Overload and malformed updates are handled inside the
// engine and never surface here; what remains is producer-facing queue state,
// configuration, and I/O or serialization failures at the edges.

use thiserror::Error;

/// Result type alias for flapwatch operations
pub type Result<T> = std::result::Result<T, FlapError>;

#[derive(Error, Debug)]
pub enum FlapError {
    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Update queue is at capacity; the update was not accepted
    #[error("update queue full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// Update queue has been closed for shutdown
    #[error("update queue closed")]
    QueueClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
