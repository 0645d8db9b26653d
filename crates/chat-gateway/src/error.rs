//! Gateway error types
//!
//! Layered errors for the compression stage, a single shard, and the
//! manager over the whole shard set.

use thiserror::Error;

/// Errors from the zlib-stream decompression stage
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The inflate stream is corrupt and cannot continue
    #[error("decompression failed: {0}")]
    Inflate(#[from] flate2::DecompressError),

    /// Decompressed bytes were not valid UTF-8
    #[error("decompressed payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Errors from a single shard connection
#[derive(Debug, Error)]
pub enum ShardError {
    /// WebSocket transport failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Payload could not be parsed
    #[error("invalid gateway payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// Inflater desynchronized or produced garbage
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// Server never sent Hello within the deadline
    #[error("timed out waiting for Hello")]
    HelloTimeout,

    /// Identify was sent but READY never arrived within the deadline
    #[error("timed out waiting for READY after identify")]
    IdentifyTimeout,

    /// A connect was requested while another is in flight
    #[error("shard {0} is already connecting")]
    AlreadyConnecting(u32),

    /// The shard is not in a state that can send commands
    #[error("shard {0} is not ready")]
    NotReady(u32),

    /// The server closed with a code the recovery table marks fatal
    #[error("fatal close code {code}: {reason}")]
    FatalClose {
        /// Raw close code
        code: u16,
        /// Human-readable reason
        reason: String,
    },

    /// The shard was closed by the caller
    #[error("shard is closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ShardError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Errors from the shard manager
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The REST API call behind a manager operation failed
    #[error("http api error: {0}")]
    Http(#[from] chat_http::HttpError),

    /// One of the shards failed while starting
    #[error("shard {shard_id} failed to start: {source}")]
    ShardStart {
        /// Shard that failed
        shard_id: u32,
        /// Underlying shard error
        #[source]
        source: ShardError,
    },

    /// A rescale was requested while another is in flight
    #[error("a rescale is already in progress")]
    RescaleInProgress,

    /// Shard configuration is invalid
    #[error("invalid shard configuration: {0}")]
    InvalidConfig(String),

    /// The manager was closed by the caller
    #[error("manager is closed")]
    Closed,
}
