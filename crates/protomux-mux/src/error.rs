use crate::channel::ChannelState;

/// Errors that can occur in session and channel operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] protomux_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] protomux_frame::FrameError),

    /// A value could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The operation is not valid in the channel's current state.
    #[error("channel '{protocol}' is {state}")]
    InvalidState {
        protocol: String,
        state: ChannelState,
    },

    /// The channel behind a message slot no longer exists.
    #[error("channel was dropped")]
    ChannelDropped,

    /// The session was torn down (transport ended, framing error, destroy).
    #[error("session closed")]
    SessionClosed,
}

/// Errors produced by value encodings.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// The payload is shorter than the encoding requires.
    #[error("truncated value (need {need} bytes, got {got})")]
    Truncated { need: usize, got: usize },

    /// The payload has bytes left over after the value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// The payload is not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MuxError>;
