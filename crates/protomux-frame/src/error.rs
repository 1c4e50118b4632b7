/// Errors that can occur during record encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x504D \"PM\")")]
    InvalidMagic,

    /// The record body exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A length-prefixed field does not fit its 16-bit length.
    #[error("{field} too long ({len} bytes, max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// The header names a record kind this codec does not know.
    #[error("unknown record kind {0}")]
    UnknownKind(u8),

    /// The body does not match the layout of its record kind.
    #[error("malformed {kind} record: {reason}")]
    Malformed {
        kind: &'static str,
        reason: &'static str,
    },

    /// The protocol name is not valid UTF-8.
    #[error("protocol name is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
