//! Self-delimiting record framing for protomux.
//!
//! Every record on the wire is framed with:
//! - A 2-byte magic number ("PM") for stream synchronization
//! - A 4-byte little-endian body length
//! - A 1-byte record kind (Open, Close, Reject, Message)
//! - A 4-byte little-endian channel id
//!
//! The body length always delimits the record, so a receiver can skip any
//! payload without understanding it. [`FrameDecoder`] reassembles records from
//! arbitrarily chunked input.

pub mod codec;
pub mod decoder;
pub mod error;
#[cfg(feature = "async")]
pub mod tokio_codec;

pub use codec::{
    decode_record, encode_record, FrameConfig, Record, RecordKind, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE, MAGIC,
};
pub use decoder::FrameDecoder;
pub use error::{FrameError, Result};
#[cfg(feature = "async")]
pub use tokio_codec::RecordCodec;
