//! Channel and message multiplexing over a single byte stream.
//!
//! A [`Mux`] runs many independent, typed sub-protocol sessions
//! ([`Channel`]s) over one reliable, ordered transport. Both peers open a
//! channel for the same protocol (and optional discriminator); the session
//! pairs them and routes each [`MessageSlot`]'s values to the matching slot
//! on the other side. Unmatched opens are rejected, unknown message slots are
//! skipped, and writes can be corked into a single transport write.
//!
//! The session is single-threaded: state lives behind `Rc`/`RefCell` and
//! handlers may call back into the session while they run.

pub mod channel;
pub mod config;
pub mod encoding;
pub mod error;
pub mod message;
pub mod pump;
pub mod registry;
pub mod session;

pub use channel::{Channel, ChannelOptions, ChannelState};
pub use config::MuxConfig;
pub use encoding::{Encoding, Json, Raw, Utf8, I64, U32};
pub use error::{EncodingError, MuxError, Result};
pub use message::MessageSlot;
#[cfg(feature = "async")]
pub use pump::drive_async;
pub use pump::Pump;
pub use registry::SessionRegistry;
pub use session::Mux;
