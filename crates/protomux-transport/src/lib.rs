//! Byte-stream transport abstraction for protomux.
//!
//! A multiplexing session needs very little from the connection underneath
//! it: a way to write bytes, and a stable identity so that several wrappers
//! built over the same connection can share one session. Incoming bytes and
//! end-of-stream are pushed into the session by whoever owns the read side.
//!
//! Implementations provided here:
//! - [`IoTransport`]: any blocking [`std::io::Write`] such as a socket or pipe
//! - [`MemoryTransport`]: a linked in-process pair, used by tests and loopback
//! - `QueueTransport`: hands writes to a tokio task (behind `async` feature)

pub mod error;
pub mod io;
pub mod memory;
#[cfg(feature = "async")]
pub mod queue;
pub mod traits;

pub use error::{Result, TransportError};
pub use io::IoTransport;
pub use memory::MemoryTransport;
#[cfg(feature = "async")]
pub use queue::{forward_writes, QueueTransport};
pub use traits::{Transport, TransportId};
