//! Multiplex typed channels and messages over a single byte stream.
//!
//! protomux runs many independent sub-protocol sessions over one reliable,
//! ordered connection. Each side opens channels by protocol name (plus an
//! optional discriminator); matching opens are paired, unmatched ones are
//! rejected, and typed messages flow between paired channels.
//!
//! # Crate Structure
//!
//! - [`transport`]: the write-side transport abstraction plus in-memory,
//!   `std::io` and tokio-queue implementations
//! - [`frame`]: the self-delimiting record format and a resumable decoder
//! - [`mux`]: sessions, channels, message slots, encodings and drivers
//!
//! # Example
//!
//! ```
//! use protomux::mux::{Mux, Utf8};
//! use protomux::transport::MemoryTransport;
//!
//! let (left, right) = MemoryTransport::pair();
//! let a = Mux::new(left.clone());
//! let b = Mux::new(right.clone());
//!
//! let chat_a = a.create_channel("chat");
//! let chat_b = b.create_channel("chat");
//! let say = chat_a.add_message(Utf8);
//! let hear = chat_b.add_message(Utf8);
//! hear.on_message(|text| println!("got {text}"));
//!
//! chat_a.open().unwrap();
//! chat_b.open().unwrap();
//! while let Some(chunk) = left.recv() {
//!     a.on_data(&chunk).unwrap();
//! }
//! while let Some(chunk) = right.recv() {
//!     b.on_data(&chunk).unwrap();
//! }
//!
//! say.send(&"hello world".to_string()).unwrap();
//! while let Some(chunk) = right.recv() {
//!     b.on_data(&chunk).unwrap();
//! }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use protomux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use protomux_frame::*;
}

/// Re-export session and channel types.
pub mod mux {
    pub use protomux_mux::*;
}

pub use protomux_mux::{Channel, ChannelOptions, MessageSlot, Mux, MuxConfig, MuxError};
