use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::error::Result;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a transport.
///
/// Sessions are deduplicated per identity: every wrapper attached to the same
/// `TransportId` shares one multiplexer and one channel-id space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
    /// Mint a fresh identity that no other transport in this process holds.
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the inner `u64` representation.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for TransportId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

/// The write half of a reliable, ordered byte stream.
///
/// A session calls [`write`](Transport::write) with complete frames (or a
/// concatenation of frames when corked) and never assumes the far side sees
/// the same chunk boundaries. Implementations must not call back into the
/// session from `write`; incoming bytes are delivered separately.
pub trait Transport {
    /// Stable identity used for session deduplication.
    fn id(&self) -> TransportId;

    /// Write `bytes` in full, in order.
    fn write(&self, bytes: Bytes) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Rc<T> {
    fn id(&self) -> TransportId {
        (**self).id()
    }

    fn write(&self, bytes: Bytes) -> Result<()> {
        (**self).write(bytes)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn id(&self) -> TransportId {
        (**self).id()
    }

    fn write(&self, bytes: Bytes) -> Result<()> {
        (**self).write(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = TransportId::next();
        let b = TransportId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn display_includes_number() {
        assert_eq!(TransportId::from(7).to_string(), "transport-7");
    }
}
