use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{Transport, TransportId};

#[derive(Default)]
struct Link {
    queue: VecDeque<Bytes>,
    writes: usize,
    closed: bool,
}

/// One end of an in-process duplex byte stream.
///
/// Every `write` on one end becomes exactly one chunk returned by
/// [`recv`](MemoryTransport::recv) on the other end, so chunk boundaries
/// are observable. Cloning yields another handle with the same identity.
#[derive(Clone)]
pub struct MemoryTransport {
    id: TransportId,
    outgoing: Rc<RefCell<Link>>,
    incoming: Rc<RefCell<Link>>,
    ended: Rc<Cell<bool>>,
}

impl MemoryTransport {
    /// Create two linked endpoints.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Rc::new(RefCell::new(Link::default()));
        let b_to_a = Rc::new(RefCell::new(Link::default()));
        let ended = Rc::new(Cell::new(false));

        let a = Self {
            id: TransportId::next(),
            outgoing: Rc::clone(&a_to_b),
            incoming: Rc::clone(&b_to_a),
            ended: Rc::clone(&ended),
        };
        let b = Self {
            id: TransportId::next(),
            outgoing: b_to_a,
            incoming: a_to_b,
            ended,
        };
        (a, b)
    }

    /// Pop the next chunk written by the other end.
    pub fn recv(&self) -> Option<Bytes> {
        self.incoming.borrow_mut().queue.pop_front()
    }

    /// Number of chunks waiting to be received on this end.
    pub fn pending(&self) -> usize {
        self.incoming.borrow().queue.len()
    }

    /// Number of `write` calls made on this end.
    pub fn write_count(&self) -> usize {
        self.outgoing.borrow().writes
    }

    /// Close this end for writing. The peer still drains what was queued.
    pub fn close(&self) {
        self.outgoing.borrow_mut().closed = true;
        self.ended.set(true);
    }

    /// Whether either end has been closed.
    pub fn is_closed(&self) -> bool {
        self.ended.get()
    }

    /// Whether the other end closed and everything it wrote was received.
    pub fn is_drained(&self) -> bool {
        let incoming = self.incoming.borrow();
        incoming.closed && incoming.queue.is_empty()
    }
}

impl Transport for MemoryTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn write(&self, bytes: Bytes) -> Result<()> {
        let mut link = self.outgoing.borrow_mut();
        if link.closed {
            return Err(TransportError::Closed);
        }
        if self.incoming.borrow().closed {
            return Err(TransportError::Disconnected);
        }
        trace!(transport = %self.id, size = bytes.len(), "memory write");
        link.writes += 1;
        link.queue.push_back(bytes);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
