use std::cell::{Cell, RefCell};
use std::io::{ErrorKind, Write};

use bytes::Bytes;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{Transport, TransportId};

/// Transport over any blocking `Write` stream.
///
/// Each [`write`](Transport::write) call is written in full and flushed
/// before returning, so one session write maps to one burst on the wire.
pub struct IoTransport<W> {
    id: TransportId,
    inner: RefCell<W>,
    writes: Cell<usize>,
    closed: Cell<bool>,
}

impl<W: Write> IoTransport<W> {
    /// Wrap a writer with a freshly minted identity.
    pub fn new(inner: W) -> Self {
        Self::with_id(TransportId::next(), inner)
    }

    /// Wrap a writer with an explicit identity.
    pub fn with_id(id: TransportId, inner: W) -> Self {
        Self {
            id,
            inner: RefCell::new(inner),
            writes: Cell::new(0),
            closed: Cell::new(false),
        }
    }

    /// Number of completed `write` calls.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    /// Refuse further writes.
    pub fn close(&self) {
        self.closed.set(true);
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Consume the transport and return the inner writer.
    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }

    /// Run `f` with a shared borrow of the inner writer.
    pub fn with_ref<R>(&self, f: impl FnOnce(&W) -> R) -> R {
        f(&self.inner.borrow())
    }

    fn flush(inner: &mut W) -> Result<()> {
        loop {
            match inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl<W: Write> Transport for IoTransport<W> {
    fn id(&self) -> TransportId {
        self.id
    }

    fn write(&self, bytes: Bytes) -> Result<()> {
        if self.closed.get() {
            return Err(TransportError::Closed);
        }

        let mut inner = self.inner.borrow_mut();
        let mut offset = 0usize;
        while offset < bytes.len() {
            match inner.write(&bytes[offset..]) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Self::flush(&mut *inner)?;

        self.writes.set(self.writes.get() + 1);
        trace!(transport = %self.id, size = bytes.len(), "wrote to transport");
        Ok(())
    }
}

impl<W> std::fmt::Debug for IoTransport<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoTransport")
            .field("id", &self.id)
            .field("writes", &self.writes.get())
            .field("closed", &self.closed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn writes_whole_buffer() {
        let transport = IoTransport::new(Cursor::new(Vec::<u8>::new()));
        transport.write(Bytes::from_static(b"hello")).unwrap();
        transport.write(Bytes::from_static(b" world")).unwrap();

        assert_eq!(transport.write_count(), 2);
        let inner = transport.into_inner();
        assert_eq!(inner.into_inner(), b"hello world");
    }

    #[test]
    fn closed_transport_refuses_writes() {
        let transport = IoTransport::new(Vec::<u8>::new());
        transport.close();
        let err = transport.write(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert_eq!(transport.write_count(), 0);
    }

    #[test]
    fn zero_write_is_disconnect() {
        let transport = IoTransport::new(ZeroWriter);
        let err = transport.write(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));
    }

    #[test]
    fn retries_interrupted_and_would_block() {
        let transport = IoTransport::new(FlakyWriter {
            failures: vec![ErrorKind::Interrupted, ErrorKind::WouldBlock],
            flush_failures: vec![ErrorKind::Interrupted],
            data: Vec::new(),
        });
        transport.write(Bytes::from_static(b"retry")).unwrap();
        assert_eq!(transport.into_inner().data, b"retry");
    }

    #[test]
    fn short_writes_are_completed() {
        let transport = IoTransport::new(OneByteWriter::default());
        transport.write(Bytes::from_static(b"slow")).unwrap();
        assert_eq!(transport.with_ref(|w| w.data.clone()), b"slow");
    }

    #[test]
    fn io_errors_propagate() {
        let transport = IoTransport::new(FlakyWriter {
            failures: vec![ErrorKind::BrokenPipe],
            flush_failures: Vec::new(),
            data: Vec::new(),
        });
        let err = transport.write(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, TransportError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[test]
    fn usable_through_rc_dyn() {
        let transport: Rc<dyn Transport> = Rc::new(IoTransport::new(Vec::<u8>::new()));
        let id = transport.id();
        assert_eq!(Transport::id(&transport), id);
        transport.write(Bytes::from_static(b"ok")).unwrap();
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FlakyWriter {
        failures: Vec<ErrorKind>,
        flush_failures: Vec<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.failures.is_empty() {
                return Err(std::io::Error::from(self.failures.remove(0)));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_failures.is_empty() {
                return Err(std::io::Error::from(self.flush_failures.remove(0)));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct OneByteWriter {
        data: Vec<u8>,
    }

    impl Write for OneByteWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            self.data.push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
