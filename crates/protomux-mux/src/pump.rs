//! Read-side drivers that feed a byte source into a [`Mux`].

use std::io::{ErrorKind, Read};

use protomux_transport::TransportError;
use tracing::{debug, trace};

use crate::error::{MuxError, Result};
use crate::session::Mux;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Blocking reader loop for one session.
pub struct Pump<R> {
    reader: R,
    chunk: Vec<u8>,
}

impl<R: Read> Pump<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
    }

    /// Read at most `chunk_size` bytes per [`step`](Self::step).
    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk: vec![0; chunk_size.max(1)],
        }
    }

    /// Read one chunk and feed it to `mux`.
    ///
    /// Returns `Ok(false)` once the stream has ended (after
    /// [`Mux::on_end`]) or the session is gone. A read error tears the
    /// session down and is returned.
    pub fn step(&mut self, mux: &Mux) -> Result<bool> {
        if mux.is_destroyed() {
            return Ok(false);
        }
        loop {
            match self.reader.read(&mut self.chunk) {
                Ok(0) => {
                    debug!(transport = %mux.transport_id(), "stream ended");
                    mux.on_end();
                    return Ok(false);
                }
                Ok(n) => {
                    trace!(transport = %mux.transport_id(), size = n, "read chunk");
                    mux.on_data(&self.chunk[..n])?;
                    return Ok(!mux.is_destroyed());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    mux.on_end();
                    return Err(MuxError::Transport(TransportError::Io(err)));
                }
            }
        }
    }

    /// Drive `mux` until the stream ends or the session is destroyed.
    pub fn run(&mut self, mux: &Mux) -> Result<()> {
        while self.step(mux)? {}
        Ok(())
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Feed an async byte source into `mux` until it ends.
///
/// The session is not `Send`; run this on a current-thread runtime or inside
/// a `tokio::task::LocalSet`.
#[cfg(feature = "async")]
pub async fn drive_async<R>(mut reader: R, mux: &Mux) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut chunk = vec![0u8; DEFAULT_CHUNK_SIZE];
    while !mux.is_destroyed() {
        let n = match reader.read(&mut chunk).await {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                mux.on_end();
                return Err(MuxError::Transport(TransportError::Io(err)));
            }
        };
        if n == 0 {
            debug!(transport = %mux.transport_id(), "stream ended");
            mux.on_end();
            break;
        }
        mux.on_data(&chunk[..n])?;
    }
    Ok(())
}
