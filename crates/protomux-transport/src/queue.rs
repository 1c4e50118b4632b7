use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{Transport, TransportId};

/// Transport that hands every write to a tokio task.
///
/// The session side stays synchronous: `write` only enqueues. Pair it with
/// [`forward_writes`] running on the same runtime to drain the queue into an
/// `AsyncWrite`.
#[derive(Debug, Clone)]
pub struct QueueTransport {
    id: TransportId,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl QueueTransport {
    /// Create a transport and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: TransportId::next(),
                tx,
            },
            rx,
        )
    }
}

impl Transport for QueueTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn write(&self, bytes: Bytes) -> Result<()> {
        trace!(transport = %self.id, size = bytes.len(), "queueing write");
        self.tx
            .send(bytes)
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Drain queued writes into `writer` until every sender is dropped.
pub async fn forward_writes<W>(mut rx: mpsc::UnboundedReceiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = rx.recv().await {
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    debug!("write queue closed");
    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_writes_in_order() {
        let (transport, rx) = QueueTransport::new();
        transport.write(Bytes::from_static(b"hello ")).unwrap();
        transport.write(Bytes::from_static(b"world")).unwrap();
        drop(transport);

        let mut out = Vec::new();
        forward_writes(rx, &mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn write_after_receiver_dropped_fails() {
        let (transport, rx) = QueueTransport::new();
        drop(rx);
        let err = transport.write(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));
    }
}
