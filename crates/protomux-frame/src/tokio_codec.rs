use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_record, encode_record, FrameConfig, Record};
use crate::error::{FrameError, Result};

/// `tokio_util` codec for protomux records.
///
/// Useful for tools that want to observe or replay raw records on an async
/// stream without running a full session.
#[derive(Debug, Clone, Default)]
pub struct RecordCodec {
    config: FrameConfig,
}

impl RecordCodec {
    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }
}

impl Decoder for RecordCodec {
    type Item = Record;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Record>> {
        decode_record(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Record>> {
        match self.decode(src)? {
            Some(record) => Ok(Some(record)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated {
                buffered: src.len(),
            }),
        }
    }
}

impl Encoder<Record> for RecordCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Record, dst: &mut BytesMut) -> Result<()> {
        encode_record(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::StreamExt;
    use tokio_util::codec::FramedRead;

    use super::*;

    #[tokio::test]
    async fn framed_read_yields_records() {
        let mut codec = RecordCodec::default();
        let mut wire = BytesMut::new();
        let records = vec![
            Record::Open {
                channel: 1,
                protocol: "foo".to_string(),
                discriminator: Some(Bytes::from_static(b"1")),
                handshake: None,
            },
            Record::Message {
                channel: 7,
                index: 0,
                payload: Bytes::from_static(b"hello world"),
            },
        ];
        for record in records.clone() {
            codec.encode(record, &mut wire).unwrap();
        }

        let frozen = wire.freeze();
        let mut framed = FramedRead::new(frozen.as_ref(), RecordCodec::default());
        let mut seen = Vec::new();
        while let Some(record) = framed.next().await {
            seen.push(record.unwrap());
        }
        assert_eq!(seen, records);
    }

    #[tokio::test]
    async fn truncated_stream_reports_error() {
        let close = Record::Close {
            channel: 3,
            protocol: "foo".to_string(),
            discriminator: None,
        };
        let bytes = close.to_bytes().unwrap();
        let partial = &bytes[..bytes.len() - 1];

        let mut framed = FramedRead::new(partial, RecordCodec::default());
        let result = framed.next().await.unwrap();
        assert!(matches!(result, Err(FrameError::Truncated { .. })));
    }
}
