use bytes::BytesMut;
use tracing::trace;

use crate::codec::{decode_record, FrameConfig, Record};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reassembles records from a byte stream delivered in arbitrary chunks.
///
/// Partial frames are kept across calls; callers only ever see complete
/// records. After an error the decoder should be discarded: the stream is no
/// longer synchronized.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    config: FrameConfig,
}

impl FrameDecoder {
    /// Create a new decoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a new decoder with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Append a chunk of incoming bytes without decoding anything.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete record from the buffered bytes, if any.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let record = decode_record(&mut self.buf, self.config.max_payload_size)?;
        if let Some(record) = &record {
            trace!(
                kind = %record.kind(),
                channel = record.channel(),
                buffered = self.buf.len(),
                "decoded record"
            );
        }
        Ok(record)
    }

    /// Append `chunk` and return every record it completes.
    ///
    /// On error, records decoded earlier in the same call are discarded. Use
    /// [`push`](Self::push) + [`next_record`](Self::next_record) to act on
    /// each record before the next one is parsed.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Record>> {
        self.push(chunk);
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    /// Signal end of stream.
    ///
    /// Returns `Err(FrameError::Truncated)` if a partial frame is still
    /// buffered.
    pub fn finish(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let buffered = self.buf.len();
        self.buf.clear();
        Err(FrameError::Truncated { buffered })
    }

    /// Number of bytes held for an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Update maximum body size for subsequent decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current decoder configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, Bytes};

    use super::*;
    use crate::codec::{encode_record, HEADER_SIZE, MAGIC};

    fn message(channel: u32, index: u32, payload: &'static [u8]) -> Record {
        Record::Message {
            channel,
            index,
            payload: Bytes::from_static(payload),
        }
    }

    fn wire(records: &[Record]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for record in records {
            encode_record(record, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn feed_single_record() {
        let mut decoder = FrameDecoder::new();
        let records = decoder.feed(&wire(&[message(1, 0, b"hello")])).unwrap();
        assert_eq!(records, vec![message(1, 0, b"hello")]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn feed_many_records_in_one_chunk() {
        let expected = vec![
            Record::Open {
                channel: 1,
                protocol: "foo".to_string(),
                discriminator: None,
                handshake: None,
            },
            message(1, 0, b"one"),
            message(1, 1, b"two"),
            Record::Close {
                channel: 1,
                protocol: "foo".to_string(),
                discriminator: None,
            },
        ];
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&wire(&expected)).unwrap(), expected);
    }

    #[test]
    fn feed_one_byte_at_a_time() {
        let expected = vec![message(4, 0, b"slow"), message(4, 1, b"")];
        let bytes = wire(&expected);

        let mut decoder = FrameDecoder::new();
        let mut seen = Vec::new();
        for byte in &bytes {
            seen.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(seen, expected);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn frame_split_across_chunks_is_held() {
        let bytes = wire(&[message(2, 0, b"split payload")]);
        let (head, tail) = bytes.split_at(HEADER_SIZE + 3);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(head).unwrap().is_empty());
        assert_eq!(decoder.buffered(), head.len());
        assert_eq!(
            decoder.feed(tail).unwrap(),
            vec![message(2, 0, b"split payload")]
        );
    }

    #[test]
    fn push_then_next_record() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&wire(&[message(1, 0, b"a"), message(1, 0, b"b")]));
        assert_eq!(decoder.next_record().unwrap(), Some(message(1, 0, b"a")));
        assert_eq!(decoder.next_record().unwrap(), Some(message(1, 0, b"b")));
        assert_eq!(decoder.next_record().unwrap(), None);
    }

    #[test]
    fn finish_clean() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&wire(&[message(1, 0, b"x")])).unwrap();
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn finish_mid_frame_is_truncation() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u32_le(16);
        partial.put_u8(4);
        partial.put_u32_le(2);
        partial.put_slice(b"only-part");

        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&partial).unwrap().is_empty());
        let err = decoder.finish().unwrap_err();
        assert!(matches!(err, FrameError::Truncated { buffered } if buffered == partial.len()));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn invalid_magic_in_stream() {
        let mut decoder = FrameDecoder::new();
        let err = decoder.feed(&[0x00; HEADER_SIZE]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidMagic));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut decoder = FrameDecoder::with_config(FrameConfig {
            max_payload_size: 16,
        });
        let err = decoder
            .feed(&wire(&[message(1, 0, &[0xAB; 64])]))
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 68, max: 16 }));
    }

    #[test]
    fn max_payload_can_be_raised() {
        let mut decoder = FrameDecoder::with_config(FrameConfig {
            max_payload_size: 4,
        });
        decoder.set_max_payload_size(1024);
        assert_eq!(decoder.config().max_payload_size, 1024);
        let records = decoder.feed(&wire(&[message(1, 0, &[0xCD; 64])])).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn large_payload_in_small_chunks() {
        let record = Record::Message {
            channel: 9,
            index: 3,
            payload: Bytes::from(vec![0x5A; 64 * 1024]),
        };
        let bytes = wire(std::slice::from_ref(&record));

        let mut decoder = FrameDecoder::new();
        let mut seen = Vec::new();
        for chunk in bytes.chunks(1000) {
            seen.extend(decoder.feed(chunk).unwrap());
        }
        assert_eq!(seen, vec![record]);
    }
}
