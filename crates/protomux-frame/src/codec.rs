use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: magic (2) + length (4) + kind (1) + channel (4) = 11 bytes.
pub const HEADER_SIZE: usize = 11;

/// Magic bytes: "PM" (0x50 0x4D).
pub const MAGIC: [u8; 2] = [0x50, 0x4D];

/// Default maximum body size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

const FLAG_DISCRIMINATOR: u8 = 0b01;
const FLAG_HANDSHAKE: u8 = 0b10;
const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Wire tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    Open = 1,
    Close = 2,
    Reject = 3,
    Message = 4,
}

impl RecordKind {
    /// Human-readable name, used in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Open => "open",
            RecordKind::Close => "close",
            RecordKind::Reject => "reject",
            RecordKind::Message => "message",
        }
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordKind::Open),
            2 => Ok(RecordKind::Close),
            3 => Ok(RecordKind::Reject),
            4 => Ok(RecordKind::Message),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One logical record of the multiplexing protocol.
///
/// Control records (`Open`, `Close`) carry the sender's local channel id.
/// `Reject` and `Message` are addressed with the recipient's local id.
/// Every control record names the protocol and discriminator it refers to,
/// so a receiver can tell a stale record from one for a channel that reused
/// the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Announce a channel for `protocol`/`discriminator`.
    Open {
        channel: u32,
        protocol: String,
        discriminator: Option<Bytes>,
        handshake: Option<Bytes>,
    },
    /// The sender closed its channel.
    Close {
        channel: u32,
        protocol: String,
        discriminator: Option<Bytes>,
    },
    /// The recipient's Open found no matching channel.
    Reject {
        channel: u32,
        protocol: String,
        discriminator: Option<Bytes>,
    },
    /// An opaque payload for message slot `index`.
    Message {
        channel: u32,
        index: u32,
        payload: Bytes,
    },
}

impl Record {
    /// The record's wire tag.
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Open { .. } => RecordKind::Open,
            Record::Close { .. } => RecordKind::Close,
            Record::Reject { .. } => RecordKind::Reject,
            Record::Message { .. } => RecordKind::Message,
        }
    }

    /// The channel id carried in the header.
    pub fn channel(&self) -> u32 {
        match self {
            Record::Open { channel, .. }
            | Record::Close { channel, .. }
            | Record::Reject { channel, .. }
            | Record::Message { channel, .. } => *channel,
        }
    }

    /// The protocol and discriminator named by a control record.
    pub fn key(&self) -> Option<(&str, Option<&Bytes>)> {
        match self {
            Record::Open {
                protocol,
                discriminator,
                ..
            }
            | Record::Close {
                protocol,
                discriminator,
                ..
            }
            | Record::Reject {
                protocol,
                discriminator,
                ..
            } => Some((protocol, discriminator.as_ref())),
            Record::Message { .. } => None,
        }
    }

    /// Size of the body that follows the header.
    pub fn body_len(&self) -> usize {
        match self {
            Record::Open {
                protocol,
                discriminator,
                handshake,
                ..
            } => {
                key_len(protocol, discriminator.as_ref()) + handshake.as_ref().map_or(0, Bytes::len)
            }
            Record::Close {
                protocol,
                discriminator,
                ..
            }
            | Record::Reject {
                protocol,
                discriminator,
                ..
            } => key_len(protocol, discriminator.as_ref()),
            Record::Message { payload, .. } => 4 + payload.len(),
        }
    }

    /// The total wire size of this record (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body_len()
    }

    /// Encode into a standalone buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_record(self, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Encode a record into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬─────────────┬──────────┬─────────────┬──────────────────┐
/// │ Magic (2B) │ Length (4B) │ Kind(1B) │ Channel(4B) │ Body (Length B)  │
/// │ "PM"       │ LE          │          │ LE          │                  │
/// └────────────┴─────────────┴──────────┴─────────────┴──────────────────┘
/// ```
///
/// Control bodies start with `u16` protocol length, protocol, `u8` flags and
/// an optional `u16` discriminator length + discriminator. An Open may add a
/// handshake (remainder); Close and Reject end there.
/// Message body: `u32` message index, payload (remainder).
pub fn encode_record(record: &Record, dst: &mut BytesMut) -> Result<()> {
    let body_len = record.body_len();
    if body_len > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: u32::MAX as usize,
        });
    }
    if let Some((protocol, discriminator)) = record.key() {
        check_field("protocol", protocol.len())?;
        if let Some(discriminator) = discriminator {
            check_field("discriminator", discriminator.len())?;
        }
    }

    dst.reserve(HEADER_SIZE + body_len);
    dst.put_slice(&MAGIC);
    dst.put_u32_le(body_len as u32);
    dst.put_u8(record.kind() as u8);
    dst.put_u32_le(record.channel());

    match record {
        Record::Open {
            protocol,
            discriminator,
            handshake,
            ..
        } => {
            let flags = if handshake.is_some() { FLAG_HANDSHAKE } else { 0 };
            put_key(dst, protocol, discriminator.as_ref(), flags);
            if let Some(handshake) = handshake {
                dst.put_slice(handshake);
            }
        }
        Record::Close {
            protocol,
            discriminator,
            ..
        }
        | Record::Reject {
            protocol,
            discriminator,
            ..
        } => put_key(dst, protocol, discriminator.as_ref(), 0),
        Record::Message { index, payload, .. } => {
            dst.put_u32_le(*index);
            dst.put_slice(payload);
        }
    }
    Ok(())
}

/// Decode a record from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_record(src: &mut BytesMut, max_payload: usize) -> Result<Option<Record>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let mut header = &src[2..HEADER_SIZE];
    let body_len = header.get_u32_le() as usize;
    let kind = RecordKind::try_from(header.get_u8())?;
    let channel = header.get_u32_le();

    if body_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + body_len {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();

    let record = match kind {
        RecordKind::Open => decode_open(channel, body)?,
        RecordKind::Close => {
            let (protocol, discriminator) = decode_control(kind, body)?;
            Record::Close {
                channel,
                protocol,
                discriminator,
            }
        }
        RecordKind::Reject => {
            let (protocol, discriminator) = decode_control(kind, body)?;
            Record::Reject {
                channel,
                protocol,
                discriminator,
            }
        }
        RecordKind::Message => {
            let mut body = body;
            need(kind, &body, 4, "missing message index")?;
            let index = body.get_u32_le();
            Record::Message {
                channel,
                index,
                payload: body,
            }
        }
    };
    Ok(Some(record))
}

fn key_len(protocol: &str, discriminator: Option<&Bytes>) -> usize {
    2 + protocol.len() + 1 + discriminator.map_or(0, |d| 2 + d.len())
}

fn put_key(dst: &mut BytesMut, protocol: &str, discriminator: Option<&Bytes>, mut flags: u8) {
    dst.put_u16_le(protocol.len() as u16);
    dst.put_slice(protocol.as_bytes());
    if discriminator.is_some() {
        flags |= FLAG_DISCRIMINATOR;
    }
    dst.put_u8(flags);
    if let Some(discriminator) = discriminator {
        dst.put_u16_le(discriminator.len() as u16);
        dst.put_slice(discriminator);
    }
}

fn decode_open(channel: u32, mut body: Bytes) -> Result<Record> {
    let kind = RecordKind::Open;
    let (protocol, discriminator, flags) = decode_key(kind, &mut body)?;

    let handshake = if flags & FLAG_HANDSHAKE != 0 {
        Some(body)
    } else {
        expect_empty(kind, &body)?;
        None
    };

    Ok(Record::Open {
        channel,
        protocol,
        discriminator,
        handshake,
    })
}

fn decode_control(kind: RecordKind, mut body: Bytes) -> Result<(String, Option<Bytes>)> {
    let (protocol, discriminator, flags) = decode_key(kind, &mut body)?;
    if flags & FLAG_HANDSHAKE != 0 {
        return Err(FrameError::Malformed {
            kind: kind.name(),
            reason: "unexpected handshake",
        });
    }
    expect_empty(kind, &body)?;
    Ok((protocol, discriminator))
}

// Leaves `body` positioned after the discriminator.
fn decode_key(kind: RecordKind, body: &mut Bytes) -> Result<(String, Option<Bytes>, u8)> {
    need(kind, body, 2, "missing protocol length")?;
    let protocol_len = body.get_u16_le() as usize;
    need(kind, body, protocol_len, "truncated protocol name")?;
    let protocol = std::str::from_utf8(&body[..protocol_len])?.to_owned();
    body.advance(protocol_len);

    need(kind, body, 1, "missing flags")?;
    let flags = body.get_u8();
    if flags & !(FLAG_DISCRIMINATOR | FLAG_HANDSHAKE) != 0 {
        return Err(FrameError::Malformed {
            kind: kind.name(),
            reason: "unknown flags",
        });
    }

    let discriminator = if flags & FLAG_DISCRIMINATOR != 0 {
        need(kind, body, 2, "missing discriminator length")?;
        let len = body.get_u16_le() as usize;
        need(kind, body, len, "truncated discriminator")?;
        Some(body.split_to(len))
    } else {
        None
    };

    Ok((protocol, discriminator, flags))
}

fn need(kind: RecordKind, body: &Bytes, len: usize, reason: &'static str) -> Result<()> {
    if body.len() < len {
        return Err(FrameError::Malformed {
            kind: kind.name(),
            reason,
        });
    }
    Ok(())
}

fn expect_empty(kind: RecordKind, body: &Bytes) -> Result<()> {
    if !body.is_empty() {
        return Err(FrameError::Malformed {
            kind: kind.name(),
            reason: "unexpected trailing bytes",
        });
    }
    Ok(())
}

fn check_field(field: &'static str, len: usize) -> Result<()> {
    if len > MAX_FIELD_LEN {
        return Err(FrameError::FieldTooLong {
            field,
            len,
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum record body size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(channel: u32, protocol: &str) -> Record {
        Record::Open {
            channel,
            protocol: protocol.to_string(),
            discriminator: None,
            handshake: None,
        }
    }

    fn decode_one(buf: &mut BytesMut) -> Record {
        decode_record(buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap()
    }

    #[test]
    fn test_open_roundtrip_with_all_fields() {
        let record = Record::Open {
            channel: 3,
            protocol: "hypercore/alpha".to_string(),
            discriminator: Some(Bytes::from_static(b"\x01\x02")),
            handshake: Some(Bytes::from_static(b"hello")),
        };
        let mut buf = BytesMut::new();
        encode_record(&record, &mut buf).unwrap();
        assert_eq!(buf.len(), record.wire_size());

        assert_eq!(decode_one(&mut buf), record);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_open_with_empty_handshake_keeps_presence() {
        let record = Record::Open {
            channel: 1,
            protocol: "foo".to_string(),
            discriminator: None,
            handshake: Some(Bytes::new()),
        };
        let mut buf = BytesMut::new();
        encode_record(&record, &mut buf).unwrap();
        assert_eq!(decode_one(&mut buf), record);
    }

    #[test]
    fn test_message_layout() {
        let record = Record::Message {
            channel: 0x0102_0304,
            index: 2,
            payload: Bytes::from_static(b"abc"),
        };
        let bytes = record.to_bytes().unwrap();

        assert_eq!(&bytes[0..2], &MAGIC);
        assert_eq!(&bytes[2..6], &7u32.to_le_bytes());
        assert_eq!(bytes[6], RecordKind::Message as u8);
        assert_eq!(&bytes[7..11], &0x0102_0304u32.to_le_bytes());
        assert_eq!(&bytes[11..15], &2u32.to_le_bytes());
        assert_eq!(&bytes[15..], b"abc");
    }

    #[test]
    fn test_close_and_reject_name_their_channel() {
        let close = Record::Close {
            channel: 9,
            protocol: "foo".to_string(),
            discriminator: Some(Bytes::from_static(b"x")),
        };
        let reject = Record::Reject {
            channel: 4,
            protocol: "bar".to_string(),
            discriminator: None,
        };

        let bytes = close.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 2 + 3 + 1 + 2 + 1);
        assert_eq!(bytes[HEADER_SIZE + 5], FLAG_DISCRIMINATOR);
        let mut buf = BytesMut::from(bytes.as_ref());
        assert_eq!(decode_one(&mut buf), close);

        let mut buf = BytesMut::from(reject.to_bytes().unwrap().as_ref());
        let decoded = decode_one(&mut buf);
        assert_eq!(decoded.key(), Some(("bar", None)));
        assert_eq!(decoded, reject);
    }

    #[test]
    fn test_decode_reject_with_handshake_flag() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(6);
        buf.put_u8(RecordKind::Reject as u8);
        buf.put_u32_le(1);
        buf.put_u16_le(3);
        buf.put_slice(b"foo");
        buf.put_u8(FLAG_HANDSHAKE);

        let result = decode_record(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(
            result,
            Err(FrameError::Malformed { kind: "reject", .. })
        ));
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x50, 0x4D, 0x00][..]);
        assert!(decode_record(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_incomplete_body() {
        let mut buf = BytesMut::new();
        encode_record(&open(1, "foo"), &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        assert!(decode_record(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF; HEADER_SIZE][..]);
        let result = decode_record(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(0);
        buf.put_u8(42);
        buf.put_u32_le(1);

        let result = decode_record(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::UnknownKind(42))));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024 * 1024 * 32); // 32 MiB
        buf.put_u8(RecordKind::Message as u8);
        buf.put_u32_le(1);

        let result = decode_record(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_decode_message_without_index() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(2);
        buf.put_u8(RecordKind::Message as u8);
        buf.put_u32_le(1);
        buf.put_slice(&[0, 0]);

        let result = decode_record(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(
            result,
            Err(FrameError::Malformed { kind: "message", .. })
        ));
    }

    #[test]
    fn test_decode_close_with_trailing_bytes() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(7);
        buf.put_u8(RecordKind::Close as u8);
        buf.put_u32_le(1);
        buf.put_u16_le(3);
        buf.put_slice(b"foo");
        buf.put_u8(0);
        buf.put_u8(0);

        let result = decode_record(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(
            result,
            Err(FrameError::Malformed { kind: "close", .. })
        ));
    }

    #[test]
    fn test_decode_open_with_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(5);
        buf.put_u8(RecordKind::Open as u8);
        buf.put_u32_le(1);
        buf.put_u16_le(2);
        buf.put_slice(&[0xC3, 0x28]);
        buf.put_u8(0);

        let result = decode_record(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidUtf8(_))));
    }

    #[test]
    fn test_decode_open_with_unknown_flags() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(6);
        buf.put_u8(RecordKind::Open as u8);
        buf.put_u32_le(1);
        buf.put_u16_le(3);
        buf.put_slice(b"foo");
        buf.put_u8(0x80);

        let result = decode_record(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::Malformed { .. })));
    }

    #[test]
    fn test_encode_rejects_oversized_protocol() {
        let record = open(1, &"x".repeat(MAX_FIELD_LEN + 1));
        let mut buf = BytesMut::new();
        let err = encode_record(&record, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::FieldTooLong {
                field: "protocol",
                ..
            }
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_records() {
        let mut buf = BytesMut::new();
        encode_record(&open(1, "first"), &mut buf).unwrap();
        encode_record(
            &Record::Message {
                channel: 2,
                index: 0,
                payload: Bytes::from_static(b"second"),
            },
            &mut buf,
        )
        .unwrap();

        assert_eq!(decode_one(&mut buf), open(1, "first"));
        let second = decode_one(&mut buf);
        assert_eq!(second.kind(), RecordKind::Message);
        assert_eq!(second.channel(), 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_kind_from_u8() {
        assert_eq!(RecordKind::try_from(1).unwrap(), RecordKind::Open);
        assert_eq!(RecordKind::try_from(4).unwrap(), RecordKind::Message);
        assert!(RecordKind::try_from(0).is_err());
        assert_eq!(RecordKind::Reject.to_string(), "reject");
    }
}
