//! Protocol codec for encoding/decoding envelopes
//!
//! Handles body serialization and the binary envelope frame that carries a
//! tagged body plus correlation metadata across the bus.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{Message, FRAME_VERSION, MAGIC_BYTES};

/// Maximum frame size (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Fixed header: magic(4) + version(1) + flags(1)
const HEADER_SIZE: usize = 6;

const FLAG_CORRELATION: u8 = 0x01;
const FLAG_REPLY_TO: u8 = 0x02;
const FLAG_BINCODE: u8 = 0x04;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Field too long: {0} bytes")]
    FieldTooLong(usize),

    #[error("Truncated frame")]
    Truncated,

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// Errors from serializing or deserializing a message body
#[derive(Error, Debug)]
pub enum BodyError {
    #[error("JSON body error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bincode body error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Byte encoding of a message body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// Field names and hyphenated UUIDs, readable by the JVM services
    #[default]
    Json,
    /// Compact positional encoding, Rust peers only
    Bincode,
}

impl BodyFormat {
    pub fn serialize<T: Serialize>(self, value: &T) -> Result<Vec<u8>, BodyError> {
        match self {
            BodyFormat::Json => Ok(serde_json::to_vec(value)?),
            BodyFormat::Bincode => Ok(bincode::serialize(value)?),
        }
    }

    pub fn deserialize<T: DeserializeOwned>(self, body: &[u8]) -> Result<T, BodyError> {
        match self {
            BodyFormat::Json => Ok(serde_json::from_slice(body)?),
            BodyFormat::Bincode => Ok(bincode::deserialize(body)?),
        }
    }
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyFormat::Json => f.write_str("json"),
            BodyFormat::Bincode => f.write_str("bincode"),
        }
    }
}

/// Opaque token pairing an RPC request with its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A typed message with its transport metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message: Message,
    pub correlation_id: Option<CorrelationId>,
    /// Topic the sender listens on for replies
    pub reply_to: Option<String>,
}

impl Envelope {
    pub fn new(message: impl Into<Message>) -> Self {
        Self {
            message: message.into(),
            correlation_id: None,
            reply_to: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_reply_to(mut self, topic: impl Into<String>) -> Self {
        self.reply_to = Some(topic.into());
        self
    }
}

/// An envelope as it travels on the wire, body still undecoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeFrame {
    pub tag: String,
    pub correlation_id: Option<CorrelationId>,
    pub reply_to: Option<String>,
    pub format: BodyFormat,
    pub body: Bytes,
}

impl EnvelopeFrame {
    /// Encode the frame into a buffer
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let mut flags = 0u8;
        if self.correlation_id.is_some() {
            flags |= FLAG_CORRELATION;
        }
        if self.reply_to.is_some() {
            flags |= FLAG_REPLY_TO;
        }
        if self.format == BodyFormat::Bincode {
            flags |= FLAG_BINCODE;
        }

        let size = self.encoded_len();
        if size > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(size, MAX_FRAME_SIZE));
        }
        buf.reserve(size);

        // Write header
        buf.put_slice(&MAGIC_BYTES);
        buf.put_u8(FRAME_VERSION);
        buf.put_u8(flags);

        put_short_str(buf, &self.tag)?;
        if let Some(id) = &self.correlation_id {
            buf.put_slice(id.as_uuid().as_bytes());
        }
        if let Some(reply_to) = &self.reply_to {
            put_short_str(buf, reply_to)?;
        }

        // Write body
        buf.put_u32(self.body.len() as u32);
        buf.put_slice(&self.body);

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one frame from `frame`
    pub fn decode(frame: &[u8], max_frame_size: usize) -> Result<Self, CodecError> {
        if frame.len() > max_frame_size {
            return Err(CodecError::FrameTooLarge(frame.len(), max_frame_size));
        }
        if frame.len() < HEADER_SIZE {
            return Err(CodecError::Truncated);
        }

        // Check magic bytes
        if frame[0..4] != MAGIC_BYTES {
            return Err(CodecError::InvalidMagic);
        }

        let mut buf = &frame[4..];
        let version = buf.get_u8();
        if version != FRAME_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let flags = buf.get_u8();

        let tag = get_short_str(&mut buf, "tag")?;

        let correlation_id = if flags & FLAG_CORRELATION != 0 {
            let raw = take(&mut buf, 16)?;
            let uuid = Uuid::from_slice(raw).map_err(|_| CodecError::Truncated)?;
            Some(CorrelationId::from_uuid(uuid))
        } else {
            None
        };

        let reply_to = if flags & FLAG_REPLY_TO != 0 {
            Some(get_short_str(&mut buf, "reply-to")?)
        } else {
            None
        };

        if buf.remaining() < 4 {
            return Err(CodecError::Truncated);
        }
        let length = buf.get_u32() as usize;
        let body = Bytes::copy_from_slice(take(&mut buf, length)?);

        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }

        let format = if flags & FLAG_BINCODE != 0 {
            BodyFormat::Bincode
        } else {
            BodyFormat::Json
        };

        Ok(Self {
            tag,
            correlation_id,
            reply_to,
            format,
            body,
        })
    }

    fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + 2
            + self.tag.len()
            + self.correlation_id.map_or(0, |_| 16)
            + self.reply_to.as_ref().map_or(0, |r| 2 + r.len())
            + 4
            + self.body.len()
    }
}

fn put_short_str(buf: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| CodecError::FieldTooLong(value.len()))?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_short_str(buf: &mut &[u8], what: &'static str) -> Result<String, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    let len = buf.get_u16() as usize;
    let raw = take(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8(what))
}

fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], CodecError> {
    if buf.len() < len {
        return Err(CodecError::Truncated);
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> EnvelopeFrame {
        EnvelopeFrame {
            tag: "com.bluedragonmc.messages.PartyListMessage".to_string(),
            correlation_id: Some(CorrelationId::new()),
            reply_to: Some("dragonbus.reply.lobby-1".to_string()),
            format: BodyFormat::Json,
            body: Bytes::from_static(br#"{"player":"00000000-0000-0000-0000-000000000001"}"#),
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let original = frame();
        let bytes = original.to_bytes().unwrap();
        let decoded = EnvelopeFrame::decode(&bytes, MAX_FRAME_SIZE).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_frame_without_metadata() {
        let original = EnvelopeFrame {
            correlation_id: None,
            reply_to: None,
            format: BodyFormat::Bincode,
            ..frame()
        };
        let bytes = original.to_bytes().unwrap();
        assert_eq!(bytes[5], FLAG_BINCODE);

        let decoded = EnvelopeFrame::decode(&bytes, MAX_FRAME_SIZE).unwrap();
        assert_eq!(decoded.correlation_id, None);
        assert_eq!(decoded.reply_to, None);
        assert_eq!(decoded.format, BodyFormat::Bincode);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let original = frame();
        assert_eq!(original.to_bytes().unwrap(), original.to_bytes().unwrap());
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = frame().to_bytes().unwrap().to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            EnvelopeFrame::decode(&bytes, MAX_FRAME_SIZE),
            Err(CodecError::InvalidMagic)
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = frame().to_bytes().unwrap().to_vec();
        bytes[4] = 9;
        assert!(matches!(
            EnvelopeFrame::decode(&bytes, MAX_FRAME_SIZE),
            Err(CodecError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_truncated_and_trailing() {
        let bytes = frame().to_bytes().unwrap();
        for cut in [3, HEADER_SIZE, bytes.len() - 1] {
            assert!(matches!(
                EnvelopeFrame::decode(&bytes[..cut], MAX_FRAME_SIZE),
                Err(CodecError::Truncated)
            ));
        }

        let mut padded = bytes.to_vec();
        padded.extend_from_slice(&[0, 0]);
        assert!(matches!(
            EnvelopeFrame::decode(&padded, MAX_FRAME_SIZE),
            Err(CodecError::TrailingBytes(2))
        ));
    }

    #[test]
    fn test_frame_size_limit() {
        let bytes = frame().to_bytes().unwrap();
        assert!(matches!(
            EnvelopeFrame::decode(&bytes, 16),
            Err(CodecError::FrameTooLarge(_, 16))
        ));
    }
}
