//! Frame codec

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use super::MediaError;

/// Type byte plus big-endian length
pub const HEADER_LEN: usize = 3;
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Carries the call identifier; first frame of every connection
    Handshake,
    /// Caller audio, switch to us
    InboundAudio,
    /// Synthesized audio, us to switch
    OutboundAudio,
    Hangup,
    Error,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Handshake),
            0x01 => Some(Self::InboundAudio),
            0x02 => Some(Self::OutboundAudio),
            0x10 => Some(Self::Hangup),
            0x11 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Handshake => 0x00,
            Self::InboundAudio => 0x01,
            Self::OutboundAudio => 0x02,
            Self::Hangup => 0x10,
            Self::Error => 0x11,
        }
    }
}

/// One frame as read off the wire. The type byte is kept raw so that
/// unknown types can be reported and skipped by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: kind.as_byte(),
            payload: payload.into(),
        }
    }

    pub fn audio(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::OutboundAudio, payload)
    }

    pub fn hangup() -> Self {
        Self::new(FrameType::Hangup, Bytes::new())
    }

    pub fn error(message: &str) -> Self {
        Self::new(FrameType::Error, Bytes::copy_from_slice(message.as_bytes()))
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_byte(self.kind)
    }
}

/// Length-prefixed frame codec; keeps partial frames buffered until the
/// rest arrives.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = MediaError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, MediaError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let kind = src[0];
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { kind, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = MediaError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), MediaError> {
        if frame.payload.len() > MAX_PAYLOAD {
            return Err(MediaError::PayloadTooLarge(frame.payload.len()));
        }
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.kind);
        dst.put_u16(frame.payload.len() as u16);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Call identifier from a handshake payload: 16 raw bytes are a UUID,
/// anything else must be a non-empty UTF-8 string.
pub fn parse_call_id(payload: &[u8]) -> Result<String, MediaError> {
    if payload.len() == 16 {
        if let Ok(id) = Uuid::from_slice(payload) {
            return Ok(id.to_string());
        }
    }

    let text = std::str::from_utf8(payload)
        .map_err(|_| MediaError::Handshake("call id is neither a UUID nor UTF-8".to_string()))?
        .trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if text.is_empty() {
        return Err(MediaError::Handshake("empty call id".to_string()));
    }
    Ok(text.to_string())
}
