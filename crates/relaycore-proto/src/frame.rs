//! Multiplexed frame format (spec §4.2, §6 "Wire formats").
//!
//! The spec leaves the exact bit layout open ("implementations must choose
//! one and document it"). This is a 10-byte header — stream id, type,
//! flags, length — followed by the payload, the same shape used
//! throughout this codebase's mux-capable transports.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub type StreamId = u32;

/// Stream id reserved for connection-level control frames (ping, go-away).
pub const CONTROL_STREAM_ID: StreamId = 0;

/// Maximum payload size of a single frame.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0,
    WindowUpdate = 1,
    Ping = 2,
    GoAway = 3,
    Fin = 4,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::WindowUpdate),
            2 => Ok(FrameType::Ping),
            3 => Ok(FrameType::GoAway),
            4 => Ok(FrameType::Fin),
            other => Err(FrameError::InvalidFrameType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const ACK: u8 = 0b0000_0001;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_ack(mut self) -> Self {
        self.0 |= Self::ACK;
        self
    }

    pub fn has_ack(&self) -> bool {
        self.0 & Self::ACK != 0
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn from_u8(v: u8) -> Self {
        Self(v)
    }
}

/// A single multiplexed frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub stream_id: StreamId,
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    pub payload: Bytes,
}

impl Frame {
    /// stream_id(4) + frame_type(1) + flags(1) + length(4)
    pub const HEADER_SIZE: usize = 10;

    pub fn new(stream_id: StreamId, frame_type: FrameType, payload: Bytes) -> Self {
        Self { stream_id, frame_type, flags: FrameFlags::new(), payload }
    }

    pub fn data(stream_id: StreamId, payload: Bytes) -> Self {
        Self::new(stream_id, FrameType::Data, payload)
    }

    pub fn window_update(stream_id: StreamId, increment: u32) -> Self {
        Self::new(stream_id, FrameType::WindowUpdate, Bytes::copy_from_slice(&increment.to_be_bytes()))
    }

    pub fn ping() -> Self {
        Self::new(CONTROL_STREAM_ID, FrameType::Ping, Bytes::new())
    }

    pub fn go_away() -> Self {
        Self::new(CONTROL_STREAM_ID, FrameType::GoAway, Bytes::new())
    }

    pub fn fin(stream_id: StreamId) -> Self {
        Self::new(stream_id, FrameType::Fin, Bytes::new())
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let len = self.payload.len();
        if len > MAX_FRAME_SIZE as usize {
            return Err(FrameError::FrameTooLarge(len));
        }
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + len);
        buf.put_u32(self.stream_id);
        buf.put_u8(self.frame_type as u8);
        buf.put_u8(self.flags.as_u8());
        buf.put_u32(len as u32);
        buf.put(self.payload.clone());
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, FrameError> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(FrameError::Incomplete);
        }
        let stream_id = buf.get_u32();
        let frame_type = FrameType::try_from(buf.get_u8())?;
        let flags = FrameFlags::from_u8(buf.get_u8());
        let length = buf.get_u32();
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length as usize));
        }
        if buf.remaining() < length as usize {
            return Err(FrameError::Incomplete);
        }
        let payload = buf.split_to(length as usize);
        Ok(Self { stream_id, frame_type, flags, payload })
    }

    /// Try to decode one frame from the front of `buf`, consuming it on
    /// success. Returns `Ok(None)` when more bytes are needed.
    pub fn decode_from_buf(buf: &mut BytesMut) -> Result<Option<Self>, FrameError> {
        if buf.len() < Self::HEADER_SIZE {
            return Ok(None);
        }
        let length = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
        if length > MAX_FRAME_SIZE as usize {
            return Err(FrameError::FrameTooLarge(length));
        }
        if buf.len() < Self::HEADER_SIZE + length {
            return Ok(None);
        }
        let frame_bytes = buf.split_to(Self::HEADER_SIZE + length).freeze();
        Ok(Some(Self::decode(frame_bytes)?))
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame type: {0}")]
    InvalidFrameType(u8),
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("incomplete frame")]
    Incomplete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_data_frame() {
        let payload = Bytes::from_static(b"hello world");
        let frame = Frame::data(42, payload.clone());
        let encoded = frame.encode().unwrap();
        let decoded = Frame::decode(encoded).unwrap();
        assert_eq!(decoded.stream_id, 42);
        assert_eq!(decoded.frame_type, FrameType::Data);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn ping_and_go_away_use_control_stream() {
        assert_eq!(Frame::ping().stream_id, CONTROL_STREAM_ID);
        assert_eq!(Frame::go_away().stream_id, CONTROL_STREAM_ID);
    }

    #[test]
    fn decode_from_buf_waits_for_full_frame() {
        let frame = Frame::data(7, Bytes::from_static(b"partial-test"));
        let encoded = frame.encode().unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..5]);
        assert!(Frame::decode_from_buf(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&encoded[5..]);
        let decoded = Frame::decode_from_buf(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.stream_id, 7);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(FrameType::Data as u8);
        buf.put_u8(0);
        buf.put_u32(MAX_FRAME_SIZE + 1);
        assert!(matches!(Frame::decode_from_buf(&mut buf), Err(FrameError::FrameTooLarge(_))));
    }
}
