//! Codec for encoding and decoding multiplexer frames

use crate::constants::{FRAME_HEADER_LEN, MAX_FRAME_SIZE, SESSION_STREAM_ID};
use crate::frame::{CloseReason, Frame, FrameType};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Tunnel protocol codec
///
/// Each frame is a fixed header followed by the payload:
/// ```text
/// ┌──────────┬────────────────┬──────────────┬──────────────┐
/// │ Type (u8)│ Stream ID (u32)│ Length (u32) │ Payload      │
/// │ 1 byte   │ 4 bytes        │ 4 bytes      │ Length bytes │
/// └──────────┴────────────────┴──────────────┴──────────────┘
/// ```
/// Integers are big-endian.
#[derive(Debug, Clone, Copy)]
pub struct TunnelCodec {
    max_frame_size: usize,
}

impl Default for TunnelCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE as usize,
        }
    }
}

impl TunnelCodec {
    /// Create a new codec instance with default max frame size
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new codec instance with a custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Get the configured max frame size
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_len(&self, len: usize) -> io::Result<()> {
        if len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame too large: {len} bytes (max: {})",
                    self.max_frame_size
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_nonce(payload: &Bytes) -> io::Result<u64> {
    let bytes: [u8; 8] = payload
        .as_ref()
        .try_into()
        .map_err(|_| invalid(format!("Bad nonce length: {}", payload.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

impl Decoder for TunnelCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        // Peek the header without consuming it
        let tag = src[0];
        let stream_id = u32::from_be_bytes([src[1], src[2], src[3], src[4]]);
        let length = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) as usize;

        self.check_len(length)?;

        let frame_type =
            FrameType::try_from(tag).map_err(|t| invalid(format!("Unknown frame type: {t}")))?;

        if src.len() < FRAME_HEADER_LEN + length {
            src.reserve(FRAME_HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(length).freeze();

        let frame = match frame_type {
            FrameType::Data => Frame::Data {
                stream_id,
                data: payload,
            },
            FrameType::OpenStream => {
                if stream_id == SESSION_STREAM_ID {
                    return Err(invalid("OpenStream on reserved stream 0"));
                }
                Frame::OpenStream { stream_id }
            }
            FrameType::CloseStream => {
                let code = *payload
                    .first()
                    .ok_or_else(|| invalid("CloseStream without reason"))?;
                let reason = CloseReason::try_from(code)
                    .map_err(|c| invalid(format!("Unknown close reason: {c}")))?;
                Frame::CloseStream { stream_id, reason }
            }
            FrameType::Ping => Frame::Ping {
                nonce: read_nonce(&payload)?,
            },
            FrameType::Pong => Frame::Pong {
                nonce: read_nonce(&payload)?,
            },
            FrameType::GoAway => Frame::GoAway,
            FrameType::WindowUpdate => {
                let bytes: [u8; 4] = payload
                    .as_ref()
                    .try_into()
                    .map_err(|_| invalid(format!("Bad window update length: {}", payload.len())))?;
                Frame::WindowUpdate {
                    stream_id,
                    credit: u32::from_be_bytes(bytes),
                }
            }
        };

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for TunnelCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let stream_id = frame.stream_id();
        let frame_type = frame.frame_type();

        match frame {
            Frame::Data { data, .. } => {
                self.check_len(data.len())?;
                dst.reserve(FRAME_HEADER_LEN + data.len());
                put_header(dst, frame_type, stream_id, data.len());
                dst.put_slice(&data);
            }
            Frame::OpenStream { .. } | Frame::GoAway => {
                dst.reserve(FRAME_HEADER_LEN);
                put_header(dst, frame_type, stream_id, 0);
            }
            Frame::CloseStream { reason, .. } => {
                dst.reserve(FRAME_HEADER_LEN + 1);
                put_header(dst, frame_type, stream_id, 1);
                dst.put_u8(reason as u8);
            }
            Frame::Ping { nonce } | Frame::Pong { nonce } => {
                dst.reserve(FRAME_HEADER_LEN + 8);
                put_header(dst, frame_type, stream_id, 8);
                dst.put_u64(nonce);
            }
            Frame::WindowUpdate { credit, .. } => {
                dst.reserve(FRAME_HEADER_LEN + 4);
                put_header(dst, frame_type, stream_id, 4);
                dst.put_u32(credit);
            }
        }

        Ok(())
    }
}

fn put_header(dst: &mut BytesMut, frame_type: FrameType, stream_id: u32, len: usize) {
    dst.put_u8(frame_type as u8);
    dst.put_u32(stream_id);
    // Length already validated against max_frame_size, which fits in u32
    dst.put_u32(len as u32);
}
