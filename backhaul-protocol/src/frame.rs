//! Multiplexer frame definitions

use bytes::Bytes;

/// Wire protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload bytes for one logical stream
    Data { stream_id: u32, data: Bytes },

    /// Announce a new logical stream (sent by the opening side only)
    OpenStream { stream_id: u32 },

    /// Close a logical stream
    CloseStream { stream_id: u32, reason: CloseReason },

    /// Return `credit` bytes of send window for a logical stream
    WindowUpdate { stream_id: u32, credit: u32 },

    // Keepalive
    /// Keepalive request
    Ping { nonce: u64 },

    /// Keepalive reply
    Pong { nonce: u64 },

    /// The sender is tearing the whole session down
    GoAway,
}

impl Frame {
    /// Stream this frame belongs to; session-level frames use stream 0.
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::OpenStream { stream_id }
            | Frame::CloseStream { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. } => *stream_id,
            Frame::Ping { .. } | Frame::Pong { .. } | Frame::GoAway => {
                crate::constants::SESSION_STREAM_ID
            }
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Data { .. } => FrameType::Data,
            Frame::OpenStream { .. } => FrameType::OpenStream,
            Frame::CloseStream { .. } => FrameType::CloseStream,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::GoAway => FrameType::GoAway,
            Frame::WindowUpdate { .. } => FrameType::WindowUpdate,
        }
    }
}

/// Frame type tag as carried in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0,
    OpenStream = 1,
    CloseStream = 2,
    Ping = 3,
    Pong = 4,
    GoAway = 5,
    WindowUpdate = 6,
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::OpenStream),
            2 => Ok(FrameType::CloseStream),
            3 => Ok(FrameType::Ping),
            4 => Ok(FrameType::Pong),
            5 => Ok(FrameType::GoAway),
            6 => Ok(FrameType::WindowUpdate),
            other => Err(other),
        }
    }
}

/// Stream close reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseReason {
    /// Orderly close after the sender finished writing
    Normal = 0,
    /// The receiving side would not take the stream (wrong role, stream cap)
    Refused = 1,
    /// Abortive close
    Reset = 2,
}

impl TryFrom<u8> for CloseReason {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CloseReason::Normal),
            1 => Ok(CloseReason::Refused),
            2 => Ok(CloseReason::Reset),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_frames_use_stream_zero() {
        assert_eq!(Frame::Ping { nonce: 7 }.stream_id(), 0);
        assert_eq!(Frame::Pong { nonce: 7 }.stream_id(), 0);
        assert_eq!(Frame::GoAway.stream_id(), 0);
        assert_eq!(Frame::OpenStream { stream_id: 5 }.stream_id(), 5);
        assert_eq!(
            Frame::WindowUpdate {
                stream_id: 3,
                credit: 1
            }
            .stream_id(),
            3
        );
    }

    #[test]
    fn test_frame_type_tags() {
        for tag in 0u8..=6 {
            let ty = FrameType::try_from(tag).unwrap();
            assert_eq!(ty as u8, tag);
        }
        assert_eq!(FrameType::try_from(7), Err(7));
    }

    #[test]
    fn test_close_reason_tags() {
        assert_eq!(CloseReason::try_from(1), Ok(CloseReason::Refused));
        assert_eq!(CloseReason::try_from(9), Err(9));
    }
}
