//! Protocol constants

/// Size of the multiplexer frame header: type (1) + stream id (4) + length (4).
pub const FRAME_HEADER_LEN: usize = 9;

/// Maximum frame payload size (16MB)
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Largest payload a logical stream puts into a single data frame.
pub const MAX_DATA_FRAME_PAYLOAD: usize = 64 * 1024;

/// Unread bytes either side may have in flight per logical stream before
/// the receiver hands credit back with a window update.
pub const INITIAL_STREAM_WINDOW: u32 = 256 * 1024;

/// Stream id reserved for session-level frames (ping, pong, go-away).
pub const SESSION_STREAM_ID: u32 = 0;

/// Length of the shared secret the client presents on the control stream.
pub const AUTH_SECRET_LEN: usize = 36;

/// Fixed width of the control message the server sends after authentication.
pub const CONTROL_MESSAGE_LEN: usize = 80;

/// Field separator inside the control message.
pub const CONTROL_FIELD_SEPARATOR: char = ',';
