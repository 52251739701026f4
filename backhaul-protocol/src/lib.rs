//! `backhaul` wire protocol
//!
//! Two layers travel over the single client-initiated TCP connection:
//! the multiplexer frames ([`Frame`], [`TunnelCodec`]) that carry many logical
//! streams, and the control-channel exchange ([`ControlMessage`]) run on the
//! first logical stream.

pub mod codec;
pub mod constants;
pub mod control;
pub mod frame;

pub use codec::TunnelCodec;
pub use control::{ControlError, ControlMessage};
pub use frame::{CloseReason, Frame, FrameType};
