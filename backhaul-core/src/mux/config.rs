use backhaul_common::constants::{
    DEFAULT_ACCEPT_BACKLOG, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_MAX_STREAMS,
    DEFAULT_WRITE_TIMEOUT,
};
use backhaul_protocol::constants::MAX_FRAME_SIZE;
use std::time::Duration;

/// Which side of a session this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates logical streams; allocates odd stream ids
    Opener,
    /// Receives logical streams; never opens its own
    Acceptor,
}

impl Role {
    pub(crate) fn first_stream_id(self) -> u32 {
        match self {
            Role::Opener => 1,
            Role::Acceptor => 2,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Opener => f.write_str("opener"),
            Role::Acceptor => f.write_str("acceptor"),
        }
    }
}

/// Multiplexed session settings
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Bound on every physical write and on queueing an `OpenStream` frame
    pub write_timeout: Duration,
    /// Ping interval; `None` disables keepalive
    pub keepalive_interval: Option<Duration>,
    /// Concurrent logical streams per session
    pub max_streams: usize,
    /// Inbound streams waiting for `accept_stream`
    pub accept_backlog: usize,
    /// Largest frame payload accepted from the peer
    pub max_frame_size: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            max_streams: DEFAULT_MAX_STREAMS,
            accept_backlog: DEFAULT_ACCEPT_BACKLOG,
            max_frame_size: MAX_FRAME_SIZE as usize,
        }
    }
}

impl MuxConfig {
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }
}
