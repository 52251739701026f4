//! Default ports, addresses and timings for backhaul services.
//!
//! Use these constants instead of magic numbers so defaults stay consistent
//! across the main library, CLI, and tests.

use std::time::Duration;

/// Default port for the tunnel control plane (client dials this).
pub const DEFAULT_CONTROL_PORT: u16 = 7835;

/// Default bind address for the server's control and gateway listeners.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Default domain announced to clients in the control message.
pub const DEFAULT_DOMAIN_NAME: &str = "localhost";

/// Default local service address the client relays to.
pub const DEFAULT_LOCAL_ADDR: &str = "127.0.0.1:8080";

/// Write timeout applied to every physical write of a multiplexed session.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between multiplexer keepalive pings.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum concurrent logical streams per session.
pub const DEFAULT_MAX_STREAMS: usize = 1024;

/// Inbound streams queued for `accept_stream` before new ones are refused.
pub const DEFAULT_ACCEPT_BACKLOG: usize = 256;

/// Attempts made by the retrying stream opener before giving up.
pub const STREAM_OPEN_ATTEMPTS: u32 = 5;

/// Fixed delay between stream-open attempts.
pub const STREAM_OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Transient accept errors further apart than this reset the counter.
pub const ACCEPT_ERROR_WINDOW: Duration = Duration::from_secs(10);

/// Consecutive transient accept errors that terminate the process.
pub const ACCEPT_ERROR_THRESHOLD: u32 = 10;
