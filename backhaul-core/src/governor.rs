//! Fault containment for accept loops
//!
//! Every blocking `accept` on the control port and on gateway listeners goes
//! through an [`AcceptGovernor`]. A closed listener is fatal at once;
//! transient errors are tolerated until ten of them land with no gap longer
//! than the reset window between consecutive ones.

use backhaul_common::constants::{ACCEPT_ERROR_THRESHOLD, ACCEPT_ERROR_WINDOW};
use backhaul_common::{Result, TunnelError};
use std::io;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

/// What the accept loop should do after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Fatal,
}

/// Per-loop error window; owned by the single task running the loop
#[derive(Debug)]
pub struct AcceptGovernor {
    listener: &'static str,
    window: Duration,
    threshold: u32,
    last_error: Option<Instant>,
    consecutive: u32,
}

impl AcceptGovernor {
    /// `listener` names the loop in logs and metrics (`control`, `gateway`).
    pub fn new(listener: &'static str) -> Self {
        Self {
            listener,
            window: ACCEPT_ERROR_WINDOW,
            threshold: ACCEPT_ERROR_THRESHOLD,
            last_error: None,
            consecutive: 0,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive
    }

    /// Account for an accept error at `now`.
    pub fn record(&mut self, listener_closed: bool, now: Instant) -> Verdict {
        if listener_closed {
            return Verdict::Fatal;
        }

        let stale = self
            .last_error
            .is_none_or(|last| now.saturating_duration_since(last) > self.window);
        if stale {
            self.consecutive = 0;
        }
        self.consecutive += 1;
        self.last_error = Some(now);

        if self.consecutive >= self.threshold {
            Verdict::Fatal
        } else {
            Verdict::Continue
        }
    }

    /// Account for `err`; a fatal verdict becomes [`TunnelError::Fatal`].
    pub fn on_error(&mut self, err: &io::Error) -> Result<()> {
        #[cfg(feature = "metrics")]
        backhaul_observability::metrics::record_accept_error(self.listener);

        let closed = is_listener_closed(err);
        match self.record(closed, Instant::now()) {
            Verdict::Continue => {
                warn!(
                    listener = self.listener,
                    consecutive = self.consecutive,
                    "Accept failed: {}",
                    err
                );
                Ok(())
            }
            Verdict::Fatal => {
                error!(
                    listener = self.listener,
                    consecutive = self.consecutive,
                    listener_closed = closed,
                    "Accept loop cannot continue: {}",
                    err
                );
                Err(TunnelError::Fatal(format!(
                    "{} listener accept failed: {err}",
                    self.listener
                )))
            }
        }
    }
}

/// OS error codes an accept returns once the socket was closed or stopped listening
#[cfg(unix)]
const LISTENER_GONE: &[i32] = &[
    9,  // EBADF
    22, // EINVAL
];
#[cfg(windows)]
const LISTENER_GONE: &[i32] = &[
    10038, // WSAENOTSOCK
    10022, // WSAEINVAL
];
#[cfg(not(any(unix, windows)))]
const LISTENER_GONE: &[i32] = &[];

/// Whether an accept error means the listening socket itself is gone.
pub fn is_listener_closed(err: &io::Error) -> bool {
    err.raw_os_error()
        .is_some_and(|code| LISTENER_GONE.contains(&code))
        || matches!(
            err.kind(),
            io::ErrorKind::NotConnected | io::ErrorKind::InvalidInput
        )
}
