//! Bounded-retry stream opening for the server side

use crate::mux::{Session, VirtualStream};
use backhaul_common::constants::{STREAM_OPEN_ATTEMPTS, STREAM_OPEN_RETRY_DELAY};
use backhaul_common::{MuxError, Result, TunnelError};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Anything that can open logical streams
pub trait StreamSource {
    type Stream;

    fn open_stream(&self) -> impl Future<Output = std::result::Result<Self::Stream, MuxError>> + Send;
}

impl StreamSource for Session {
    type Stream = VirtualStream;

    fn open_stream(
        &self,
    ) -> impl Future<Output = std::result::Result<VirtualStream, MuxError>> + Send {
        Session::open_stream(self)
    }
}

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: STREAM_OPEN_ATTEMPTS,
            delay: STREAM_OPEN_RETRY_DELAY,
        }
    }
}

/// Open a stream, retrying only when the session is temporarily out of
/// streams or timed out. Any other error is returned immediately.
pub async fn open_with_retry<S>(source: &S, policy: RetryPolicy) -> Result<S::Stream>
where
    S: StreamSource + Sync,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match source.open_stream().await {
            Ok(stream) => return Ok(stream),
            Err(e) if !e.is_retryable() => return Err(e.into()),
            Err(e) if attempt >= max_attempts => {
                return Err(TunnelError::RetryExhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                debug!(attempt, error = %e, "Stream open failed, retrying");
                #[cfg(feature = "metrics")]
                backhaul_observability::metrics::record_stream_open_retry();
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` calls with `error`, then succeeds
    struct Flaky {
        failures: u32,
        error: MuxError,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: MuxError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl StreamSource for Flaky {
        type Stream = u32;

        fn open_stream(&self) -> impl Future<Output = std::result::Result<u32, MuxError>> + Send {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let result = if call <= self.failures {
                Err(self.error)
            } else {
                Ok(call)
            };
            async move { result }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_fifth_attempt_after_four_waits() {
        let source = Flaky::new(4, MuxError::StreamsExhausted);
        let start = Instant::now();

        let attempt = open_with_retry(&source, RetryPolicy::default()).await.unwrap();

        assert_eq!(attempt, 5);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_five_attempts() {
        let source = Flaky::new(u32::MAX, MuxError::Timeout);
        let start = Instant::now();

        let err = open_with_retry(&source, RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TunnelError::RetryExhausted {
                attempts: 5,
                last: MuxError::Timeout
            }
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        // No wait after the final attempt
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_does_not_wait() {
        let source = Flaky::new(0, MuxError::Timeout);
        let start = Instant::now();
        assert_eq!(
            open_with_retry(&source, RetryPolicy::default()).await.unwrap(),
            1
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let source = Flaky::new(u32::MAX, MuxError::SessionClosed);

        let err = open_with_retry(&source, RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::Mux(MuxError::SessionClosed)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_source_reports_wrong_role() {
        let (a, _b) = tokio::io::duplex(1024);
        let session = Session::new(a, crate::mux::Role::Acceptor, crate::mux::MuxConfig::default());
        let err = open_with_retry(&session, RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Mux(MuxError::WrongRole)));
    }
}
