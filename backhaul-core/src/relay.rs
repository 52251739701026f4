//! Bidirectional relay between two byte streams
//!
//! Both copy directions run inside the calling task. The relay ends when
//! either direction finishes (EOF or error); the other direction is
//! cancelled and both endpoints are dropped, which closes them.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Which copy finished first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AToB,
    BToA,
}

/// Byte counts for a finished relay
#[derive(Debug)]
pub struct RelayStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
    pub finished: Direction,
    /// Set when the finishing copy ended with an error rather than EOF
    pub error: Option<io::Error>,
}

/// Counts bytes read through it
struct Metered<R> {
    inner: R,
    bytes: u64,
}

impl<R: AsyncRead + Unpin> AsyncRead for Metered<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            self.bytes += (buf.filled().len() - before) as u64;
        }
        poll
    }
}

/// Copy `a` to `b` and `b` to `a` until the first direction completes.
pub async fn relay<A, B>(a: A, b: B) -> RelayStats
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (a_read, mut a_write) = tokio::io::split(a);
    let (b_read, mut b_write) = tokio::io::split(b);
    let mut a_read = Metered {
        inner: a_read,
        bytes: 0,
    };
    let mut b_read = Metered {
        inner: b_read,
        bytes: 0,
    };

    let (finished, result) = tokio::select! {
        r = tokio::io::copy(&mut a_read, &mut b_write) => (Direction::AToB, r),
        r = tokio::io::copy(&mut b_read, &mut a_write) => (Direction::BToA, r),
    };

    RelayStats {
        a_to_b: a_read.bytes,
        b_to_a: b_read.bytes,
        finished,
        error: result.err(),
    }
}
