//! Per-stream flow control
//!
//! Each side may have at most [`INITIAL_STREAM_WINDOW`] unread bytes in
//! flight on a logical stream. The receiver returns credit with
//! `WindowUpdate` frames as the application reads, so the session reader
//! hands data to a stream without ever waiting on it.

use backhaul_protocol::constants::INITIAL_STREAM_WINDOW;
use futures::task::AtomicWaker;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

/// Consumed bytes are returned to the peer once this many have accumulated
pub(crate) const WINDOW_UPDATE_THRESHOLD: usize = INITIAL_STREAM_WINDOW as usize / 2;

#[derive(Debug)]
pub(crate) struct StreamWindow {
    /// Bytes this side may still send
    send_credit: AtomicUsize,
    /// Bytes received from the peer and not yet read
    buffered: AtomicUsize,
    reset: AtomicBool,
    writer: AtomicWaker,
}

impl StreamWindow {
    pub(crate) fn new() -> Self {
        Self {
            send_credit: AtomicUsize::new(INITIAL_STREAM_WINDOW as usize),
            buffered: AtomicUsize::new(0),
            reset: AtomicBool::new(false),
            writer: AtomicWaker::new(),
        }
    }

    /// Take up to `want` bytes of send credit.
    ///
    /// Resolves to `None` once the stream was reset or the session died.
    pub(crate) fn poll_reserve(&self, cx: &mut Context<'_>, want: usize) -> Poll<Option<usize>> {
        loop {
            if self.is_reset() {
                return Poll::Ready(None);
            }
            let credit = self.send_credit.load(Ordering::Acquire);
            if credit == 0 {
                self.writer.register(cx.waker());
                // Credit or a reset may have landed before the waker was stored
                if self.send_credit.load(Ordering::Acquire) == 0 && !self.is_reset() {
                    return Poll::Pending;
                }
                continue;
            }
            let take = credit.min(want);
            if self
                .send_credit
                .compare_exchange(credit, credit - take, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Poll::Ready(Some(take));
            }
        }
    }

    /// Credit returned by the peer.
    pub(crate) fn grant(&self, credit: usize) {
        let _ = self
            .send_credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_add(credit))
            });
        self.writer.wake();
    }

    /// Record `len` bytes arriving from the peer.
    ///
    /// Returns `false` when the peer sent more than the window allows.
    pub(crate) fn receive(&self, len: usize) -> bool {
        let buffered = self.buffered.fetch_add(len, Ordering::AcqRel) + len;
        buffered <= INITIAL_STREAM_WINDOW as usize
    }

    /// Record `len` bytes handed to the application.
    pub(crate) fn consume(&self, len: usize) {
        self.buffered.fetch_sub(len, Ordering::AcqRel);
    }

    pub(crate) fn reset(&self) {
        self.reset.store(true, Ordering::Release);
        self.writer.wake();
    }

    pub(crate) fn is_reset(&self) -> bool {
        self.reset.load(Ordering::Acquire)
    }
}
