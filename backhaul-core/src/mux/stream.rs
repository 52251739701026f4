//! Logical stream implementing `AsyncRead` + `AsyncWrite`

use super::session::Shared;
use super::window::{StreamWindow, WINDOW_UPDATE_THRESHOLD};
use crate::resource_limits::StreamPermit;
use backhaul_protocol::constants::MAX_DATA_FRAME_PAYLOAD;
use backhaul_protocol::{CloseReason, Frame};
use bytes::{Buf, Bytes};
use kanal::SendError;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// Boxed future type for queueing frames
type SendFuture = Pin<Box<dyn Future<Output = Result<(), SendError>> + Send>>;

/// A logical stream on a [`Session`](super::Session)
///
/// Reads yield the peer's bytes in order and EOF once the peer closes the
/// stream or the session dies. Writes are split into data frames of at most
/// 64 KiB and park while the peer's window is exhausted. The polling implementation uses boxed futures to bridge kanal's
/// async API with tokio's poll-based traits.
pub struct VirtualStream {
    stream_id: u32,
    rx: mpsc::UnboundedReceiver<Bytes>,
    read_buffer: Bytes,
    window: Arc<StreamWindow>,
    /// Bytes read since the last window update
    unacked: usize,
    shared: Arc<Shared>,
    /// Pending send for `poll_write` and the number of bytes it carries
    pending_write: Option<(SendFuture, usize)>,
    /// Pending `CloseStream` for `poll_shutdown`
    pending_close: Option<SendFuture>,
    close_sent: bool,
    _permit: StreamPermit,
}

impl std::fmt::Debug for VirtualStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualStream")
            .field("stream_id", &self.stream_id)
            .field("read_buffer_len", &self.read_buffer.len())
            .field("close_sent", &self.close_sent)
            .finish_non_exhaustive()
    }
}

impl VirtualStream {
    pub(crate) fn new(
        stream_id: u32,
        rx: mpsc::UnboundedReceiver<Bytes>,
        window: Arc<StreamWindow>,
        shared: Arc<Shared>,
        permit: StreamPermit,
    ) -> Self {
        Self {
            stream_id,
            rx,
            read_buffer: Bytes::new(),
            window,
            unacked: 0,
            shared,
            pending_write: None,
            pending_close: None,
            close_sent: false,
            _permit: permit,
        }
    }

    pub fn id(&self) -> u32 {
        self.stream_id
    }

    fn queue(&self, frame: Frame) -> SendFuture {
        let tx = self.shared.frame_tx.clone();
        Box::pin(async move { tx.send(frame).await })
    }

    fn copy_out(&mut self, buf: &mut ReadBuf<'_>) {
        let len = buf.remaining().min(self.read_buffer.len());
        buf.put_slice(&self.read_buffer[..len]);
        self.read_buffer.advance(len);
        self.return_credit(len);
    }

    fn return_credit(&mut self, len: usize) {
        self.window.consume(len);
        self.unacked += len;
        if self.unacked < WINDOW_UPDATE_THRESHOLD
            || self.window.is_reset()
            || self.shared.shutdown.is_cancelled()
        {
            return;
        }
        // Never exceeds the stream window, which fits in u32
        let credit = self.unacked as u32;
        self.unacked = 0;
        send_detached(
            &self.shared,
            Frame::WindowUpdate {
                stream_id: self.stream_id,
                credit,
            },
        );
    }
}

/// Queue a frame without waiting, spawning the send if the queue is full.
fn send_detached(shared: &Shared, frame: Frame) {
    if matches!(shared.frame_tx.try_send(frame.clone()), Ok(true)) {
        return;
    }
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let tx = shared.frame_tx.clone();
        handle.spawn(async move {
            let _ = tx.send(frame).await;
        });
    }
}

fn broken_pipe(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, msg.to_string())
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.shared.streams.remove(&self.stream_id);

        if self.close_sent || self.window.is_reset() || self.shared.shutdown.is_cancelled() {
            return;
        }
        send_detached(
            &self.shared,
            Frame::CloseStream {
                stream_id: self.stream_id,
                reason: CloseReason::Reset,
            },
        );
    }
}

impl AsyncRead for VirtualStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // First, drain any buffered data
        if !self.read_buffer.is_empty() {
            self.copy_out(buf);
            return Poll::Ready(Ok(()));
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(data)) => {
                self.read_buffer = data;
                self.copy_out(buf);
                Poll::Ready(Ok(()))
            }
            // Peer closed the stream or the session died
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for VirtualStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        // A previous write is still queueing; the caller retries with the same buffer
        if let Some((fut, len)) = self.pending_write.as_mut() {
            let len = *len;
            return match fut.as_mut().poll(cx) {
                Poll::Ready(result) => {
                    self.pending_write = None;
                    match result {
                        Ok(()) => Poll::Ready(Ok(len)),
                        Err(_) => Poll::Ready(Err(broken_pipe("session closed"))),
                    }
                }
                Poll::Pending => Poll::Pending,
            };
        }

        if self.close_sent || self.pending_close.is_some() {
            return Poll::Ready(Err(broken_pipe("stream already shut down")));
        }
        if self.shared.shutdown.is_cancelled() {
            return Poll::Ready(Err(broken_pipe("session closed")));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let want = buf.len().min(MAX_DATA_FRAME_PAYLOAD);
        let len = match self.window.poll_reserve(cx, want) {
            Poll::Ready(Some(len)) => len,
            Poll::Ready(None) => return Poll::Ready(Err(broken_pipe("stream reset by peer"))),
            Poll::Pending => return Poll::Pending,
        };
        let frame = Frame::Data {
            stream_id: self.stream_id,
            data: Bytes::copy_from_slice(&buf[..len]),
        };
        let mut fut = self.queue(frame);

        match fut.as_mut().poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(len)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(broken_pipe("session closed"))),
            Poll::Pending => {
                self.pending_write = Some((fut, len));
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Frames are handed to the session writer as soon as a write completes
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.close_sent {
            return Poll::Ready(Ok(()));
        }

        // Data queued before the close must reach the peer first
        if let Some((fut, _)) = self.pending_write.as_mut() {
            match fut.as_mut().poll(cx) {
                Poll::Ready(_) => self.pending_write = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if self.pending_close.is_none() {
            let frame = Frame::CloseStream {
                stream_id: self.stream_id,
                reason: CloseReason::Normal,
            };
            let fut = self.queue(frame);
            self.pending_close = Some(fut);
        }

        let Some(fut) = self.pending_close.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match fut.as_mut().poll(cx) {
            Poll::Ready(result) => {
                self.pending_close = None;
                self.close_sent = true;
                match result {
                    Ok(()) => Poll::Ready(Ok(())),
                    Err(_) => Poll::Ready(Err(broken_pipe("session closed"))),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
