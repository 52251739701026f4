//! Multiplexed session over one physical connection
//!
//! Uses lock-free data structures for the hot paths:
//! - `DashMap` for per-stream inbound channels without a global lock
//! - `AtomicU32` for stream id allocation
//! - `kanal` for the outbound frame queue and the accept backlog
//!
//! The reader never waits on a logical stream: inbound data lands in an
//! unbounded per-stream queue whose size the peer keeps within the stream
//! window (see [`StreamWindow`]).

use super::config::{MuxConfig, Role};
use super::stream::VirtualStream;
use super::window::StreamWindow;
use super::writer::run_writer;
use crate::resource_limits::StreamLimits;
use backhaul_common::MuxError;
use backhaul_protocol::{CloseReason, Frame, TunnelCodec};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use kanal::{bounded_async, AsyncReceiver, AsyncSender};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Outbound frames queued ahead of the writer
const FRAME_QUEUE_CAPACITY: usize = 1024;

/// Session-side half of a logical stream
pub(crate) struct StreamEntry {
    /// Dropped once the peer has finished sending
    inbound: Option<mpsc::UnboundedSender<Bytes>>,
    window: Arc<StreamWindow>,
}

impl StreamEntry {
    fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>, Arc<StreamWindow>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let window = Arc::new(StreamWindow::new());
        let entry = Self {
            inbound: Some(tx),
            window: Arc::clone(&window),
        };
        (entry, rx, window)
    }
}

/// State shared by the session handle, its tasks, and its streams
pub(crate) struct Shared {
    pub(crate) role: Role,
    pub(crate) config: MuxConfig,
    pub(crate) streams: DashMap<u32, StreamEntry>,
    pub(crate) frame_tx: AsyncSender<Frame>,
    pub(crate) shutdown: CancellationToken,
    next_stream_id: AtomicU32,
    limits: StreamLimits,
    accept_rx: AsyncReceiver<VirtualStream>,
}

impl Shared {
    fn terminate(&self) {
        self.shutdown.cancel();
        // Dropping the senders ends every stream with EOF once its buffer drains
        for entry in self.streams.iter() {
            entry.window.reset();
        }
        self.streams.clear();
        // Queued streams hold the session alive; release them
        while let Ok(Some(stream)) = self.accept_rx.try_recv() {
            drop(stream);
        }
    }
}

/// Handle to a multiplexed session
///
/// Cheap to clone. The session stays up until the physical connection
/// fails, the peer sends `GoAway`, or [`Session::close`] is called;
/// dropping handles does not close it.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.shared.role)
            .field("streams", &self.shared.streams.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start a session over `io`, spawning its reader, writer and keepalive
    /// tasks on the current runtime.
    pub fn new<T>(io: T, role: Role, config: MuxConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (frame_tx, frame_rx) = bounded_async(FRAME_QUEUE_CAPACITY);
        let (accept_tx, accept_rx) = bounded_async(config.accept_backlog.max(1));
        let shutdown = CancellationToken::new();

        let shared = Arc::new(Shared {
            role,
            next_stream_id: AtomicU32::new(role.first_stream_id()),
            limits: StreamLimits::new(config.max_streams),
            streams: DashMap::new(),
            frame_tx,
            shutdown: shutdown.clone(),
            accept_rx,
            config,
        });

        let codec = TunnelCodec::with_max_frame_size(shared.config.max_frame_size);
        tokio::spawn(run_writer(
            frame_rx,
            writer,
            codec,
            shared.config.write_timeout,
            shutdown,
        ));

        let frames = FramedRead::new(reader, codec);
        tokio::spawn(run_reader(Arc::clone(&shared), frames, accept_tx));

        if let Some(interval) = shared.config.keepalive_interval {
            tokio::spawn(run_keepalive(Arc::clone(&shared), interval));
        }

        debug!(role = %role, "Multiplexed session started");
        Self { shared }
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Number of logical streams currently registered
    pub fn stream_count(&self) -> usize {
        self.shared.streams.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Resolves once the session is dead.
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await;
    }

    /// Open a new logical stream. Only the [`Role::Opener`] side may do this.
    pub async fn open_stream(&self) -> Result<VirtualStream, MuxError> {
        let shared = &self.shared;
        if shared.role != Role::Opener {
            return Err(MuxError::WrongRole);
        }
        if self.is_closed() {
            return Err(MuxError::SessionClosed);
        }

        let permit = shared.limits.try_acquire_stream()?;
        let stream_id = self.allocate_stream_id()?;

        let (entry, rx, window) = StreamEntry::new();
        shared.streams.insert(stream_id, entry);

        let open = shared.frame_tx.send(Frame::OpenStream { stream_id });
        let result = match timeout(shared.config.write_timeout, open).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MuxError::SessionClosed),
            Err(_) => Err(MuxError::Timeout),
        };

        if let Err(e) = result {
            shared.streams.remove(&stream_id);
            return Err(e);
        }

        trace!(stream_id, "Opened logical stream");
        Ok(VirtualStream::new(
            stream_id,
            rx,
            window,
            Arc::clone(shared),
            permit,
        ))
    }

    /// Wait for the next stream opened by the peer.
    pub async fn accept_stream(&self) -> Result<VirtualStream, MuxError> {
        if self.shared.role != Role::Acceptor {
            return Err(MuxError::WrongRole);
        }
        tokio::select! {
            biased;
            () = self.shared.shutdown.cancelled() => Err(MuxError::SessionClosed),
            stream = self.shared.accept_rx.recv() => stream.map_err(|_| MuxError::SessionClosed),
        }
    }

    /// Tear the session down. Sends `GoAway` best-effort; idempotent.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        let goaway = self.shared.frame_tx.send(Frame::GoAway);
        let _ = timeout(self.shared.config.write_timeout, goaway).await;
        self.shared.terminate();
    }

    fn allocate_stream_id(&self) -> Result<u32, MuxError> {
        let id = self.shared.next_stream_id.fetch_add(2, Ordering::Relaxed);
        // Ids are never reused; running out of them is the same as hitting the cap
        if id > u32::MAX - 2 {
            return Err(MuxError::StreamsExhausted);
        }
        Ok(id)
    }
}

enum Flow {
    Continue,
    Stop,
}

async fn run_reader<R>(
    shared: Arc<Shared>,
    mut frames: FramedRead<R, TunnelCodec>,
    accept_tx: AsyncSender<VirtualStream>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            next = frames.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(role = %shared.role, "Multiplexer read failed: {}", e);
                break;
            }
            None => {
                debug!(role = %shared.role, "Physical connection closed");
                break;
            }
        };

        // Replies wait on the frame queue when the writer is behind; shutdown still wins
        let flow = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            flow = handle_frame(&shared, &accept_tx, frame) => flow,
        };
        if let Flow::Stop = flow {
            break;
        }
    }

    shared.terminate();
}

async fn handle_frame(
    shared: &Arc<Shared>,
    accept_tx: &AsyncSender<VirtualStream>,
    frame: Frame,
) -> Flow {
    match frame {
        Frame::Data { stream_id, data } => {
            if data.is_empty() {
                return Flow::Continue;
            }
            let overran = match shared.streams.get(&stream_id) {
                Some(entry) => match &entry.inbound {
                    Some(tx) if entry.window.receive(data.len()) => {
                        // A closed receiver means the stream is being dropped
                        let _ = tx.send(data);
                        false
                    }
                    Some(_) => true,
                    None => {
                        trace!(stream_id, "Dropping data after the peer finished sending");
                        false
                    }
                },
                None => {
                    trace!(stream_id, "Dropping data for unknown stream");
                    false
                }
            };
            if overran {
                warn!(stream_id, "Peer overran the stream window, resetting stream");
                reset_stream(shared, stream_id).await;
            }
        }
        Frame::OpenStream { stream_id } => {
            accept_inbound(shared, accept_tx, stream_id).await;
        }
        Frame::CloseStream { stream_id, reason } => {
            trace!(stream_id, ?reason, "Peer closed stream");
            match reason {
                // Half-close: our direction stays writable
                CloseReason::Normal => {
                    if let Some(mut entry) = shared.streams.get_mut(&stream_id) {
                        entry.inbound = None;
                    }
                }
                CloseReason::Refused | CloseReason::Reset => {
                    if let Some((_, entry)) = shared.streams.remove(&stream_id) {
                        entry.window.reset();
                    }
                }
            }
        }
        Frame::WindowUpdate { stream_id, credit } => {
            if let Some(entry) = shared.streams.get(&stream_id) {
                entry.window.grant(credit as usize);
            }
        }
        Frame::Ping { nonce } => {
            if shared.frame_tx.send(Frame::Pong { nonce }).await.is_err() {
                return Flow::Stop;
            }
        }
        Frame::Pong { nonce } => trace!(nonce, "Keepalive pong"),
        Frame::GoAway => {
            debug!(role = %shared.role, "Peer sent GoAway");
            return Flow::Stop;
        }
    }
    Flow::Continue
}

async fn accept_inbound(shared: &Arc<Shared>, accept_tx: &AsyncSender<VirtualStream>, stream_id: u32) {
    if shared.role == Role::Opener {
        warn!(stream_id, "Peer tried to open a stream on the opening side");
        refuse(shared, stream_id).await;
        return;
    }

    let Ok(permit) = shared.limits.try_acquire_stream() else {
        warn!(stream_id, "Refusing stream: per-session stream limit reached");
        refuse(shared, stream_id).await;
        return;
    };

    let (entry, rx, window) = StreamEntry::new();
    match shared.streams.entry(stream_id) {
        Entry::Occupied(_) => {
            warn!(stream_id, "Stream already exists");
            return;
        }
        Entry::Vacant(vacant) => {
            vacant.insert(entry);
        }
    }

    let stream = VirtualStream::new(stream_id, rx, window, Arc::clone(shared), permit);
    // A stream that cannot be queued is dropped, which closes it towards the peer
    match accept_tx.try_send(stream) {
        Ok(true) => {}
        Ok(false) => warn!(stream_id, "Accept backlog full, dropping stream"),
        Err(_) => debug!(stream_id, "Accept backlog closed"),
    }
}

async fn reset_stream(shared: &Shared, stream_id: u32) {
    if let Some((_, entry)) = shared.streams.remove(&stream_id) {
        entry.window.reset();
    }
    let _ = shared
        .frame_tx
        .send(Frame::CloseStream {
            stream_id,
            reason: CloseReason::Reset,
        })
        .await;
}

async fn refuse(shared: &Shared, stream_id: u32) {
    let _ = shared
        .frame_tx
        .send(Frame::CloseStream {
            stream_id,
            reason: CloseReason::Refused,
        })
        .await;
}

async fn run_keepalive(shared: Arc<Shared>, interval: std::time::Duration) {
    static NONCE: AtomicU64 = AtomicU64::new(0);

    let mut ticker = tokio::time::interval(interval);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
                if shared.frame_tx.send(Frame::Ping { nonce }).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backhaul_protocol::constants::INITIAL_STREAM_WINDOW;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn pair(config: MuxConfig) -> (Session, Session) {
        let (a, b) = duplex(256 * 1024);
        (
            Session::new(a, Role::Opener, config.clone()),
            Session::new(b, Role::Acceptor, config),
        )
    }

    #[tokio::test]
    async fn test_open_accept_roundtrip() {
        let (opener, acceptor) = pair(MuxConfig::default());

        let mut out = opener.open_stream().await.unwrap();
        let mut inbound = acceptor.accept_stream().await.unwrap();
        assert_eq!(out.id(), inbound.id());
        assert_eq!(out.id() % 2, 1);

        out.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        inbound.write_all(b"pong").await.unwrap();
        out.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_stream_ids_are_odd_and_increasing() {
        let (opener, _acceptor) = pair(MuxConfig::default());
        let s1 = opener.open_stream().await.unwrap();
        let s2 = opener.open_stream().await.unwrap();
        assert_eq!(s1.id(), 1);
        assert_eq!(s2.id(), 3);
    }

    #[tokio::test]
    async fn test_roles_are_enforced() {
        let (opener, acceptor) = pair(MuxConfig::default());
        assert_eq!(acceptor.open_stream().await.unwrap_err(), MuxError::WrongRole);
        assert_eq!(opener.accept_stream().await.unwrap_err(), MuxError::WrongRole);
    }

    #[tokio::test]
    async fn test_stream_limit() {
        let (opener, _acceptor) = pair(MuxConfig::default().with_max_streams(2));
        let s1 = opener.open_stream().await.unwrap();
        let _s2 = opener.open_stream().await.unwrap();
        assert_eq!(
            opener.open_stream().await.unwrap_err(),
            MuxError::StreamsExhausted
        );

        // Dropping a stream frees its slot
        drop(s1);
        assert!(opener.open_stream().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_both_sides() {
        let (opener, acceptor) = pair(MuxConfig::default());
        let mut out = opener.open_stream().await.unwrap();
        let mut inbound = acceptor.accept_stream().await.unwrap();

        opener.close().await;
        assert!(opener.is_closed());
        acceptor.closed().await;

        assert_eq!(
            acceptor.accept_stream().await.unwrap_err(),
            MuxError::SessionClosed
        );
        assert_eq!(
            opener.open_stream().await.unwrap_err(),
            MuxError::SessionClosed
        );

        let mut buf = Vec::new();
        assert_eq!(inbound.read_to_end(&mut buf).await.unwrap(), 0);
        assert_eq!(out.read_to_end(&mut buf).await.unwrap(), 0);
        assert!(out.write_all(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_physical_disconnect_closes_session() {
        let (a, b) = duplex(1024);
        let session = Session::new(a, Role::Acceptor, MuxConfig::default());
        drop(b);
        session.closed().await;
        assert!(session.accept_stream().await.is_err());
    }

    #[tokio::test]
    async fn test_acceptor_refuses_when_full() {
        let (a, b) = duplex(64 * 1024);
        let opener = Session::new(a, Role::Opener, MuxConfig::default());
        let acceptor = Session::new(b, Role::Acceptor, MuxConfig::default().with_max_streams(1));

        let mut first = opener.open_stream().await.unwrap();
        let mut kept = acceptor.accept_stream().await.unwrap();

        // Second stream exceeds the acceptor's cap and reads EOF after the refusal
        let mut second = opener.open_stream().await.unwrap();
        let mut buf = Vec::new();
        assert_eq!(second.read_to_end(&mut buf).await.unwrap(), 0);

        first.write_all(b"still fine").await.unwrap();
        let mut buf = [0u8; 10];
        kept.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"still fine");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_does_not_disturb_streams() {
        let config = MuxConfig::default().with_keepalive(Some(Duration::from_secs(1)));
        let (opener, acceptor) = pair(config);

        tokio::time::sleep(Duration::from_secs(5)).await;

        let mut out = opener.open_stream().await.unwrap();
        let mut inbound = acceptor.accept_stream().await.unwrap();
        out.write_all(b"after pings").await.unwrap();
        let mut buf = [0u8; 11];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"after pings");
        assert!(!opener.is_closed());
    }

    #[tokio::test]
    async fn test_unread_stream_does_not_stall_siblings() {
        let (opener, acceptor) = pair(MuxConfig::default());
        let mut stalled = opener.open_stream().await.unwrap();
        let mut active = opener.open_stream().await.unwrap();
        let mut stalled_in = acceptor.accept_stream().await.unwrap();
        let mut active_in = acceptor.accept_stream().await.unwrap();

        // Nobody reads `stalled_in`: the writer may fill the window, then parks
        let window = INITIAL_STREAM_WINDOW as usize;
        stalled.write_all(&vec![7u8; window]).await.unwrap();
        assert!(timeout(Duration::from_millis(100), stalled.write_all(b"x"))
            .await
            .is_err());

        active.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        timeout(Duration::from_secs(2), active_in.read_exact(&mut buf))
            .await
            .expect("sibling stream starved")
            .unwrap();
        assert_eq!(&buf, b"hi");

        // Reading hands credit back and the parked writer resumes
        let mut drained = vec![0u8; window / 2];
        stalled_in.read_exact(&mut drained).await.unwrap();
        timeout(Duration::from_secs(2), stalled.write_all(b"x"))
            .await
            .expect("credit was not returned")
            .unwrap();
    }

    #[tokio::test]
    async fn test_window_overrun_resets_only_that_stream() {
        use futures::SinkExt;
        use tokio_util::codec::Framed;

        let (a, b) = duplex(1024 * 1024);
        let acceptor = Session::new(b, Role::Acceptor, MuxConfig::default().with_keepalive(None));
        let mut peer = Framed::new(a, TunnelCodec::new());

        peer.send(Frame::OpenStream { stream_id: 1 }).await.unwrap();
        peer.send(Frame::OpenStream { stream_id: 3 }).await.unwrap();
        let chunk = Bytes::from(vec![1u8; 64 * 1024]);
        let window = INITIAL_STREAM_WINDOW as usize;
        for _ in 0..=window / chunk.len() {
            peer.send(Frame::Data {
                stream_id: 1,
                data: chunk.clone(),
            })
            .await
            .unwrap();
        }
        peer.send(Frame::Data {
            stream_id: 3,
            data: Bytes::from_static(b"ok"),
        })
        .await
        .unwrap();

        assert_eq!(
            peer.next().await.unwrap().unwrap(),
            Frame::CloseStream {
                stream_id: 1,
                reason: CloseReason::Reset,
            }
        );

        let mut flooded = acceptor.accept_stream().await.unwrap();
        let mut polite = acceptor.accept_stream().await.unwrap();
        let mut buf = [0u8; 2];
        polite.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");

        // Only what fit in the window was delivered
        let mut received = Vec::new();
        flooded.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), window);
        assert!(!acceptor.is_closed());
    }
}
