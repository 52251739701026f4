//! Batched frame writer
//!
//! Collects queued frames and writes them together, bounding every physical
//! write by the session write timeout.

use backhaul_protocol::{Frame, TunnelCodec};
use bytes::BytesMut;
use kanal::AsyncReceiver;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MAX_BATCH_SIZE: usize = 32;

/// Drain `frame_rx` into `writer` until the session shuts down or a write
/// fails. Either way the session is cancelled on return.
pub(crate) async fn run_writer<W>(
    frame_rx: AsyncReceiver<Frame>,
    mut writer: W,
    mut codec: TunnelCodec,
    write_timeout: Duration,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(64 * 1024);

    loop {
        buf.clear();

        // Queued frames win over shutdown so a trailing GoAway still goes out
        let first = tokio::select! {
            biased;
            frame = frame_rx.recv() => match frame {
                Ok(frame) => frame,
                Err(_) => break,
            },
            () = shutdown.cancelled() => break,
        };

        let mut batch = 0;
        let mut next = Some(first);
        while let Some(frame) = next.take() {
            if let Err(e) = codec.encode(frame, &mut buf) {
                warn!("Skipping unencodable frame: {}", e);
            }
            batch += 1;
            if batch < MAX_BATCH_SIZE {
                next = frame_rx.try_recv().ok().flatten();
            }
        }

        if buf.is_empty() {
            continue;
        }

        match timeout(write_timeout, write_batch(&mut writer, &buf)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Multiplexer write failed: {}", e);
                break;
            }
            Err(_) => {
                warn!(
                    timeout_ms = write_timeout.as_millis() as u64,
                    "Multiplexer write timed out"
                );
                break;
            }
        }
    }

    shutdown.cancel();
    let _ = frame_rx.close();
    let _ = timeout(write_timeout, writer.shutdown()).await;
}

async fn write_batch<W>(writer: &mut W, buf: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(buf).await?;
    writer.flush().await
}
