use std::io;
use std::path::Path;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{AsyncSeekStart, Error, RangedStream, Result, StreamConfig};

/// The outbound connection: accepts a block of bytes, flushes it to the peer,
/// and reports whether the peer is still there.
pub trait Sink: AsyncWrite + Unpin + Send {
    /// Whether the remote peer is still reading. Polled at least once per
    /// chunk; once it returns false no further chunk is read.
    fn is_connected(&self) -> bool;
}

/// Drives the read-and-write loop for one resolved byte window.
///
/// The configuration is fixed for the lifetime of the sender; each transfer
/// owns its body and cursor exclusively, so senders can be shared freely
/// across concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct StreamSender {
    config: StreamConfig,
}

impl StreamSender {
    pub fn new(config: StreamConfig) -> Self {
        StreamSender { config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Transfers up to `length` bytes starting at `offset` from `body` to
    /// `sink`, one chunk at a time. Every chunk is flushed before the next
    /// read starts.
    ///
    /// Returns the total bytes written. A peer that disconnects mid-transfer
    /// ends the loop early without an error; only storage or sink faults
    /// fail. The loop also ends cleanly if the body hits end-of-file before
    /// the window is exhausted.
    pub async fn send<B, S>(&self, body: B, offset: u64, length: u64, sink: &mut S) -> Result<u64>
    where
        B: AsyncRead + AsyncSeekStart + Unpin,
        S: Sink + ?Sized,
    {
        let mut stream = RangedStream::new(body, offset, length, self.config.clone());
        let mut sent: u64 = 0;

        loop {
            if !sink.is_connected() {
                debug!(sent, "peer disconnected, ending transfer early");
                return Ok(sent);
            }

            let Some(chunk) = stream.next().await else { break };
            let chunk = chunk?;

            sink.write_all(&chunk).await?;
            sink.flush().await?;
            sent += chunk.len() as u64;
        }

        debug!(sent, length, "transfer complete");
        Ok(sent)
    }

    /// Like [`send`](Self::send), but acquires the file itself. The handle is
    /// dropped on every exit path, including early disconnection and faults.
    pub async fn send_path<S>(
        &self,
        path: impl AsRef<Path>,
        offset: u64,
        length: u64,
        sink: &mut S,
    ) -> Result<u64>
    where
        S: Sink + ?Sized,
    {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        self.send(file, offset, length, sink).await
    }
}
