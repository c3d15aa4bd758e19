//! STDIO Transport
//!
//! Line transport over a reader/writer pair. `StdioTransport::new()` binds the
//! current process's standard input and output, which is how a server launched
//! as a child process talks to its client. Logging must go to stderr while
//! this transport is in use.

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::transport::{MAX_LINE_LENGTH, Transport, codec_error};

/// A transport implementation that uses standard input and output
pub struct StdioTransport<R = tokio::io::Stdin, W = tokio::io::Stdout> {
    reader: Mutex<FramedRead<R, LinesCodec>>,
    writer: Mutex<W>,
    shutdown: CancellationToken,
    eof: AtomicBool,
}

impl StdioTransport {
    /// Create a transport over this process's stdin/stdout
    pub fn new() -> Self {
        Self::with_io(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a transport over an arbitrary reader/writer pair
    pub fn with_io(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(FramedRead::new(
                reader,
                LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            )),
            writer: Mutex::new(writer),
            shutdown: CancellationToken::new(),
            eof: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn read_line(&self) -> Result<Option<String>, Error> {
        let mut reader = self.reader.lock().await;
        let next = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(None),
            next = reader.next() => next,
        };

        match next {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(codec_error(e)),
            None => {
                self.eof.store(true, Ordering::Release);
                tracing::debug!("stdio input reached end of stream");
                Ok(None)
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("Failed to shut down stdio writer: {}", e);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.eof.load(Ordering::Acquire)
    }
}
