//! Transport module for MCP communication
//!
//! A transport is a duplex line channel: an inbound stream of newline
//! delimited lines and an outbound byte sink. Framing is identical on every
//! variant; the RPC layer hands complete `\n`-terminated messages to `write`.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::errors::Error;

pub mod channel;
pub mod http;
pub mod process;
pub mod sse_server;
pub mod stdio;

pub use channel::ChannelTransport;
pub use http::{HttpOptions, HttpTransport};
pub use process::{ProcessOptions, ProcessTransport};
pub use sse_server::{SseServer, SseServerOptions};
pub use stdio::StdioTransport;

/// Buffer size for message channels
pub(crate) const CHANNEL_BUFFER_SIZE: usize = 100;

/// Longest accepted inbound line
pub(crate) const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Duplex transport trait shared by every connection variant
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the next inbound line, without its terminator.
    ///
    /// Returns `Ok(None)` once the inbound stream has ended or the transport
    /// was closed.
    async fn read_line(&self) -> Result<Option<String>, Error>;

    /// Write raw bytes to the outbound stream
    async fn write(&self, bytes: &[u8]) -> Result<(), Error>;

    /// Release both streams and anything the transport owns
    async fn close(&self) -> Result<(), Error>;

    /// Check if the transport is still usable
    fn is_connected(&self) -> bool;
}

/// Map a line codec error into the crate error
pub(crate) fn codec_error(error: tokio_util::codec::LinesCodecError) -> Error {
    match error {
        tokio_util::codec::LinesCodecError::Io(e) => Error::Io(e),
        tokio_util::codec::LinesCodecError::MaxLineLengthExceeded => {
            Error::Transport("inbound line exceeds maximum length".to_string())
        }
    }
}

/// Split every complete `\n`-terminated line off the front of `buffer`.
///
/// Returned lines keep their terminator; a trailing partial line stays buffered.
pub(crate) fn drain_lines(buffer: &mut BytesMut) -> Vec<Bytes> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        lines.push(buffer.split_to(pos + 1).freeze());
    }
    lines
}
