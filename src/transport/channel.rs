//! In-memory transport backed by tokio channels.
//!
//! Used by the SSE server to bridge HTTP requests into a server session, and
//! handy for wiring a client and server together inside one process.

use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::PoisonError;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::transport::{CHANNEL_BUFFER_SIZE, Transport, drain_lines};

pub struct ChannelTransport {
    incoming: Mutex<mpsc::Receiver<String>>,
    /// Taken on close so the peer sees end of stream
    outgoing: std::sync::Mutex<Option<mpsc::Sender<String>>>,
    pending: Mutex<BytesMut>,
    shutdown: CancellationToken,
}

impl ChannelTransport {
    /// Wrap an inbound line receiver and an outbound line sender
    pub fn new(incoming: mpsc::Receiver<String>, outgoing: mpsc::Sender<String>) -> Self {
        Self {
            incoming: Mutex::new(incoming),
            outgoing: std::sync::Mutex::new(Some(outgoing)),
            pending: Mutex::new(BytesMut::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Two transports connected back to back
    pub fn pair() -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (right_tx, right_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        (Self::new(left_rx, right_tx), Self::new(right_rx, left_tx))
    }

    fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn read_line(&self) -> Result<Option<String>, Error> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.shutdown.cancelled() => Ok(None),
            line = incoming.recv() => Ok(line),
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        let outgoing = self.sender().ok_or(Error::ConnectionClosed)?;
        let mut pending = self.pending.lock().await;
        pending.extend_from_slice(bytes);
        for line in drain_lines(&mut pending) {
            let text = std::str::from_utf8(&line)
                .map_err(|e| Error::Protocol(format!("outbound message is not UTF-8: {}", e)))?;
            outgoing
                .send(text.trim_end().to_string())
                .await
                .map_err(|_| Error::ConnectionClosed)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.shutdown.cancel();
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.shutdown.is_cancelled() && self.sender().is_some_and(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_lines_in_order() {
        let (left, right) = ChannelTransport::pair();

        left.write(b"first\nsec").await.unwrap();
        left.write(b"ond\n").await.unwrap();

        assert_eq!(right.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(right.read_line().await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn dropped_peer_ends_stream() {
        let (left, right) = ChannelTransport::pair();
        drop(left);

        assert_eq!(right.read_line().await.unwrap(), None);
        assert!(!right.is_connected());
        assert!(matches!(
            right.write(b"x\n").await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn close_ends_the_peer_stream() {
        let (left, right) = ChannelTransport::pair();
        left.close().await.unwrap();

        assert_eq!(right.read_line().await.unwrap(), None);
        assert!(matches!(left.write(b"x\n").await, Err(Error::ConnectionClosed)));
    }
}
