//! In-memory transport for running client and dispatcher in one process.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportError;

type Outbox = mpsc::UnboundedSender<Vec<u8>>;
type Inbox = mpsc::UnboundedReceiver<Vec<u8>>;

/// One end of an in-memory byte pipe.
///
/// Each `send` arrives as exactly one chunk on the peer's `recv`. `close` hangs up
/// this end's outbound half; the peer drains what was already sent, then sees end of
/// stream.
pub struct ChannelTransport {
    outbox: Mutex<Option<Outbox>>,
    inbox: tokio::sync::Mutex<Inbox>,
    sent: AtomicU64,
}

impl ChannelTransport {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (to_right, from_left) = mpsc::unbounded_channel();
        let (to_left, from_right) = mpsc::unbounded_channel();
        (Self::end(to_right, from_right), Self::end(to_left, from_left))
    }

    fn end(outbox: Outbox, inbox: Inbox) -> Self {
        Self {
            outbox: Mutex::new(Some(outbox)),
            inbox: tokio::sync::Mutex::new(inbox),
            sent: AtomicU64::new(0),
        }
    }

    /// Bytes handed to the peer so far.
    pub fn bytes_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        let outbox = self.outbox.lock();
        let Some(outbox) = outbox.as_ref() else {
            return Err(TransportError::Closed);
        };
        outbox
            .send(payload.to_vec())
            .map_err(|_| TransportError::ConnectionLost("peer dropped".into()))?;
        self.sent.fetch_add(payload.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Ok(self.inbox.lock().await.recv().await)
    }

    async fn close(&self) -> transport::Result<()> {
        self.outbox.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_drains_then_ends() -> transport::Result<()> {
        let (left, right) = ChannelTransport::pair();
        left.send(b"abc").await?;
        left.close().await?;

        assert_eq!(right.recv().await?, Some(b"abc".to_vec()));
        assert_eq!(right.recv().await?, None);
        assert_eq!(left.send(b"late").await, Err(TransportError::Closed));
        assert_eq!(left.bytes_sent(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_peer_is_connection_lost() -> transport::Result<()> {
        let (left, right) = ChannelTransport::pair();
        drop(right);
        assert!(matches!(left.send(b"x").await, Err(TransportError::ConnectionLost(_))));
        Ok(())
    }
}
