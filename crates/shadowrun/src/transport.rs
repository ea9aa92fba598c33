//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between the instrumented process and
//! the analysis server.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: the transport knows nothing about frames or records. It moves
//!   opaque buffers, and chunk boundaries carry no meaning.
//! - **Ordered and Reliable**: implementations must deliver bytes in order and without
//!   loss. Stream sockets and in-memory channels qualify, datagrams do not.

use std::fmt;

/// A failure moving bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer hung up or became unreachable.
    ConnectionLost(String),
    /// This side already closed the transport.
    Closed,
    /// Any other I/O failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Closed => write!(f, "transport closed by this side"),
            Self::Io(msg) => write!(f, "transport i/o: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A bidirectional byte stream.
///
/// This trait is object-safe (`Box<dyn Transport>`, `Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writes the whole payload.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Returns the next chunk, or `None` once the peer has closed its side.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Signals end of stream to the peer. Later sends fail with `Closed`.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
