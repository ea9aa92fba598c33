//! # Configuration
//!
//! Tunables for both halves of a session, plus the agent option string that names the
//! analysis server.

use std::time::Duration;

use shadowwire::DEFAULT_MAX_FRAME;

use crate::heap::DEFAULT_MAX_TOMBSTONES;
use crate::tcp::DEFAULT_READ_CHUNK;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 11218;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidPort(String),
    ZeroLimit(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPort(p) => write!(f, "invalid port {:?}", p),
            Self::ZeroLimit(name) => write!(f, "{} must be greater than zero", name),
        }
    }
}

impl std::error::Error for ConfigError {}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settings for the in-process dispatch client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// A thread buffer is sealed once it holds this many records.
    pub batch_records: u32,
    /// A thread buffer is sealed once its frame reaches this many bytes.
    pub batch_bytes: usize,
    /// Most references carried by one ObjectFree frame.
    pub free_batch: u32,
    /// Sealed frames waiting for the transport before senders block.
    pub queue_depth: usize,
    /// How long `shutdown` waits for queued frames to reach the transport.
    pub drain_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            batch_records: 16384,
            batch_bytes: 1024 * 1024,
            free_batch: 4096,
            queue_depth: 32,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn with_batch_records(mut self, n: u32) -> Self {
        self.batch_records = n;
        self
    }

    pub fn with_batch_bytes(mut self, n: usize) -> Self {
        self.batch_bytes = n;
        self
    }

    pub fn with_free_batch(mut self, n: u32) -> Self {
        self.free_batch = n;
        self
    }

    pub fn with_queue_depth(mut self, n: usize) -> Self {
        self.queue_depth = n;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Rejects limits that would make batching or queueing impossible.
    pub fn validate(&self) -> Result<()> {
        if self.batch_records == 0 {
            return Err(ConfigError::ZeroLimit("batch_records"));
        }
        if self.batch_bytes == 0 {
            return Err(ConfigError::ZeroLimit("batch_bytes"));
        }
        if self.free_batch == 0 {
            return Err(ConfigError::ZeroLimit("free_batch"));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::ZeroLimit("queue_depth"));
        }
        Ok(())
    }
}

/// Settings for the analysis server side.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    /// Largest accepted frame body.
    pub max_frame: usize,
    /// Size of a single socket read.
    pub read_chunk: usize,
    /// Freed object ids each session's heap remembers. Zero disables tombstones.
    pub max_tombstones: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: format!("127.0.0.1:{}", DEFAULT_PORT),
            max_frame: DEFAULT_MAX_FRAME,
            read_chunk: DEFAULT_READ_CHUNK,
            max_tombstones: DEFAULT_MAX_TOMBSTONES,
        }
    }
}

impl ServerConfig {
    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk;
        self
    }

    pub fn with_max_tombstones(mut self, max_tombstones: usize) -> Self {
        self.max_tombstones = max_tombstones;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame == 0 {
            return Err(ConfigError::ZeroLimit("max_frame"));
        }
        if self.read_chunk == 0 {
            return Err(ConfigError::ZeroLimit("read_chunk"));
        }
        Ok(())
    }
}

/// Where the instrumented process finds its analysis server.
///
/// Parsed from the `host[:port]` option string handed to the agent at load time.
/// Missing parts fall back to `localhost` and `11218`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub host: String,
    pub port: u16,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self { host: DEFAULT_HOST.to_string(), port: DEFAULT_PORT }
    }
}

impl AgentOptions {
    pub fn parse(options: &str) -> Result<Self> {
        let options = options.trim();
        let (host, port) = match options.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;
                (host, port)
            }
            None => (options, DEFAULT_PORT),
        };
        let host = if host.is_empty() { DEFAULT_HOST } else { host };
        Ok(Self { host: host.to_string(), port })
    }

    /// `host:port`, suitable for `TcpTransport::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
