//! # Dispatch Client
//!
//! The in-process half of a session: instrumented call-sites register method names,
//! emit event records, and report freed objects.
//!
//! ## Philosophy
//!
//! - **Explicit Session**: all state lives in a `DispatchClient` value. There are no
//!   process-wide statics, so several sessions can coexist (tests do this).
//! - **Per-Thread Streams**: each calling thread appends whole records to its own
//!   buffer, which is sealed into one Analyze frame at a time. Records from one thread
//!   therefore arrive in the order they were finished, and a record is never split.
//! - **Block, Never Drop**: sealed frames go through a bounded queue. When it is full
//!   the calling thread waits. Losing events would corrupt the analysis silently.
//!
//! ## Threading
//!
//! Call-sites must be plain threads (or `spawn_blocking` tasks), never async tasks:
//! enqueueing uses `blocking_send`. Only `start` and `shutdown` need the runtime.
//!
//! A thread that exits without calling `thread_end` has its stream ended for it by
//! the next flush.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread::ThreadId;

use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use shadowpack::NetReference;
use shadowpack::TypedValue;
use shadowwire::AnalyzeBatch;
use shadowwire::ClassInfo;
use shadowwire::FreeBatch;
use shadowwire::Message;
use shadowwire::MethodId;
use shadowwire::ProtocolError;
use shadowwire::RESERVED_ORDERING_IDS;
use shadowwire::RecordBuilder;
use shadowwire::ThreadInfo;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::ClientConfig;
use crate::config::ConfigError;
use crate::registration::MethodTable;
use crate::registration::RegistrationError;
use crate::transport::Transport;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The session was shut down or its transport failed.
    SessionClosed,
    /// Queued frames did not reach the transport within the drain timeout.
    DrainTimeout,
    Registration(RegistrationError),
    /// A record used an id this client never handed out.
    UnknownMethod(MethodId),
    Protocol(ProtocolError),
    /// The transport failure that closed the session.
    Transport(TransportError),
    Config(ConfigError),
    /// `start` was called outside a tokio runtime.
    NoRuntime,
    TaskFailed(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionClosed => write!(f, "dispatch session closed"),
            Self::DrainTimeout => write!(f, "timed out draining queued frames"),
            Self::Registration(e) => write!(f, "registration failed: {}", e),
            Self::UnknownMethod(id) => write!(f, "{} was never registered", id),
            Self::Protocol(e) => write!(f, "encoding failed: {}", e),
            Self::Transport(e) => write!(f, "transport failed: {}", e),
            Self::Config(e) => write!(f, "invalid configuration: {}", e),
            Self::NoRuntime => write!(f, "no tokio runtime to run the sender task"),
            Self::TaskFailed(msg) => write!(f, "background task failed: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<RegistrationError> for ClientError {
    fn from(e: RegistrationError) -> Self {
        Self::Registration(e)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<ConfigError> for ClientError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Open state shared with the sender task.
#[derive(Debug, Default)]
struct SessionState {
    closed: AtomicBool,
    failure: Mutex<Option<TransportError>>,
}

impl SessionState {
    fn fail(&self, e: TransportError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(e);
        }
        self.closed.store(true, Ordering::Release);
    }
}

thread_local! {
    // Dropped when the thread exits, which is how buffers notice a dead owner.
    static THREAD_ALIVE: Arc<()> = Arc::new(());
}

/// Records waiting to be sealed into one Analyze frame.
#[derive(Debug)]
struct RecordBuffer {
    ordering_id: u64,
    batch: Option<AnalyzeBatch>,
    closed: bool,
    // Set for per-thread streams only.
    owner: Option<Weak<()>>,
}

impl RecordBuffer {
    fn new(ordering_id: u64) -> Self {
        Self { ordering_id, batch: None, closed: false, owner: None }
    }

    fn for_current_thread(ordering_id: u64) -> Self {
        let owner = THREAD_ALIVE.with(Arc::downgrade);
        Self { owner: Some(owner), ..Self::new(ordering_id) }
    }

    fn owner_exited(&self) -> bool {
        self.owner.as_ref().is_some_and(|owner| owner.strong_count() == 0)
    }

    fn append(&mut self, record: RecordBuilder, shared: &Shared) -> Result<()> {
        if self.closed {
            return Err(ClientError::SessionClosed);
        }
        let ordering_id = self.ordering_id;
        let batch = self.batch.get_or_insert_with(|| AnalyzeBatch::new(ordering_id));
        batch.push_with(|enc| record.finish(enc))?;

        let config = &shared.config;
        if batch.records() >= config.batch_records || batch.len() >= config.batch_bytes {
            self.flush(shared)?;
        }
        Ok(())
    }

    fn flush(&mut self, shared: &Shared) -> Result<()> {
        match self.batch.take() {
            Some(batch) if !batch.is_empty() => shared.enqueue(batch.finish()?),
            _ => Ok(()),
        }
    }

    fn close(&mut self, shared: &Shared) -> Result<()> {
        self.closed = true;
        self.flush(shared)
    }
}

#[derive(Debug, Default)]
struct FreeBuffer {
    batch: FreeBatch,
    closed: bool,
}

impl FreeBuffer {
    fn flush(&mut self, shared: &Shared) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        shared.enqueue(batch.finish()?)
    }
}

struct Shared {
    config: ClientConfig,
    state: Arc<SessionState>,
    methods: MethodTable,
    threads: DashMap<ThreadId, Arc<Mutex<RecordBuffer>>>,
    ordered: Vec<Mutex<RecordBuffer>>,
    frees: Mutex<FreeBuffer>,
    next_ordering: AtomicU64,
    queue: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
}

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(ClientError::SessionClosed);
        }
        Ok(())
    }

    /// Hands a sealed frame to the sender task, blocking while the queue is full.
    fn enqueue(&self, frame: Vec<u8>) -> Result<()> {
        let Some(tx) = self.queue.read().clone() else {
            return Err(ClientError::SessionClosed);
        };
        tx.blocking_send(frame).map_err(|_| ClientError::SessionClosed)
    }

    fn enqueue_message(&self, message: &Message) -> Result<()> {
        self.enqueue(message.to_bytes()?)
    }

    fn current_buffer(&self) -> Option<Arc<Mutex<RecordBuffer>>> {
        self.threads.get(&std::thread::current().id()).map(|b| b.value().clone())
    }

    fn thread_buffer(&self) -> Arc<Mutex<RecordBuffer>> {
        if let Some(buffer) = self.current_buffer() {
            return buffer;
        }
        self.threads
            .entry(std::thread::current().id())
            .or_insert_with(|| {
                let ordering_id = self.next_ordering.fetch_add(1, Ordering::Relaxed);
                Arc::new(Mutex::new(RecordBuffer::for_current_thread(ordering_id)))
            })
            .clone()
    }

    fn append_local(&self, record: RecordBuilder) -> Result<()> {
        let buffer = self.thread_buffer();
        // Held across the send so this thread's frames leave in order.
        let mut buffer = buffer.lock();
        buffer.append(record, self)
    }

    fn append_ordered(&self, ordering: u8, record: RecordBuilder) -> Result<()> {
        if let Some(own) = self.current_buffer() {
            own.lock().flush(self)?;
        }
        self.ordered[ordering as usize].lock().append(record, self)
    }

    /// Flushes every stream. Streams of threads that have exited are ended instead.
    fn flush_events(&self) -> Result<()> {
        let buffers: Vec<_> = self.threads.iter().map(|e| (*e.key(), e.value().clone())).collect();
        for (thread, buffer) in buffers {
            let mut buffer = buffer.lock();
            if buffer.owner_exited() {
                drop(buffer);
                debug!(?thread, "ending stream of an exited thread");
                self.end_stream(thread)?;
            } else {
                buffer.flush(self)?;
            }
        }
        for buffer in &self.ordered {
            buffer.lock().flush(self)?;
        }
        Ok(())
    }

    /// Closes the stream of `thread` and sends its ThreadEnd. Does nothing if the
    /// thread has no stream.
    fn end_stream(&self, thread: ThreadId) -> Result<()> {
        let Some((_, buffer)) = self.threads.remove(&thread) else {
            return Ok(());
        };
        let ordering_id = {
            let mut buffer = buffer.lock();
            buffer.close(self)?;
            buffer.ordering_id
        };
        self.enqueue_message(&Message::ThreadEnd { ordering_id })
    }

    /// Number of per-thread streams still open.
    #[cfg(test)]
    fn open_streams(&self) -> usize {
        self.threads.len()
    }

    fn flush_all(&self) -> Result<()> {
        self.flush_events()?;
        self.frees.lock().flush(self)
    }

    /// Seals every buffer against further appends, sends what they hold, then `Close`.
    fn drain(&self) -> Result<()> {
        let res = self.close_buffers();
        self.queue.write().take();
        res
    }

    fn close_buffers(&self) -> Result<()> {
        let buffers: Vec<_> = self.threads.iter().map(|e| e.value().clone()).collect();
        for buffer in buffers {
            buffer.lock().close(self)?;
        }
        for buffer in &self.ordered {
            buffer.lock().close(self)?;
        }
        {
            let mut frees = self.frees.lock();
            frees.closed = true;
            frees.flush(self)?;
        }
        self.enqueue_message(&Message::Close)
    }
}

/// Writes frames to the transport in queue order until the queue closes.
async fn pump(transport: Box<dyn Transport>, mut rx: mpsc::Receiver<Vec<u8>>, state: Arc<SessionState>) {
    let mut frames = 0u64;
    let mut bytes = 0u64;
    while let Some(frame) = rx.recv().await {
        if let Err(e) = transport.send(&frame).await {
            error!(error = %e, frames, "transport failed, dispatch session closed");
            state.fail(e);
            rx.close();
            return;
        }
        frames += 1;
        bytes += frame.len() as u64;
    }
    if let Err(e) = transport.close().await {
        warn!(error = %e, "closing transport failed");
    }
    debug!(frames, bytes, "dispatch sender finished");
}

/// One dispatch session.
pub struct DispatchClient {
    shared: Arc<Shared>,
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchClient {
    /// Starts a session over `transport`, spawning its sender task on the current
    /// tokio runtime.
    pub fn start(transport: Box<dyn Transport>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let (tx, rx) = mpsc::channel(config.queue_depth);
        let state = Arc::new(SessionState::default());
        let sender = runtime.spawn(pump(transport, rx, state.clone()));

        let ordered = (0..RESERVED_ORDERING_IDS).map(|id| Mutex::new(RecordBuffer::new(id))).collect();
        let shared = Arc::new(Shared {
            config,
            state,
            methods: MethodTable::new(),
            threads: DashMap::new(),
            ordered,
            frees: Mutex::new(FreeBuffer::default()),
            next_ordering: AtomicU64::new(RESERVED_ORDERING_IDS),
            queue: RwLock::new(Some(tx)),
        });
        info!("dispatch session started");
        Ok(Self { shared, sender: Mutex::new(Some(sender)) })
    }

    /// Returns the id for `name`, announcing new names to the server first.
    pub fn register_method(&self, name: &str) -> Result<MethodId> {
        self.shared.ensure_open()?;
        self.shared.methods.register(name, |id| {
            self.shared.enqueue_message(&Message::RegisterMethod { id, name: name.to_string() })
        })
    }

    /// Starts a record on the calling thread's stream.
    pub fn begin_event(&self, id: MethodId) -> Result<EventWriter<'_>> {
        self.writer(id, None)
    }

    /// Starts a record on the shared stream `ordering`.
    ///
    /// Records on one ordering stream are totally ordered across threads. The calling
    /// thread's own buffer is flushed first, so earlier records from this thread are
    /// not overtaken.
    pub fn begin_ordered_event(&self, id: MethodId, ordering: u8) -> Result<EventWriter<'_>> {
        self.writer(id, Some(ordering))
    }

    fn writer(&self, id: MethodId, ordering: Option<u8>) -> Result<EventWriter<'_>> {
        self.shared.ensure_open()?;
        if !self.shared.methods.contains(id) {
            return Err(ClientError::UnknownMethod(id));
        }
        Ok(EventWriter { shared: &*self.shared, record: RecordBuilder::new(id), ordering, error: None })
    }

    /// Emits one complete record.
    pub fn dispatch(&self, id: MethodId, args: &[TypedValue]) -> Result<()> {
        let mut writer = self.begin_event(id)?;
        for arg in args {
            writer.send_value(arg);
        }
        writer.finish()
    }

    /// Reports that an object no longer exists.
    ///
    /// A full free batch is sent only after every pending event, so no event that
    /// mentions the object can arrive after its free.
    pub fn object_freed(&self, token: NetReference) -> Result<()> {
        self.shared.ensure_open()?;
        let mut frees = self.shared.frees.lock();
        if frees.closed {
            return Err(ClientError::SessionClosed);
        }
        frees.batch.push(token)?;
        if frees.batch.count() >= self.shared.config.free_batch {
            self.shared.flush_events()?;
            frees.flush(&self.shared)?;
        }
        Ok(())
    }

    pub fn class_info(&self, info: ClassInfo) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.enqueue_message(&Message::ClassInfo(info))
    }

    pub fn string_info(&self, object: NetReference, value: &str) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.enqueue_message(&Message::StringInfo { object, value: value.to_string() })
    }

    pub fn thread_info(&self, info: ThreadInfo) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.enqueue_message(&Message::ThreadInfo(info))
    }

    /// Sends every pending record, then pending frees.
    pub fn flush(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.flush_all()
    }

    /// Flushes the calling thread's stream and announces that it has ended.
    ///
    /// A thread that never emitted a record has no stream and nothing is sent. If a
    /// thread exits without calling this, its stream is kept until the next `flush`
    /// or full free batch, which ends it on the thread's behalf.
    pub fn thread_end(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.end_stream(std::thread::current().id())
    }

    #[cfg(test)]
    pub(crate) fn open_streams(&self) -> usize {
        self.shared.open_streams()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.closed.load(Ordering::Acquire)
    }

    /// Ends the session: seals every buffer, sends `Close`, and waits for the queue to
    /// reach the transport, bounded by the drain timeout.
    ///
    /// Returns the transport error if the session had already failed. Calling it again
    /// is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(mut sender) = self.sender.lock().take() else {
            return Ok(());
        };
        self.shared.state.closed.store(true, Ordering::Release);
        let deadline = tokio::time::Instant::now() + self.shared.config.drain_timeout;

        let shared = self.shared.clone();
        let drain = tokio::task::spawn_blocking(move || shared.drain());
        let drained = match tokio::time::timeout_at(deadline, drain).await {
            Ok(joined) => joined.map_err(|e| ClientError::TaskFailed(e.to_string()))?,
            Err(_) => {
                sender.abort();
                warn!("drain timed out while sealing buffers");
                return Err(ClientError::DrainTimeout);
            }
        };

        match tokio::time::timeout_at(deadline, &mut sender).await {
            Ok(joined) => joined.map_err(|e| ClientError::TaskFailed(e.to_string()))?,
            Err(_) => {
                sender.abort();
                warn!("drain timed out waiting for the transport");
                return Err(ClientError::DrainTimeout);
            }
        }

        if let Some(e) = self.shared.state.failure.lock().clone() {
            return Err(ClientError::Transport(e));
        }
        drained?;
        info!(methods = self.shared.methods.len(), "dispatch session shut down");
        Ok(())
    }
}

/// Builds one record argument by argument.
///
/// Nothing reaches the stream until `finish`. A writer dropped early leaves no trace.
pub struct EventWriter<'a> {
    shared: &'a Shared,
    record: RecordBuilder,
    ordering: Option<u8>,
    error: Option<ProtocolError>,
}

impl EventWriter<'_> {
    pub fn send_bool(&mut self, v: bool) -> &mut Self { self.record.bool(v); self }

    pub fn send_byte(&mut self, v: i8) -> &mut Self { self.record.byte(v); self }

    pub fn send_char(&mut self, v: u16) -> &mut Self { self.record.char(v); self }

    pub fn send_short(&mut self, v: i16) -> &mut Self { self.record.short(v); self }

    pub fn send_int(&mut self, v: i32) -> &mut Self { self.record.int(v); self }

    pub fn send_long(&mut self, v: i64) -> &mut Self { self.record.long(v); self }

    pub fn send_float(&mut self, v: f32) -> &mut Self { self.record.float(v); self }

    pub fn send_double(&mut self, v: f64) -> &mut Self { self.record.double(v); self }

    pub fn send_object(&mut self, v: NetReference) -> &mut Self { self.record.object(v); self }

    pub fn send_object_with_data(&mut self, v: NetReference) -> &mut Self {
        self.record.object_with_data(v);
        self
    }

    pub fn send_string(&mut self, v: &str) -> &mut Self {
        let res = self.record.str(v);
        self.keep_error(res)
    }

    pub fn send_bytes(&mut self, v: &[u8]) -> &mut Self {
        let res = self.record.bytes(v);
        self.keep_error(res)
    }

    pub fn send_value(&mut self, v: &TypedValue) -> &mut Self {
        let res = self.record.value(v);
        self.keep_error(res)
    }

    fn keep_error(&mut self, res: shadowwire::Result<()>) -> &mut Self {
        if let Err(e) = res {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Appends the finished record to its stream.
    ///
    /// Fails without appending anything if any argument failed to encode.
    pub fn finish(self) -> Result<()> {
        if let Some(e) = self.error {
            return Err(e.into());
        }
        match self.ordering {
            None => self.shared.append_local(self.record),
            Some(ordering) => self.shared.append_ordered(ordering, self.record),
        }
    }
}
