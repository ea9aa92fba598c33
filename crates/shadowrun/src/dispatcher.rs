//! # Analysis Dispatcher
//!
//! The server-side read loop for one session.
//!
//! ## Invariants
//! - **Stream Order**: records reach analyses in the order their frames completed on
//!   the transport, and in record order within a frame.
//! - **Whole Frames Only**: a frame is acted on only once all of its bytes arrived.
//!   Nothing from a truncated frame reaches an analysis.
//! - **Clean Exit Only**: `on_exit` runs exactly once when the session ends normally
//!   (Close frame or end of stream). A fatal error skips it.

use std::sync::Arc;

use shadowwire::EventRecord;
use shadowwire::FrameReader;
use shadowwire::Message;
use shadowwire::MethodId;
use shadowwire::ProtocolError;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::analysis::AnalysisError;
use crate::analysis::AnalysisRegistry;
use crate::analysis::Argument;
use crate::analysis::Invocation;
use crate::config::ServerConfig;
use crate::heap::HeapError;
use crate::heap::ShadowData;
use crate::heap::ShadowHeap;
use crate::lifecycle::LifecycleNotifier;
use crate::registration::RegistrationError;
use crate::transport::Transport;

/// A fatal session failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Protocol(ProtocolError),
    /// A record used an id no `RegisterMethod` frame bound.
    UnknownMethod(MethodId),
    Registration { id: MethodId, name: String, source: RegistrationError },
    Analysis { id: MethodId, name: String, source: AnalysisError },
    Heap(HeapError),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::UnknownMethod(id) => write!(f, "record for unregistered {}", id),
            Self::Registration { id, name, source } => {
                write!(f, "cannot register {} as {:?}: {}", id, name, source)
            }
            Self::Analysis { id, name, source } => {
                write!(f, "analysis failed in {:?} ({}): {}", name, id, source)
            }
            Self::Heap(e) => write!(f, "shadow heap error: {}", e),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<ProtocolError> for DispatchError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<HeapError> for DispatchError {
    fn from(e: HeapError) -> Self {
        Self::Heap(e)
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Counters for a completed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Records delivered to analyses.
    pub events: u64,
    /// Objects whose `on_free` round was delivered.
    pub frees: u64,
    pub registrations: u64,
    pub thread_ends: u64,
    /// Bytes of complete frames consumed.
    pub bytes: u64,
    /// True if the stream ended with a Close frame rather than end of stream.
    pub closed_cleanly: bool,
}

enum Flow {
    Continue,
    Close,
}

pub struct AnalysisDispatcher {
    transport: Box<dyn Transport>,
    registry: AnalysisRegistry,
    heap: Arc<ShadowHeap>,
    notifier: LifecycleNotifier,
    reader: FrameReader,
    summary: SessionSummary,
}

impl AnalysisDispatcher {
    pub fn new(transport: Box<dyn Transport>, registry: AnalysisRegistry, config: &ServerConfig) -> Self {
        let heap = Arc::new(ShadowHeap::with_max_tombstones(config.max_tombstones));
        Self {
            transport,
            registry,
            notifier: LifecycleNotifier::new(heap.clone()),
            heap,
            reader: FrameReader::with_max_frame(config.max_frame),
            summary: SessionSummary::default(),
        }
    }

    /// The session's shadow heap.
    pub fn heap(&self) -> Arc<ShadowHeap> {
        self.heap.clone()
    }

    /// Runs the session to completion.
    ///
    /// On a normal end every analysis sees `on_exit` once and the summary is
    /// returned. On a fatal error one error event is logged and the error returned.
    pub async fn run(mut self) -> Result<SessionSummary> {
        info!(analyses = self.registry.len(), "analysis session started");
        match self.pump().await {
            Ok(()) => {
                self.notifier.notify_exit(&mut self.registry);
                self.summary.frees = self.notifier.frees();
                info!(
                    events = self.summary.events,
                    frees = self.summary.frees,
                    bytes = self.summary.bytes,
                    "analysis session finished"
                );
                Ok(self.summary)
            }
            Err(e) => {
                error!(error = %e, events = self.summary.events, "analysis session aborted");
                Err(e)
            }
        }
    }

    async fn pump(&mut self) -> Result<()> {
        loop {
            while let Some(frame) = self.reader.next_frame()? {
                self.summary.bytes += frame.wire_len as u64;
                if let Flow::Close = self.handle(frame.message)? {
                    self.summary.closed_cleanly = true;
                    if self.reader.buffered() > 0 {
                        warn!(bytes = self.reader.buffered(), "ignoring bytes after close");
                    }
                    return Ok(());
                }
            }

            match self.transport.recv().await {
                Ok(Some(chunk)) => self.reader.push(&chunk),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "transport failed, treating as end of stream");
                    break;
                }
            }
        }
        self.reader.finish()?;
        Ok(())
    }

    fn handle(&mut self, message: Message) -> Result<Flow> {
        match message {
            Message::Close => return Ok(Flow::Close),
            Message::Analyze { ordering_id, records } => {
                trace!(ordering_id, records = records.len(), "analyze frame");
                for record in records {
                    self.deliver(ordering_id, record)?;
                }
            }
            Message::ObjectFree(tokens) => {
                for token in tokens {
                    self.notifier.notify_free(&mut self.registry, token);
                }
            }
            Message::RegisterMethod { id, name } => {
                if let Err(source) = self.registry.bind(id, &name) {
                    return Err(DispatchError::Registration { id, name, source });
                }
                debug!(%id, name = %name, "method registered");
                self.summary.registrations += 1;
            }
            Message::ClassInfo(info) => {
                let class = info.class;
                self.heap.attach(class, ShadowData::Class(info))?;
            }
            Message::StringInfo { object, value } => {
                self.heap.attach(object, ShadowData::String(value))?;
            }
            Message::ThreadInfo(info) => {
                let thread = info.thread;
                self.heap.attach(thread, ShadowData::Thread(info))?;
            }
            Message::ThreadEnd { ordering_id } => {
                debug!(ordering_id, "thread ended");
                self.summary.thread_ends += 1;
            }
        }
        Ok(Flow::Continue)
    }

    fn deliver(&mut self, ordering_id: u64, record: EventRecord) -> Result<()> {
        let Some(binding) = self.registry.binding(record.method).cloned() else {
            return Err(DispatchError::UnknownMethod(record.method));
        };

        let args = record
            .args
            .into_iter()
            .map(|v| Argument::resolve(v, &self.heap))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let invocation = Invocation {
            method: binding.method.clone(),
            method_id: record.method,
            ordering_id,
            args,
        };

        if let Err(source) = self.registry.deliver(&binding, &invocation) {
            return Err(DispatchError::Analysis {
                id: record.method,
                name: binding.name.to_string(),
                source,
            });
        }
        self.summary.events += 1;
        Ok(())
    }
}
