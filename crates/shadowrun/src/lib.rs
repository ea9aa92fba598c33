//! # Shadowrun
//!
//! Remote analysis dispatch: instrumented code emits events about live objects, and a
//! separate analysis process correlates them against stable shadow objects.
//!
//! ## Architecture
//!
//! - [`client::DispatchClient`] runs inside the instrumented process. It registers
//!   method names, buffers records per thread, and streams sealed frames over a
//!   [`transport::Transport`].
//! - [`dispatcher::AnalysisDispatcher`] runs in the analysis process. It reassembles
//!   frames, resolves object references through the [`heap::ShadowHeap`], and calls
//!   the [`analysis::RemoteAnalysis`] bound to each method id.
//! - [`lifecycle::LifecycleNotifier`] turns free reports and session end into
//!   `on_free` / `on_exit` callbacks.

pub mod analysis;
pub mod channel;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod heap;
pub mod lifecycle;
pub mod registration;
pub mod tagger;
pub mod tcp;
pub mod transport;


pub use analysis::AnalysisError;
pub use analysis::AnalysisRegistry;
pub use analysis::Argument;
pub use analysis::Invocation;
pub use analysis::RemoteAnalysis;
pub use channel::ChannelTransport;
pub use client::ClientError;
pub use client::DispatchClient;
pub use client::EventWriter;
pub use config::AgentOptions;
pub use config::ClientConfig;
pub use config::ServerConfig;
pub use dispatcher::AnalysisDispatcher;
pub use dispatcher::DispatchError;
pub use dispatcher::SessionSummary;
pub use heap::Handle;
pub use heap::ShadowData;
pub use heap::ShadowHeap;
pub use heap::ShadowObject;
pub use lifecycle::LifecycleNotifier;
pub use registration::RegistrationError;
pub use tagger::ObjectTagger;
pub use tcp::TcpTransport;
pub use transport::Transport;
pub use transport::TransportError;

pub use shadowpack::NetReference;
pub use shadowpack::ObjectId;
pub use shadowpack::TypedValue;
pub use shadowwire::ClassInfo;
pub use shadowwire::MethodId;
pub use shadowwire::ThreadInfo;
