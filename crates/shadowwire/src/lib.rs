//! # Shadowwire
//!
//! The framed event protocol spoken between an instrumented process and its remote
//! analysis server.
//!
//! ## Architecture
//!
//! Values are encoded by `shadowpack`. This crate adds the two structures above them:
//! event records (a method id and its typed arguments) and frames (a kind byte and a
//! length-prefixed body). Batches are built incrementally and their counts patched in
//! on finish, so the sender never has to know a batch's size in advance.
//!
//! The receiving side reassembles frames from arbitrary transport chunks with
//! [`FrameReader`]. Any malformed input is reported as a [`ProtocolError`]; none of
//! the decoders panic on hostile bytes.

pub mod error;
pub mod frame;
pub mod reader;
pub mod record;

#[cfg(test)]
mod tests;

pub use error::ProtocolError;
pub use error::Result;
pub use frame::AnalyzeBatch;
pub use frame::ClassInfo;
pub use frame::FreeBatch;
pub use frame::Message;
pub use frame::MessageKind;
pub use frame::ThreadInfo;
pub use frame::FRAME_HEADER_LEN;
pub use frame::RESERVED_ORDERING_IDS;
pub use reader::Frame;
pub use reader::FrameReader;
pub use reader::DEFAULT_MAX_FRAME;
pub use record::decode_record;
pub use record::encode_record;
pub use record::EventRecord;
pub use record::MethodId;
pub use record::RecordBuilder;
pub use record::MAX_ARGS;

pub use shadowpack::NetReference;
pub use shadowpack::ObjectId;
pub use shadowpack::TypedValue;
