//! # Protocol Frames
//!
//! Every message on the stream is `[kind u8][body length u32][body]`.
//!
//! ## Invariants
//! - **Panic Safety**: all decoding paths return `Result`, never panicking on unknown data.
//! - **Exact Bodies**: a body must be consumed completely by its kind's decoder; leftover
//!   bytes are a protocol error, not padding.
//! - **Counts From Content**: batch counts and frame lengths are patched in from what was
//!   actually written, never supplied by the caller.

use crate::error::ProtocolError;
use crate::error::Result;
use crate::record::EventRecord;
use crate::record::MethodId;

use shadowpack::Decoder;
use shadowpack::Encoder;
use shadowpack::NetReference;
use shadowpack::Patch;

/// Size of the `[kind][length]` prefix.
pub const FRAME_HEADER_LEN: usize = 5;

/// Ordering ids below this value are reserved for explicitly ordered buffers.
pub const RESERVED_ORDERING_IDS: u64 = 256;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Close = 0,
    Analyze = 1,
    ObjectFree = 2,
    RegisterMethod = 3,
    ClassInfo = 4,
    StringInfo = 5,
    ThreadInfo = 6,
    ThreadEnd = 7,
}

impl MessageKind {
    pub fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Self::Close,
            1 => Self::Analyze,
            2 => Self::ObjectFree,
            3 => Self::RegisterMethod,
            4 => Self::ClassInfo,
            5 => Self::StringInfo,
            6 => Self::ThreadInfo,
            7 => Self::ThreadEnd,
            other => return Err(ProtocolError::UnknownMessage(other)),
        })
    }
}

/// Static description of a class, sent once per class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub class: NetReference,
    pub signature: String,
    pub generic: String,
    pub loader: NetReference,
    pub super_class: NetReference,
}

/// Name and daemon status of an instrumented thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub thread: NetReference,
    pub name: String,
    pub daemon: bool,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Orderly end of the session. No frames follow.
    Close,
    /// A batch of records sharing one ordering id, in emission order.
    Analyze { ordering_id: u64, records: Vec<EventRecord> },
    /// Objects that no longer exist in the instrumented process.
    ObjectFree(Vec<NetReference>),
    /// Binds a method id to its fully qualified name.
    RegisterMethod { id: MethodId, name: String },
    ClassInfo(ClassInfo),
    /// The contents of a string object.
    StringInfo { object: NetReference, value: String },
    ThreadInfo(ThreadInfo),
    /// The thread owning `ordering_id` has terminated and will send nothing more.
    ThreadEnd { ordering_id: u64 },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Close => MessageKind::Close,
            Message::Analyze { .. } => MessageKind::Analyze,
            Message::ObjectFree(_) => MessageKind::ObjectFree,
            Message::RegisterMethod { .. } => MessageKind::RegisterMethod,
            Message::ClassInfo(_) => MessageKind::ClassInfo,
            Message::StringInfo { .. } => MessageKind::StringInfo,
            Message::ThreadInfo(_) => MessageKind::ThreadInfo,
            Message::ThreadEnd { .. } => MessageKind::ThreadEnd,
        }
    }

    /// Appends the complete frame, header included. Nothing is written on error.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        let mark = enc.len();
        let res = self.encode_inner(enc);
        if res.is_err() {
            enc.truncate(mark);
        }
        res
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes())
    }

    fn encode_inner(&self, enc: &mut Encoder) -> Result<()> {
        enc.raw_u8(self.kind() as u8);
        let len = enc.reserve_u32();
        let body_start = enc.len();

        match self {
            Message::Close => {}
            Message::Analyze { ordering_id, records } => {
                enc.raw_u64(*ordering_id);
                enc.raw_u32(count_u32(records.len())?);
                for record in records {
                    record.encode(enc)?;
                }
            }
            Message::ObjectFree(refs) => {
                enc.raw_u32(count_u32(refs.len())?);
                for r in refs {
                    enc.raw_u64(r.raw());
                }
            }
            Message::RegisterMethod { id, name } => {
                enc.raw_u16(id.0);
                enc.str(name)?;
            }
            Message::ClassInfo(info) => {
                enc.raw_u64(info.class.raw());
                enc.str(&info.signature)?;
                enc.str(&info.generic)?;
                enc.raw_u64(info.loader.raw());
                enc.raw_u64(info.super_class.raw());
            }
            Message::StringInfo { object, value } => {
                enc.raw_u64(object.raw());
                enc.str(value)?;
            }
            Message::ThreadInfo(info) => {
                enc.raw_u64(info.thread.raw());
                enc.str(&info.name)?;
                enc.bool(info.daemon);
            }
            Message::ThreadEnd { ordering_id } => {
                enc.raw_u64(*ordering_id);
            }
        }

        let body_len = count_u32(enc.len() - body_start)?;
        enc.patch_u32(len, body_len)?;
        Ok(())
    }

    /// Decodes a frame body whose kind has already been read.
    pub fn decode(kind: MessageKind, body: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let msg = match kind {
            MessageKind::Close => Message::Close,
            MessageKind::Analyze => {
                let ordering_id = dec.raw_u64()?;
                let count = dec.raw_u32()? as usize;
                // Every record is at least three bytes; cap the preallocation by that.
                let mut records = Vec::with_capacity(count.min(dec.remaining() / 3));
                for _ in 0..count {
                    records.push(EventRecord::decode(&mut dec)?);
                }
                Message::Analyze { ordering_id, records }
            }
            MessageKind::ObjectFree => {
                let count = dec.raw_u32()? as usize;
                let mut refs = Vec::with_capacity(count.min(dec.remaining() / 8));
                for _ in 0..count {
                    refs.push(NetReference::from_raw(dec.raw_u64()?));
                }
                Message::ObjectFree(refs)
            }
            MessageKind::RegisterMethod => {
                let id = MethodId(dec.raw_u16()?);
                let name = dec.str()?.to_string();
                Message::RegisterMethod { id, name }
            }
            MessageKind::ClassInfo => Message::ClassInfo(ClassInfo {
                class: NetReference::from_raw(dec.raw_u64()?),
                signature: dec.str()?.to_string(),
                generic: dec.str()?.to_string(),
                loader: NetReference::from_raw(dec.raw_u64()?),
                super_class: NetReference::from_raw(dec.raw_u64()?),
            }),
            MessageKind::StringInfo => {
                let object = NetReference::from_raw(dec.raw_u64()?);
                let value = dec.str()?.to_string();
                Message::StringInfo { object, value }
            }
            MessageKind::ThreadInfo => Message::ThreadInfo(ThreadInfo {
                thread: NetReference::from_raw(dec.raw_u64()?),
                name: dec.str()?.to_string(),
                daemon: dec.bool()?,
            }),
            MessageKind::ThreadEnd => Message::ThreadEnd { ordering_id: dec.raw_u64()? },
        };

        if !dec.is_empty() {
            return Err(ProtocolError::TrailingBytes(dec.remaining()));
        }
        Ok(msg)
    }
}

fn count_u32(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| ProtocolError::BatchTooLarge)
}

// ============================================================================
//  Incremental batch builders
// ============================================================================

/// Shared state of a frame whose count and length are patched on finish.
#[derive(Debug)]
struct OpenFrame {
    enc: Encoder,
    len: Patch,
    count: Patch,
    items: u32,
}

impl OpenFrame {
    fn begin(kind: MessageKind, prefix: Option<u64>) -> Self {
        let mut enc = Encoder::new();
        enc.raw_u8(kind as u8);
        let len = enc.reserve_u32();
        if let Some(p) = prefix {
            enc.raw_u64(p);
        }
        let count = enc.reserve_u32();
        Self { enc, len, count, items: 0 }
    }

    fn bump(&mut self) -> Result<()> {
        self.items = self.items.checked_add(1).ok_or(ProtocolError::BatchTooLarge)?;
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        let body_len = count_u32(self.enc.len() - FRAME_HEADER_LEN)?;
        self.enc.patch_u32(self.count, self.items)?;
        self.enc.patch_u32(self.len, body_len)?;
        Ok(self.enc.into_bytes())
    }
}

/// Accumulates event records for one ordering id into a single Analyze frame.
#[derive(Debug)]
pub struct AnalyzeBatch {
    ordering_id: u64,
    frame: OpenFrame,
}

impl AnalyzeBatch {
    pub fn new(ordering_id: u64) -> Self {
        Self { ordering_id, frame: OpenFrame::begin(MessageKind::Analyze, Some(ordering_id)) }
    }

    pub fn ordering_id(&self) -> u64 {
        self.ordering_id
    }

    /// Appends a complete record. Nothing is written on error.
    pub fn push(&mut self, record: &EventRecord) -> Result<()> {
        self.frame.bump()?;
        record.encode(&mut self.frame.enc).inspect_err(|_| self.frame.items -= 1)
    }

    /// Gives the encoder to `write`, which must append exactly one record or fail
    /// without writing.
    pub fn push_with(&mut self, write: impl FnOnce(&mut Encoder) -> Result<()>) -> Result<()> {
        self.frame.bump()?;
        write(&mut self.frame.enc).inspect_err(|_| self.frame.items -= 1)
    }

    pub fn records(&self) -> u32 {
        self.frame.items
    }

    pub fn is_empty(&self) -> bool {
        self.frame.items == 0
    }

    /// Encoded size of the frame so far, header included.
    pub fn len(&self) -> usize {
        self.frame.enc.len()
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        self.frame.finish()
    }
}

/// Accumulates freed references into a single ObjectFree frame.
#[derive(Debug)]
pub struct FreeBatch {
    frame: OpenFrame,
}

impl FreeBatch {
    pub fn new() -> Self {
        Self { frame: OpenFrame::begin(MessageKind::ObjectFree, None) }
    }

    pub fn push(&mut self, r: NetReference) -> Result<()> {
        self.frame.bump()?;
        self.frame.enc.raw_u64(r.raw());
        Ok(())
    }

    pub fn count(&self) -> u32 {
        self.frame.items
    }

    pub fn is_empty(&self) -> bool {
        self.frame.items == 0
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        self.frame.finish()
    }
}

impl Default for FreeBatch {
    fn default() -> Self {
        Self::new()
    }
}
