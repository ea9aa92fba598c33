//! # Event Records
//!
//! One instrumented call: `[method id u16][argc u8][argc typed values]`.
//!
//! ## Invariants
//! - **Exact Count**: `argc` equals the number of values that follow. Records are only
//!   ever built through [`EventRecord::encode`] or [`RecordBuilder::finish`], which
//!   write the count from the values actually serialized.
//! - **Self-Delimiting**: a record carries no length prefix. Its extent is recovered by
//!   decoding `argc` self-describing values.

use crate::error::ProtocolError;
use crate::error::Result;

use shadowpack::Decoder;
use shadowpack::Encoder;
use shadowpack::NetReference;
use shadowpack::TypedValue;

/// Most arguments one record can declare.
pub const MAX_ARGS: usize = u8::MAX as usize;

// Covers a handful of scalar and reference arguments; larger records grow.
const BODY_CAPACITY: usize = 64;

/// Small integer naming a registered instrumentation point. Zero is reserved.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodId(pub u16);

impl MethodId {
    /// The first id handed out by a registration table.
    pub const FIRST: MethodId = MethodId(1);
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "method#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub method: MethodId,
    pub args: Vec<TypedValue>,
}

impl EventRecord {
    pub fn new(method: MethodId, args: Vec<TypedValue>) -> Self {
        Self { method, args }
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Appends the record to `enc`. Nothing is written on error.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        encode_record(enc, self.method, &self.args)
    }

    /// Reads one record from the decoder, leaving the cursor after its last argument.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let method = MethodId(dec.raw_u16()?);
        let argc = dec.raw_u8()? as usize;
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(dec.value()?);
        }
        Ok(Self { method, args })
    }
}

/// Appends one record built from borrowed arguments. Nothing is written on error.
pub fn encode_record(enc: &mut Encoder, method: MethodId, args: &[TypedValue]) -> Result<()> {
    if args.len() > MAX_ARGS {
        return Err(ProtocolError::TooManyArgs(args.len()));
    }
    let mark = enc.len();
    enc.raw_u16(method.0);
    enc.raw_u8(args.len() as u8);
    for arg in args {
        if let Err(e) = enc.value(arg) {
            enc.truncate(mark);
            return Err(e.into());
        }
    }
    Ok(())
}

/// Decodes a byte slice holding exactly one record.
pub fn decode_record(bytes: &[u8]) -> Result<EventRecord> {
    let mut dec = Decoder::new(bytes);
    let record = EventRecord::decode(&mut dec)?;
    if !dec.is_empty() {
        return Err(ProtocolError::TrailingBytes(dec.remaining()));
    }
    Ok(record)
}

/// Streams the arguments of one record without collecting them first.
///
/// The header is written by [`RecordBuilder::finish`], so a builder dropped part way
/// through leaves no trace anywhere.
#[derive(Debug)]
pub struct RecordBuilder {
    method: MethodId,
    argc: usize,
    body: Encoder,
}

impl RecordBuilder {
    pub fn new(method: MethodId) -> Self {
        Self { method, argc: 0, body: Encoder::with_capacity(BODY_CAPACITY) }
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    pub fn bool(&mut self, v: bool) { self.body.bool(v); self.argc += 1; }

    pub fn byte(&mut self, v: i8) { self.body.byte(v); self.argc += 1; }

    pub fn char(&mut self, v: u16) { self.body.char(v); self.argc += 1; }

    pub fn short(&mut self, v: i16) { self.body.short(v); self.argc += 1; }

    pub fn int(&mut self, v: i32) { self.body.int(v); self.argc += 1; }

    pub fn long(&mut self, v: i64) { self.body.long(v); self.argc += 1; }

    pub fn float(&mut self, v: f32) { self.body.float(v); self.argc += 1; }

    pub fn double(&mut self, v: f64) { self.body.double(v); self.argc += 1; }

    pub fn object(&mut self, v: NetReference) { self.body.object(v); self.argc += 1; }

    pub fn object_with_data(&mut self, v: NetReference) { self.body.object_with_data(v); self.argc += 1; }

    pub fn str(&mut self, v: &str) -> Result<()> {
        self.body.str(v)?;
        self.argc += 1;
        Ok(())
    }

    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.body.bytes(v)?;
        self.argc += 1;
        Ok(())
    }

    pub fn value(&mut self, v: &TypedValue) -> Result<()> {
        self.body.value(v)?;
        self.argc += 1;
        Ok(())
    }

    /// Appends the finished record to `out`.
    pub fn finish(self, out: &mut Encoder) -> Result<()> {
        if self.argc > MAX_ARGS {
            return Err(ProtocolError::TooManyArgs(self.argc));
        }
        out.raw_u16(self.method.0);
        out.raw_u8(self.argc as u8);
        out.extend(self.body.as_bytes());
        Ok(())
    }

    /// Encoded size of the finished record.
    pub fn encoded_len(&self) -> usize {
        3 + self.body.len()
    }
}
