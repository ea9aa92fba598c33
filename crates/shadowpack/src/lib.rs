//! # Shadowpack
//!
//! A small, strict serialization library for the values carried by analysis events.
//!
//! ## Philosophy
//!
//! - **Strict Tags**: An unknown tag byte is an error, never skipped. Skipping an item we
//!   cannot size would desynchronise every value after it.
//! - **TLV Architecture**: `[Tag][Length?][Value]`. Scalars have a width fixed by their tag,
//!   blobs carry an explicit length prefix.
//! - **Bounded**: Decoders are zero-copy, bounds-checked views. A short read reports how many
//!   bytes were needed and how many were left.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Object references**: `[Tag: 1b][NetRef: 8b]`
//!
//! All integers are Little-Endian.

mod value;


pub use value::NetReference;
pub use value::ObjectId;
pub use value::TypedValue;

/// Shadowpack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes were available than a fixed width or length prefix requires.
    Truncated { needed: usize, available: usize },
    /// Byte does not correspond to any `Tag`.
    UnknownTag(u8),
    /// A valid tag was found where a different one was required.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Blob length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// A back-patch position does not point inside the buffer.
    PatchOutOfBounds(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Truncated { needed, available } => {
                write!(f, "Truncated: needed {} bytes, {} available", needed, available)
            }
            Error::UnknownTag(b) => write!(f, "Unknown tag byte: {:#04x}", b),
            Error::UnexpectedTag { expected, found } => {
                write!(f, "Unexpected tag: expected {:?}, found {:?}", expected, found)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Shadowpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of an encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    // Fixed-width scalars
    BoolTrue = 0x01,
    BoolFalse = 0x02,
    Byte = 0x03,
    Char = 0x04,
    Short = 0x05,
    Int = 0x06,
    Long = 0x07,
    Float = 0x08,
    Double = 0x09,

    // Blobs (Tag + u32 Len + Bytes)
    String = 0x10,
    Bytes = 0x11,

    // Object references (Tag + u64 NetRef)
    Object = 0x20,
    ObjectData = 0x21,
}

impl Tag {
    /// Returns the Tag variant for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::BoolTrue),
            0x02 => Some(Tag::BoolFalse),
            0x03 => Some(Tag::Byte),
            0x04 => Some(Tag::Char),
            0x05 => Some(Tag::Short),
            0x06 => Some(Tag::Int),
            0x07 => Some(Tag::Long),
            0x08 => Some(Tag::Float),
            0x09 => Some(Tag::Double),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::Object),
            0x21 => Some(Tag::ObjectData),
            _ => None,
        }
    }

    /// Payload width for fixed-size tags, `None` for length-prefixed blobs.
    pub fn width(self) -> Option<usize> {
        match self {
            Tag::BoolTrue | Tag::BoolFalse => Some(0),
            Tag::Byte => Some(1),
            Tag::Char | Tag::Short => Some(2),
            Tag::Int | Tag::Float => Some(4),
            Tag::Long | Tag::Double | Tag::Object | Tag::ObjectData => Some(8),
            Tag::String | Tag::Bytes => None,
        }
    }
}

/// A position in an `Encoder` buffer reserved for a value written later.
///
/// Used for counts and lengths that are only known once the body is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch(usize);

/// An append-only encoder.
///
/// Values are written tagged; the `raw_*` methods write untagged header fields
/// whose meaning is fixed by position (frame kinds, method ids, counts).
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Creates a new encoder that can hold `cap` bytes before reallocating.
    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    /// Consumes the encoder and returns the final byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns a view of the current buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes the encoder can hold before it reallocates.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Discards everything written after `len`.
    ///
    /// Used to roll back a partially written item.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Empties the buffer, keeping its allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Appends bytes produced by another encoder verbatim.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn write_tag(&mut self, tag: Tag) {
        self.buf.push(tag as u8);
    }

    /// Writes an untagged byte.
    pub fn raw_u8(&mut self, v: u8) { self.buf.push(v); }
    /// Writes an untagged u16 (LE).
    pub fn raw_u16(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Writes an untagged u32 (LE).
    pub fn raw_u32(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Writes an untagged u64 (LE).
    pub fn raw_u64(&mut self, v: u64) { self.buf.extend_from_slice(&v.to_le_bytes()); }

    /// Reserves four bytes for a u32 written later via `patch_u32`.
    pub fn reserve_u32(&mut self) -> Patch {
        let pos = self.buf.len();
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        Patch(pos)
    }

    /// Fills a reserved u32 slot.
    ///
    /// # Errors
    /// Returns `Error::PatchOutOfBounds` if the slot was discarded by `truncate`.
    pub fn patch_u32(&mut self, patch: Patch, v: u32) -> Result<()> {
        let end = patch.0 + 4;
        if end > self.buf.len() {
            return Err(Error::PatchOutOfBounds(patch.0));
        }
        self.buf[patch.0..end].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Encodes a boolean value.
    pub fn bool(&mut self, v: bool) {
        self.write_tag(if v { Tag::BoolTrue } else { Tag::BoolFalse });
    }

    /// Encodes a signed byte.
    pub fn byte(&mut self, v: i8) { self.write_tag(Tag::Byte); self.buf.push(v as u8); }
    /// Encodes a UTF-16 code unit (LE).
    pub fn char(&mut self, v: u16) { self.write_tag(Tag::Char); self.raw_u16(v); }
    /// Encodes a signed 16-bit integer (LE).
    pub fn short(&mut self, v: i16) { self.write_tag(Tag::Short); self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Encodes a signed 32-bit integer (LE).
    pub fn int(&mut self, v: i32) { self.write_tag(Tag::Int); self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Encodes a signed 64-bit integer (LE).
    pub fn long(&mut self, v: i64) { self.write_tag(Tag::Long); self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Encodes a 32-bit float (LE).
    pub fn float(&mut self, v: f32) { self.write_tag(Tag::Float); self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Encodes a 64-bit float (LE).
    pub fn double(&mut self, v: f64) { self.write_tag(Tag::Double); self.buf.extend_from_slice(&v.to_le_bytes()); }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.blob(Tag::String, v.as_bytes())
    }

    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.blob(Tag::Bytes, v)
    }

    fn blob(&mut self, tag: Tag, v: &[u8]) -> Result<()> {
        let len = v.len();
        if len > u32::MAX as usize { return Err(Error::BlobTooLarge(len)); }
        self.write_tag(tag);
        self.raw_u32(len as u32);
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Encodes a reference to a live object that the receiver must track.
    pub fn object(&mut self, v: NetReference) {
        self.write_tag(Tag::Object);
        self.raw_u64(v.raw());
    }

    /// Encodes a reference whose describing data travels in a companion message.
    pub fn object_with_data(&mut self, v: NetReference) {
        self.write_tag(Tag::ObjectData);
        self.raw_u64(v.raw());
    }

    /// Encodes any `TypedValue`.
    pub fn value(&mut self, v: &TypedValue) -> Result<()> {
        match v {
            TypedValue::Bool(b) => self.bool(*b),
            TypedValue::Byte(b) => self.byte(*b),
            TypedValue::Char(c) => self.char(*c),
            TypedValue::Short(s) => self.short(*s),
            TypedValue::Int(i) => self.int(*i),
            TypedValue::Long(l) => self.long(*l),
            TypedValue::Float(x) => self.float(*x),
            TypedValue::Double(x) => self.double(*x),
            TypedValue::Str(s) => self.str(s)?,
            TypedValue::Bytes(b) => self.bytes(b)?,
            TypedValue::Object(r) => self.object(*r),
            TypedValue::ObjectWithData(r) => self.object_with_data(*r),
        }
        Ok(())
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the internal cursor.
///
/// # Errors
/// All read operations return `Error::Truncated` if the buffer is exhausted.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let Some(&b) = self.buf.first() else {
            return Err(Error::Truncated { needed: 1, available: 0 });
        };
        Tag::from_u8(b).ok_or(Error::UnknownTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::Truncated { needed: n, available: self.buf.len() });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    /// Reads an untagged byte.
    pub fn raw_u8(&mut self) -> Result<u8> { Ok(self.take_array::<1>()?[0]) }
    /// Reads an untagged u16 (LE).
    pub fn raw_u16(&mut self) -> Result<u16> { Ok(u16::from_le_bytes(self.take_array()?)) }
    /// Reads an untagged u32 (LE).
    pub fn raw_u32(&mut self) -> Result<u32> { Ok(u32::from_le_bytes(self.take_array()?)) }
    /// Reads an untagged u64 (LE).
    pub fn raw_u64(&mut self) -> Result<u64> { Ok(u64::from_le_bytes(self.take_array()?)) }

    /// Reads `n` untagged bytes.
    pub fn raw_bytes(&mut self, n: usize) -> Result<&'a [u8]> { self.take(n) }

    /// Decodes a bool.
    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::BoolTrue => { self.take(1)?; Ok(true) },
            Tag::BoolFalse => { self.take(1)?; Ok(false) },
            found => Err(Error::UnexpectedTag { expected: Tag::BoolTrue, found }),
        }
    }

    /// Decodes a signed byte.
    pub fn byte(&mut self) -> Result<i8> { self.expect_tag(Tag::Byte)?; Ok(self.raw_u8()? as i8) }
    /// Decodes a UTF-16 code unit (LE).
    pub fn char(&mut self) -> Result<u16> { self.expect_tag(Tag::Char)?; self.raw_u16() }
    /// Decodes i16 (LE).
    pub fn short(&mut self) -> Result<i16> { self.expect_tag(Tag::Short)?; Ok(i16::from_le_bytes(self.take_array()?)) }
    /// Decodes i32 (LE).
    pub fn int(&mut self) -> Result<i32> { self.expect_tag(Tag::Int)?; Ok(i32::from_le_bytes(self.take_array()?)) }
    /// Decodes i64 (LE).
    pub fn long(&mut self) -> Result<i64> { self.expect_tag(Tag::Long)?; Ok(i64::from_le_bytes(self.take_array()?)) }
    /// Decodes f32 (LE).
    pub fn float(&mut self) -> Result<f32> { self.expect_tag(Tag::Float)?; Ok(f32::from_le_bytes(self.take_array()?)) }
    /// Decodes f64 (LE).
    pub fn double(&mut self) -> Result<f64> { self.expect_tag(Tag::Double)?; Ok(f64::from_le_bytes(self.take_array()?)) }

    /// Decodes a string slice (UTF-8).
    pub fn str(&mut self) -> Result<&'a str> {
        self.expect_tag(Tag::String)?;
        let bytes = self.blob_body()?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a byte slice.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect_tag(Tag::Bytes)?;
        self.blob_body()
    }

    fn blob_body(&mut self) -> Result<&'a [u8]> {
        let len = self.raw_u32()? as usize;
        self.take(len)
    }

    /// Decodes an object reference, with or without companion data.
    pub fn object(&mut self) -> Result<NetReference> {
        match self.peek_tag()? {
            Tag::Object | Tag::ObjectData => {
                self.take(1)?;
                Ok(NetReference::from_raw(self.raw_u64()?))
            }
            found => Err(Error::UnexpectedTag { expected: Tag::Object, found }),
        }
    }

    /// Decodes the next value, whatever its tag.
    pub fn value(&mut self) -> Result<TypedValue> {
        let tag = self.peek_tag()?;
        let v = match tag {
            Tag::BoolTrue | Tag::BoolFalse => TypedValue::Bool(self.bool()?),
            Tag::Byte => TypedValue::Byte(self.byte()?),
            Tag::Char => TypedValue::Char(self.char()?),
            Tag::Short => TypedValue::Short(self.short()?),
            Tag::Int => TypedValue::Int(self.int()?),
            Tag::Long => TypedValue::Long(self.long()?),
            Tag::Float => TypedValue::Float(self.float()?),
            Tag::Double => TypedValue::Double(self.double()?),
            Tag::String => TypedValue::Str(self.str()?.to_string()),
            Tag::Bytes => TypedValue::Bytes(self.bytes()?.to_vec()),
            Tag::Object => TypedValue::Object(self.object()?),
            Tag::ObjectData => TypedValue::ObjectWithData(self.object()?),
        };
        Ok(v)
    }
}
