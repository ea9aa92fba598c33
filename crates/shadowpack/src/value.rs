//! # Values
//!
//! The argument vocabulary of an event record, and the surrogate token used in place
//! of an in-process object address.

// Net reference layout, from the lowest bit:
// 40 bits object id, 22 bits class id, 1 bit class instance, 1 bit data transmitted.
const OBJECT_ID_POS: u32 = 0;
const CLASS_ID_POS: u32 = 40;
const CLASS_INSTANCE_POS: u32 = 62;
const DATA_POS: u32 = 63;

const OBJECT_ID_MASK: u64 = 0xFF_FFFF_FFFF;
const CLASS_ID_MASK: u64 = 0x3F_FFFF;

/// The allocation-time identity of an in-process object.
///
/// Assigned once per object and never reused, so it is stable across token renewals.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

/// A surrogate token naming an in-process object without exposing its address.
///
/// The flag bits may change over the object's lifetime (for example once its data has
/// been transmitted), the object id never does.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Default)]
pub struct NetReference(u64);

impl NetReference {
    /// The null reference.
    pub const NULL: NetReference = NetReference(0);

    /// Largest object id representable in a token.
    pub const MAX_OBJECT_ID: u64 = OBJECT_ID_MASK;

    /// Largest class id representable in a token.
    pub const MAX_CLASS_ID: u32 = CLASS_ID_MASK as u32;

    /// Folds the identity fields into a token. Out-of-range bits are masked off.
    pub fn new(object_id: u64, class_id: u32, is_class: bool) -> Self {
        let mut raw = (object_id & OBJECT_ID_MASK) << OBJECT_ID_POS;
        raw |= (u64::from(class_id) & CLASS_ID_MASK) << CLASS_ID_POS;
        raw |= u64::from(is_class) << CLASS_INSTANCE_POS;
        Self(raw)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn object_id(self) -> ObjectId {
        ObjectId((self.0 >> OBJECT_ID_POS) & OBJECT_ID_MASK)
    }

    pub fn class_id(self) -> u32 {
        ((self.0 >> CLASS_ID_POS) & CLASS_ID_MASK) as u32
    }

    /// True if the referenced object is itself a class.
    pub fn is_class(self) -> bool {
        (self.0 >> CLASS_INSTANCE_POS) & 1 == 1
    }

    /// True once companion data for this object has been transmitted.
    pub fn has_data(self) -> bool {
        (self.0 >> DATA_POS) & 1 == 1
    }

    /// Returns the renewed token with the data-transmitted flag set.
    pub fn with_data(self) -> Self {
        Self(self.0 | (1 << DATA_POS))
    }
}

impl std::fmt::Display for NetReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// One argument of an event record.
///
/// `Object` and `ObjectWithData` are live heap references the receiver resolves to
/// shadow objects. Everything else is opaque metadata carried as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Bool(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    Object(NetReference),
    ObjectWithData(NetReference),
}

impl TypedValue {
    /// Returns the reference if this value names a live object.
    pub fn as_object(&self) -> Option<NetReference> {
        match self {
            TypedValue::Object(r) | TypedValue::ObjectWithData(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self { TypedValue::Bool(v) }
}

impl From<i32> for TypedValue {
    fn from(v: i32) -> Self { TypedValue::Int(v) }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self { TypedValue::Long(v) }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self { TypedValue::Double(v) }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self { TypedValue::Str(v.to_string()) }
}

impl From<NetReference> for TypedValue {
    fn from(v: NetReference) -> Self { TypedValue::Object(v) }
}
