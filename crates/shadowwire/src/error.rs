//! # Error Definitions
//!
//! Every way a byte stream can fail to be a valid event stream.
//!
//! All of these are fatal to a session: after a framing error the stream cannot be
//! realigned safely.

use shadowpack::Error as PackError;
use shadowpack::Tag;

/// Malformed, truncated, or unrecognised bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes were available than a fixed width or length prefix requires.
    Truncated { needed: usize, available: usize },
    /// An unrecognised value tag.
    UnknownTag(u8),
    /// A valid value tag where a different one was required.
    UnexpectedTag { expected: Tag, found: Tag },
    /// An unrecognised frame kind byte.
    UnknownMessage(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A record was given more arguments than the one-byte argc field can declare.
    TooManyArgs(usize),
    /// A frame body or record had bytes left after its declared contents.
    TrailingBytes(usize),
    /// A frame declared a body larger than the reader accepts.
    FrameTooLarge { len: usize, max: usize },
    /// A batch grew past the u32 count or length fields.
    BatchTooLarge,
    /// The value codec failed for a reason not covered above.
    Serialization(PackError),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "truncated payload: needed {} bytes, {} available", needed, available)
            }
            Self::UnknownTag(b) => write!(f, "unknown value tag {:#04x}", b),
            Self::UnexpectedTag { expected, found } => {
                write!(f, "unexpected value tag: expected {:?}, found {:?}", expected, found)
            }
            Self::UnknownMessage(b) => write!(f, "unknown message kind {:#04x}", b),
            Self::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            Self::TooManyArgs(n) => write!(f, "{} arguments do not fit in one record (max 255)", n),
            Self::TrailingBytes(n) => write!(f, "{} unexpected trailing bytes", n),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame body of {} bytes exceeds limit of {}", len, max)
            }
            Self::BatchTooLarge => write!(f, "batch exceeds u32 limits"),
            Self::Serialization(e) => write!(f, "serialization failed: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<PackError> for ProtocolError {
    fn from(e: PackError) -> Self {
        match e {
            PackError::Truncated { needed, available } => Self::Truncated { needed, available },
            PackError::UnknownTag(b) => Self::UnknownTag(b),
            PackError::UnexpectedTag { expected, found } => Self::UnexpectedTag { expected, found },
            PackError::InvalidUtf8 => Self::InvalidUtf8,
            other => Self::Serialization(other),
        }
    }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
