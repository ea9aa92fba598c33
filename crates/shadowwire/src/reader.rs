//! # Stream Reassembly
//!
//! Transports deliver arbitrary chunks. `FrameReader` buffers them and yields whole
//! frames in arrival order.

use crate::error::ProtocolError;
use crate::error::Result;
use crate::frame::FRAME_HEADER_LEN;
use crate::frame::Message;
use crate::frame::MessageKind;

/// Default ceiling on a single frame body.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024 * 1024;

#[derive(Debug)]
pub struct FrameReader {
    buf: Vec<u8>,
    start: usize,
    max_frame: usize,
}

/// A frame together with its size on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message: Message,
    pub wire_len: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self { buf: Vec::new(), start: 0, max_frame }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.start > 0 && self.start >= self.buf.len() / 2 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes received but not yet consumed as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Decodes the next complete frame, or returns `None` until more bytes arrive.
    ///
    /// The kind byte and length are validated as soon as the header is present, so an
    /// unknown message fails without waiting for its body.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let pending = &self.buf[self.start..];
        let Some((kind, body_len)) = self.header(pending)? else {
            return Ok(None);
        };
        let total = FRAME_HEADER_LEN + body_len;
        if pending.len() < total {
            return Ok(None);
        }

        let message = Message::decode(kind, &pending[FRAME_HEADER_LEN..total])?;
        self.start += total;
        Ok(Some(Frame { message, wire_len: total }))
    }

    /// Called at end of stream. Fails if a partial frame is still buffered.
    pub fn finish(&self) -> Result<()> {
        let pending = &self.buf[self.start..];
        if pending.is_empty() {
            return Ok(());
        }
        let needed = match self.header(pending)? {
            Some((_, body_len)) => FRAME_HEADER_LEN + body_len,
            None => FRAME_HEADER_LEN,
        };
        Err(ProtocolError::Truncated { needed, available: pending.len() })
    }

    fn header(&self, pending: &[u8]) -> Result<Option<(MessageKind, usize)>> {
        let Some(&kind) = pending.first() else {
            return Ok(None);
        };
        let kind = MessageKind::from_u8(kind)?;
        let Some(len) = pending.get(1..FRAME_HEADER_LEN) else {
            return Ok(None);
        };
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        if len > self.max_frame {
            return Err(ProtocolError::FrameTooLarge { len, max: self.max_frame });
        }
        Ok(Some((kind, len)))
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
