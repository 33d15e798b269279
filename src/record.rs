//! Records stored in a segment.
//!
//! The segment only needs three things from a record: a place to put the
//! offset it assigns, and a way to turn the record into bytes and back.
//! [`LogRecord`] is that seam; schema/codec layers implement it for their
//! own types. [`Record`] is a minimal implementation for callers that just
//! want to store byte payloads.

use crate::error::{Result, SegmentError};

/// A record the segment can assign an offset to and persist as bytes.
pub trait LogRecord: Sized {
    /// Called by the segment with the assigned offset before encoding.
    fn set_offset(&mut self, offset: u64);

    fn encode(&self) -> Result<Vec<u8>>;

    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// Width of the offset header in the default record encoding.
const OFFSET_HEADER: usize = 8;

/// Default record: a logical offset plus an opaque payload.
///
/// Encoded as:
/// ```text
/// | offset: u64 (BE) | payload: [u8] |
/// | 8 bytes          | rest          |
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Logical offset; assigned by the segment on append.
    pub offset: u64,
    /// Record payload bytes.
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Record {
            offset: 0,
            payload: payload.into(),
        }
    }
}

impl LogRecord for Record {
    fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(OFFSET_HEADER + self.payload.len());
        bytes.extend_from_slice(&self.offset.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < OFFSET_HEADER {
            return Err(SegmentError::Serialization(format!(
                "record is {} bytes, shorter than its {} byte offset header",
                bytes.len(),
                OFFSET_HEADER
            )));
        }

        let (header, payload) = bytes.split_at(OFFSET_HEADER);
        let mut offset = [0u8; OFFSET_HEADER];
        offset.copy_from_slice(header);

        Ok(Record {
            offset: u64::from_be_bytes(offset),
            payload: payload.to_vec(),
        })
    }
}
