/// Segment storage errors.
/// These represent failures in the store, index and segment operations.
///
/// Nothing in this crate retries or recovers from an error internally;
/// every variant is surfaced to the immediate caller.
#[derive(thiserror::Error, Debug)]
pub enum SegmentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A read went past the data actually written: empty index, entry
    /// never written, offset outside the segment, or a store position past
    /// the end of the file. Callers may treat this as "not present".
    #[error("end of data")]
    EndOfData,

    /// The index has no room for another entry. The expected reaction is to
    /// roll over to a new segment, not to retry.
    #[error("index capacity exhausted: need {required} bytes, capacity {capacity}")]
    CapacityExhausted { capacity: u64, required: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

impl SegmentError {
    /// True for [`SegmentError::EndOfData`].
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, SegmentError::EndOfData)
    }

    /// True for [`SegmentError::CapacityExhausted`].
    pub fn is_capacity_exhausted(&self) -> bool {
        matches!(self, SegmentError::CapacityExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, SegmentError>;
