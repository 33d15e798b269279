pub mod config;
pub mod error;
pub mod record;
pub mod storage;

pub use config::{Config, SegmentConfig};
pub use error::{Result, SegmentError};
pub use record::{LogRecord, Record};
pub use storage::index::{EntryRef, Index, IndexEntry};
pub use storage::segment::{nearest_multiple, Recovery, Segment};
pub use storage::store::Store;
pub use storage::view::SegmentView;
