use crate::config::{Config, SegmentConfig};
use crate::error::{Result, SegmentError};
use crate::record::LogRecord;
use crate::storage::index::{EntryRef, Index, ENTRY_WIDTH};
use crate::storage::store::Store;
use std::fs;
use std::path::{Path, PathBuf};

/// File extension of a segment's store file.
pub const STORE_EXTENSION: &str = "store";
/// File extension of a segment's index file.
pub const INDEX_EXTENSION: &str = "index";

/// A Segment is one bounded slice of the log: a Store holding the record
/// bytes and an Index locating them, both named after the base offset.
///
/// Responsibilities:
/// - Assign monotonically increasing logical offsets
/// - Translate absolute offsets to index slots (`offset - base_offset`)
/// - Report when either file has reached its configured limit
/// - Own the close/remove lifecycle of both files
///
/// NOT responsible for:
/// - Rolling over (the owning log sees `is_maxed` and opens a new segment)
/// - Record schema (records come in through [`LogRecord`])
///
/// ## Files:
/// ```text
/// <dir>/<base_offset>.store
/// <dir>/<base_offset>.index
/// ```
///
/// ## Append is two writes:
/// The record goes to the store first, then its entry to the index. If the
/// second write fails the store keeps a record the index cannot address.
/// `open` never repairs this on its own; it logs the mismatch and leaves the
/// files as they are. The owning log decides whether to call
/// [`Segment::recover`].
///
/// ## Thread safety:
/// The store locks internally, the index does not. `append` takes
/// `&mut self`, so concurrent writers need an outer lock
/// (e.g. `Mutex<Segment>`).
#[derive(Debug)]
pub struct Segment {
    /// Logical offset of the first record. Encoded in the filenames.
    base_offset: u64,

    /// Offset the next append will get.
    next_offset: u64,

    store: Store,
    index: Index,
    config: SegmentConfig,
}

impl Segment {
    /// Open or create the segment starting at `base_offset` in `dir`.
    ///
    /// `next_offset` is recovered from the last index entry: an empty index
    /// gives `base_offset`, otherwise `base_offset + last_relative + 1`.
    /// Store and index are only checked against each other, never modified;
    /// a mismatch is logged.
    ///
    /// # Errors
    /// - `InvalidConfig` for unusable limits
    /// - `CorruptIndex` if the index file is larger than `max_index_bytes`
    /// - I/O errors creating or opening either file
    pub fn open(dir: impl AsRef<Path>, base_offset: u64, config: &Config) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let store = Store::open(segment_path(dir, base_offset, STORE_EXTENSION))?;
        let index = Index::open(
            segment_path(dir, base_offset, INDEX_EXTENSION),
            config.segment.max_index_bytes,
        )?;

        let next_offset = next_offset_from(&index, base_offset)?;
        check_consistency(&store, &index)?;

        let store_bytes = store.size()?;
        tracing::debug!(
            dir = %dir.display(),
            base_offset,
            next_offset,
            store_bytes,
            index_bytes = index.size(),
            "opened segment"
        );

        Ok(Segment {
            base_offset,
            next_offset,
            store,
            index,
            config: config.segment.clone(),
        })
    }

    /// Append a record.
    ///
    /// Sets the record's offset to `next_offset`, encodes it, and stores it.
    ///
    /// # Returns
    /// The assigned logical offset.
    ///
    /// # Errors
    /// - `Serialization` if the record fails to encode
    /// - `CapacityExhausted` if the index is full (roll over)
    /// - I/O errors from the store
    pub fn append<R: LogRecord>(&mut self, record: &mut R) -> Result<u64> {
        record.set_offset(self.next_offset);
        let bytes = record.encode()?;
        self.append_bytes(&bytes)
    }

    /// Read the record at `offset`.
    ///
    /// # Errors
    /// - `EndOfData` if `offset` is not in `[base_offset, next_offset)`
    /// - `Serialization` if the stored bytes fail to decode
    pub fn read<R: LogRecord>(&self, offset: u64) -> Result<R> {
        let bytes = self.read_bytes(offset)?;
        R::decode(&bytes)
    }

    /// Append an already-encoded payload as the next record.
    ///
    /// The payload is stored as-is; it does not carry its offset unless the
    /// caller put it there. Returns the assigned offset.
    pub fn append_bytes(&mut self, payload: &[u8]) -> Result<u64> {
        let offset = self.next_offset;

        let relative = u32::try_from(offset - self.base_offset).map_err(|_| {
            SegmentError::CapacityExhausted {
                capacity: self.index.capacity(),
                required: self.index.size() + ENTRY_WIDTH,
            }
        })?;

        // A full index would leave the store record unaddressable; fail
        // before touching the store.
        if self.index.is_full() {
            return Err(SegmentError::CapacityExhausted {
                capacity: self.index.capacity(),
                required: self.index.size() + ENTRY_WIDTH,
            });
        }

        let (_, position) = self.store.append(payload)?;
        self.index.write(relative, position)?;

        self.next_offset += 1;
        Ok(offset)
    }

    /// Read the raw payload stored at `offset`.
    pub fn read_bytes(&self, offset: u64) -> Result<Vec<u8>> {
        if offset < self.base_offset || offset >= self.next_offset {
            return Err(SegmentError::EndOfData);
        }

        let relative = u32::try_from(offset - self.base_offset).map_err(|_| SegmentError::EndOfData)?;
        let entry = self.index.read(EntryRef::At(relative))?;

        self.store.read(entry.position)
    }

    /// True once the store or the index has reached its configured limit.
    ///
    /// This is the rollover signal for the owning log. The index side is
    /// "no room for another entry", so it turns true exactly when the next
    /// append would fail with `CapacityExhausted`, whatever the remainder of
    /// `max_index_bytes` modulo the entry width.
    pub fn is_maxed(&self) -> bool {
        let store_size = match self.store.size() {
            Ok(size) => size,
            // A poisoned store cannot take more appends either
            Err(_) => return true,
        };

        store_size >= self.config.max_store_bytes || self.index.is_full()
    }

    /// Bring store and index back in step after an interrupted append or a
    /// lost index file.
    ///
    /// 1. Index entries whose record is not completely in the store are
    ///    dropped, newest first (map pages reached disk, buffered store
    ///    bytes did not).
    /// 2. Complete store records after the last indexed one get their index
    ///    entries rebuilt from the length prefixes, as far as the index has
    ///    room.
    /// 3. A torn record at the very end of the store (length prefix or
    ///    payload cut short) is truncated away.
    ///
    /// Complete records are never deleted. `open` does not call this; it is
    /// the owning log's decision.
    pub fn recover(&mut self) -> Result<Recovery> {
        let mut report = Recovery::default();

        // 1. dangling index entries
        let mut scan_from = loop {
            match self.index.read(EntryRef::Last) {
                Ok(last) => match self.store.record_end(last.position)? {
                    Some(end) => break end,
                    None => {
                        tracing::warn!(
                            path = %self.index.path().display(),
                            relative_offset = last.relative_offset,
                            position = last.position,
                            "index entry points past end of store, dropping"
                        );
                        self.index.truncate(self.index.len() - 1)?;
                        report.dropped_entries += 1;
                    }
                },
                Err(SegmentError::EndOfData) => break 0,
                Err(e) => return Err(e),
            }
        };

        // 2. unindexed complete records
        let store_size = self.store.size()?;
        while scan_from < store_size && !self.index.is_full() {
            let Some(end) = self.store.record_end(scan_from)? else {
                break;
            };
            let Ok(relative) = u32::try_from(self.index.len()) else {
                break;
            };
            self.index.write(relative, scan_from)?;
            report.rebuilt_entries += 1;
            scan_from = end;
        }

        // 3. torn tail
        if scan_from < store_size {
            if self.store.record_end(scan_from)?.is_some() {
                tracing::warn!(
                    path = %self.store.path().display(),
                    unindexed_bytes = store_size - scan_from,
                    "index is full, store records past it stay unindexed"
                );
            } else {
                tracing::warn!(
                    path = %self.store.path().display(),
                    dropped_bytes = store_size - scan_from,
                    "truncating torn record at end of store"
                );
                self.store.truncate(scan_from)?;
                report.truncated_bytes = store_size - scan_from;
            }
        }

        self.next_offset = next_offset_from(&self.index, self.base_offset)?;

        if report != Recovery::default() {
            tracing::warn!(
                base_offset = self.base_offset,
                next_offset = self.next_offset,
                dropped_entries = report.dropped_entries,
                rebuilt_entries = report.rebuilt_entries,
                truncated_bytes = report.truncated_bytes,
                "recovered segment"
            );
        }

        Ok(report)
    }

    /// Make every appended record durable without closing.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()?;
        self.index.sync()?;
        Ok(())
    }

    /// Close the index, then the store.
    ///
    /// Both are released even if the first close fails; the first error
    /// is returned.
    pub fn close(self) -> Result<()> {
        tracing::debug!(
            base_offset = self.base_offset,
            next_offset = self.next_offset,
            "closing segment"
        );

        let index_result = self.index.close();
        let store_result = self.store.close();

        index_result?;
        store_result
    }

    /// Close the segment and delete both of its files.
    pub fn remove(self) -> Result<()> {
        let index_path = self.index.path().to_path_buf();
        let store_path = self.store.path().to_path_buf();
        let base_offset = self.base_offset;

        self.close()?;
        fs::remove_file(&index_path)?;
        fs::remove_file(&store_path)?;

        tracing::debug!(base_offset, "removed segment");
        Ok(())
    }

    /// Get the base offset of this segment.
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Get the next offset that will be assigned.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Number of records in this segment.
    pub fn record_count(&self) -> u64 {
        self.next_offset - self.base_offset
    }

    /// Store size in bytes, including buffered appends.
    pub fn store_size(&self) -> Result<u64> {
        self.store.size()
    }

    /// Bytes of written index entries.
    pub fn index_size(&self) -> u64 {
        self.index.size()
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub fn index_path(&self) -> &Path {
        self.index.path()
    }
}

/// `<dir>/<base_offset>.<extension>`
pub fn segment_path(dir: &Path, base_offset: u64, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", base_offset, extension))
}

/// Round `value` down to the nearest multiple of `boundary`.
///
/// Used by an owning log to align truncation points. A `boundary` of 0
/// returns `value` unchanged.
pub fn nearest_multiple(value: u64, boundary: u64) -> u64 {
    match value.checked_div(boundary) {
        Some(quotient) => quotient * boundary,
        None => value,
    }
}

/// What [`Segment::recover`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Index entries removed because their record was not in the store.
    pub dropped_entries: u64,
    /// Index entries written for store records that had none.
    pub rebuilt_entries: u64,
    /// Bytes of a torn trailing record cut from the store.
    pub truncated_bytes: u64,
}

fn next_offset_from(index: &Index, base_offset: u64) -> Result<u64> {
    match index.read(EntryRef::Last) {
        Ok(last) => Ok(base_offset + u64::from(last.relative_offset) + 1),
        Err(SegmentError::EndOfData) => Ok(base_offset),
        Err(e) => Err(e),
    }
}

/// Log, without touching either file, when the store and index disagree.
fn check_consistency(store: &Store, index: &Index) -> Result<()> {
    let store_size = store.size()?;
    let indexed_end = match index.read(EntryRef::Last) {
        Ok(last) => match store.record_end(last.position)? {
            Some(end) => end,
            None => {
                tracing::warn!(
                    path = %index.path().display(),
                    relative_offset = last.relative_offset,
                    position = last.position,
                    store_bytes = store_size,
                    "last index entry points past end of store"
                );
                return Ok(());
            }
        },
        Err(SegmentError::EndOfData) => 0,
        Err(e) => return Err(e),
    };

    if indexed_end < store_size {
        tracing::warn!(
            path = %store.path().display(),
            unindexed_bytes = store_size - indexed_end,
            "store has bytes past the last indexed record"
        );
    }
    Ok(())
}
