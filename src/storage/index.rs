use crate::error::{Result, SegmentError};
use crate::storage::mmap::MmapRegion;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Width of the relative offset field of an index entry.
pub const OFFSET_WIDTH: u64 = 4;
/// Width of the store position field of an index entry.
pub const POSITION_WIDTH: u64 = 8;
/// Width of one index entry.
pub const ENTRY_WIDTH: u64 = OFFSET_WIDTH + POSITION_WIDTH;

/// Which entry to read from an [`Index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRef {
    /// The entry in slot `n` (0-based).
    At(u32),
    /// The most recently written entry.
    Last,
}

/// One decoded index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Offset relative to the segment's base offset.
    pub relative_offset: u32,
    /// Byte position of the record in the store.
    pub position: u64,
}

/// An Index maps segment-relative offsets to byte positions in the store.
///
/// Purpose:
/// - O(1) lookup of a record's store position by relative offset
/// - Dense: one entry per record, entry `n` describes relative offset `n`
///
/// Responsibilities:
/// - Own a `.index` file on disk and a read-write mapping over it
/// - Append entries into the mapping
/// - Decode entries by slot
/// - Give back unused pre-allocated space on close
///
/// NOT responsible for:
/// - Validating entry ordering (caller contract)
/// - Rolling over when full (it only reports `CapacityExhausted`)
///
/// ## On-disk format:
/// File name: `<base_offset>.index`
///
/// Each entry is exactly 12 bytes:
/// ```text
/// | relative offset: u32 (BE) | position: u64 (BE) |
/// | 4 bytes                   | 8 bytes            |
/// ```
///
/// ## Lifecycle:
/// 1. open: remember current length as `size`, grow the file to the
///    configured capacity, map it
/// 2. write: copy entries into the mapping at `size`
/// 3. close: msync, fsync, unmap, truncate the file back to `size`
///
/// Step 3 also runs from `Drop` when an Index is dropped without `close`,
/// so an error path never leaves the file at its pre-allocated length.
///
/// ## Concurrency:
/// No internal locking. `write` takes `&mut self`; sharing an Index across
/// threads requires a lock held by the caller.
pub struct Index {
    path: PathBuf,
    file: File,
    /// `None` once released.
    region: Option<MmapRegion>,
    /// Bytes of valid entries. Always a multiple of ENTRY_WIDTH.
    size: u64,
    /// Mapped capacity in bytes.
    capacity: u64,
}

impl Index {
    /// Open or create an index file with room for `max_index_bytes`.
    ///
    /// An existing file resumes where it left off. A file left at full
    /// pre-allocated length by a process that never closed it is trimmed
    /// back to the entries actually written (trailing zero slots are not
    /// entries).
    ///
    /// # Errors
    /// - `InvalidConfig` if `max_index_bytes` cannot hold a single entry
    /// - `CorruptIndex` if the file is larger than `max_index_bytes`
    /// - I/O errors opening, resizing or mapping the file
    pub fn open(path: impl AsRef<Path>, max_index_bytes: u64) -> Result<Self> {
        let path = path.as_ref();

        if max_index_bytes < ENTRY_WIDTH {
            return Err(SegmentError::InvalidConfig(format!(
                "max_index_bytes {} is smaller than one index entry ({} bytes)",
                max_index_bytes, ENTRY_WIDTH
            )));
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let file_len = file.metadata()?.len();
        if file_len > max_index_bytes {
            return Err(SegmentError::CorruptIndex(format!(
                "{} is {} bytes, larger than max_index_bytes {}",
                path.display(),
                file_len,
                max_index_bytes
            )));
        }

        file.set_len(max_index_bytes)?;

        let region = match MmapRegion::map_read_write(&file, max_index_bytes) {
            Ok(region) => region,
            Err(e) => {
                // Undo the pre-allocation before bailing out
                if let Err(restore) = file.set_len(file_len) {
                    tracing::warn!(
                        path = %path.display(),
                        error = %restore,
                        "failed to restore index length after mmap failure"
                    );
                }
                return Err(e);
            }
        };

        let size = written_size(region.as_slice(), file_len);
        if size != file_len {
            tracing::warn!(
                path = %path.display(),
                file_len,
                recovered = size,
                "index was not closed cleanly, trimmed unwritten tail"
            );
        }

        Ok(Index {
            path: path.to_path_buf(),
            file,
            region: Some(region),
            size,
            capacity: max_index_bytes,
        })
    }

    fn region(&self) -> Result<&MmapRegion> {
        self.region.as_ref().ok_or(SegmentError::EndOfData)
    }

    /// Read one entry.
    ///
    /// # Errors
    /// - `EndOfData` if the index is empty, or the requested slot was never
    ///   written (even though the mapping may have room for it)
    pub fn read(&self, entry: EntryRef) -> Result<IndexEntry> {
        if self.size == 0 {
            return Err(SegmentError::EndOfData);
        }

        let slot = match entry {
            EntryRef::Last => self.size / ENTRY_WIDTH - 1,
            EntryRef::At(n) => u64::from(n),
        };

        let pos = slot * ENTRY_WIDTH;
        if self.size < pos + ENTRY_WIDTH {
            return Err(SegmentError::EndOfData);
        }

        Ok(decode_entry(self.region()?.as_slice(), pos as usize))
    }

    /// Append an entry at the end of the written region.
    ///
    /// Entries must be written with relative offsets 0, 1, 2, ... in order.
    /// This is not checked.
    ///
    /// # Errors
    /// - `CapacityExhausted` if the mapping has no room for another entry
    pub fn write(&mut self, relative_offset: u32, position: u64) -> Result<()> {
        let required = self.size + ENTRY_WIDTH;
        if self.capacity < required {
            return Err(SegmentError::CapacityExhausted {
                capacity: self.capacity,
                required,
            });
        }

        let start = self.size as usize;
        let region = self.region.as_mut().ok_or(SegmentError::EndOfData)?;
        let data = region.as_mut_slice();

        data[start..start + OFFSET_WIDTH as usize].copy_from_slice(&relative_offset.to_be_bytes());
        data[start + OFFSET_WIDTH as usize..start + ENTRY_WIDTH as usize]
            .copy_from_slice(&position.to_be_bytes());

        self.size = required;
        Ok(())
    }

    /// Drop every entry from slot `entries` onwards.
    ///
    /// Dropped slots are zeroed so they read as unwritten after a crash.
    /// Asking for more entries than exist is a no-op.
    pub fn truncate(&mut self, entries: u64) -> Result<()> {
        let new_size = entries.saturating_mul(ENTRY_WIDTH);
        if new_size >= self.size {
            return Ok(());
        }

        let (start, end) = (new_size as usize, self.size as usize);
        let region = self.region.as_mut().ok_or(SegmentError::EndOfData)?;
        region.as_mut_slice()[start..end].fill(0);

        self.size = new_size;
        Ok(())
    }

    /// Synchronously write the mapped entries back to the file.
    pub fn sync(&self) -> Result<()> {
        self.region()?.flush()?;
        Ok(())
    }

    /// True if another entry would not fit.
    pub fn is_full(&self) -> bool {
        self.capacity < self.size + ENTRY_WIDTH
    }

    /// Bytes of written entries.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Mapped capacity in bytes (`max_index_bytes`).
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of written entries.
    pub fn len(&self) -> u64 {
        self.size / ENTRY_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Path of the `.index` file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync the mapping and the file, unmap, and truncate the file down to
    /// the written entries.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let Some(region) = self.region.take() else {
            return Ok(());
        };

        region.flush_async()?;
        self.file.sync_all()?;

        // The mapping must be gone before the file shrinks underneath it
        drop(region);

        self.file.set_len(self.size)?;
        self.file.sync_all()?;

        Ok(())
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if self.region.is_none() {
            return;
        }
        if let Err(e) = self.release() {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to release index on drop"
            );
        }
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("open", &self.region.is_some())
            .finish()
    }
}

pub(crate) fn decode_entry(data: &[u8], pos: usize) -> IndexEntry {
    let mut offset = [0u8; OFFSET_WIDTH as usize];
    offset.copy_from_slice(&data[pos..pos + OFFSET_WIDTH as usize]);

    let mut position = [0u8; POSITION_WIDTH as usize];
    position.copy_from_slice(&data[pos + OFFSET_WIDTH as usize..pos + ENTRY_WIDTH as usize]);

    IndexEntry {
        relative_offset: u32::from_be_bytes(offset),
        position: u64::from_be_bytes(position),
    }
}

/// Number of bytes of real entries in a mapping whose file was `file_len`
/// bytes long when opened.
///
/// A partial trailing entry is dropped. Trailing all-zero slots after the
/// first are dropped too: a dense index never stores `(0, 0)` anywhere but
/// slot 0, so those are pre-allocated space from an unclean shutdown.
pub(crate) fn written_size(data: &[u8], file_len: u64) -> u64 {
    let mut entries = file_len / ENTRY_WIDTH;

    while entries > 1 {
        let start = ((entries - 1) * ENTRY_WIDTH) as usize;
        if data[start..start + ENTRY_WIDTH as usize].iter().any(|b| *b != 0) {
            break;
        }
        entries -= 1;
    }

    entries * ENTRY_WIDTH
}
