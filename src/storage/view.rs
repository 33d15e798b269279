use crate::config::SegmentConfig;
use crate::error::{Result, SegmentError};
use crate::record::LogRecord;
use crate::storage::index::{decode_entry, written_size, IndexEntry, ENTRY_WIDTH};
use crate::storage::segment::{segment_path, INDEX_EXTENSION, STORE_EXTENSION};
use crate::storage::store::{read_exact_at, record_end, LEN_WIDTH};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A read-only snapshot of a segment's files.
///
/// Opens nothing for writing, maps nothing and never resizes either file, so
/// it is safe to point at a segment a live writer still has open. What it
/// sees is what had reached the files when it was opened: a writer's
/// buffered store bytes are not visible, and index entries whose record is
/// not in the store yet read as `EndOfData`.
///
/// A missing index file reads as an empty index. A missing store file is an
/// error.
#[derive(Debug)]
pub struct SegmentView {
    base_offset: u64,
    entries: Vec<IndexEntry>,
    store: File,
    store_path: PathBuf,
    store_size: u64,
}

impl SegmentView {
    pub fn open(dir: impl AsRef<Path>, base_offset: u64) -> Result<Self> {
        let dir = dir.as_ref();
        let store_path = segment_path(dir, base_offset, STORE_EXTENSION);
        let index_path = segment_path(dir, base_offset, INDEX_EXTENSION);

        let store = File::open(&store_path)?;
        let store_size = store.metadata()?.len();

        let raw = match fs::read(&index_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        // A live writer's index sits at its pre-allocated length
        let size = written_size(&raw, raw.len() as u64);
        let entries = (0..size / ENTRY_WIDTH)
            .map(|slot| decode_entry(&raw, (slot * ENTRY_WIDTH) as usize))
            .collect();

        Ok(SegmentView {
            base_offset,
            entries,
            store,
            store_path,
            store_size,
        })
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Offset after the last index entry, computed the way `Segment::open`
    /// does.
    pub fn next_offset(&self) -> u64 {
        match self.entries.last() {
            Some(last) => self.base_offset + u64::from(last.relative_offset) + 1,
            None => self.base_offset,
        }
    }

    pub fn record_count(&self) -> u64 {
        self.next_offset() - self.base_offset
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn store_size(&self) -> u64 {
        self.store_size
    }

    pub fn index_size(&self) -> u64 {
        self.entries.len() as u64 * ENTRY_WIDTH
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Same rollover rule as `Segment::is_maxed`, against `config`.
    pub fn is_maxed(&self, config: &SegmentConfig) -> bool {
        self.store_size >= config.max_store_bytes
            || self.index_size() + ENTRY_WIDTH > config.max_index_bytes
    }

    /// Store bytes after the end of the last indexed record. Zero for a
    /// cleanly closed segment.
    pub fn unindexed_bytes(&self) -> Result<u64> {
        let indexed_end = match self.entries.last() {
            Some(last) => match record_end(&mut &self.store, last.position, self.store_size)? {
                Some(end) => end,
                None => return Ok(0),
            },
            None => 0,
        };
        Ok(self.store_size - indexed_end)
    }

    pub fn read<R: LogRecord>(&self, offset: u64) -> Result<R> {
        let bytes = self.read_bytes(offset)?;
        R::decode(&bytes)
    }

    /// Raw payload at `offset`, read straight from the store file.
    pub fn read_bytes(&self, offset: u64) -> Result<Vec<u8>> {
        if offset < self.base_offset || offset >= self.next_offset() {
            return Err(SegmentError::EndOfData);
        }
        let slot = usize::try_from(offset - self.base_offset).map_err(|_| SegmentError::EndOfData)?;
        let entry = self.entries.get(slot).ok_or(SegmentError::EndOfData)?;

        let mut file = &self.store;
        let end = record_end(&mut file, entry.position, self.store_size)?.ok_or(SegmentError::EndOfData)?;

        let mut payload = vec![0u8; (end - entry.position - LEN_WIDTH) as usize];
        read_exact_at(&mut file, &mut payload, entry.position + LEN_WIDTH)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::record::Record;
    use crate::storage::segment::Segment;

    fn config(max_store_bytes: u64, max_index_bytes: u64) -> Config {
        Config::builder()
            .max_store_bytes(max_store_bytes)
            .max_index_bytes(max_index_bytes)
            .build()
            .expect("invalid test config")
    }

    #[test]
    fn test_view_of_closed_segment() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let cfg = config(1024, 1024);

        let mut segment = Segment::open(dir.path(), 40, &cfg).expect("failed to open segment");
        segment.append(&mut Record::new(&b"one"[..])).expect("failed to append");
        segment.append(&mut Record::new(&b"two"[..])).expect("failed to append");
        segment.close().expect("failed to close");

        let view = SegmentView::open(dir.path(), 40).expect("failed to open view");
        assert_eq!(view.next_offset(), 42);
        assert_eq!(view.record_count(), 2);
        assert_eq!(view.index_size(), 2 * ENTRY_WIDTH);
        assert_eq!(view.unindexed_bytes().unwrap(), 0);
        assert!(!view.is_maxed(&cfg.segment));

        let record: Record = view.read(41).expect("failed to read");
        assert_eq!(record.offset, 41);
        assert_eq!(record.payload, b"two");
        assert!(view.read_bytes(42).unwrap_err().is_end_of_data());
        assert!(view.read_bytes(39).unwrap_err().is_end_of_data());
    }

    #[test]
    fn test_view_does_not_touch_live_segment() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let cfg = config(1024, 1200);

        let mut segment = Segment::open(dir.path(), 0, &cfg).expect("failed to open segment");
        segment.append_bytes(b"synced").expect("failed to append");
        segment.sync().expect("failed to sync");

        let index_len = fs::metadata(segment.index_path()).unwrap().len();
        let store_len = fs::metadata(segment.store_path()).unwrap().len();
        assert_eq!(index_len, 1200);

        let view = SegmentView::open(dir.path(), 0).expect("failed to open view");
        assert_eq!(view.next_offset(), 1);
        assert_eq!(view.read_bytes(0).unwrap(), b"synced");
        drop(view);

        assert_eq!(fs::metadata(segment.index_path()).unwrap().len(), index_len);
        assert_eq!(fs::metadata(segment.store_path()).unwrap().len(), store_len);

        // The writer carries on unaffected
        segment.append_bytes(b"after").expect("failed to append");
        assert_eq!(segment.read_bytes(1).unwrap(), b"after");
    }

    #[test]
    fn test_view_without_index_file() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        fs::write(dir.path().join("0.store"), [0u8, 0, 0, 0, 0, 0, 0, 1, b'x'])
            .expect("failed to write store");

        let view = SegmentView::open(dir.path(), 0).expect("failed to open view");
        assert_eq!(view.next_offset(), 0);
        assert_eq!(view.unindexed_bytes().unwrap(), 9);
        assert!(!dir.path().join("0.index").exists());
    }

    #[test]
    fn test_view_missing_store_is_error() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let result = SegmentView::open(dir.path(), 0);
        assert!(matches!(result, Err(SegmentError::Io(_))));
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
