/// Segment storage integration tests.
///
/// These tests drive the public API end to end:
/// - Offset assignment and read-back across reopen
/// - Rollover signal from either size limit
/// - Index capacity exhaustion
/// - Removal of both files
/// - Explicit recovery and read-only inspection

use seglog::storage::index::ENTRY_WIDTH;
use seglog::{Config, EntryRef, Index, Record, Segment, SegmentError, SegmentView, Store};
use std::fs;
use tempfile::TempDir;

fn config(max_store_bytes: u64, max_index_bytes: u64) -> Config {
    Config::builder()
        .max_store_bytes(max_store_bytes)
        .max_index_bytes(max_index_bytes)
        .build()
        .unwrap()
}

#[test]
fn test_three_entry_index_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let cfg = config(1024, 36);

    let mut segment = Segment::open(temp_dir.path(), 0, &cfg).unwrap();

    let mut offsets = Vec::new();
    for i in 0..3u8 {
        assert!(!segment.is_maxed(), "maxed before append {}", i);
        offsets.push(segment.append_bytes(&[i; 10]).unwrap());
    }

    assert_eq!(offsets, vec![0, 1, 2]);
    // Index exhausted, store well under its limit
    assert!(segment.is_maxed());
    assert!(segment.store_size().unwrap() < 1024);

    for (i, offset) in offsets.iter().enumerate() {
        assert_eq!(segment.read_bytes(*offset).unwrap(), vec![i as u8; 10]);
    }

    // A fourth write against the index itself has no room
    segment.close().unwrap();
    let mut index = Index::open(temp_dir.path().join("0.index"), 36).unwrap();
    assert_eq!(index.len(), 3);
    match index.write(3, 54) {
        Err(SegmentError::CapacityExhausted { .. }) => {}
        other => panic!("expected CapacityExhausted, got {:?}", other),
    }
}

#[test]
fn test_offsets_start_at_base_offset() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::open(temp_dir.path(), 500, &config(1024, 1024)).unwrap();

    for expected in 500..505 {
        let mut record = Record::new(format!("record-{}", expected));
        assert_eq!(segment.append(&mut record).unwrap(), expected);
    }
}

#[test]
fn test_reopen_recovers_next_offset() {
    let temp_dir = TempDir::new().unwrap();
    let cfg = config(64 * 1024, 64 * 1024);
    let base = 1_000;
    let n = 25;

    {
        let mut segment = Segment::open(temp_dir.path(), base, &cfg).unwrap();
        for i in 0..n {
            segment.append(&mut Record::new(format!("payload {}", i))).unwrap();
        }
        segment.close().unwrap();
    }

    // Closed index holds exactly the written entries
    let index_len = fs::metadata(temp_dir.path().join("1000.index")).unwrap().len();
    assert_eq!(index_len, n * ENTRY_WIDTH);

    let mut segment = Segment::open(temp_dir.path(), base, &cfg).unwrap();
    assert_eq!(segment.next_offset(), base + n);

    for i in 0..n {
        let record: Record = segment.read(base + i).unwrap();
        assert_eq!(record.offset, base + i);
        assert_eq!(record.payload, format!("payload {}", i).into_bytes());
    }

    let offset = segment.append(&mut Record::new("after reopen")).unwrap();
    assert_eq!(offset, base + n);
}

#[test]
fn test_is_maxed_by_store_limit() {
    let temp_dir = TempDir::new().unwrap();
    // Each record: 8 byte length + 8 byte offset header + 16 byte payload = 32
    let mut segment = Segment::open(temp_dir.path(), 0, &config(96, 1024)).unwrap();

    segment.append(&mut Record::new(vec![1u8; 16])).unwrap();
    segment.append(&mut Record::new(vec![2u8; 16])).unwrap();
    assert!(!segment.is_maxed());
    assert_eq!(segment.store_size().unwrap(), 64);

    segment.append(&mut Record::new(vec![3u8; 16])).unwrap();
    assert_eq!(segment.store_size().unwrap(), 96);
    assert!(segment.is_maxed());
    assert!(segment.index_size() < 1024);
}

#[test]
fn test_is_maxed_by_index_limit() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::open(temp_dir.path(), 0, &config(u64::MAX, 2 * ENTRY_WIDTH)).unwrap();

    segment.append_bytes(b"x").unwrap();
    assert!(!segment.is_maxed());

    segment.append_bytes(b"y").unwrap();
    assert!(segment.is_maxed());
}

#[test]
fn test_append_fails_when_index_full() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::open(temp_dir.path(), 0, &config(1024, ENTRY_WIDTH)).unwrap();

    segment.append_bytes(b"fits").unwrap();
    let err = segment.append_bytes(b"does not").unwrap_err();
    assert!(err.is_capacity_exhausted());
    assert_eq!(segment.next_offset(), 1);
}

#[test]
fn test_remove_deletes_both_files() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::open(temp_dir.path(), 42, &config(1024, 1024)).unwrap();
    segment.append_bytes(b"doomed").unwrap();

    let store_path = segment.store_path().to_path_buf();
    let index_path = segment.index_path().to_path_buf();
    assert!(store_path.exists());
    assert!(index_path.exists());

    segment.remove().unwrap();

    assert!(!store_path.exists());
    assert!(!index_path.exists());
    assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_index_last_entry() {
    let temp_dir = TempDir::new().unwrap();
    let mut index = Index::open(temp_dir.path().join("0.index"), 1024).unwrap();

    assert!(matches!(index.read(EntryRef::Last), Err(SegmentError::EndOfData)));

    index.write(0, 0).unwrap();
    index.write(1, 20).unwrap();
    let last = index.read(EntryRef::Last).unwrap();
    assert_eq!(last.relative_offset, 1);
    assert_eq!(last.position, 20);
}

#[test]
fn test_store_read_before_close() {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(temp_dir.path().join("0.store")).unwrap();

    let (written, pos) = store.append(b"visible immediately").unwrap();
    assert_eq!(written, 8 + 19);
    assert_eq!(store.read(pos).unwrap(), b"visible immediately");
}

#[test]
fn test_sync_makes_files_current() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::open(temp_dir.path(), 0, &config(1024, 120)).unwrap();

    segment.append_bytes(b"synced").unwrap();
    segment.append_bytes(b"again").unwrap();
    segment.sync().unwrap();

    // Store bytes are on disk without closing
    let store_bytes = fs::read(temp_dir.path().join("0.store")).unwrap();
    assert_eq!(store_bytes.len(), 14 + 13);
    assert_eq!(&store_bytes[0..8], &6u64.to_be_bytes());
    assert_eq!(&store_bytes[8..14], b"synced");

    // Index is still at its pre-allocated length while open
    let index_bytes = fs::read(temp_dir.path().join("0.index")).unwrap();
    assert_eq!(index_bytes.len(), 120);
    assert_eq!(&index_bytes[12..16], &1u32.to_be_bytes());
    assert_eq!(&index_bytes[16..24], &14u64.to_be_bytes());
}

#[test]
fn test_segment_shared_behind_mutex() {
    use std::sync::{Arc, Mutex};

    let temp_dir = TempDir::new().unwrap();
    let segment = Arc::new(Mutex::new(
        Segment::open(temp_dir.path(), 0, &config(1 << 20, 1 << 20)).unwrap(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let segment = Arc::clone(&segment);
            std::thread::spawn(move || {
                for i in 0..25 {
                    let payload = format!("{}:{}", t, i);
                    segment.lock().unwrap().append_bytes(payload.as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let segment = segment.lock().unwrap();
    assert_eq!(segment.next_offset(), 100);
    for offset in 0..100 {
        assert!(!segment.read_bytes(offset).unwrap().is_empty());
    }
}

#[test]
fn test_config_rejected_before_files_created() {
    let temp_dir = TempDir::new().unwrap();
    let mut cfg = Config::default();
    cfg.segment.max_index_bytes = 4;

    let result = Segment::open(temp_dir.path(), 0, &cfg);
    assert!(matches!(result, Err(SegmentError::InvalidConfig(_))));
    assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_lost_index_keeps_store_and_recovers() {
    let temp_dir = TempDir::new().unwrap();
    let cfg = config(1024, 1024);

    {
        let mut segment = Segment::open(temp_dir.path(), 0, &cfg).unwrap();
        for i in 0..5u8 {
            segment.append_bytes(&[i; 4]).unwrap();
        }
        segment.close().unwrap();
    }

    let store_path = temp_dir.path().join("0.store");
    let store_len = fs::metadata(&store_path).unwrap().len();
    assert_eq!(store_len, 5 * 12);
    fs::remove_file(temp_dir.path().join("0.index")).unwrap();

    // Opening with no index must not throw the records away
    let mut segment = Segment::open(temp_dir.path(), 0, &cfg).unwrap();
    assert_eq!(segment.next_offset(), 0);
    assert_eq!(segment.store_size().unwrap(), store_len);
    assert_eq!(fs::metadata(&store_path).unwrap().len(), store_len);

    let report = segment.recover().unwrap();
    assert_eq!(report.rebuilt_entries, 5);
    assert_eq!(report.truncated_bytes, 0);
    assert_eq!(segment.next_offset(), 5);
    for i in 0..5u8 {
        assert_eq!(segment.read_bytes(u64::from(i)).unwrap(), vec![i; 4]);
    }
}

#[test]
fn test_is_maxed_matches_append_failure_for_uneven_index_limit() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::open(temp_dir.path(), 0, &config(1024, 40)).unwrap();

    for _ in 0..3 {
        segment.append_bytes(&[0u8; 10]).unwrap();
    }

    let err = segment.append_bytes(&[0u8; 10]).unwrap_err();
    assert!(err.is_capacity_exhausted());
    assert!(segment.is_maxed());
}

#[test]
fn test_view_reads_without_modifying_files() {
    let temp_dir = TempDir::new().unwrap();
    let cfg = config(1024, 1024);

    {
        let mut segment = Segment::open(temp_dir.path(), 3, &cfg).unwrap();
        segment.append(&mut Record::new("kept")).unwrap();
        segment.close().unwrap();
    }

    // Unindexed tail left by a crashed writer
    {
        let store = Store::open(temp_dir.path().join("3.store")).unwrap();
        store.append(b"orphan").unwrap();
        store.close().unwrap();
    }
    let before = fs::read(temp_dir.path().join("3.store")).unwrap();

    let view = SegmentView::open(temp_dir.path(), 3).unwrap();
    assert_eq!(view.next_offset(), 4);
    assert_eq!(view.unindexed_bytes().unwrap(), 8 + 6);
    let record: Record = view.read(3).unwrap();
    assert_eq!(record.payload, b"kept");
    drop(view);

    assert_eq!(fs::read(temp_dir.path().join("3.store")).unwrap(), before);
    assert_eq!(fs::metadata(temp_dir.path().join("3.index")).unwrap().len(), ENTRY_WIDTH);
}
