use crate::error::{Result, SegmentError};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Width of the big-endian length prefix in front of every record.
pub const LEN_WIDTH: u64 = 8;

/// A Store is the append-only byte file of a segment.
///
/// Responsibilities:
/// - Own a `.store` file on disk
/// - Append length-framed payloads through a buffered writer
/// - Read a payload back given its byte position
/// - Track the logical size (next append position)
///
/// NOT responsible for:
/// - Offsets (the Index and Segment handle those)
/// - Interpreting payload bytes
///
/// ## On-disk format:
/// ```text
/// | length: u64 (BE) | payload: [u8; length] |
/// | 8 bytes          | variable              |
/// ```
///
/// ## Buffering:
/// Appends go into a `BufWriter` and may not have reached the file yet.
/// `size` still counts them, so positions handed out by `append` are exact.
/// Every read flushes first, which makes a just-appended record readable
/// without closing the store.
///
/// ## Thread safety:
/// All state sits behind one `Mutex`; every operation takes it. A `Store`
/// is `Sync` and can be shared through an `Arc`.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    writer: BufWriter<File>,
    /// Logical end of data, including bytes still in the buffer.
    size: u64,
}

impl Store {
    /// Open or create a store file.
    ///
    /// The file is opened in append + read mode. If it already holds data,
    /// `size` starts at the current file length and appends resume after it.
    ///
    /// # Errors
    /// - I/O errors opening or creating the file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Store {
            path: path.to_path_buf(),
            inner: Mutex::new(StoreInner {
                writer: BufWriter::new(file),
                size,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>> {
        self.inner.lock().map_err(|_| SegmentError::LockPoisoned)
    }

    /// Append a payload.
    ///
    /// Writes `[len: u64][payload]` into the buffer as one frame and advances
    /// `size`. If the write fails, any part of the frame that reached the
    /// file is cut off again so `size` stays the true end of data.
    ///
    /// # Returns
    /// `(bytes_written, position)` where `position` is where the length
    /// prefix of this record starts and `bytes_written = 8 + payload.len()`.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u64)> {
        let mut inner = self.lock()?;

        let position = inner.size;
        let frame = encode_frame(payload);

        if let Err(e) = inner.writer.write_all(&frame) {
            let keep = unbuffered_len(&inner.writer, inner.size);
            if let Err(trim) = trim_file(inner.writer.get_ref(), keep) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %trim,
                    "failed to cut partial record after write error"
                );
            }
            return Err(e.into());
        }

        let written = frame.len() as u64;
        inner.size += written;

        Ok((written, position))
    }

    /// Read the payload of the record whose length prefix starts at
    /// `position`.
    ///
    /// Flushes the buffer first so unflushed appends are visible.
    ///
    /// # Errors
    /// - `EndOfData` if the prefix or the payload would extend past the end
    ///   of the store
    /// - I/O errors during flush, seek or read
    pub fn read(&self, position: u64) -> Result<Vec<u8>> {
        let mut inner = self.lock()?;
        inner.writer.flush()?;
        let size = inner.size;

        let end = record_end(inner.writer.get_mut(), position, size)?
            .ok_or(SegmentError::EndOfData)?;

        let mut payload = vec![0u8; (end - position - LEN_WIDTH) as usize];
        read_exact_at(inner.writer.get_mut(), &mut payload, position + LEN_WIDTH)?;

        Ok(payload)
    }

    /// Positional read of raw store bytes into `buf`, starting at `offset`.
    ///
    /// Flushes first. Returns the number of bytes read, which is smaller
    /// than `buf.len()` only when the end of the file was reached.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut inner = self.lock()?;
        inner.writer.flush()?;

        let file = inner.writer.get_mut();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(filled)
    }

    /// End position (exclusive) of the record starting at `position`, or
    /// `None` if that record is not completely present in the store.
    ///
    /// Used by segment recovery to check that an indexed record really
    /// made it to disk, and to walk unindexed records.
    pub(crate) fn record_end(&self, position: u64) -> Result<Option<u64>> {
        let mut inner = self.lock()?;
        inner.writer.flush()?;
        let size = inner.size;
        record_end(inner.writer.get_mut(), position, size)
    }

    /// Flush the buffer and fsync the file data.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.writer.flush()?;
        inner.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Shrink the store to `len` bytes, dropping everything after it.
    ///
    /// # Errors
    /// - `InvalidInput` I/O error if `len` is larger than the current size
    pub fn truncate(&self, len: u64) -> Result<()> {
        let mut inner = self.lock()?;
        if len > inner.size {
            return Err(SegmentError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("cannot truncate store of {} bytes to {}", inner.size, len),
            )));
        }

        inner.writer.flush()?;
        inner.writer.get_ref().set_len(len)?;
        inner.size = len;

        Ok(())
    }

    /// Logical size in bytes, including buffered appends.
    pub fn size(&self) -> Result<u64> {
        Ok(self.lock()?.size)
    }

    /// Path of the `.store` file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush, fsync and release the file handle.
    pub fn close(self) -> Result<()> {
        let inner = self
            .inner
            .into_inner()
            .map_err(|_| SegmentError::LockPoisoned)?;

        let file = inner.writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()?;

        Ok(())
    }
}

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(LEN_WIDTH as usize + payload.len());
    frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Length the underlying file should have when the logical size is `size`:
/// everything except what still sits in the buffer.
///
/// A failed `write_all` of one frame either leaves the frame out of the
/// buffer entirely or has pushed part of it straight to the file with the
/// buffer empty, so anything past this length is a partial frame.
fn unbuffered_len<W: Write>(writer: &BufWriter<W>, size: u64) -> u64 {
    size - writer.buffer().len() as u64
}

fn trim_file(file: &File, len: u64) -> std::io::Result<()> {
    if file.metadata()?.len() > len {
        file.set_len(len)?;
    }
    Ok(())
}

/// Reads the length prefix at `position` and returns where the record ends,
/// or `None` if the prefix or payload runs past `size`.
pub(crate) fn record_end<F: Read + Seek>(file: &mut F, position: u64, size: u64) -> Result<Option<u64>> {
    match position.checked_add(LEN_WIDTH) {
        Some(header_end) if header_end <= size => {}
        _ => return Ok(None),
    }

    let mut len_buf = [0u8; LEN_WIDTH as usize];
    read_exact_at(file, &mut len_buf, position)?;
    let len = u64::from_be_bytes(len_buf);

    match (position + LEN_WIDTH).checked_add(len) {
        Some(end) if end <= size => Ok(Some(end)),
        _ => Ok(None),
    }
}

pub(crate) fn read_exact_at<F: Read + Seek>(file: &mut F, buf: &mut [u8], position: u64) -> Result<()> {
    file.seek(SeekFrom::Start(position))?;
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(SegmentError::EndOfData),
        Err(e) => Err(e.into()),
    }
}
