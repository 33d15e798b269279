use crate::error::{Result, SegmentError};
use memmap2::{MmapMut, MmapOptions};
use std::fs::File;

/// A read-write, shared memory-mapped region of a file.
///
/// # Purpose
/// Backs the fixed-capacity index. Writes through the region land in the
/// page cache of the underlying file and become durable only after
/// [`MmapRegion::flush`] or [`MmapRegion::flush_async`].
///
/// # Ownership & Lifetime Rules
/// - The region is OWNED by the Index (never handed out)
/// - The file is sized to the region length BEFORE mapping
/// - The file must not shrink while the region is mapped
/// - The region is dropped (munmap) BEFORE the file is truncated on close
///
/// # Safety Invariants (MUST HOLD)
/// 1. File length >= mapped length for the whole mapping lifetime
/// 2. No other process truncates or remaps the file concurrently
/// 3. All access goes through bounds-checked slices
///
/// # Thread Safety
/// Mutation needs `&mut self`, so the borrow checker enforces a single
/// writer. No internal locking.
#[derive(Debug)]
pub struct MmapRegion {
    mmap: MmapMut,
}

impl MmapRegion {
    /// Map the first `len` bytes of `file` read-write, shared.
    ///
    /// The caller must already have sized the file to at least `len` bytes.
    ///
    /// # Errors
    /// - `len` is zero (cannot map an empty region)
    /// - `len` does not fit the address space
    /// - OS mmap call fails (permissions, limits, etc.)
    pub fn map_read_write(file: &File, len: u64) -> Result<Self> {
        if len == 0 {
            return Err(SegmentError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot mmap empty region",
            )));
        }
        let len = usize::try_from(len).map_err(|_| {
            SegmentError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("mmap length {} exceeds address space", len),
            ))
        })?;

        // SAFETY ANALYSIS:
        //
        // MmapOptions::map_mut calls mmap(2) with PROT_READ | PROT_WRITE and
        // MAP_SHARED.
        //
        // 1. File descriptor is valid: caller holds an open File
        // 2. File length >= len: caller pre-sizes the file (Index::open)
        // 3. File is not truncated while mapped: Index drops the region
        //    before truncating on close
        // 4. Region does not outlive the file: both are owned by the Index
        //    and the region is released first
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(file)? };

        Ok(MmapRegion { mmap })
    }

    /// Read-only view of the whole mapped region.
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Mutable view of the whole mapped region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Synchronously write dirty pages back to the file (msync MS_SYNC).
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Schedule dirty pages for write-back without waiting (msync MS_ASYNC).
    pub fn flush_async(&self) -> Result<()> {
        self.mmap.flush_async()?;
        Ok(())
    }
}

// munmap(2) happens when the inner MmapMut is dropped.
