//! Memory-mapped map file.
//!
//! The region owns the shared mapping and hands out raw views of it: plain
//! little-endian fields for data only touched under a segment lock, and
//! atomics for words read or written concurrently (lock words, entry
//! flags, generations, counters, flyweight values).

use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info};

use crate::header::MapHeader;
use crate::layout::{HEADER_SIZE, MapLayout};
use crate::{MapError, Result};

#[cfg(unix)]
mod platform_unix;
#[cfg(unix)]
pub use platform_unix::{FileLock, process_alive};

#[cfg(not(unix))]
mod platform_other;
#[cfg(not(unix))]
pub use platform_other::{FileLock, process_alive};

/// A map file mapped shared and read-write.
#[allow(unsafe_code)]
pub struct MappedRegion {
    /// Keeps the mapping alive; accessed only through `base`.
    mmap: MmapMut,
    /// Start of the mapping.
    base: NonNull<u8>,
    /// Mapping length.
    len: usize,
    path: PathBuf,
    layout: MapLayout,
    header: MapHeader,
    closed: AtomicBool,
}

// SAFETY: The mapping is plain shared memory. All cross-thread access goes
// through atomics or happens under a segment lock held in the mapping.
#[allow(unsafe_code)]
unsafe impl Send for MappedRegion {}
// SAFETY: See `Send` above.
#[allow(unsafe_code)]
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Create the file, or open and validate an existing one.
    ///
    /// Runs under an exclusive file lock so concurrent openers see either
    /// no header or a complete one.
    #[allow(unsafe_code)]
    pub fn open(path: &Path, layout: MapLayout, expected: &MapHeader) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let _lock = FileLock::acquire(&file)?;

        let existing_len = file.metadata()?.len();
        let created = existing_len == 0;
        if created {
            file.set_len(layout.total_size as u64)?;
        } else if existing_len != layout.total_size as u64 {
            // A short file cannot even hold a header to compare.
            if existing_len >= HEADER_SIZE as u64 {
                let mut head = [0u8; HEADER_SIZE];
                std::io::Read::read_exact(&mut &file, &mut head)?;
                MapHeader::from_bytes(&head)?.check_matches(expected)?;
            }
            return Err(MapError::SchemaMismatch {
                field: "file_length",
                expected: layout.total_size.to_string(),
                found: existing_len.to_string(),
            });
        }

        // SAFETY: The file is sized to `total_size` above and stays open
        // for the life of the mapping. Concurrent modification by other
        // processes is the intended use and is mediated by atomics.
        let mut mmap = unsafe { MmapOptions::new().len(layout.total_size).map_mut(&file)? };
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| MapError::Io(std::io::Error::other("mmap returned null")))?;

        let region = Self {
            mmap,
            base,
            len: layout.total_size,
            path: path.to_path_buf(),
            layout,
            header: expected.clone(),
            closed: AtomicBool::new(false),
        };

        if created {
            let bytes = expected.to_bytes()?;
            region.write_bytes(0, &bytes);
            region.mmap.flush_range(0, HEADER_SIZE)?;
            info!(
                path = %path.display(),
                size = layout.total_size,
                entries = layout.entries,
                segments = layout.segments,
                "created shared map file"
            );
        } else {
            MapHeader::from_bytes(region.bytes(0, HEADER_SIZE))?.check_matches(expected)?;
            info!(
                path = %path.display(),
                size = layout.total_size,
                "opened shared map file"
            );
        }
        debug!(
            slots_per_segment = layout.slots_per_segment,
            buckets_per_segment = layout.buckets_per_segment,
            entry_stride = layout.entry_stride,
            segment_stride = layout.segment_stride,
            "map layout"
        );

        Ok(region)
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Geometry of the mapping.
    pub const fn layout(&self) -> &MapLayout {
        &self.layout
    }

    /// Validated header.
    pub const fn header(&self) -> &MapHeader {
        &self.header
    }

    /// Whether this handle was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark this handle closed. Returns `false` if it already was.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Write dirty pages back to the file.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    fn check(&self, offset: usize, len: usize) {
        debug_assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "region access {offset}+{len} out of bounds {}",
            self.len
        );
    }

    /// Borrow `len` bytes at `offset`.
    ///
    /// Callers hold the lock of the segment containing the range.
    #[allow(unsafe_code)]
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.check(offset, len);
        // SAFETY: In bounds per `check`; the segment lock excludes writers.
        unsafe { slice::from_raw_parts(self.base.as_ptr().add(offset), len) }
    }

    /// Copy `data` to `offset`.
    #[allow(unsafe_code)]
    pub fn write_bytes(&self, offset: usize, data: &[u8]) {
        self.check(offset, data.len());
        // SAFETY: In bounds per `check`; the mapping never overlaps `data`
        // because callers pass heap buffers.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.base.as_ptr().add(offset), data.len());
        }
    }

    /// Zero `len` bytes at `offset`.
    #[allow(unsafe_code)]
    pub fn zero(&self, offset: usize, len: usize) {
        self.check(offset, len);
        // SAFETY: In bounds per `check`.
        unsafe { ptr::write_bytes(self.base.as_ptr().add(offset), 0, len) }
    }

    /// Read a little-endian `u32`.
    #[allow(unsafe_code)]
    pub fn read_u32(&self, offset: usize) -> u32 {
        self.check(offset, 4);
        // SAFETY: In bounds per `check`; unaligned read is permitted.
        let raw = unsafe { ptr::read_unaligned(self.base.as_ptr().add(offset).cast::<u32>()) };
        u32::from_le(raw)
    }

    /// Write a little-endian `u32`.
    #[allow(unsafe_code)]
    pub fn write_u32(&self, offset: usize, value: u32) {
        self.check(offset, 4);
        // SAFETY: In bounds per `check`.
        unsafe {
            ptr::write_unaligned(self.base.as_ptr().add(offset).cast::<u32>(), value.to_le());
        }
    }

    /// Read a little-endian `u64`.
    #[allow(unsafe_code)]
    pub fn read_u64(&self, offset: usize) -> u64 {
        self.check(offset, 8);
        // SAFETY: In bounds per `check`.
        let raw = unsafe { ptr::read_unaligned(self.base.as_ptr().add(offset).cast::<u64>()) };
        u64::from_le(raw)
    }

    /// Write a little-endian `u64`.
    #[allow(unsafe_code)]
    pub fn write_u64(&self, offset: usize, value: u64) {
        self.check(offset, 8);
        // SAFETY: In bounds per `check`.
        unsafe {
            ptr::write_unaligned(self.base.as_ptr().add(offset).cast::<u64>(), value.to_le());
        }
    }

    /// Atomic view of a 4-aligned `u32`.
    #[allow(unsafe_code)]
    pub fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        self.check(offset, 4);
        debug_assert_eq!(offset % 4, 0, "misaligned atomic u32 at {offset}");
        // SAFETY: In bounds and aligned (the mapping is page-aligned and
        // every atomic field sits at a 4-aligned offset). The memory lives
        // as long as `self`.
        unsafe { AtomicU32::from_ptr(self.base.as_ptr().add(offset).cast::<u32>()) }
    }

    /// Atomic view of an 8-aligned `u64`.
    #[allow(unsafe_code)]
    pub fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        self.check(offset, 8);
        debug_assert_eq!(offset % 8, 0, "misaligned atomic u64 at {offset}");
        // SAFETY: In bounds and aligned as above.
        unsafe { AtomicU64::from_ptr(self.base.as_ptr().add(offset).cast::<u64>()) }
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
