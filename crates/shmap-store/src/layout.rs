//! Capacity planning and region offsets.
//!
//! ```text
//! 0x000 header (HEADER_SIZE bytes)
//! 0x080 segment 0 .. segment N-1, each `segment_stride` bytes
//!
//! segment:
//!   +0x00 lock word u64
//!   +0x08 entry count u32
//!   +0x0C lowest free slot hint u32
//!   +0x40 occupancy bitset, one bit per slot
//!   bucket heads, u32 slot + 1 (0 = empty), 64-aligned
//!   entry arena, `slots_per_segment` x `entry_stride`, 64-aligned
//! ```

use crate::config::MapConfig;
use crate::entry::ENTRY_HEADER_SIZE;
use crate::{MapError, Result};

/// Size of the file header.
pub const HEADER_SIZE: usize = 128;

/// Offset of the lock word inside a segment.
pub const SEGMENT_LOCK_OFFSET: usize = 0x00;

/// Offset of the entry counter inside a segment.
pub const SEGMENT_COUNT_OFFSET: usize = 0x08;

/// Offset of the free slot hint inside a segment.
pub const SEGMENT_FREE_HINT_OFFSET: usize = 0x0C;

/// Offset of the occupancy bitset inside a segment.
pub const SEGMENT_BITSET_OFFSET: usize = 0x40;

/// Alignment of segments and of the tables inside them.
pub const SEGMENT_ALIGNMENT: usize = 64;

/// Round `n` up to a multiple of 8.
pub const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

const fn align64(n: usize) -> usize {
    (n + SEGMENT_ALIGNMENT - 1) & !(SEGMENT_ALIGNMENT - 1)
}

/// Derived geometry of a map file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapLayout {
    /// Requested total capacity.
    pub entries: u64,
    /// Number of segments.
    pub segments: u32,
    /// Per-entry data budget as configured.
    pub entry_size: u32,
    /// Slots owned by each segment.
    pub slots_per_segment: u32,
    /// Bucket heads per segment, a power of two.
    pub buckets_per_segment: u32,
    /// Bytes between consecutive entries.
    pub entry_stride: u32,
    /// Bytes of key plus value an entry can hold.
    pub data_capacity: usize,
    /// `u64` words in each occupancy bitset.
    pub bitset_words: usize,
    /// Offset of the bucket table inside a segment.
    pub buckets_offset: usize,
    /// Offset of the entry arena inside a segment.
    pub arena_offset: usize,
    /// Bytes between consecutive segments.
    pub segment_stride: usize,
    /// Total file size.
    pub total_size: usize,
}

impl MapLayout {
    /// Compute the layout for a validated configuration.
    pub fn for_config(config: &MapConfig) -> Result<Self> {
        config.validate()?;
        Self::compute(config.entries, config.segments, config.entry_size)
    }

    /// Compute the layout from raw parameters.
    pub fn compute(entries: u64, segments: u32, entry_size: u32) -> Result<Self> {
        let overflow = || {
            MapError::InvalidConfig(format!(
                "{entries} entries in {segments} segments of {entry_size} bytes overflow the address space"
            ))
        };

        if segments == 0 || entries == 0 {
            return Err(MapError::InvalidConfig(
                "entries and segments must be positive".into(),
            ));
        }

        let slots = entries.div_ceil(u64::from(segments));
        let slots_per_segment = u32::try_from(slots)
            .ok()
            .filter(|s| *s <= 1 << 31)
            .ok_or_else(overflow)?;
        let buckets_per_segment = slots_per_segment.next_power_of_two();

        let data_capacity = align8(entry_size as usize);
        let entry_stride = u32::try_from(ENTRY_HEADER_SIZE + data_capacity).map_err(|_| overflow())?;

        let slots = slots_per_segment as usize;
        let bitset_words = slots.div_ceil(64);
        let buckets_offset = align64(SEGMENT_BITSET_OFFSET + bitset_words * 8);
        let arena_offset = align64(buckets_offset + buckets_per_segment as usize * 4);
        let arena_size = slots
            .checked_mul(entry_stride as usize)
            .ok_or_else(overflow)?;
        let segment_stride = arena_offset
            .checked_add(arena_size)
            .map(align64)
            .ok_or_else(overflow)?;
        let total_size = segment_stride
            .checked_mul(segments as usize)
            .and_then(|s| s.checked_add(HEADER_SIZE))
            .ok_or_else(overflow)?;

        Ok(Self {
            entries,
            segments,
            entry_size,
            slots_per_segment,
            buckets_per_segment,
            entry_stride,
            data_capacity,
            bitset_words,
            buckets_offset,
            arena_offset,
            segment_stride,
            total_size,
        })
    }

    /// Absolute offset of a segment.
    pub const fn segment_offset(&self, segment: usize) -> usize {
        HEADER_SIZE + segment * self.segment_stride
    }

    /// Absolute offset of an entry.
    pub const fn entry_offset(&self, segment: usize, slot: u32) -> usize {
        self.segment_offset(segment) + self.arena_offset + slot as usize * self.entry_stride as usize
    }

    /// Segment whose range contains the absolute `offset`.
    pub const fn segment_containing(&self, offset: usize) -> usize {
        (offset - HEADER_SIZE) / self.segment_stride
    }

    /// Segment owning a key hash.
    pub const fn segment_for(&self, hash: u64) -> usize {
        (hash % self.segments as u64) as usize
    }

    /// Bucket for a key hash within its segment.
    pub const fn bucket_for(&self, hash: u64) -> u32 {
        ((hash >> 32) as u32) & (self.buckets_per_segment - 1)
    }
}

/// Deterministic key hash, identical in every process.
pub fn hash_key(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_segment_partition() {
        let layout = MapLayout::compute(100_000, 16, 32).unwrap();
        assert_eq!(layout.slots_per_segment, 6250);
        assert_eq!(layout.buckets_per_segment, 8192);
        assert_eq!(layout.data_capacity, 32);
        assert_eq!(layout.entry_stride, 56);
        assert_eq!(layout.bitset_words, 98);
        assert_eq!(layout.buckets_offset % SEGMENT_ALIGNMENT, 0);
        assert_eq!(layout.arena_offset % SEGMENT_ALIGNMENT, 0);
        assert_eq!(layout.segment_stride % SEGMENT_ALIGNMENT, 0);
        assert_eq!(layout.total_size, HEADER_SIZE + 16 * layout.segment_stride);
    }

    #[test]
    fn test_entry_size_rounds_to_eight() {
        let layout = MapLayout::compute(10, 1, 13).unwrap();
        assert_eq!(layout.data_capacity, 16);
        assert_eq!(layout.entry_stride as usize, ENTRY_HEADER_SIZE + 16);
    }

    #[test]
    fn test_uneven_partition_rounds_up() {
        let layout = MapLayout::compute(10, 3, 8).unwrap();
        assert_eq!(layout.slots_per_segment, 4);
        assert_eq!(layout.buckets_per_segment, 4);
    }

    #[test]
    fn test_entries_are_eight_aligned() {
        let layout = MapLayout::compute(1000, 7, 21).unwrap();
        for seg in 0..7 {
            for slot in [0, 1, layout.slots_per_segment - 1] {
                assert_eq!(layout.entry_offset(seg, slot) % 8, 0);
            }
        }
    }

    #[test]
    fn test_entry_offsets_map_back_to_segment() {
        let layout = MapLayout::compute(1000, 7, 21).unwrap();
        for seg in 0..7 {
            assert_eq!(layout.segment_containing(layout.segment_offset(seg)), seg);
            let last = layout.entry_offset(seg, layout.slots_per_segment - 1);
            assert_eq!(layout.segment_containing(last), seg);
        }
    }

    #[test]
    fn test_overflow_is_invalid_config() {
        let err = MapLayout::compute(u64::MAX, 1, 1 << 20).unwrap_err();
        assert!(matches!(err, MapError::InvalidConfig(_)));
    }

    #[test]
    fn test_hash_routing_is_stable() {
        let layout = MapLayout::compute(1 << 20, 128, 256).unwrap();
        let h = hash_key(b"user:42");
        assert_eq!(h, hash_key(b"user:42"));
        assert!(layout.segment_for(h) < 128);
        assert!(layout.bucket_for(h) < layout.buckets_per_segment);
    }
}
