//! Segment operations.
//!
//! A [`LockedSegment`] can only be obtained by acquiring the segment's lock,
//! and every lookup and mutation is a method on it, so no code path touches
//! chains, bitsets or counters without holding the lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::entry::{EntryRef, fits};
use crate::layout::{
    MapLayout, SEGMENT_BITSET_OFFSET, SEGMENT_COUNT_OFFSET, SEGMENT_FREE_HINT_OFFSET,
    SEGMENT_LOCK_OFFSET,
};
use crate::lock::{self, LockGuard};
use crate::region::MappedRegion;
use crate::{MapError, Result};

/// Upper 32 bits of a key hash, as stored in the entry.
pub const fn stored_hash(hash: u64) -> u32 {
    (hash >> 32) as u32
}

/// A segment whose lock is held by the current thread.
pub struct LockedSegment<'a> {
    region: &'a MappedRegion,
    layout: &'a MapLayout,
    index: usize,
    base: usize,
    _guard: LockGuard<'a>,
}

impl<'a> LockedSegment<'a> {
    /// Lock segment `index`.
    pub fn lock(region: &'a MappedRegion, index: usize, timeout: Duration) -> Result<Self> {
        let layout = region.layout();
        let base = layout.segment_offset(index);
        let guard = lock::acquire(
            region.atomic_u64(base + SEGMENT_LOCK_OFFSET),
            index,
            timeout,
        )?;
        Ok(Self {
            region,
            layout,
            index,
            base,
            _guard: guard,
        })
    }

    /// Entry count of a segment, readable without the lock.
    pub fn count_unlocked(region: &MappedRegion, index: usize) -> u32 {
        let base = region.layout().segment_offset(index);
        region
            .atomic_u32(base + SEGMENT_COUNT_OFFSET)
            .load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub const fn index(&self) -> usize {
        self.index
    }

    fn count_word(&self) -> &AtomicU32 {
        self.region.atomic_u32(self.base + SEGMENT_COUNT_OFFSET)
    }

    /// Live entries in this segment.
    #[cfg(test)]
    pub fn len(&self) -> u32 {
        self.count_word().load(Ordering::Relaxed)
    }

    fn free_hint(&self) -> u32 {
        self.region.read_u32(self.base + SEGMENT_FREE_HINT_OFFSET)
    }

    fn set_free_hint(&self, slot: u32) {
        self.region
            .write_u32(self.base + SEGMENT_FREE_HINT_OFFSET, slot);
    }

    fn bitset_word_offset(&self, word: usize) -> usize {
        self.base + SEGMENT_BITSET_OFFSET + word * 8
    }

    fn set_bit(&self, slot: u32, occupied: bool) {
        let offset = self.bitset_word_offset(slot as usize / 64);
        let mask = 1u64 << (slot % 64);
        let word = self.region.read_u64(offset);
        let word = if occupied { word | mask } else { word & !mask };
        self.region.write_u64(offset, word);
    }

    fn bucket_offset(&self, bucket: u32) -> usize {
        self.base + self.layout.buckets_offset + bucket as usize * 4
    }

    fn bucket_head(&self, bucket: u32) -> u32 {
        self.region.read_u32(self.bucket_offset(bucket))
    }

    fn set_bucket_head(&self, bucket: u32, link: u32) {
        self.region.write_u32(self.bucket_offset(bucket), link);
    }

    /// Entry in `slot`.
    pub const fn entry(&self, slot: u32) -> EntryRef<'a> {
        EntryRef::new(
            self.region,
            self.base + self.layout.arena_offset + slot as usize * self.layout.entry_stride as usize,
        )
    }

    /// Slot holding `key`, if present.
    ///
    /// A chain that leaves the arena or loops fails with
    /// [`MapError::CorruptMap`].
    pub fn find(&self, hash: u64, key: &[u8]) -> Result<Option<u32>> {
        let tag = stored_hash(hash);
        let bucket = self.layout.bucket_for(hash);
        let mut link = self.bucket_head(bucket);
        let mut steps = 0;
        while link != 0 {
            let slot = link - 1;
            if slot >= self.layout.slots_per_segment || steps > self.layout.slots_per_segment {
                warn!(segment = self.index, bucket, link, "corrupt bucket chain");
                return Err(MapError::CorruptMap(format!(
                    "bucket {bucket} of segment {} links to slot {link} after {steps} steps",
                    self.index
                )));
            }
            let entry = self.entry(slot);
            if entry.hash() == tag && entry.key() == key {
                return Ok(Some(slot));
            }
            link = entry.next();
            steps += 1;
        }
        Ok(None)
    }

    fn check_fits(&self, key_len: usize, value_len: usize) -> Result<()> {
        if fits(key_len, value_len, self.layout.data_capacity) {
            Ok(())
        } else {
            Err(MapError::CapacityExceeded(format!(
                "key of {key_len} bytes and value of {value_len} bytes exceed entry capacity of {} bytes",
                self.layout.data_capacity
            )))
        }
    }

    fn allocate(&self) -> Option<u32> {
        let slots = self.layout.slots_per_segment;
        let hint = self.free_hint().min(slots);
        let first_word = hint as usize / 64;
        for word_index in first_word..self.layout.bitset_words {
            let mut word = self.region.read_u64(self.bitset_word_offset(word_index));
            if word_index == first_word {
                // Bits below the hint are known to be occupied.
                word |= (1u64 << (hint % 64)) - 1;
            }
            if word != u64::MAX {
                let slot = (word_index * 64) as u32 + word.trailing_ones();
                return (slot < slots).then_some(slot);
            }
        }
        None
    }

    /// Insert a new entry for a key known to be absent.
    pub fn insert_new(&self, hash: u64, key: &[u8], value: &[u8]) -> Result<u32> {
        self.check_fits(key.len(), value.len())?;
        let Some(slot) = self.allocate() else {
            debug!(segment = self.index, "segment full");
            return Err(MapError::CapacityExceeded(format!(
                "segment {} is full ({} entries)",
                self.index, self.layout.slots_per_segment
            )));
        };

        let bucket = self.layout.bucket_for(hash);
        let entry = self.entry(slot);
        entry.occupy(stored_hash(hash), key, value, self.bucket_head(bucket));
        self.set_bucket_head(bucket, slot + 1);
        self.set_bit(slot, true);
        self.set_free_hint(slot + 1);
        self.count_word().fetch_add(1, Ordering::Release);
        Ok(slot)
    }

    /// Slot for `key`, inserting `init` first if absent.
    ///
    /// Returns the slot and whether it was inserted.
    pub fn find_or_insert(&self, hash: u64, key: &[u8], init: &[u8]) -> Result<(u32, bool)> {
        if let Some(slot) = self.find(hash, key)? {
            return Ok((slot, false));
        }
        self.insert_new(hash, key, init).map(|slot| (slot, true))
    }

    /// Overwrite the value of an occupied slot.
    ///
    /// The entry is left untouched if the new value does not fit.
    pub fn replace_value(&self, slot: u32, value: &[u8]) -> Result<()> {
        let entry = self.entry(slot);
        self.check_fits(entry.key_len(), value.len())?;
        entry.set_value(value);
        Ok(())
    }

    /// Unlink and free an occupied slot.
    pub fn remove_slot(&self, hash: u64, slot: u32) {
        let bucket = self.layout.bucket_for(hash);
        let target = slot + 1;
        let next = self.entry(slot).next();

        let head = self.bucket_head(bucket);
        if head == target {
            self.set_bucket_head(bucket, next);
        } else {
            let mut link = head;
            let mut steps = 0;
            while link != 0 && steps <= self.layout.slots_per_segment {
                let prev = self.entry(link - 1);
                if prev.next() == target {
                    prev.set_next(next);
                    break;
                }
                link = prev.next();
                steps += 1;
            }
        }

        self.free(slot);
    }

    fn free(&self, slot: u32) {
        self.entry(slot).release();
        self.set_bit(slot, false);
        if slot < self.free_hint() {
            self.set_free_hint(slot);
        }
        self.count_word().fetch_sub(1, Ordering::Release);
    }

    /// Free every entry in the segment.
    pub fn clear(&self) -> u32 {
        let mut freed = 0;
        for word_index in 0..self.layout.bitset_words {
            let mut word = self.region.read_u64(self.bitset_word_offset(word_index));
            while word != 0 {
                let slot = (word_index * 64) as u32 + word.trailing_zeros();
                word &= word - 1;
                self.entry(slot).release();
                freed += 1;
            }
            self.region.write_u64(self.bitset_word_offset(word_index), 0);
        }
        self.region.zero(
            self.bucket_offset(0),
            self.layout.buckets_per_segment as usize * 4,
        );
        self.set_free_hint(0);
        self.count_word().store(0, Ordering::Release);
        if freed > 0 {
            debug!(segment = self.index, freed, "cleared segment");
        }
        freed
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::header::MapHeader;
    use crate::layout::hash_key;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn region(entries: u64, segments: u32, entry_size: u32) -> (TempDir, MappedRegion) {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = MapLayout::compute(entries, segments, entry_size).expect("layout");
        let header = MapHeader::for_layout(&layout, "p:bytes", "p:bytes");
        let region = MappedRegion::open(&dir.path().join("seg.map"), layout, &header)
            .expect("region");
        (dir, region)
    }

    #[test]
    fn test_insert_find_remove() {
        let (_dir, region) = region(16, 1, 16);
        let seg = LockedSegment::lock(&region, 0, TIMEOUT).expect("lock");
        let h = hash_key(b"alpha");

        assert_eq!(seg.find(h, b"alpha").expect("chain"), None);
        let slot = seg.insert_new(h, b"alpha", b"12345678").expect("insert");
        assert_eq!(slot, 0);
        assert_eq!(seg.find(h, b"alpha").expect("chain"), Some(0));
        assert_eq!(seg.entry(0).value(), b"12345678");
        assert_eq!(seg.len(), 1);

        seg.remove_slot(h, slot);
        assert_eq!(seg.find(h, b"alpha").expect("chain"), None);
        assert_eq!(seg.len(), 0);
    }

    #[test]
    fn test_lowest_free_slot_is_reused() {
        let (_dir, region) = region(8, 1, 16);
        let seg = LockedSegment::lock(&region, 0, TIMEOUT).expect("lock");
        let keys: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i]).collect();
        for key in &keys {
            seg.insert_new(hash_key(key), key, &[0; 8]).expect("insert");
        }
        seg.remove_slot(hash_key(&keys[1]), 1);
        let slot = seg
            .insert_new(hash_key(b"new"), b"new", &[1; 8])
            .expect("insert");
        assert_eq!(slot, 1);
        let slot = seg
            .insert_new(hash_key(b"next"), b"next", &[1; 8])
            .expect("insert");
        assert_eq!(slot, 4);
    }

    #[test]
    fn test_full_segment() {
        let (_dir, region) = region(2, 1, 8);
        let seg = LockedSegment::lock(&region, 0, TIMEOUT).expect("lock");
        seg.insert_new(hash_key(b"a"), b"a", &[]).expect("a");
        seg.insert_new(hash_key(b"b"), b"b", &[]).expect("b");
        assert!(matches!(
            seg.insert_new(hash_key(b"c"), b"c", &[]),
            Err(MapError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_oversize_is_rejected_without_change() {
        let (_dir, region) = region(4, 1, 16);
        let seg = LockedSegment::lock(&region, 0, TIMEOUT).expect("lock");
        let h = hash_key(b"k");
        assert!(matches!(
            seg.insert_new(h, b"k", &[0; 9]),
            Err(MapError::CapacityExceeded(_))
        ));
        assert_eq!(seg.len(), 0);

        let slot = seg.insert_new(h, b"k", &[7; 8]).expect("insert");
        assert!(seg.replace_value(slot, &[0; 9]).is_err());
        assert_eq!(seg.entry(slot).value(), &[7; 8]);
    }

    #[test]
    fn test_chain_unlink_middle() {
        // A shared hash puts every key on one chain with equal tags.
        let (_dir, region) = region(8, 1, 8);
        let seg = LockedSegment::lock(&region, 0, TIMEOUT).expect("lock");
        let h = 0xDEAD_BEEF_0000_0000;
        let keys: Vec<Vec<u8>> = (0..6u8).map(|i| vec![b'k', i]).collect();
        for key in &keys {
            seg.insert_new(h, key, &[]).expect("insert");
        }
        let victim = seg.find(h, &keys[2]).expect("chain").expect("present");
        seg.remove_slot(h, victim);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(seg.find(h, key).expect("chain").is_some(), i != 2);
        }

        let head = seg.find(h, &keys[5]).expect("chain").expect("present");
        seg.remove_slot(h, head);
        let tail = seg.find(h, &keys[0]).expect("chain").expect("present");
        seg.remove_slot(h, tail);
        for i in [1, 3, 4] {
            assert!(seg.find(h, &keys[i]).expect("chain").is_some());
        }
        assert_eq!(seg.len(), 3);
    }

    #[test]
    fn test_generation_bumps_on_free() {
        let (_dir, region) = region(4, 1, 16);
        let seg = LockedSegment::lock(&region, 0, TIMEOUT).expect("lock");
        let h = hash_key(b"g");
        let slot = seg.insert_new(h, b"g", &[0; 8]).expect("insert");
        let before = seg.entry(slot).generation();
        seg.remove_slot(h, slot);
        assert_eq!(seg.entry(slot).generation(), before + 1);
        assert!(!seg.entry(slot).is_occupied());
    }

    #[test]
    fn test_corrupt_chain_is_an_error() {
        let (_dir, region) = region(8, 1, 8);
        let seg = LockedSegment::lock(&region, 0, TIMEOUT).expect("lock");
        let h = hash_key(b"x");
        seg.insert_new(h, b"x", &[]).expect("insert");

        let bucket = region.layout().bucket_for(h);
        seg.set_bucket_head(bucket, 99);
        assert!(matches!(seg.find(h, b"x"), Err(MapError::CorruptMap(_))));

        // A chain that points back at itself.
        seg.set_bucket_head(bucket, 1);
        seg.entry(0).set_next(1);
        assert!(matches!(seg.find(h, b"y"), Err(MapError::CorruptMap(_))));
    }

    #[test]
    fn test_clear() {
        let (_dir, region) = region(100, 1, 8);
        let seg = LockedSegment::lock(&region, 0, TIMEOUT).expect("lock");
        for i in 0..70u32 {
            let key = i.to_le_bytes();
            seg.insert_new(hash_key(&key), &key, &[]).expect("insert");
        }
        assert_eq!(seg.clear(), 70);
        assert_eq!(seg.len(), 0);
        let key = 5u32.to_le_bytes();
        assert_eq!(seg.find(hash_key(&key), &key).expect("chain"), None);
        assert_eq!(seg.insert_new(hash_key(&key), &key, &[]).expect("insert"), 0);
    }

    #[test]
    fn test_lock_released_on_drop() {
        let (_dir, region) = region(4, 2, 8);
        drop(LockedSegment::lock(&region, 1, TIMEOUT).expect("lock"));
        let again = LockedSegment::lock(&region, 1, Duration::ZERO).expect("relock");
        assert_eq!(again.index(), 1);
    }
}
