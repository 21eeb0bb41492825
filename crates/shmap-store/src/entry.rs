//! Entry record layout.
//!
//! ```text
//! +0x00 flags u32        bit 0 = occupied
//! +0x04 next u32         slot + 1 of the next entry in the chain, 0 = end
//! +0x08 key_len u32
//! +0x0C value_len u32
//! +0x10 hash u32         upper 32 bits of the key hash
//! +0x14 generation u32   bumped every time the slot is freed
//! +0x18 key bytes, zero padded to 8, then value bytes
//! ```
//!
//! Flags and generation are atomics because bound flyweights read them
//! without holding the segment lock. Everything else is only touched under
//! the lock.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::layout::align8;
use crate::region::MappedRegion;

pub const ENTRY_HEADER_SIZE: usize = 24;

const FLAGS: usize = 0x00;
const NEXT: usize = 0x04;
const KEY_LEN: usize = 0x08;
const VALUE_LEN: usize = 0x0C;
const HASH: usize = 0x10;
const GENERATION: usize = 0x14;

pub const FLAG_OCCUPIED: u32 = 1;

/// Whether a key and value of these lengths fit `capacity` data bytes.
pub const fn fits(key_len: usize, value_len: usize, capacity: usize) -> bool {
    align8(key_len) + value_len <= capacity
}

/// Offset of the value relative to the entry start.
pub const fn value_offset(key_len: usize) -> usize {
    ENTRY_HEADER_SIZE + align8(key_len)
}

/// View of one entry in the mapping.
#[derive(Clone, Copy)]
pub struct EntryRef<'a> {
    region: &'a MappedRegion,
    offset: usize,
}

impl<'a> EntryRef<'a> {
    pub const fn new(region: &'a MappedRegion, offset: usize) -> Self {
        Self { region, offset }
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }

    fn flags_word(&self) -> &'a AtomicU32 {
        self.region.atomic_u32(self.offset + FLAGS)
    }

    fn generation_word(&self) -> &'a AtomicU32 {
        self.region.atomic_u32(self.offset + GENERATION)
    }

    pub fn is_occupied(&self) -> bool {
        self.flags_word().load(Ordering::Acquire) & FLAG_OCCUPIED != 0
    }

    pub fn generation(&self) -> u32 {
        self.generation_word().load(Ordering::Acquire)
    }

    pub fn next(&self) -> u32 {
        self.region.read_u32(self.offset + NEXT)
    }

    pub fn set_next(&self, link: u32) {
        self.region.write_u32(self.offset + NEXT, link);
    }

    pub fn key_len(&self) -> usize {
        self.region.read_u32(self.offset + KEY_LEN) as usize
    }

    pub fn value_len(&self) -> usize {
        self.region.read_u32(self.offset + VALUE_LEN) as usize
    }

    pub fn hash(&self) -> u32 {
        self.region.read_u32(self.offset + HASH)
    }

    pub fn key(&self) -> &'a [u8] {
        self.region
            .bytes(self.offset + ENTRY_HEADER_SIZE, self.key_len())
    }

    /// Absolute offset of the value bytes.
    pub fn value_start(&self) -> usize {
        self.offset + value_offset(self.key_len())
    }

    pub fn value(&self) -> &'a [u8] {
        self.region.bytes(self.value_start(), self.value_len())
    }

    /// Fill a free slot. The occupied flag is published last.
    pub fn occupy(&self, hash: u32, key: &[u8], value: &[u8], next: u32) {
        self.region.write_u32(self.offset + NEXT, next);
        self.region.write_u32(self.offset + KEY_LEN, key.len() as u32);
        self.region.write_u32(self.offset + VALUE_LEN, value.len() as u32);
        self.region.write_u32(self.offset + HASH, hash);

        let key_start = self.offset + ENTRY_HEADER_SIZE;
        self.region.write_bytes(key_start, key);
        let pad = align8(key.len()) - key.len();
        if pad > 0 {
            self.region.zero(key_start + key.len(), pad);
        }
        self.region.write_bytes(self.value_start(), value);

        self.flags_word().store(FLAG_OCCUPIED, Ordering::Release);
    }

    /// Overwrite the value. The caller has checked the capacity.
    pub fn set_value(&self, value: &[u8]) {
        self.region
            .write_u32(self.offset + VALUE_LEN, value.len() as u32);
        self.region.write_bytes(self.value_start(), value);
    }

    /// Mark the slot free and invalidate bindings to it.
    pub fn release(&self) {
        self.generation_word().fetch_add(1, Ordering::AcqRel);
        self.flags_word().store(0, Ordering::Release);
        self.region.write_u32(self.offset + NEXT, 0);
        self.region.write_u32(self.offset + KEY_LEN, 0);
        self.region.write_u32(self.offset + VALUE_LEN, 0);
        self.region.write_u32(self.offset + HASH, 0);
    }
}

/// Whether a binding taken at `generation` still refers to a live entry.
pub fn binding_live(region: &MappedRegion, entry_offset: usize, generation: u32) -> bool {
    let entry = EntryRef::new(region, entry_offset);
    entry.is_occupied() && entry.generation() == generation
}
