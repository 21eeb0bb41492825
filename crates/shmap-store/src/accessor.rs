//! Flyweight value accessors.
//!
//! A flyweight is a reusable value object that can be bound to an entry's
//! bytes in the mapping. While bound it owns no storage: reads and writes go
//! straight to the entry, and numeric updates are atomic across processes.
//!
//! A binding records the entry's generation. Removing the entry bumps the
//! generation under the segment lock, so any later access through a stale
//! binding fails with [`MapError::Unbound`] instead of touching whatever
//! reuses the slot. Bound writes take the segment lock and validate the
//! generation while holding it. Bound reads stay lock-free and validate
//! the generation again after loading.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use shmap_codec::{CodecError, Marshallable, Marshaller, MarshallerKind};

use crate::entry::{EntryRef, binding_live};
use crate::layout::SEGMENT_LOCK_OFFSET;
use crate::lock;
use crate::region::MappedRegion;
use crate::{MapError, Result};

/// Location of a live entry's value, captured under the segment lock.
#[derive(Clone)]
pub struct BoundSlot {
    region: Arc<MappedRegion>,
    entry: usize,
    value: usize,
    len: usize,
    generation: u32,
    lock_timeout: Duration,
}

impl BoundSlot {
    /// Length of the bound value in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the bound value is empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Generation of the entry when it was bound.
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Fail unless the handle is open and the entry is still the one bound.
    pub fn check(&self) -> Result<()> {
        if self.region.is_closed() {
            return Err(MapError::ClosedHandle);
        }
        if !binding_live(&self.region, self.entry, self.generation) {
            return Err(MapError::Unbound);
        }
        Ok(())
    }

    fn word(&self, offset: usize) -> Result<&AtomicU64> {
        if offset % 8 != 0 || offset + 8 > self.len {
            return Err(MapError::CapacityExceeded(format!(
                "8-byte field at {offset} outside {}-byte value",
                self.len
            )));
        }
        Ok(self.region.atomic_u64(self.value + offset))
    }

    /// Load the 8-byte word at `offset` within the value.
    ///
    /// The binding is checked before and after the load, so a value read
    /// from a slot that was freed in between is never returned.
    pub fn load_u64(&self, offset: usize) -> Result<u64> {
        self.check()?;
        let value = self.word(offset)?.load(Ordering::Acquire);
        self.check()?;
        Ok(value)
    }

    /// Run `f` on the 8-byte word at `offset` while holding the lock of the
    /// segment owning the entry.
    ///
    /// The binding is checked under the lock, so `f` never runs against a
    /// slot that was removed and reused by another key.
    pub fn update_u64<R>(&self, offset: usize, f: impl FnOnce(&AtomicU64) -> R) -> Result<R> {
        if self.region.is_closed() {
            return Err(MapError::ClosedHandle);
        }
        let layout = self.region.layout();
        let segment = layout.segment_containing(self.entry);
        let _guard = lock::acquire(
            self.region
                .atomic_u64(layout.segment_offset(segment) + SEGMENT_LOCK_OFFSET),
            segment,
            self.lock_timeout,
        )?;
        self.check()?;
        Ok(f(self.word(offset)?))
    }
}

impl fmt::Debug for BoundSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundSlot")
            .field("entry", &self.entry)
            .field("len", &self.len)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// A located entry offered to a container by `get_using` and
/// `acquire_using`.
pub struct EntryView<'a> {
    region: &'a Arc<MappedRegion>,
    entry: EntryRef<'a>,
    lock_timeout: Duration,
}

impl<'a> EntryView<'a> {
    pub(crate) const fn new(
        region: &'a Arc<MappedRegion>,
        entry: EntryRef<'a>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            region,
            entry,
            lock_timeout,
        }
    }

    /// Stored value bytes.
    pub fn bytes(&self) -> &'a [u8] {
        self.entry.value()
    }

    /// Bind to this entry's value.
    pub fn bind(&self) -> BoundSlot {
        BoundSlot {
            region: Arc::clone(self.region),
            entry: self.entry.offset(),
            value: self.entry.value_start(),
            len: self.entry.value_len(),
            generation: self.entry.generation(),
            lock_timeout: self.lock_timeout,
        }
    }
}

/// Types that can be filled from a stored entry.
///
/// The default decodes a copy through the map's marshaller, reusing the
/// container's allocations where the marshaller can. Flyweights override
/// [`MapValue::load`] to bind instead.
pub trait MapValue: Sized {
    /// Fill `self` from `view`.
    fn load(&mut self, view: &EntryView<'_>, marshaller: &dyn Marshaller<Self>) -> Result<()> {
        marshaller.read_into(view.bytes(), self)?;
        Ok(())
    }
}

impl MapValue for String {}
impl MapValue for Vec<u8> {}
impl MapValue for u64 {}
impl MapValue for i64 {}
impl MapValue for shmap_codec::graph::Value {}
impl MapValue for shmap_codec::graph::ObjectRef {}

/// Fixed-size flyweights that bind directly to entry bytes.
pub trait Byteable: MapValue {
    /// Bytes a fresh value occupies; `acquire` inserts this many zeros.
    const SIZE: usize;

    /// A detached value, ready to be bound.
    fn unbound() -> Self;

    /// Point at stored bytes.
    fn bind(&mut self, slot: BoundSlot);

    /// Return to the detached state, keeping the last observed value if
    /// still readable.
    fn unbind(&mut self);

    /// Whether the value is bound.
    fn is_bound(&self) -> bool;
}

#[derive(Debug, Clone)]
enum LongState {
    Detached(i64),
    Bound(BoundSlot),
}

/// A 64-bit signed counter.
///
/// Detached it holds a local value. Bound, every call is an atomic
/// operation on the entry's value word, safe to use concurrently from any
/// thread or process. Updates briefly take the owning segment's lock to
/// confirm the entry is still the one bound; reads do not.
///
/// ```no_run
/// use shmap_store::{LongValue, MapConfig, SharedHashMap};
///
/// # fn main() -> shmap_store::Result<()> {
/// let map: SharedHashMap<String, LongValue> =
///     SharedHashMap::open_default(MapConfig::new("/dev/shm/counters.map"))?;
/// let mut hits = map.acquire(&"hits".to_string())?;
/// hits.add_and_get(1)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LongValue {
    state: LongState,
}

impl LongValue {
    /// Width of the stored value.
    pub const WIDTH: usize = 8;

    /// Detached value.
    pub const fn new(value: i64) -> Self {
        Self {
            state: LongState::Detached(value),
        }
    }

    /// Current value.
    pub fn get_value(&self) -> Result<i64> {
        match &self.state {
            LongState::Detached(v) => Ok(*v),
            LongState::Bound(slot) => Ok(slot.load_u64(0)? as i64),
        }
    }

    /// Replace the value.
    pub fn set_value(&mut self, value: i64) -> Result<()> {
        match &mut self.state {
            LongState::Detached(v) => *v = value,
            LongState::Bound(slot) => {
                slot.update_u64(0, |word| word.store(value as u64, Ordering::Release))?;
            }
        }
        Ok(())
    }

    /// Add `delta` and return the new value.
    pub fn add_and_get(&mut self, delta: i64) -> Result<i64> {
        match &mut self.state {
            LongState::Detached(v) => {
                *v = v.wrapping_add(delta);
                Ok(*v)
            }
            LongState::Bound(slot) => {
                let prev =
                    slot.update_u64(0, |word| word.fetch_add(delta as u64, Ordering::AcqRel))?
                        as i64;
                Ok(prev.wrapping_add(delta))
            }
        }
    }

    /// The binding, if bound.
    pub const fn slot(&self) -> Option<&BoundSlot> {
        match &self.state {
            LongState::Bound(slot) => Some(slot),
            LongState::Detached(_) => None,
        }
    }
}

impl Default for LongValue {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MapValue for LongValue {
    fn load(&mut self, view: &EntryView<'_>, _marshaller: &dyn Marshaller<Self>) -> Result<()> {
        let slot = view.bind();
        if slot.len() != Self::WIDTH {
            return Err(MapError::CorruptEncoding(CodecError::Truncated {
                offset: 0,
                needed: Self::WIDTH,
                available: slot.len(),
            }));
        }
        self.bind(slot);
        Ok(())
    }
}

impl Byteable for LongValue {
    const SIZE: usize = Self::WIDTH;

    fn unbound() -> Self {
        Self::default()
    }

    fn bind(&mut self, slot: BoundSlot) {
        self.state = LongState::Bound(slot);
    }

    fn unbind(&mut self) {
        let last = self.get_value().unwrap_or(0);
        self.state = LongState::Detached(last);
    }

    fn is_bound(&self) -> bool {
        matches!(self.state, LongState::Bound(_))
    }
}

/// Encoding of [`LongValue`]: 8 little-endian bytes of its current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongValueMarshaller;

impl Marshaller<LongValue> for LongValueMarshaller {
    fn descriptor(&self) -> &str {
        "long"
    }

    fn kind(&self) -> MarshallerKind {
        MarshallerKind::Primitive
    }

    fn write(&self, value: &LongValue, out: &mut Vec<u8>) -> shmap_codec::Result<()> {
        let v = value
            .get_value()
            .map_err(|e| CodecError::Custom(e.to_string()))?;
        out.extend_from_slice(&v.to_le_bytes());
        Ok(())
    }

    fn read(&self, bytes: &[u8]) -> shmap_codec::Result<LongValue> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| CodecError::Truncated {
            offset: 0,
            needed: LongValue::WIDTH,
            available: bytes.len(),
        })?;
        Ok(LongValue::new(i64::from_le_bytes(raw)))
    }
}

impl Marshallable for LongValue {
    fn marshaller() -> Arc<dyn Marshaller<Self>> {
        Arc::new(LongValueMarshaller)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_value() {
        let mut v = LongValue::new(5);
        assert!(!v.is_bound());
        assert_eq!(v.get_value().unwrap(), 5);
        assert_eq!(v.add_and_get(3).unwrap(), 8);
        v.set_value(-1).unwrap();
        assert_eq!(v.get_value().unwrap(), -1);
        assert!(v.slot().is_none());
    }

    #[test]
    fn test_marshaller() {
        let m = LongValueMarshaller;
        let mut out = Vec::new();
        m.write(&LongValue::new(-2), &mut out).unwrap();
        assert_eq!(out, (-2i64).to_le_bytes());
        assert_eq!(m.read(&out).unwrap().get_value().unwrap(), -2);
        assert!(m.read(&out[..4]).is_err());
        assert_eq!(m.qualified_descriptor(), "p:long");
    }
}
