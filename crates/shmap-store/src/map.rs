//! Shared map engine.
//!
//! Every operation encodes the key once, hashes it with xxh3, picks the
//! segment `hash % segments` and runs entirely under that segment's lock.
//! Operations on different segments never contend. Nothing locks more than
//! one segment, so there is no map-wide ordering and no deadlock.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use shmap_codec::{Marshallable, Marshaller};
use tracing::info;

use crate::accessor::{Byteable, EntryView, MapValue};
use crate::config::MapConfig;
use crate::header::MapHeader;
use crate::layout::{MapLayout, hash_key};
use crate::region::MappedRegion;
use crate::segment::LockedSegment;
use crate::{MapError, Result};

/// A concurrent hash map stored in a memory-mapped file.
///
/// The handle is `Send + Sync`; share it between threads by reference or
/// through an `Arc`. Other processes open their own handle on the same
/// file.
pub struct SharedHashMap<K, V> {
    region: Arc<MappedRegion>,
    config: MapConfig,
    keys: Arc<dyn Marshaller<K>>,
    values: Arc<dyn Marshaller<V>>,
}

impl<K, V> SharedHashMap<K, V> {
    /// Open or create the map described by `config` with explicit
    /// marshallers.
    ///
    /// An existing file must have been created with the same capacity,
    /// segment count, entry size and marshaller descriptors.
    pub fn open(
        config: MapConfig,
        keys: Arc<dyn Marshaller<K>>,
        values: Arc<dyn Marshaller<V>>,
    ) -> Result<Self> {
        let layout = MapLayout::for_config(&config)?;
        let expected = MapHeader::for_layout(
            &layout,
            &keys.qualified_descriptor(),
            &values.qualified_descriptor(),
        );
        let region = MappedRegion::open(&config.path, layout, &expected)?;
        Ok(Self {
            region: Arc::new(region),
            config,
            keys,
            values,
        })
    }

    /// Open or create the map using the default marshallers of `K` and `V`.
    pub fn open_default(config: MapConfig) -> Result<Self>
    where
        K: Marshallable,
        V: Marshallable,
    {
        Self::open(config, K::marshaller(), V::marshaller())
    }

    /// Configuration the handle was opened with.
    pub const fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Validated file header.
    pub fn header(&self) -> &MapHeader {
        self.region.header()
    }

    /// File geometry.
    pub fn layout(&self) -> &MapLayout {
        self.region.layout()
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        self.region.path()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.region.is_closed() {
            Err(MapError::ClosedHandle)
        } else {
            Ok(())
        }
    }

    fn encode_key(&self, key: &K) -> Result<(Vec<u8>, u64)> {
        let mut bytes = Vec::new();
        self.keys.write(key, &mut bytes)?;
        let hash = hash_key(&bytes);
        Ok((bytes, hash))
    }

    fn encode_value(&self, value: &V) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.values.write(value, &mut bytes)?;
        Ok(bytes)
    }

    fn lock(&self, hash: u64) -> Result<LockedSegment<'_>> {
        self.ensure_open()?;
        LockedSegment::lock(
            &self.region,
            self.region.layout().segment_for(hash),
            self.config.lock_timeout,
        )
    }

    fn decode(&self, seg: &LockedSegment<'_>, slot: u32) -> Result<V> {
        Ok(self.values.read(seg.entry(slot).value())?)
    }

    /// Decoded copy of the value for `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let (key, hash) = self.encode_key(key)?;
        let seg = self.lock(hash)?;
        seg.find(hash, &key)?
            .map(|slot| self.decode(&seg, slot))
            .transpose()
    }

    /// Fill `using` with the value for `key`.
    ///
    /// Flyweight values are bound to the entry; other values are decoded
    /// into the container. A `None` key or an absent key returns `Ok(None)`
    /// and leaves the container untouched.
    pub fn get_using<'v>(&self, key: Option<&K>, using: &'v mut V) -> Result<Option<&'v mut V>>
    where
        V: MapValue,
    {
        self.ensure_open()?;
        let Some(key) = key else {
            return Ok(None);
        };
        let (key, hash) = self.encode_key(key)?;
        let seg = self.lock(hash)?;
        let Some(slot) = seg.find(hash, &key)? else {
            return Ok(None);
        };
        using.load(&EntryView::new(&self.region, seg.entry(slot), self.config.lock_timeout), &*self.values)?;
        Ok(Some(using))
    }

    /// Bind `using` to the entry for `key`, creating a zeroed entry first if
    /// the key is absent.
    ///
    /// A `None` key returns `Ok(None)` without touching the map or the
    /// container, unless the handle is closed.
    pub fn acquire_using<'v>(
        &self,
        key: Option<&K>,
        using: &'v mut V,
    ) -> Result<Option<&'v mut V>>
    where
        V: Byteable,
    {
        self.ensure_open()?;
        let Some(key) = key else {
            return Ok(None);
        };
        let (key, hash) = self.encode_key(key)?;
        let seg = self.lock(hash)?;
        let (slot, _) = seg.find_or_insert(hash, &key, &vec![0u8; V::SIZE])?;
        using.load(&EntryView::new(&self.region, seg.entry(slot), self.config.lock_timeout), &*self.values)?;
        Ok(Some(using))
    }

    /// A fresh flyweight bound to the entry for `key`, created zeroed if
    /// absent.
    pub fn acquire(&self, key: &K) -> Result<V>
    where
        V: Byteable,
    {
        let mut value = V::unbound();
        self.acquire_using(Some(key), &mut value)?;
        Ok(value)
    }

    /// Insert or overwrite.
    ///
    /// Returns the previous value, or always `None` when the map was opened
    /// with `put_returns_none`. An oversize key or value fails with
    /// [`MapError::CapacityExceeded`] and leaves the map unchanged.
    pub fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        let (key, hash) = self.encode_key(key)?;
        let value = self.encode_value(value)?;
        let seg = self.lock(hash)?;
        match seg.find(hash, &key)? {
            Some(slot) => {
                let previous = if self.config.put_returns_none {
                    None
                } else {
                    Some(self.decode(&seg, slot)?)
                };
                seg.replace_value(slot, &value)?;
                Ok(previous)
            }
            None => {
                seg.insert_new(hash, &key, &value)?;
                Ok(None)
            }
        }
    }

    /// Insert only if absent; otherwise return the existing value.
    pub fn put_if_absent(&self, key: &K, value: &V) -> Result<Option<V>> {
        let (key, hash) = self.encode_key(key)?;
        let value = self.encode_value(value)?;
        let seg = self.lock(hash)?;
        match seg.find(hash, &key)? {
            Some(slot) => Ok(Some(self.decode(&seg, slot)?)),
            None => {
                seg.insert_new(hash, &key, &value)?;
                Ok(None)
            }
        }
    }

    /// Overwrite only if present; returns the previous value.
    pub fn replace(&self, key: &K, value: &V) -> Result<Option<V>> {
        let (key, hash) = self.encode_key(key)?;
        let value = self.encode_value(value)?;
        let seg = self.lock(hash)?;
        let Some(slot) = seg.find(hash, &key)? else {
            return Ok(None);
        };
        let previous = self.decode(&seg, slot)?;
        seg.replace_value(slot, &value)?;
        Ok(Some(previous))
    }

    /// Overwrite only if the stored value encodes identically to `expected`.
    pub fn replace_if_equal(&self, key: &K, expected: &V, value: &V) -> Result<bool> {
        let (key, hash) = self.encode_key(key)?;
        let expected = self.encode_value(expected)?;
        let value = self.encode_value(value)?;
        let seg = self.lock(hash)?;
        match seg.find(hash, &key)? {
            Some(slot) if seg.entry(slot).value() == expected.as_slice() => {
                seg.replace_value(slot, &value)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Delete `key`.
    ///
    /// Returns the removed value, or always `None` when the map was opened
    /// with `remove_returns_none`.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let (key, hash) = self.encode_key(key)?;
        let seg = self.lock(hash)?;
        let Some(slot) = seg.find(hash, &key)? else {
            return Ok(None);
        };
        let previous = if self.config.remove_returns_none {
            None
        } else {
            Some(self.decode(&seg, slot)?)
        };
        seg.remove_slot(hash, slot);
        Ok(previous)
    }

    /// Delete `key` only if its value encodes identically to `expected`.
    pub fn remove_if_equal(&self, key: &K, expected: &V) -> Result<bool> {
        let (key, hash) = self.encode_key(key)?;
        let expected = self.encode_value(expected)?;
        let seg = self.lock(hash)?;
        match seg.find(hash, &key)? {
            Some(slot) if seg.entry(slot).value() == expected.as_slice() => {
                seg.remove_slot(hash, slot);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        let (key, hash) = self.encode_key(key)?;
        let seg = self.lock(hash)?;
        Ok(seg.find(hash, &key)?.is_some())
    }

    /// Remove every entry, one segment at a time.
    ///
    /// Not atomic: concurrent inserts into already cleared segments survive.
    pub fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        let mut freed = 0u64;
        for index in 0..self.region.layout().segments as usize {
            let seg = LockedSegment::lock(&self.region, index, self.config.lock_timeout)?;
            freed += u64::from(seg.clear());
        }
        info!(path = %self.path().display(), freed, "cleared shared map");
        Ok(())
    }

    /// Number of entries, summed over segments without locking.
    pub fn len(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok((0..self.region.layout().segments as usize)
            .map(|index| u64::from(LockedSegment::count_unlocked(&self.region, index)))
            .sum())
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Write dirty pages back to the file.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.region.flush()
    }

    /// Flush and close this handle.
    ///
    /// Later calls on the handle, and on flyweights bound through it, fail
    /// with [`MapError::ClosedHandle`]. Other handles on the same file are
    /// unaffected. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.region.is_closed() {
            return Ok(());
        }
        self.region.flush()?;
        if self.region.close() {
            info!(path = %self.path().display(), "closed shared map handle");
        }
        Ok(())
    }
}

impl<K, V> fmt::Debug for SharedHashMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHashMap")
            .field("path", &self.region.path())
            .field("entries", &self.config.entries)
            .field("segments", &self.config.segments)
            .field("entry_size", &self.config.entry_size)
            .field("key_type", &self.keys.qualified_descriptor())
            .field("value_type", &self.values.qualified_descriptor())
            .field("closed", &self.region.is_closed())
            .finish()
    }
}
