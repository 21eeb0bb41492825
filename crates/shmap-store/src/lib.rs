//! Fixed-capacity concurrent hash map living in a memory-mapped file.
//!
//! Every byte of the map, including its locks, is stored in one file mapped
//! with `MAP_SHARED`. Independent processes that open the same file with
//! the same parameters see one map with linearizable per-key operations.
//!
//! - **Header**: fixed 128-byte block describing the layout and the key and
//!   value encodings; validated on every open
//! - **Segments**: independently locked shards, each with an occupancy
//!   bitset, a bucket index and an arena of fixed-stride entries
//! - **Segment locks**: compare-and-swap on a word inside the mapping, so
//!   they work across processes
//! - **Flyweight values**: [`LongValue`] binds directly to an entry's bytes
//!   and updates them atomically without copying
//!
//! Capacity is fixed when the file is created. The map never grows and an
//! insert into a full segment fails with [`MapError::CapacityExceeded`].
//!
//! # Example
//!
//! ```no_run
//! use shmap_store::{MapConfig, SharedHashMap};
//!
//! # fn main() -> shmap_store::Result<()> {
//! let config = MapConfig::new("/dev/shm/sessions.map").with_entries(10_000);
//! let map: SharedHashMap<String, String> = SharedHashMap::open_default(config)?;
//! map.put(&"user:1".to_string(), &"alice".to_string())?;
//! assert_eq!(map.get(&"user:1".to_string())?.as_deref(), Some("alice"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use std::time::Duration;

use shmap_codec::CodecError;
use thiserror::Error;

// Flyweight value accessors
pub mod accessor;

// Map configuration
pub mod config;

// Entry record layout
mod entry;

// File header
pub mod header;

// Capacity planning and offsets
pub mod layout;

// Cross-process segment lock
mod lock;

// Public map API
pub mod map;

// Memory-mapped region
mod region;

// Segment operations under lock
mod segment;

pub use accessor::{BoundSlot, Byteable, EntryView, LongValue, LongValueMarshaller, MapValue};
pub use config::MapConfig;
pub use header::MapHeader;
pub use layout::MapLayout;
pub use map::SharedHashMap;
pub use shmap_codec;

/// Result type for map operations.
pub type Result<T> = std::result::Result<T, MapError>;

/// Map error types.
#[derive(Debug, Error)]
pub enum MapError {
    /// An existing file was created with different parameters.
    #[error("schema mismatch on {field}: file has {found}, expected {expected}")]
    SchemaMismatch {
        /// Header field that differs.
        field: &'static str,
        /// Value implied by the opener's configuration.
        expected: String,
        /// Value stored in the file.
        found: String,
    },

    /// An entry does not fit its slot, or a segment has no free slot.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A segment lock could not be acquired in time.
    #[error("timed out after {waited:?} waiting for segment {segment} lock")]
    LockTimeout {
        /// Segment index.
        segment: usize,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The map handle was closed.
    #[error("map handle is closed")]
    ClosedHandle,

    /// Stored bytes could not be decoded.
    #[error("corrupt encoding: {0}")]
    CorruptEncoding(#[from] CodecError),

    /// Map structures in the file are inconsistent.
    #[error("corrupt map structure: {0}")]
    CorruptMap(String),

    /// A flyweight is not bound to a live entry.
    #[error("accessor is not bound to a live entry")]
    Unbound,

    /// Configuration rejected before touching the file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
