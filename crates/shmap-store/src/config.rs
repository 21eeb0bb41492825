//! Configuration for a shared map

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{MapError, Result};

/// Largest accepted per-entry data budget.
pub const MAX_ENTRY_SIZE: u32 = 1 << 20;

/// Smallest accepted per-entry data budget (one 8-byte value word).
pub const MIN_ENTRY_SIZE: u32 = 8;

/// Largest accepted segment count.
pub const MAX_SEGMENTS: u32 = 1 << 16;

/// Configuration for a shared map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Backing file
    pub path: PathBuf,

    /// Total entry capacity
    pub entries: u64,

    /// Number of independently locked segments
    pub segments: u32,

    /// Bytes available for key plus value in one entry
    pub entry_size: u32,

    /// `put` skips decoding the previous value and returns `None`
    pub put_returns_none: bool,

    /// `remove` skips decoding the removed value and returns `None`
    pub remove_returns_none: bool,

    /// How long to wait for a segment lock
    pub lock_timeout: Duration,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./shmap.dat"),
            entries: 1 << 20,
            segments: 128,
            entry_size: 256,
            put_returns_none: false,
            remove_returns_none: false,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl MapConfig {
    /// Create a new configuration for the given backing file
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set the backing file
    #[must_use]
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Set the total entry capacity
    #[must_use]
    pub const fn with_entries(mut self, entries: u64) -> Self {
        self.entries = entries;
        self
    }

    /// Set the segment count
    #[must_use]
    pub const fn with_segments(mut self, segments: u32) -> Self {
        self.segments = segments;
        self
    }

    /// Set the per-entry data budget
    #[must_use]
    pub const fn with_entry_size(mut self, entry_size: u32) -> Self {
        self.entry_size = entry_size;
        self
    }

    /// Make `put` return `None` instead of the previous value
    #[must_use]
    pub const fn with_put_returns_none(mut self, enable: bool) -> Self {
        self.put_returns_none = enable;
        self
    }

    /// Make `remove` return `None` instead of the removed value
    #[must_use]
    pub const fn with_remove_returns_none(mut self, enable: bool) -> Self {
        self.remove_returns_none = enable;
        self
    }

    /// Set the segment lock timeout
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Check the parameters before any file is touched.
    pub fn validate(&self) -> Result<()> {
        if self.entries == 0 {
            return Err(MapError::InvalidConfig("entries must be positive".into()));
        }
        if self.segments == 0 {
            return Err(MapError::InvalidConfig("segments must be positive".into()));
        }
        if self.segments > MAX_SEGMENTS {
            return Err(MapError::InvalidConfig(format!(
                "segments {} exceeds maximum {MAX_SEGMENTS}",
                self.segments
            )));
        }
        if u64::from(self.segments) > self.entries {
            return Err(MapError::InvalidConfig(format!(
                "segments {} exceeds entries {}",
                self.segments, self.entries
            )));
        }
        if !(MIN_ENTRY_SIZE..=MAX_ENTRY_SIZE).contains(&self.entry_size) {
            return Err(MapError::InvalidConfig(format!(
                "entry_size {} outside {MIN_ENTRY_SIZE}..={MAX_ENTRY_SIZE}",
                self.entry_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MapConfig::default();
        assert_eq!(config.entries, 1 << 20);
        assert_eq!(config.segments, 128);
        assert_eq!(config.entry_size, 256);
        assert!(!config.put_returns_none);
        assert!(!config.remove_returns_none);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = MapConfig::new("/tmp/x.map")
            .with_entries(100_000)
            .with_segments(16)
            .with_entry_size(32)
            .with_put_returns_none(true)
            .with_remove_returns_none(true)
            .with_lock_timeout(Duration::from_millis(50));
        assert_eq!(config.path, PathBuf::from("/tmp/x.map"));
        assert_eq!(config.entries, 100_000);
        assert_eq!(config.segments, 16);
        assert_eq!(config.entry_size, 32);
        assert!(config.put_returns_none && config.remove_returns_none);
        assert_eq!(config.lock_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let base = MapConfig::new("/tmp/x.map");
        for bad in [
            base.clone().with_entries(0),
            base.clone().with_segments(0),
            base.clone().with_entries(4).with_segments(8),
            base.clone().with_segments(MAX_SEGMENTS + 1),
            base.clone().with_entry_size(4),
            base.clone().with_entry_size(MAX_ENTRY_SIZE + 1),
        ] {
            assert!(
                matches!(bad.validate(), Err(MapError::InvalidConfig(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let config = MapConfig::new("/tmp/x.map").with_entries(42).with_segments(2);
        let json = serde_json::to_string(&config).unwrap();
        let back: MapConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
