//! Map file header.
//!
//! The header occupies the first [`HEADER_SIZE`] bytes of the file and is
//! written once, after the rest of the file has been zero-filled. Every
//! later opener compares it field by field against the header its own
//! configuration implies.
//!
//! ```text
//! 0x00 magic "SHMP"          0x18 entries_per_segment u32
//! 0x04 version u16           0x1C buckets_per_segment u32
//! 0x06 header_size u16       0x20 entry_stride u32
//! 0x08 entry_count u64       0x24 reserved u32
//! 0x10 segment_count u32     0x28 segment_stride u64
//! 0x14 entry_size u32        0x30 key_type [u8; 32]
//!                            0x50 value_type [u8; 32]
//!                            0x70 checksum u64, xxh3 of 0x00..0x70
//! ```

use std::io::Cursor;

use binrw::{BinRead, BinWrite, Endian};
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use crate::layout::{HEADER_SIZE, MapLayout};
use crate::{MapError, Result};

/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

/// Bytes covered by the checksum.
pub const CHECKSUM_OFFSET: usize = 0x70;

/// Width of a stored type descriptor.
pub const DESCRIPTOR_LEN: usize = 32;

/// Leading descriptor bytes kept verbatim when a descriptor is too long.
const DESCRIPTOR_PREFIX: usize = 24;

/// Fixed metadata at the start of a map file.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little, magic = b"SHMP")]
pub struct MapHeader {
    /// Format version.
    pub version: u16,
    /// Header size in bytes.
    pub header_size: u16,
    /// Configured total capacity.
    pub entry_count: u64,
    /// Number of segments.
    pub segment_count: u32,
    /// Configured per-entry data budget.
    pub entry_size: u32,
    /// Slots per segment.
    pub entries_per_segment: u32,
    /// Bucket heads per segment.
    pub buckets_per_segment: u32,
    /// Bytes between entries.
    pub entry_stride: u32,
    /// Bytes between segments.
    #[brw(pad_before = 4)]
    pub segment_stride: u64,
    /// Encoded key type descriptor.
    pub key_type: [u8; DESCRIPTOR_LEN],
    /// Encoded value type descriptor.
    pub value_type: [u8; DESCRIPTOR_LEN],
}

impl MapHeader {
    /// Header implied by a layout and the marshaller descriptors.
    pub fn for_layout(layout: &MapLayout, key_type: &str, value_type: &str) -> Self {
        Self {
            version: FORMAT_VERSION,
            header_size: HEADER_SIZE as u16,
            entry_count: layout.entries,
            segment_count: layout.segments,
            entry_size: layout.entry_size,
            entries_per_segment: layout.slots_per_segment,
            buckets_per_segment: layout.buckets_per_segment,
            entry_stride: layout.entry_stride,
            segment_stride: layout.segment_stride as u64,
            key_type: encode_descriptor(key_type),
            value_type: encode_descriptor(value_type),
        }
    }

    /// Serialize with checksum.
    pub fn to_bytes(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);
        self.write_options(&mut cursor, Endian::Little, ())
            .map_err(|e| MapError::InvalidConfig(format!("header encode failed: {e}")))?;
        let checksum = xxh3_64(&buf[..CHECKSUM_OFFSET]);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8].copy_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    /// Parse and verify a stored header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(mismatch("header_size", HEADER_SIZE, bytes.len()));
        }

        let mut cursor = Cursor::new(bytes);
        let header = Self::read_options(&mut cursor, Endian::Little, ()).map_err(|e| {
            MapError::SchemaMismatch {
                field: "magic",
                expected: "SHMP".to_string(),
                found: e.to_string(),
            }
        })?;

        let mut stored = [0u8; 8];
        stored.copy_from_slice(&bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8]);
        let stored = u64::from_le_bytes(stored);
        let computed = xxh3_64(&bytes[..CHECKSUM_OFFSET]);
        if stored != computed {
            return Err(mismatch(
                "checksum",
                format!("{computed:#018x}"),
                format!("{stored:#018x}"),
            ));
        }

        Ok(header)
    }

    /// Compare a stored header against the expected one.
    ///
    /// Fails with [`MapError::SchemaMismatch`] naming the first differing
    /// field.
    pub fn check_matches(&self, expected: &Self) -> Result<()> {
        let numeric: [(&'static str, u64, u64); 9] = [
            ("version", expected.version.into(), self.version.into()),
            ("header_size", expected.header_size.into(), self.header_size.into()),
            ("entry_count", expected.entry_count, self.entry_count),
            ("segment_count", expected.segment_count.into(), self.segment_count.into()),
            ("entry_size", expected.entry_size.into(), self.entry_size.into()),
            (
                "entries_per_segment",
                expected.entries_per_segment.into(),
                self.entries_per_segment.into(),
            ),
            (
                "buckets_per_segment",
                expected.buckets_per_segment.into(),
                self.buckets_per_segment.into(),
            ),
            ("entry_stride", expected.entry_stride.into(), self.entry_stride.into()),
            ("segment_stride", expected.segment_stride, self.segment_stride),
        ];
        for (field, want, have) in numeric {
            if want != have {
                warn!(field, expected = want, found = have, "map header mismatch");
                return Err(mismatch(field, want, have));
            }
        }

        for (field, want, have) in [
            ("key_type", &expected.key_type, &self.key_type),
            ("value_type", &expected.value_type, &self.value_type),
        ] {
            if want != have {
                let (want, have) = (descriptor_text(want), descriptor_text(have));
                warn!(field, expected = %want, found = %have, "map header mismatch");
                return Err(mismatch(field, want, have));
            }
        }
        Ok(())
    }

    /// Key descriptor as text.
    pub fn key_type_name(&self) -> String {
        descriptor_text(&self.key_type)
    }

    /// Value descriptor as text.
    pub fn value_type_name(&self) -> String {
        descriptor_text(&self.value_type)
    }
}

fn mismatch(field: &'static str, expected: impl ToString, found: impl ToString) -> MapError {
    MapError::SchemaMismatch {
        field,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

/// Fixed-width descriptor encoding.
///
/// Descriptors up to 32 bytes are stored zero-padded. Longer ones keep
/// their first 24 bytes followed by the xxh3 of the full text, so distinct
/// long names still compare unequal.
pub fn encode_descriptor(descriptor: &str) -> [u8; DESCRIPTOR_LEN] {
    let bytes = descriptor.as_bytes();
    let mut out = [0u8; DESCRIPTOR_LEN];
    if bytes.len() <= DESCRIPTOR_LEN {
        out[..bytes.len()].copy_from_slice(bytes);
    } else {
        out[..DESCRIPTOR_PREFIX].copy_from_slice(&bytes[..DESCRIPTOR_PREFIX]);
        out[DESCRIPTOR_PREFIX..].copy_from_slice(&xxh3_64(bytes).to_le_bytes());
    }
    out
}

fn descriptor_text(raw: &[u8; DESCRIPTOR_LEN]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(DESCRIPTOR_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
