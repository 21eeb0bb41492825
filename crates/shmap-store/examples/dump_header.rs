#![allow(clippy::expect_used, clippy::panic)]

//! Dump the header and per-segment occupancy of a shared map file.
//!
//! Usage:
//!   cargo run --example dump_header -p shmap-store -- /dev/shm/sessions.map
//!
//! Without an argument a demo map is created in a temporary directory.

use std::fs;
use std::path::PathBuf;

use shmap_store::header::MapHeader;
use shmap_store::layout::{HEADER_SIZE, MapLayout, SEGMENT_COUNT_OFFSET, SEGMENT_LOCK_OFFSET};
use shmap_store::{LongValue, MapConfig, SharedHashMap};

fn demo_file(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("demo.map");
    let config = MapConfig::new(&path)
        .with_entries(4096)
        .with_segments(8)
        .with_entry_size(32);
    let map: SharedHashMap<String, LongValue> =
        SharedHashMap::open_default(config).expect("failed to create demo map");
    for i in 0..100 {
        let mut hits = map.acquire(&format!("page:{i}")).expect("acquire failed");
        hits.add_and_get(i).expect("increment failed");
    }
    map.close().expect("close failed");
    path
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let demo_dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = std::env::args_os()
        .nth(1)
        .map_or_else(|| demo_file(&demo_dir), PathBuf::from);

    println!("Reading: {}", path.display());
    let raw = fs::read(&path).expect("failed to read map file");
    println!("  File size: {} bytes", raw.len());

    let header = match MapHeader::from_bytes(&raw[..raw.len().min(HEADER_SIZE)]) {
        Ok(header) => header,
        Err(e) => panic!("invalid header: {e}"),
    };

    println!("  Version:             {}", header.version);
    println!("  Entries:             {}", header.entry_count);
    println!("  Segments:            {}", header.segment_count);
    println!("  Entry size:          {}", header.entry_size);
    println!("  Entries per segment: {}", header.entries_per_segment);
    println!("  Buckets per segment: {}", header.buckets_per_segment);
    println!("  Entry stride:        {}", header.entry_stride);
    println!("  Segment stride:      {}", header.segment_stride);
    println!("  Key type:            {}", header.key_type_name());
    println!("  Value type:          {}", header.value_type_name());

    let layout = MapLayout::compute(header.entry_count, header.segment_count, header.entry_size)
        .expect("header describes an invalid layout");
    if layout.total_size != raw.len() {
        println!(
            "  WARNING: file is {} bytes, layout needs {}",
            raw.len(),
            layout.total_size
        );
        return;
    }

    println!("\n  Segment  Entries  Lock");
    let mut total = 0u64;
    for segment in 0..layout.segments as usize {
        let base = layout.segment_offset(segment);
        let word = |at: usize, width: usize| {
            let mut buf = [0u8; 8];
            buf[..width].copy_from_slice(&raw[base + at..base + at + width]);
            u64::from_le_bytes(buf)
        };
        let lock = word(SEGMENT_LOCK_OFFSET, 8);
        let count = word(SEGMENT_COUNT_OFFSET, 4);
        total += count;
        let lock = if lock == 0 {
            "free".to_string()
        } else {
            format!("held by pid {}", lock >> 32)
        };
        println!("  {segment:>7}  {count:>7}  {lock}");
    }
    println!("\n  Total entries: {total}");
}
