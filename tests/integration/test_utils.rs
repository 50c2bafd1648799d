//! Test utilities for integration tests.
//!
//! This module provides a tracking range reader and builders that assemble
//! complete archives in memory, both v3 and legacy v2.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use tokio::sync::RwLock;

use pmtiles_reader::error::IoError;
use pmtiles_reader::io::{MemoryReader, RangeReader, RangeResponse};
use pmtiles_reader::{zxy_to_tile_id, Entry, HEADER_SIZE, MAGIC};

// =============================================================================
// Mock Range Reader with Request Tracking
// =============================================================================

/// A range reader that records every request.
///
/// Clones share the underlying data and the counters, so a test can keep one
/// handle while an archive owns another.
pub struct TrackingMockReader {
    inner: Arc<MemoryReader>,
    request_count: Arc<AtomicUsize>,
    requests: Arc<RwLock<Vec<(u64, usize)>>>,
    fail_next: Arc<AtomicBool>,
    delay: Duration,
}

impl TrackingMockReader {
    pub fn new(data: Vec<u8>, identifier: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MemoryReader::new(identifier, data)),
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(RwLock::new(Vec::new())),
            fail_next: Arc::new(AtomicBool::new(false)),
            delay: Duration::ZERO,
        }
    }

    /// Delay every read, to widen the window for concurrent callers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_version(self, version: &str) -> Self {
        self.inner.set_version(Some(version.to_string()));
        self
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub async fn get_requests(&self) -> Vec<(u64, usize)> {
        self.requests.read().await.clone()
    }

    pub fn reset_tracking(&self) {
        self.request_count.store(0, Ordering::SeqCst);
    }

    /// Make the next read fail with a connection error.
    pub fn fail_next_read(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Swap the served bytes and version, like an object replaced in place.
    pub fn replace(&self, data: Vec<u8>, version: &str) {
        self.inner.replace_data(data);
        self.inner.set_version(Some(version.to_string()));
    }
}

impl Clone for TrackingMockReader {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            request_count: Arc::clone(&self.request_count),
            requests: Arc::clone(&self.requests),
            fail_next: Arc::clone(&self.fail_next),
            delay: self.delay,
        }
    }
}

#[async_trait]
impl RangeReader for TrackingMockReader {
    async fn read_range(&self, offset: u64, len: usize) -> Result<RangeResponse, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.write().await.push((offset, len));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(IoError::Connection("injected failure".to_string()));
        }
        self.inner.read_range(offset, len).await
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

// =============================================================================
// Encoding helpers
// =============================================================================

pub fn tile_id(z: u8, x: u32, y: u32) -> u64 {
    zxy_to_tile_id(z, x, y).unwrap()
}

fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Column-encode directory entries.
pub fn encode_directory(entries: &[Entry]) -> Vec<u8> {
    let mut out = Vec::new();
    push_varint(&mut out, entries.len() as u64);

    let mut last = 0;
    for e in entries {
        push_varint(&mut out, e.tile_id - last);
        last = e.tile_id;
    }
    for e in entries {
        push_varint(&mut out, u64::from(e.run_length));
    }
    for e in entries {
        push_varint(&mut out, u64::from(e.length));
    }
    for (i, e) in entries.iter().enumerate() {
        let contiguous = i > 0 && e.offset == entries[i - 1].offset + u64::from(entries[i - 1].length);
        push_varint(&mut out, if contiguous { 0 } else { e.offset + 1 });
    }
    out
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

// =============================================================================
// v3 Archive Builder
// =============================================================================

/// Assembles a v3 archive: header, root directory, metadata, leaf
/// directories, tile data.
pub struct TestArchive {
    runs: BTreeMap<u64, (u32, Vec<u8>)>,
    metadata: serde_json::Value,
    gzip_internal: bool,
    leaf_size: Option<usize>,
    min_zoom: u8,
    max_zoom: u8,
    tile_type: u8,
    center: (u8, i32, i32),
}

impl Default for TestArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl TestArchive {
    pub fn new() -> Self {
        Self {
            runs: BTreeMap::new(),
            metadata: serde_json::json!({ "name": "test archive" }),
            gzip_internal: false,
            leaf_size: None,
            min_zoom: 0,
            max_zoom: 0,
            tile_type: 1,
            center: (0, 0, 0),
        }
    }

    pub fn tile(self, z: u8, x: u32, y: u32, data: &[u8]) -> Self {
        self.run(tile_id(z, x, y), 1, data)
    }

    /// `run_length` consecutive tile ids sharing one payload.
    pub fn run(mut self, first_id: u64, run_length: u32, data: &[u8]) -> Self {
        self.runs.insert(first_id, (run_length, data.to_vec()));
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn gzip_internal(mut self) -> Self {
        self.gzip_internal = true;
        self
    }

    pub fn leaf_size(mut self, size: usize) -> Self {
        self.leaf_size = Some(size);
        self
    }

    pub fn zoom_range(mut self, min: u8, max: u8) -> Self {
        self.min_zoom = min;
        self.max_zoom = max;
        self
    }

    pub fn tile_type(mut self, tile_type: u8) -> Self {
        self.tile_type = tile_type;
        self
    }

    pub fn center(mut self, zoom: u8, lon: f64, lat: f64) -> Self {
        self.center = (zoom, (lon * 1e7) as i32, (lat * 1e7) as i32);
        self
    }

    fn internal(&self, bytes: &[u8]) -> Vec<u8> {
        if self.gzip_internal {
            gzip(bytes)
        } else {
            bytes.to_vec()
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut tile_data = Vec::new();
        let mut entries = Vec::new();
        let mut addressed = 0u64;
        for (&first, (run_length, data)) in &self.runs {
            entries.push(Entry {
                tile_id: first,
                offset: tile_data.len() as u64,
                length: data.len() as u32,
                run_length: *run_length,
            });
            addressed += u64::from(*run_length);
            tile_data.extend_from_slice(data);
        }

        let mut leaves = Vec::new();
        let root_entries = match self.leaf_size {
            Some(size) => entries
                .chunks(size)
                .map(|chunk| {
                    let leaf = self.internal(&encode_directory(chunk));
                    let pointer = Entry {
                        tile_id: chunk[0].tile_id,
                        offset: leaves.len() as u64,
                        length: leaf.len() as u32,
                        run_length: 0,
                    };
                    leaves.extend_from_slice(&leaf);
                    pointer
                })
                .collect(),
            None => entries.clone(),
        };

        let root = self.internal(&encode_directory(&root_entries));
        let metadata = self.internal(self.metadata.to_string().as_bytes());

        let root_offset = HEADER_SIZE as u64;
        let metadata_offset = root_offset + root.len() as u64;
        let leaf_offset = metadata_offset + metadata.len() as u64;
        let tile_offset = leaf_offset + leaves.len() as u64;

        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(MAGIC);
        out.push(3);
        for value in [
            root_offset,
            root.len() as u64,
            metadata_offset,
            metadata.len() as u64,
            leaf_offset,
            leaves.len() as u64,
            tile_offset,
            tile_data.len() as u64,
            addressed,
            entries.len() as u64,
            entries.len() as u64,
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.push(1);
        out.push(if self.gzip_internal { 2 } else { 1 });
        out.push(1);
        out.push(self.tile_type);
        out.push(self.min_zoom);
        out.push(self.max_zoom);
        for value in [-1_800_000_000i32, -850_511_287, 1_800_000_000, 850_511_287] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.push(self.center.0);
        out.extend_from_slice(&self.center.1.to_le_bytes());
        out.extend_from_slice(&self.center.2.to_le_bytes());
        assert_eq!(out.len(), HEADER_SIZE);

        out.extend_from_slice(&root);
        out.extend_from_slice(&metadata);
        out.extend_from_slice(&leaves);
        out.extend_from_slice(&tile_data);
        out
    }
}

/// A full pyramid from zoom 0 to `max_zoom` where each tile's payload is
/// its `z/x/y` string.
pub fn pyramid(max_zoom: u8) -> TestArchive {
    let mut archive = TestArchive::new().zoom_range(0, max_zoom);
    for z in 0..=max_zoom {
        let n = 1u32 << z;
        for x in 0..n {
            for y in 0..n {
                archive = archive.tile(z, x, y, format!("{z}/{x}/{y}").as_bytes());
            }
        }
    }
    archive
}

// =============================================================================
// Legacy v2 Archive Builder
// =============================================================================

/// One legacy record.
#[derive(Debug, Clone, Copy)]
pub struct LegacyRecord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
    pub offset: u64,
    pub length: u32,
    pub is_dir: bool,
}

/// Encode legacy records, sorted by (raw zoom byte, x, y).
pub fn encode_legacy_directory(records: &[LegacyRecord]) -> Vec<u8> {
    let raw = |r: &LegacyRecord| (r.z | if r.is_dir { 0x80 } else { 0 }, r.x, r.y);
    let mut sorted = records.to_vec();
    sorted.sort_by_key(raw);

    let mut out = Vec::with_capacity(sorted.len() * 17);
    for r in &sorted {
        out.push(raw(r).0);
        out.extend_from_slice(&r.x.to_le_bytes()[..3]);
        out.extend_from_slice(&r.y.to_le_bytes()[..3]);
        out.extend_from_slice(&r.offset.to_le_bytes()[..6]);
        out.extend_from_slice(&r.length.to_le_bytes());
    }
    out
}

/// Assemble a v2 archive: header region with metadata and root, then any
/// extra bytes placed at fixed offsets.
pub fn legacy_archive(
    metadata: &serde_json::Value,
    root: &[LegacyRecord],
    placed: &[(u64, Vec<u8>)],
) -> Vec<u8> {
    let metadata = metadata.to_string();
    let mut out = vec![0x50, 0x4D];
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    out.extend_from_slice(&(root.len() as u16).to_le_bytes());
    out.extend_from_slice(metadata.as_bytes());
    out.extend_from_slice(&encode_legacy_directory(root));

    for (offset, bytes) in placed {
        let start = *offset as usize;
        if out.len() < start + bytes.len() {
            out.resize(start + bytes.len(), 0);
        }
        out[start..start + bytes.len()].copy_from_slice(bytes);
    }
    out
}
