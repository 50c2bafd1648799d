//! Legacy (v1/v2) archive structures.
//!
//! Older archives use fixed-width directory records keyed by `(z, x, y)`
//! instead of tile ids. They are read through a separate decoder and search
//! that share only the [`Entry`] shape with the current format.
//!
//! # Layout
//!
//! ```text
//! Bytes 0-1:  Magic 0x4D50 ("PM")
//! Bytes 2-3:  Version (1 or 2)
//! Bytes 4-7:  Metadata length (u32)
//! Bytes 8-9:  Root directory entry count (u16)
//! Bytes 10-:  Metadata JSON, then the root directory
//!
//! Directory record (17 bytes):
//!   0      zoom (high bit set = leaf directory pointer)
//!   1-3    x (u24)
//!   4-6    y (u24)
//!   7-12   offset (u48)
//!   13-16  length (u32)
//! ```
//!
//! Records are sorted by the raw zoom byte, then x, then y, so every leaf
//! pointer sorts after every tile record.

use std::cmp::Ordering;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{FormatError, TileIdError};
use crate::io::{read_u16_le, read_u24_le, read_u32_le, read_u48_le};

use super::directory::Entry;
use super::header::LEGACY_MAGIC;
use super::tile_id::{zxy_to_tile_id, TileCoord};

/// Size of the legacy header region, which always holds the root directory.
pub const LEGACY_HEADER_REGION: usize = 512_000;

/// Size of one directory record.
pub const LEGACY_ENTRY_SIZE: usize = 17;

const LEGACY_FIXED_HEADER: usize = 10;
const LEAF_FLAG: u8 = 0x80;

// =============================================================================
// Header
// =============================================================================

/// Fixed fields of a legacy archive header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyHeader {
    pub version: u16,
    pub metadata_length: u32,
    pub root_entries: u16,
}

impl LegacyHeader {
    /// Parse the fixed header fields.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < LEGACY_FIXED_HEADER {
            return Err(FormatError::Truncated {
                what: "legacy header",
                required: LEGACY_FIXED_HEADER,
                actual: bytes.len(),
            });
        }
        if read_u16_le(bytes) != LEGACY_MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        let version = read_u16_le(&bytes[2..]);
        if !(1..=2).contains(&version) {
            return Err(FormatError::UnsupportedVersion(version.min(255) as u8));
        }
        Ok(Self {
            version,
            metadata_length: read_u32_le(&bytes[4..]),
            root_entries: read_u16_le(&bytes[8..]),
        })
    }

    /// Byte range of the metadata JSON.
    pub fn metadata_range(&self) -> std::ops::Range<usize> {
        LEGACY_FIXED_HEADER..LEGACY_FIXED_HEADER + self.metadata_length as usize
    }

    /// Byte range of the root directory.
    pub fn root_directory_range(&self) -> std::ops::Range<usize> {
        let start = LEGACY_FIXED_HEADER + self.metadata_length as usize;
        start..start + self.root_entries as usize * LEGACY_ENTRY_SIZE
    }
}

// =============================================================================
// Entry
// =============================================================================

/// One fixed-width directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyEntry {
    pub z: u8,
    pub x: u32,
    pub y: u32,
    pub offset: u64,
    pub length: u32,
    pub is_dir: bool,
}

impl LegacyEntry {
    fn parse(record: &[u8]) -> Self {
        let z_raw = record[0];
        Self {
            z: z_raw & !LEAF_FLAG,
            x: read_u24_le(&record[1..]),
            y: read_u24_le(&record[4..]),
            offset: read_u48_le(&record[7..]),
            length: read_u32_le(&record[13..]),
            is_dir: z_raw & LEAF_FLAG != 0,
        }
    }

    /// Convert to the current entry shape: tiles become runs of one,
    /// leaf pointers keep `run_length == 0`.
    pub fn to_entry(&self) -> Result<Entry, TileIdError> {
        Ok(Entry {
            tile_id: zxy_to_tile_id(self.z, self.x, self.y)?,
            offset: self.offset,
            length: self.length,
            run_length: u32::from(!self.is_dir),
        })
    }
}

// =============================================================================
// Directory
// =============================================================================

/// A legacy directory, read in place from its records.
#[derive(Debug, Clone)]
pub struct LegacyDirectory {
    bytes: Bytes,
}

impl LegacyDirectory {
    pub fn new(bytes: Bytes) -> Result<Self, FormatError> {
        if bytes.len() % LEGACY_ENTRY_SIZE != 0 {
            return Err(FormatError::InvalidDirectory(format!(
                "legacy directory length {} is not a multiple of {}",
                bytes.len(),
                LEGACY_ENTRY_SIZE
            )));
        }
        Ok(Self { bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / LEGACY_ENTRY_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Record at position `index`.
    pub fn entry(&self, index: usize) -> Option<LegacyEntry> {
        let start = index.checked_mul(LEGACY_ENTRY_SIZE)?;
        let record = self.bytes.get(start..start + LEGACY_ENTRY_SIZE)?;
        Some(LegacyEntry::parse(record))
    }

    pub fn entries(&self) -> impl Iterator<Item = LegacyEntry> + '_ {
        self.bytes
            .chunks_exact(LEGACY_ENTRY_SIZE)
            .map(LegacyEntry::parse)
    }

    /// Look up a tile record.
    pub fn query_tile(&self, z: u8, x: u32, y: u32) -> Option<LegacyEntry> {
        self.query(z, x, y)
    }

    /// Look up a leaf-directory record rooted at `(z, x, y)`.
    pub fn query_leafdir(&self, z: u8, x: u32, y: u32) -> Option<LegacyEntry> {
        self.query(z | LEAF_FLAG, x, y)
    }

    fn query(&self, z_raw: u8, x: u32, y: u32) -> Option<LegacyEntry> {
        let (mut lo, mut hi) = (0usize, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let record = &self.bytes[mid * LEGACY_ENTRY_SIZE..];
            let key = (record[0], read_u24_le(&record[1..]), read_u24_le(&record[4..]));
            match key.cmp(&(z_raw, x, y)) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Some(LegacyEntry::parse(record)),
            }
        }
        None
    }

    /// The leaf directory a tile would live in.
    ///
    /// Leaf pointers sort last, so if the final record is a pointer its zoom
    /// is the leaf level; the tile's ancestor at that level names the leaf.
    pub fn derive_leaf(&self, tile: TileCoord) -> Option<TileCoord> {
        let last = self.entry(self.len().checked_sub(1)?)?;
        if !last.is_dir || tile.z < last.z {
            return None;
        }
        let diff = u32::from(tile.z - last.z);
        Some(TileCoord::new(last.z, tile.x >> diff, tile.y >> diff))
    }
}
