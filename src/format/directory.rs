//! Directory decoding and tile search.
//!
//! A directory maps tile-id ranges to byte ranges. On the wire the entries
//! are stored column by column, each value a varint:
//!
//! ```text
//! ┌─────────┬──────────────────┬─────────────┬──────────┬──────────────┐
//! │ count   │ tile id deltas   │ run lengths │ lengths  │ offsets      │
//! │ 1 value │ count values     │ count values│ count    │ count values │
//! └─────────┴──────────────────┴─────────────┴──────────┴──────────────┘
//! ```
//!
//! Tile ids are stored as the difference from the previous entry. An offset
//! of `0` means "directly after the previous entry"; any other value `v`
//! is the absolute offset `v - 1`.
//!
//! An entry with `run_length == 0` points at a leaf directory instead of a
//! tile. Its `offset` is then relative to the header's leaf-directory section.

use crate::error::FormatError;

use super::varint::ByteCursor;

// =============================================================================
// Entry
// =============================================================================

/// One directory entry.
///
/// With `run_length > 0` the entry covers tile ids
/// `tile_id..tile_id + run_length`, all sharing the same payload bytes.
/// With `run_length == 0` it is a pointer to a leaf directory covering
/// `tile_id` and everything after it up to the next entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

impl Entry {
    /// Whether this entry points at a leaf directory.
    #[inline]
    pub fn is_leaf_pointer(&self) -> bool {
        self.run_length == 0
    }

    /// Whether `tile_id` falls inside this entry's coverage, assuming this is
    /// the closest entry at or before it.
    #[inline]
    fn covers(&self, tile_id: u64) -> bool {
        self.is_leaf_pointer() || tile_id - self.tile_id < u64::from(self.run_length)
    }
}

// =============================================================================
// Directory
// =============================================================================

/// A decoded directory: entries in strictly increasing tile-id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<Entry>,
}

impl Directory {
    /// Build a directory from already sorted entries.
    ///
    /// Returns an error if the tile ids are not strictly increasing.
    pub fn from_entries(entries: Vec<Entry>) -> Result<Self, FormatError> {
        if let Some(pair) = entries.windows(2).find(|w| w[1].tile_id <= w[0].tile_id) {
            return Err(FormatError::InvalidDirectory(format!(
                "tile ids not increasing: {} then {}",
                pair[0].tile_id, pair[1].tile_id
            )));
        }
        Ok(Self { entries })
    }

    /// Decode a directory from its (already decompressed) bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut cursor = ByteCursor::new(bytes);
        let count = cursor.read_varint()?;

        // every entry needs at least four bytes, one per column
        if count.saturating_mul(4) > cursor.remaining() as u64 {
            return Err(FormatError::Truncated {
                what: "directory",
                required: count.saturating_mul(4) as usize,
                actual: cursor.remaining(),
            });
        }
        let count = count as usize;
        let mut entries = Vec::with_capacity(count);

        let mut last_id = 0u64;
        for i in 0..count {
            let delta = cursor.read_varint()?;
            if i > 0 && delta == 0 {
                return Err(FormatError::InvalidDirectory(format!(
                    "duplicate tile id {last_id} at entry {i}"
                )));
            }
            last_id = last_id
                .checked_add(delta)
                .ok_or_else(|| FormatError::InvalidDirectory("tile id overflow".into()))?;
            entries.push(Entry {
                tile_id: last_id,
                offset: 0,
                length: 0,
                run_length: 0,
            });
        }

        for entry in entries.iter_mut() {
            entry.run_length = read_u32(&mut cursor, "run length")?;
        }

        for entry in entries.iter_mut() {
            entry.length = read_u32(&mut cursor, "length")?;
        }

        for i in 0..count {
            let value = cursor.read_varint()?;
            let offset = match (value, i) {
                (0, 0) => {
                    return Err(FormatError::InvalidDirectory(
                        "first entry has a relative offset".into(),
                    ))
                }
                (0, _) => {
                    let prev = &entries[i - 1];
                    prev.offset
                        .checked_add(u64::from(prev.length))
                        .ok_or_else(|| FormatError::InvalidDirectory("offset overflow".into()))?
                }
                (v, _) => v - 1,
            };
            entries[i].offset = offset;
        }

        Ok(Self { entries })
    }

    /// Find the entry covering `tile_id`.
    pub fn find_tile(&self, tile_id: u64) -> Option<&Entry> {
        find_tile(&self.entries, tile_id)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_u32(cursor: &mut ByteCursor<'_>, field: &str) -> Result<u32, FormatError> {
    let value = cursor.read_varint()?;
    u32::try_from(value)
        .map_err(|_| FormatError::InvalidDirectory(format!("{field} {value} exceeds u32")))
}

// =============================================================================
// Search
// =============================================================================

/// Binary search for the entry covering `tile_id`.
///
/// An exact match is returned directly. Otherwise the entry with the largest
/// `tile_id` below the query is considered: it matches if it is a leaf
/// pointer, or if the query falls inside its run.
pub fn find_tile(entries: &[Entry], tile_id: u64) -> Option<&Entry> {
    match entries.binary_search_by_key(&tile_id, |e| e.tile_id) {
        Ok(idx) => Some(&entries[idx]),
        Err(0) => None,
        Err(idx) => {
            let candidate = &entries[idx - 1];
            candidate.covers(tile_id).then_some(candidate)
        }
    }
}
