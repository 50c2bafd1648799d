//! Tile addressing.
//!
//! Every tile `(z, x, y)` maps to a single `u64` tile id. Ids are ordered by
//! zoom level first, so all tiles of zoom `z` sort before any tile of zoom
//! `z + 1`. Within a zoom level tiles follow a Hilbert curve, which keeps
//! spatially close tiles close together in the directory and the tile data.
//!
//! ```text
//! zoom 0:  id 0
//! zoom 1:  ids 1..=4      (0,0)=1  (0,1)=2  (1,1)=3  (1,0)=4
//! zoom 2:  ids 5..=20
//! zoom z:  ids (4^z - 1)/3 ..= (4^(z+1) - 1)/3 - 1
//! ```
//!
//! Zoom is capped at 26, the largest level whose ids stay below 2^53.

use std::fmt;

use crate::error::TileIdError;

/// Highest addressable zoom level.
pub const MAX_ZOOM: u8 = 26;

/// Largest valid tile id (last tile of zoom 26).
pub const MAX_TILE_ID: u64 = tiles_below(MAX_ZOOM + 1) - 1;

/// Number of tiles on all zoom levels strictly below `zoom`.
#[inline]
const fn tiles_below(zoom: u8) -> u64 {
    ((1u64 << (2 * zoom as u32)) - 1) / 3
}

/// Hilbert quadrant rotation for a sub-square of side `n`.
#[inline]
fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n - 1 - *x;
            *y = n - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}

/// Convert a tile coordinate to its tile id.
///
/// # Errors
/// - [`TileIdError::ZoomTooLarge`] if `zoom > 26`
/// - [`TileIdError::OutOfBounds`] if `x` or `y` is `>= 2^zoom`
pub fn zxy_to_tile_id(zoom: u8, x: u32, y: u32) -> Result<u64, TileIdError> {
    if zoom > MAX_ZOOM {
        return Err(TileIdError::ZoomTooLarge { zoom });
    }
    let n = 1u64 << zoom;
    if u64::from(x) >= n || u64::from(y) >= n {
        return Err(TileIdError::OutOfBounds { zoom, x, y });
    }

    let (mut tx, mut ty) = (u64::from(x), u64::from(y));
    let mut d = 0u64;
    let mut s = n >> 1;
    while s > 0 {
        let rx = u64::from((tx & s) > 0);
        let ry = u64::from((ty & s) > 0);
        d += s * s * ((3 * rx) ^ ry);
        // only bits below s matter from here on
        tx &= s - 1;
        ty &= s - 1;
        rotate(s, &mut tx, &mut ty, rx, ry);
        s >>= 1;
    }

    Ok(tiles_below(zoom) + d)
}

/// Convert a tile id back to its `(zoom, x, y)` coordinate.
///
/// # Errors
/// [`TileIdError::IdTooLarge`] if the id lies beyond zoom 26.
pub fn tile_id_to_zxy(tile_id: u64) -> Result<(u8, u32, u32), TileIdError> {
    if tile_id > MAX_TILE_ID {
        return Err(TileIdError::IdTooLarge(tile_id));
    }

    let mut acc = 0u64;
    for zoom in 0..=MAX_ZOOM {
        let num_tiles = 1u64 << (2 * u32::from(zoom));
        if acc + num_tiles > tile_id {
            let (x, y) = position_on_level(zoom, tile_id - acc);
            return Ok((zoom, x, y));
        }
        acc += num_tiles;
    }

    Err(TileIdError::IdTooLarge(tile_id))
}

/// Invert the Hilbert rank `pos` on a level with side `2^zoom`.
fn position_on_level(zoom: u8, pos: u64) -> (u32, u32) {
    let n = 1u64 << zoom;
    let (mut x, mut y) = (0u64, 0u64);
    let mut t = pos;
    let mut s = 1u64;
    while s < n {
        let rx = 1 & (t >> 1);
        let ry = 1 & (t ^ rx);
        rotate(s, &mut x, &mut y, rx, ry);
        x += s * rx;
        y += s * ry;
        t >>= 2;
        s <<= 1;
    }
    // x and y are < 2^26 here
    (x as u32, y as u32)
}

/// A tile coordinate in the XYZ scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Tile id of this coordinate.
    pub fn tile_id(&self) -> Result<u64, TileIdError> {
        zxy_to_tile_id(self.z, self.x, self.y)
    }

    /// Coordinate for a tile id.
    pub fn from_tile_id(tile_id: u64) -> Result<Self, TileIdError> {
        let (z, x, y) = tile_id_to_zxy(tile_id)?;
        Ok(Self { z, x, y })
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
