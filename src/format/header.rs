//! Archive header parsing.
//!
//! # Header Structure (127 bytes, little-endian)
//!
//! ```text
//! Bytes   0-6:   Magic "PMTiles"
//! Byte    7:     Format version (3)
//! Bytes   8-71:  Root dir, metadata, leaf dirs, tile data (offset u64, length u64 each)
//! Bytes  72-95:  Addressed tiles, tile entries, tile contents (u64 each)
//! Byte   96:     Clustered flag
//! Bytes  97-98:  Internal compression, tile compression
//! Byte   99:     Tile type
//! Bytes 100-101: Min zoom, max zoom
//! Bytes 102-117: Min lon, min lat, max lon, max lat (i32, degrees * 10^7)
//! Byte  118:     Center zoom
//! Bytes 119-126: Center lon, center lat (i32, degrees * 10^7)
//! ```

use serde::Serialize;

use crate::error::FormatError;
use crate::io::{read_i32_le, read_u16_le, read_u64_le};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes at the start of every v3 archive.
pub const MAGIC: &[u8; 7] = b"PMTiles";

/// Marker shared by the legacy v1/v2 layout ("PM" as little-endian u16).
pub const LEGACY_MAGIC: u16 = 0x4D50;

/// The only format version this reader decodes.
pub const SPEC_VERSION: u8 = 3;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 127;

/// Fixed-point scale of the geographic bounds.
const COORD_SCALE: f64 = 10_000_000.0;

// =============================================================================
// Compression
// =============================================================================

/// Compression applied to internal structures or tile payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Unknown,
    None,
    Gzip,
    Brotli,
    Zstd,
}

impl Compression {
    /// Map the header byte to a compression type.
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => Compression::None,
            2 => Compression::Gzip,
            3 => Compression::Brotli,
            4 => Compression::Zstd,
            _ => Compression::Unknown,
        }
    }

    /// HTTP `Content-Encoding` value, if any.
    pub const fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Compression::Gzip => Some("gzip"),
            Compression::Brotli => Some("br"),
            Compression::Zstd => Some("zstd"),
            Compression::Unknown | Compression::None => None,
        }
    }
}

// =============================================================================
// TileType
// =============================================================================

/// Content type of the tile payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileType {
    Unknown,
    Mvt,
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl TileType {
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => TileType::Mvt,
            2 => TileType::Png,
            3 => TileType::Jpeg,
            4 => TileType::Webp,
            5 => TileType::Avif,
            _ => TileType::Unknown,
        }
    }

    /// MIME type for serving tiles of this type.
    pub const fn mime_type(&self) -> &'static str {
        match self {
            TileType::Mvt => "application/x-protobuf",
            TileType::Png => "image/png",
            TileType::Jpeg => "image/jpeg",
            TileType::Webp => "image/webp",
            TileType::Avif => "image/avif",
            TileType::Unknown => "application/octet-stream",
        }
    }

    /// File extension used in tile URLs, without the dot.
    pub const fn extension(&self) -> &'static str {
        match self {
            TileType::Mvt => "mvt",
            TileType::Png => "png",
            TileType::Jpeg => "jpg",
            TileType::Webp => "webp",
            TileType::Avif => "avif",
            TileType::Unknown => "bin",
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// Parsed archive header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub spec_version: u8,
    pub root_directory_offset: u64,
    pub root_directory_length: u64,
    pub json_metadata_offset: u64,
    pub json_metadata_length: u64,
    pub leaf_directory_offset: u64,
    pub leaf_directory_length: u64,
    pub tile_data_offset: u64,
    pub tile_data_length: u64,
    pub num_addressed_tiles: u64,
    pub num_tile_entries: u64,
    pub num_tile_contents: u64,
    pub clustered: bool,
    pub internal_compression: Compression,
    pub tile_compression: Compression,
    pub tile_type: TileType,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub center_zoom: u8,
    pub center_lon: f64,
    pub center_lat: f64,
    /// Resource version reported by the store when the header was read.
    pub etag: Option<String>,
}

impl Header {
    /// Parse a header from the first bytes of an archive.
    ///
    /// Only the first [`HEADER_SIZE`] bytes are read; anything after them
    /// (typically the root directory) is ignored.
    ///
    /// # Errors
    /// - [`FormatError::LegacyArchive`] for v1/v2 archives
    /// - [`FormatError::InvalidMagic`] if the bytes are not an archive
    /// - [`FormatError::UnsupportedVersion`] for any version other than 3
    /// - [`FormatError::Truncated`] if fewer than 127 bytes are supplied
    pub fn parse(bytes: &[u8], etag: Option<String>) -> Result<Self, FormatError> {
        if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
            if bytes.len() >= 4 && read_u16_le(bytes) == LEGACY_MAGIC {
                return Err(FormatError::LegacyArchive {
                    version: read_u16_le(&bytes[2..]),
                });
            }
            return Err(FormatError::InvalidMagic);
        }

        let version = *bytes.get(7).ok_or(FormatError::Truncated {
            what: "header",
            required: HEADER_SIZE,
            actual: bytes.len(),
        })?;
        if version != SPEC_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                what: "header",
                required: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let coord = |at: usize| f64::from(read_i32_le(&bytes[at..])) / COORD_SCALE;

        Ok(Self {
            spec_version: version,
            root_directory_offset: read_u64_le(&bytes[8..]),
            root_directory_length: read_u64_le(&bytes[16..]),
            json_metadata_offset: read_u64_le(&bytes[24..]),
            json_metadata_length: read_u64_le(&bytes[32..]),
            leaf_directory_offset: read_u64_le(&bytes[40..]),
            leaf_directory_length: read_u64_le(&bytes[48..]),
            tile_data_offset: read_u64_le(&bytes[56..]),
            tile_data_length: read_u64_le(&bytes[64..]),
            num_addressed_tiles: read_u64_le(&bytes[72..]),
            num_tile_entries: read_u64_le(&bytes[80..]),
            num_tile_contents: read_u64_le(&bytes[88..]),
            clustered: bytes[96] == 1,
            internal_compression: Compression::from_byte(bytes[97]),
            tile_compression: Compression::from_byte(bytes[98]),
            tile_type: TileType::from_byte(bytes[99]),
            min_zoom: bytes[100],
            max_zoom: bytes[101],
            min_lon: coord(102),
            min_lat: coord(106),
            max_lon: coord(110),
            max_lat: coord(114),
            center_zoom: bytes[118],
            center_lon: coord(119),
            center_lat: coord(123),
            etag,
        })
    }

    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub fn bounds(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    /// `[lon, lat, zoom]`
    pub fn center(&self) -> [f64; 3] {
        [self.center_lon, self.center_lat, f64::from(self.center_zoom)]
    }

    /// Whether `zoom` lies inside the archive's zoom range.
    pub fn contains_zoom(&self, zoom: u8) -> bool {
        (self.min_zoom..=self.max_zoom).contains(&zoom)
    }

    /// Whether the root directory lies entirely within the first `len` bytes.
    pub fn root_directory_within(&self, len: usize) -> bool {
        self.root_directory_offset
            .checked_add(self.root_directory_length)
            .is_some_and(|end| end <= len as u64)
    }
}
