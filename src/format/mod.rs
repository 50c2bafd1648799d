//! Archive format decoding.
//!
//! Everything in this module is pure: functions take byte slices and return
//! parsed structures, with no I/O. The [`crate::archive`] layer decides which
//! bytes to fetch and feeds them here.
//!
//! # Layout of a v3 archive
//!
//! ```text
//! +--------+----------------+----------+-----------------+-----------+
//! | Header | Root directory | Metadata | Leaf directories | Tile data |
//! | 127 B  |                |  (JSON)  |                 |           |
//! +--------+----------------+----------+-----------------+-----------+
//! ```
//!
//! Tiles are addressed by a single id along a Hilbert curve per zoom level
//! ([`tile_id`]). Directories map id ranges to byte ranges and may point to
//! leaf directories ([`directory`]).

pub mod compression;
pub mod detect;
pub mod directory;
pub mod header;
pub mod legacy;
pub mod tile_id;
pub mod varint;

pub use compression::decompress;
pub use detect::{detect_format, detect_format_bytes, ArchiveFormat, DetectError};
pub use directory::{find_tile, Directory, Entry};
pub use header::{Compression, Header, TileType, HEADER_SIZE, MAGIC, SPEC_VERSION};
pub use legacy::{LegacyDirectory, LegacyEntry, LegacyHeader, LEGACY_HEADER_REGION};
pub use tile_id::{tile_id_to_zxy, zxy_to_tile_id, TileCoord, MAX_TILE_ID, MAX_ZOOM};
pub use varint::ByteCursor;
