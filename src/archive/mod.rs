//! Archive access.
//!
//! This module turns byte-range reads into tile lookups:
//!
//! - [`SharedCache`]: headers and directories shared between callers, with
//!   one fetch per key no matter how many callers ask concurrently
//! - [`Archive`]: tile, metadata and TileJSON access for v3 archives
//! - [`LegacyArchive`]: tile and metadata access for v1/v2 archives
//!
//! # Lookup
//!
//! ```text
//! get_tile(z, x, y)
//!   -> tile id
//!   -> header            (cache)
//!   -> root directory    (cache, usually prefetched with the header)
//!   -> leaf directory... (cache, one per pointer followed)
//!   -> TileRange { tile_data_offset + entry.offset, entry.length }
//! ```

mod cache;
mod legacy;
mod reader;

pub use cache::{SharedCache, HEADER_PREFETCH_BYTES};
pub use legacy::LegacyArchive;
pub use reader::{Archive, TileData, TileJson, TileRange};
