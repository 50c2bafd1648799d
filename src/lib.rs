//! # pmtiles-reader
//!
//! A read-only reader for PMTiles tile archives.
//!
//! A PMTiles archive is a single file holding a fixed header, run-length
//! compressed directories of tile locations, a JSON metadata blob and the
//! tile payloads. Everything is reached through byte-range reads, so the
//! archive can live on any store that serves ranges.
//!
//! ## Features
//!
//! - **Tile addressing**: `(z, x, y)` to a single Hilbert-ordered tile id and back
//! - **Directory decoding**: column-wise varint directories with leaf directories
//! - **Shared cache**: one fetch per header/directory no matter how many
//!   concurrent callers, resource-version tracking, LRU eviction
//! - **Legacy archives**: lookups in v1/v2 archives
//!
//! ## Architecture
//!
//! - [`io`] - Byte-range store abstraction with in-memory and file stores
//! - [`mod@format`] - Pure decoders: tile ids, varints, directories, header
//! - [`archive`] - Shared cache and archive accessors
//! - [`config`] - CLI and configuration types
//! - [`error`] - Error types per layer
//!
//! ## Example
//!
//! ```rust,no_run
//! use pmtiles_reader::{Archive, FileReader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reader = FileReader::new("world.pmtiles").await?;
//!     let archive = Archive::new(reader);
//!
//!     if let Some(tile) = archive.read_tile(0, 0, 0).await? {
//!         println!("{} bytes, {:?}", tile.data.len(), tile.compression);
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod format;
pub mod io;

// Re-export commonly used types
pub use archive::{
    Archive, LegacyArchive, SharedCache, TileData, TileJson, TileRange, HEADER_PREFETCH_BYTES,
};
pub use config::{CacheConfig, Cli, Command};
pub use error::{ArchiveError, FormatError, IoError, TileIdError};
pub use format::{
    decompress, detect_format, detect_format_bytes, find_tile, tile_id_to_zxy, zxy_to_tile_id,
    ArchiveFormat, ByteCursor, Compression, DetectError, Directory, Entry, Header, LegacyDirectory,
    LegacyEntry, LegacyHeader, TileCoord, TileType, HEADER_SIZE, MAGIC, MAX_TILE_ID,
    MAX_ZOOM, SPEC_VERSION,
};
pub use io::{FileReader, MemoryReader, RangeReader, RangeResponse};
