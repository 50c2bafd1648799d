//! Configuration for the archive reader and its inspection binary.
//!
//! Settings come from command-line arguments via clap, with environment
//! variable fallbacks under the `PMTILES_` prefix:
//!
//! - `PMTILES_CACHE_ENTRIES` - Max cached headers and directories (default: 100)
//! - `PMTILES_PREFETCH_ROOT` - Decode the root directory from the header read (default: true)
//! - `PMTILES_BASE_URL` - Base URL for `tilejson` output
//!
//! [`CacheConfig`] is also the library-side configuration of
//! [`SharedCache`](crate::archive::SharedCache).

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of cached headers and directories.
pub const DEFAULT_CACHE_ENTRIES: usize = 100;

/// Default for decoding the root directory out of the header read.
pub const DEFAULT_PREFETCH_ROOT: bool = true;

// =============================================================================
// Cache Configuration
// =============================================================================

/// Settings for [`SharedCache`](crate::archive::SharedCache).
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached headers and directories.
    #[arg(
        long = "cache-entries",
        default_value_t = DEFAULT_CACHE_ENTRIES,
        env = "PMTILES_CACHE_ENTRIES",
        global = true
    )]
    pub max_entries: usize,

    /// Decode the root directory from the header read when it fits.
    #[arg(
        long,
        default_value_t = DEFAULT_PREFETCH_ROOT,
        env = "PMTILES_PREFETCH_ROOT",
        action = ArgAction::Set,
        global = true
    )]
    pub prefetch_root: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_ENTRIES,
            prefetch_root: DEFAULT_PREFETCH_ROOT,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        // A header plus its root directory must fit together
        if self.max_entries < 2 {
            return Err("cache_entries must be at least 2".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// pmtiles-reader - Inspect PMTiles archives.
///
/// Reads headers, metadata and tiles from local archives using byte-range
/// reads. Output is JSON.
#[derive(Parser, Debug, Clone)]
#[command(name = "pmtiles-reader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub cache: CacheConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false, global = true)]
    pub verbose: bool,
}

/// Archive to read.
#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    /// Path to a PMTiles archive (v3, or legacy v1/v2).
    pub path: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the archive header.
    Header(ArchiveArgs),

    /// Print the archive's JSON metadata.
    Metadata(ArchiveArgs),

    /// Locate a tile and optionally write its payload to a file.
    Tile(TileArgs),

    /// Print a TileJSON document for the archive.
    Tilejson(TileJsonArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TileArgs {
    #[command(flatten)]
    pub archive: ArchiveArgs,

    /// Zoom level.
    pub z: u8,

    /// Column.
    pub x: u32,

    /// Row.
    pub y: u32,

    /// Write the payload (still compressed) to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct TileJsonArgs {
    #[command(flatten)]
    pub archive: ArchiveArgs,

    /// URL the tiles are served under, e.g. `https://example.com/tiles`.
    #[arg(long, env = "PMTILES_BASE_URL")]
    pub base_url: String,
}

impl Cli {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;

        if let Command::Tilejson(args) = &self.command {
            if args.base_url.trim().is_empty() {
                return Err("base_url must not be empty. Set --base-url or PMTILES_BASE_URL".to_string());
            }
        }
        Ok(())
    }

    /// The archive path of whichever command was given.
    pub fn archive_path(&self) -> &PathBuf {
        match &self.command {
            Command::Header(args) | Command::Metadata(args) => &args.path,
            Command::Tile(args) => &args.archive.path,
            Command::Tilejson(args) => &args.archive.path,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
