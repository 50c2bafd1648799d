//! Error types, one enum per layer: store reads, tile ids, format parsing,
//! and archive access. [`ArchiveError`] wraps the others.

use thiserror::Error;

use crate::format::Compression;

/// I/O errors that can occur when reading from a backing store
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Requested range starts past the end of the resource
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// The store returned a different number of bytes than the range requires
    #[error("Unexpected read length at offset {offset}: expected {expected} bytes, got {actual}")]
    UnexpectedLength {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Local file system error
    #[error("File error: {0}")]
    File(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::File(err.to_string()),
        }
    }
}

/// Tile coordinate or tile id outside the addressable domain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileIdError {
    /// Zoom levels above 26 cannot be addressed
    #[error("Zoom level {zoom} exceeds maximum of {max}", max = crate::format::MAX_ZOOM)]
    ZoomTooLarge { zoom: u8 },

    /// x or y does not fit in the zoom level
    #[error("Tile {zoom}/{x}/{y} is outside the bounds of zoom level {zoom}")]
    OutOfBounds { zoom: u8, x: u32, y: u32 },

    /// Tile id decodes to a zoom level above 26
    #[error("Tile id {0} exceeds the maximum addressable tile id")]
    IdTooLarge(u64),
}

/// Errors raised while decoding archive structures
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// The bytes do not start with the archive magic
    #[error("Invalid magic bytes: not a PMTiles archive")]
    InvalidMagic,

    /// The archive uses a format revision this reader does not support
    #[error("Unsupported format version {0}: only version 3 is supported")]
    UnsupportedVersion(u8),

    /// The archive is a legacy (v1/v2) archive
    #[error("Legacy version {version} archive: open it with LegacyArchive")]
    LegacyArchive { version: u16 },

    /// Input ended before a complete structure could be read
    #[error("Truncated {what}: need {required} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        required: usize,
        actual: usize,
    },

    /// A varint ran past 64 bits
    #[error("Varint at byte {position} exceeds 64 bits")]
    VarintTooLong { position: usize },

    /// Directory bytes decoded to an inconsistent entry list
    #[error("Invalid directory: {0}")]
    InvalidDirectory(String),

    /// Directory pointers loop back to a directory already visited
    #[error("Directory cycle at offset {offset} (length {length})")]
    DirectoryCycle { offset: u64, length: u64 },

    /// No codec for this compression type
    #[error("Unsupported compression: {0:?}")]
    UnsupportedCompression(Compression),

    /// The codec rejected the payload
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// Metadata is not valid JSON
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

/// Errors from the archive cache and accessor
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    /// I/O error from the backing store
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Archive structure could not be decoded
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Requested tile is outside the addressable domain
    #[error("Tile id error: {0}")]
    TileId(#[from] TileIdError),

    /// The backing store changed between the header read and a later read
    #[error("Resource version mismatch: expected {expected:?}, got {actual:?}")]
    ResourceVersionMismatch {
        expected: Option<String>,
        actual: Option<String>,
    },

    /// The task performing a shared fetch was dropped before finishing
    #[error("Shared fetch was abandoned before completion")]
    FetchAbandoned,

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ArchiveError {
    /// Whether the same call can succeed if retried.
    ///
    /// Version mismatches need an `invalidate` first; transport failures are
    /// left to the caller's retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArchiveError::ResourceVersionMismatch { .. }
                | ArchiveError::FetchAbandoned
                | ArchiveError::Io(IoError::Connection(_))
        )
    }
}
