use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Bytes returned by a range read, with the store's version of the resource.
#[derive(Debug, Clone)]
pub struct RangeResponse {
    /// The bytes read. At most the requested length; fewer only when the
    /// range runs past the end of the resource.
    pub data: Bytes,

    /// Opaque resource version (an HTTP ETag, a file modification stamp),
    /// if the store reports one.
    pub version: Option<String>,
}

impl RangeResponse {
    pub fn new(data: Bytes, version: Option<String>) -> Self {
        Self { data, version }
    }
}

/// Trait for reading byte ranges from a backing store.
///
/// This abstraction lets the archive reader work against local files, object
/// storage, or memory without downloading whole archives. Implementations
/// must be thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only when the range crosses the end of the
    /// resource. Returns an error if `offset` is past the end or the read
    /// fails.
    async fn read_range(&self, offset: u64, len: usize) -> Result<RangeResponse, IoError>;

    /// Get a unique identifier for this resource (for logging and cache keys).
    ///
    /// Two readers with the same identifier share cache entries.
    fn identifier(&self) -> &str;
}

// =============================================================================
// Little-Endian Helper Functions
// =============================================================================
//
// Every multi-byte integer in the archive format is little-endian. The
// legacy layout also packs 24-bit and 48-bit fields.

/// Read a little-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian 24-bit unsigned integer from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 3 bytes.
#[inline]
pub fn read_u24_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

/// Read a little-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian i32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_i32_le(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian 48-bit unsigned integer from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 6 bytes.
#[inline]
pub fn read_u48_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], 0, 0,
    ])
}

/// Read a little-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
