//! Archive format detection.
//!
//! Archives are identified by their leading bytes:
//!
//! - **Version 3**: `"PMTiles"` followed by a version byte
//! - **Legacy v1/v2**: the two-byte marker `0x4D50` followed by a u16 version
//!
//! Anything else is not an archive.

use crate::error::{FormatError, IoError};
use crate::io::{read_u16_le, RangeReader};

use super::header::{LEGACY_MAGIC, MAGIC};

/// Bytes needed to tell the layouts apart.
const DETECT_BYTES: usize = 8;

/// Detected archive layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Current layout with a version byte (3 for archives this crate reads).
    V3 { version: u8 },

    /// Legacy fixed-width layout.
    Legacy { version: u16 },
}

impl ArchiveFormat {
    /// Get a human-readable name for the format.
    pub fn name(&self) -> String {
        match self {
            ArchiveFormat::V3 { version } => format!("PMTiles v{version}"),
            ArchiveFormat::Legacy { version } => format!("PMTiles v{version} (legacy)"),
        }
    }
}

/// Classify the first bytes of a resource.
pub fn detect_format_bytes(bytes: &[u8]) -> Result<ArchiveFormat, FormatError> {
    if bytes.len() >= DETECT_BYTES && &bytes[..MAGIC.len()] == MAGIC {
        return Ok(ArchiveFormat::V3 { version: bytes[7] });
    }
    if bytes.len() >= 4 && read_u16_le(bytes) == LEGACY_MAGIC {
        return Ok(ArchiveFormat::Legacy {
            version: read_u16_le(&bytes[2..]),
        });
    }
    Err(FormatError::InvalidMagic)
}

/// Read the leading bytes of `reader` and classify them.
pub async fn detect_format<R: RangeReader + ?Sized>(
    reader: &R,
) -> Result<ArchiveFormat, DetectError> {
    let resp = reader.read_range(0, DETECT_BYTES).await?;
    Ok(detect_format_bytes(&resp.data)?)
}

/// Failure while detecting a format.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DetectError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}
