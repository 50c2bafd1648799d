//! Read-only access to v1/v2 archives.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::reader::TileRange;
use crate::error::{ArchiveError, FormatError, IoError};
use crate::format::{LegacyDirectory, LegacyEntry, LegacyHeader, TileCoord, LEGACY_HEADER_REGION};
use crate::io::RangeReader;

/// Read access to a legacy (v1/v2) archive.
///
/// The fixed header region, which holds the metadata and the root directory,
/// is read once at open. Leaf directories are read on demand and not cached.
/// Entry offsets in this layout are absolute.
pub struct LegacyArchive<R> {
    reader: Arc<R>,
    header: LegacyHeader,
    region: Bytes,
    root: LegacyDirectory,
}

impl<R: RangeReader> LegacyArchive<R> {
    pub async fn open(reader: R) -> Result<Self, ArchiveError> {
        Self::open_shared(Arc::new(reader)).await
    }

    pub async fn open_shared(reader: Arc<R>) -> Result<Self, ArchiveError> {
        let region = reader.read_range(0, LEGACY_HEADER_REGION).await?.data;
        let header = LegacyHeader::parse(&region)?;

        let range = header.root_directory_range();
        if range.end > region.len() {
            return Err(FormatError::Truncated {
                what: "legacy root directory",
                required: range.end,
                actual: region.len(),
            }
            .into());
        }
        let root = LegacyDirectory::new(region.slice(range))?;

        debug!(
            source = reader.identifier(),
            version = header.version,
            root_entries = root.len(),
            "Opened legacy archive"
        );

        Ok(Self {
            reader,
            header,
            region,
            root,
        })
    }

    pub fn header(&self) -> &LegacyHeader {
        &self.header
    }

    pub fn root(&self) -> &LegacyDirectory {
        &self.root
    }

    /// Find the byte range of tile `z/x/y`.
    pub async fn get_tile(&self, z: u8, x: u32, y: u32) -> Result<Option<TileRange>, ArchiveError> {
        Ok(self.find_entry(z, x, y).await?.map(|entry| TileRange {
            offset: entry.offset,
            length: entry.length,
        }))
    }

    /// Find and read tile `z/x/y`.
    pub async fn read_tile(&self, z: u8, x: u32, y: u32) -> Result<Option<Bytes>, ArchiveError> {
        let Some(range) = self.get_tile(z, x, y).await? else {
            return Ok(None);
        };
        Ok(Some(self.read_exact(range.offset, range.length).await?))
    }

    /// Decode the metadata JSON stored in the header region.
    pub fn get_metadata(&self) -> Result<serde_json::Value, ArchiveError> {
        let range = self.header.metadata_range();
        let bytes = self.region.get(range).ok_or(FormatError::Truncated {
            what: "legacy metadata",
            required: self.header.metadata_range().end,
            actual: self.region.len(),
        })?;
        serde_json::from_slice(bytes).map_err(|e| FormatError::InvalidMetadata(e.to_string()).into())
    }

    async fn find_entry(&self, z: u8, x: u32, y: u32) -> Result<Option<LegacyEntry>, ArchiveError> {
        if let Some(entry) = self.root.query_tile(z, x, y) {
            return Ok(Some(entry));
        }

        let Some(leaf) = self.root.derive_leaf(TileCoord::new(z, x, y)) else {
            return Ok(None);
        };
        let Some(pointer) = self.root.query_leafdir(leaf.z, leaf.x, leaf.y) else {
            return Ok(None);
        };

        debug!(leaf = %leaf, offset = pointer.offset, "Reading legacy leaf directory");
        let bytes = self.read_exact(pointer.offset, pointer.length).await?;
        let directory = LegacyDirectory::new(bytes)?;
        Ok(directory.query_tile(z, x, y))
    }

    async fn read_exact(&self, offset: u64, length: u32) -> Result<Bytes, ArchiveError> {
        let resp = self.reader.read_range(offset, length as usize).await?;
        if resp.data.len() != length as usize {
            return Err(IoError::UnexpectedLength {
                offset,
                expected: u64::from(length),
                actual: resp.data.len() as u64,
            }
            .into());
        }
        Ok(resp.data)
    }
}
