//! v3 archive access through a [`SharedCache`].
//!
//! [`Archive`] resolves a `(z, x, y)` coordinate by walking from the root
//! directory through leaf pointers until it finds the covering entry or runs
//! out of directories. A read that fails with
//! [`ArchiveError::ResourceVersionMismatch`] invalidates the source and is
//! retried once against the replaced archive.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use super::cache::SharedCache;
use crate::error::{ArchiveError, FormatError, IoError};
use crate::format::{decompress, zxy_to_tile_id, Compression, Header, TileType};
use crate::io::{RangeReader, RangeResponse};

/// Absolute byte range of a tile payload within the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub offset: u64,
    pub length: u32,
}

/// A tile payload as stored, still compressed with `compression`.
#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    pub data: Bytes,
    pub compression: Compression,
    pub tile_type: TileType,
}

/// TileJSON 3.0.0 description of an archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileJson {
    pub tilejson: &'static str,
    pub scheme: &'static str,
    pub tiles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_layers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<serde_json::Value>,
    pub bounds: [f64; 4],
    pub center: [f64; 3],
    pub minzoom: u8,
    pub maxzoom: u8,
}

/// Read access to one archive through a (possibly shared) cache.
///
/// Headers and directories go through the [`SharedCache`]; metadata and
/// tile payloads are read directly from the store on every call.
///
/// When the store reports that the archive changed since its header was
/// read, lookups invalidate the source once and start over from a fresh
/// header.
pub struct Archive<R> {
    reader: Arc<R>,
    cache: Arc<SharedCache>,
}

impl<R> Clone for Archive<R> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<R: RangeReader> Archive<R> {
    /// Open `reader` with a private cache.
    pub fn new(reader: R) -> Self {
        Self::with_cache(Arc::new(reader), Arc::new(SharedCache::new()))
    }

    /// Open `reader` through `cache`, which may serve other archives too.
    pub fn with_cache(reader: Arc<R>, cache: Arc<SharedCache>) -> Self {
        Self { reader, cache }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    pub async fn get_header(&self) -> Result<Arc<Header>, ArchiveError> {
        self.cache.get_header(self.reader.as_ref()).await
    }

    /// Find the byte range of tile `z/x/y`.
    ///
    /// Returns `Ok(None)` if the archive has no such tile, including any zoom
    /// outside the archive's zoom range.
    pub async fn get_tile(&self, z: u8, x: u32, y: u32) -> Result<Option<TileRange>, ArchiveError> {
        let tile_id = zxy_to_tile_id(z, x, y)?;
        self.with_retry(|| self.locate(z, tile_id)).await
    }

    /// Find and read tile `z/x/y`.
    ///
    /// The payload is returned as stored; decompressing it with the
    /// reported [`Compression`] is up to the caller.
    pub async fn read_tile(&self, z: u8, x: u32, y: u32) -> Result<Option<TileData>, ArchiveError> {
        let tile_id = zxy_to_tile_id(z, x, y)?;
        self.with_retry(|| self.fetch_tile(z, tile_id)).await
    }

    /// Read and decode the JSON metadata.
    pub async fn get_metadata(&self) -> Result<serde_json::Value, ArchiveError> {
        self.with_retry(|| self.fetch_metadata()).await
    }

    /// Build a TileJSON document whose tile URLs live under `base_url`.
    pub async fn tile_json(&self, base_url: &str) -> Result<TileJson, ArchiveError> {
        let base = Url::parse(base_url)
            .map_err(|e| ArchiveError::InvalidArgument(format!("invalid base URL {base_url}: {e}")))?;
        let base = base.as_str().trim_end_matches('/');

        let header = self.get_header().await?;
        let metadata = self.get_metadata().await?;
        let field = |name: &str| metadata.get(name).cloned();

        let template = match header.tile_type {
            TileType::Unknown => format!("{base}/{{z}}/{{x}}/{{y}}"),
            other => format!("{base}/{{z}}/{{x}}/{{y}}.{}", other.extension()),
        };

        Ok(TileJson {
            tilejson: "3.0.0",
            scheme: "xyz",
            tiles: vec![template],
            vector_layers: field("vector_layers"),
            attribution: field("attribution"),
            description: field("description"),
            name: field("name"),
            version: field("version"),
            bounds: header.bounds(),
            center: header.center(),
            minzoom: header.min_zoom,
            maxzoom: header.max_zoom,
        })
    }

    /// Run `op`, and run it once more after invalidating the source if the
    /// archive changed underneath it.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, ArchiveError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ArchiveError>>,
    {
        match op().await {
            Err(ArchiveError::ResourceVersionMismatch { expected, actual }) => {
                warn!(
                    source = self.reader.identifier(),
                    expected = ?expected,
                    actual = ?actual,
                    "Archive changed, retrying with a fresh header"
                );
                self.cache
                    .invalidate(self.reader.as_ref(), expected.as_deref());
                op().await
            }
            other => other,
        }
    }

    async fn locate(&self, z: u8, tile_id: u64) -> Result<Option<TileRange>, ArchiveError> {
        let header = self.get_header().await?;
        if !header.contains_zoom(z) {
            return Ok(None);
        }

        let mut offset = header.root_directory_offset;
        let mut length = header.root_directory_length;
        let mut visited = HashSet::new();

        loop {
            if !visited.insert((offset, length)) {
                return Err(FormatError::DirectoryCycle { offset, length }.into());
            }

            let directory = self
                .cache
                .get_directory(self.reader.as_ref(), offset, length, &header)
                .await?;
            let Some(entry) = directory.find_tile(tile_id) else {
                return Ok(None);
            };

            if entry.is_leaf_pointer() {
                offset = header
                    .leaf_directory_offset
                    .checked_add(entry.offset)
                    .ok_or_else(|| overflow("leaf directory offset"))?;
                length = u64::from(entry.length);
                debug!(tile_id, offset, length, "Descending into leaf directory");
                continue;
            }

            let offset = header
                .tile_data_offset
                .checked_add(entry.offset)
                .ok_or_else(|| overflow("tile offset"))?;
            return Ok(Some(TileRange {
                offset,
                length: entry.length,
            }));
        }
    }

    async fn fetch_tile(&self, z: u8, tile_id: u64) -> Result<Option<TileData>, ArchiveError> {
        let Some(range) = self.locate(z, tile_id).await? else {
            return Ok(None);
        };
        let header = self.get_header().await?;
        let resp = self
            .read_checked(&header, range.offset, u64::from(range.length))
            .await?;

        Ok(Some(TileData {
            data: resp.data,
            compression: header.tile_compression,
            tile_type: header.tile_type,
        }))
    }

    async fn fetch_metadata(&self) -> Result<serde_json::Value, ArchiveError> {
        let header = self.get_header().await?;
        let resp = self
            .read_checked(&header, header.json_metadata_offset, header.json_metadata_length)
            .await?;
        let bytes = decompress(resp.data, header.internal_compression)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FormatError::InvalidMetadata(e.to_string()).into())
    }

    /// Read exactly `length` bytes and check the store's version against the
    /// header's.
    async fn read_checked(
        &self,
        header: &Header,
        offset: u64,
        length: u64,
    ) -> Result<RangeResponse, ArchiveError> {
        let len = usize::try_from(length)
            .map_err(|_| ArchiveError::InvalidArgument(format!("length {length} exceeds usize")))?;
        let resp = self.reader.read_range(offset, len).await?;

        // version before length: a replaced archive changes both
        if let (Some(expected), Some(actual)) = (&header.etag, &resp.version) {
            if expected != actual {
                return Err(ArchiveError::ResourceVersionMismatch {
                    expected: header.etag.clone(),
                    actual: resp.version,
                });
            }
        }

        if resp.data.len() != len {
            return Err(IoError::UnexpectedLength {
                offset,
                expected: length,
                actual: resp.data.len() as u64,
            }
            .into());
        }
        Ok(resp)
    }
}

fn overflow(what: &str) -> ArchiveError {
    FormatError::InvalidDirectory(format!("{what} overflows u64")).into()
}
