use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{RangeReader, RangeResponse};
use crate::error::IoError;

/// Local file implementation of RangeReader.
///
/// The file is reopened for every read so a file replaced on disk is picked
/// up. The resource version is derived from the file's length and
/// modification time.
#[derive(Debug, Clone)]
pub struct FileReader {
    path: PathBuf,
    identifier: String,
}

impl FileReader {
    /// Create a reader for `path`.
    ///
    /// Returns an error if the file does not exist or is not a regular file.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(IoError::NotFound(format!("{} is not a file", path.display())));
        }
        let identifier = format!("file://{}", path.display());
        Ok(Self { path, identifier })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn version_of(metadata: &std::fs::Metadata) -> Option<String> {
    let modified = metadata.modified().ok()?;
    let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();
    Some(format!("{:x}-{:x}", metadata.len(), nanos))
}

#[async_trait]
impl RangeReader for FileReader {
    async fn read_range(&self, offset: u64, len: usize) -> Result<RangeResponse, IoError> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let metadata = file.metadata().await?;
        let size = metadata.len();

        if offset > size || (offset == size && len > 0) {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }

        let to_read = std::cmp::min(len as u64, size - offset) as usize;
        let mut buf = vec![0u8; to_read];
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;

        Ok(RangeResponse::new(Bytes::from(buf), version_of(&metadata)))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
