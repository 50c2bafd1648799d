use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{RangeReader, RangeResponse};
use crate::error::IoError;

/// In-memory implementation of RangeReader.
///
/// The contents and the reported version can be swapped at runtime, which
/// models an object being replaced in place on a remote store.
pub struct MemoryReader {
    identifier: String,
    state: RwLock<MemoryState>,
}

struct MemoryState {
    data: Bytes,
    version: Option<String>,
}

impl MemoryReader {
    pub fn new(identifier: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            identifier: identifier.into(),
            state: RwLock::new(MemoryState {
                data: data.into(),
                version: None,
            }),
        }
    }

    /// Set the initial resource version.
    pub fn with_version(self, version: impl Into<String>) -> Self {
        self.set_version(Some(version.into()));
        self
    }

    /// Change the version reported by subsequent reads.
    pub fn set_version(&self, version: Option<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.version = version;
    }

    /// Replace the contents served by subsequent reads.
    pub fn replace_data(&self, data: impl Into<Bytes>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.data = data.into();
    }

    /// Total size of the current contents.
    pub fn size(&self) -> u64 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.data.len() as u64
    }
}

#[async_trait]
impl RangeReader for MemoryReader {
    async fn read_range(&self, offset: u64, len: usize) -> Result<RangeResponse, IoError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let size = state.data.len() as u64;

        if offset > size || (offset == size && len > 0) {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }

        let start = offset as usize;
        let end = std::cmp::min(start + len, state.data.len());
        Ok(RangeResponse::new(
            state.data.slice(start..end),
            state.version.clone(),
        ))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
