//! Decompression of internal structures.
//!
//! Directories and metadata are compressed with the header's internal
//! compression. Only identity and gzip are decoded here; other codecs are
//! reported as unsupported so a caller can plug in its own.

use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;

use crate::error::FormatError;

use super::header::Compression;

/// Decompress `data` according to `compression`.
pub fn decompress(data: Bytes, compression: Compression) -> Result<Bytes, FormatError> {
    match compression {
        Compression::None => Ok(data),
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(data.as_ref());
            let mut out = Vec::with_capacity(data.len() * 2);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| FormatError::Decompression(e.to_string()))?;
            Ok(Bytes::from(out))
        }
        other => Err(FormatError::UnsupportedCompression(other)),
    }
}
