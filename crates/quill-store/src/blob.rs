use std::io::Cursor;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use quill_types::BlobKey;

use crate::error::{StoreError, StoreResult};

/// Byte stream handed to and returned from a [`BlobStore`](crate::BlobStore).
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Wrap an in-memory buffer as a [`ByteReader`].
pub fn reader_from_bytes(bytes: Bytes) -> ByteReader {
    Box::pin(Cursor::new(bytes))
}

/// Drain a stream that is declared to hold exactly `declared` bytes.
///
/// Reads at most one byte past the declaration, so an oversized stream is
/// rejected without being buffered in full.
pub async fn read_exact_size(reader: ByteReader, declared: u64) -> StoreResult<Bytes> {
    let capacity = usize::try_from(declared).unwrap_or(usize::MAX).min(1 << 20);
    let mut buf = Vec::with_capacity(capacity);
    reader.take(declared.saturating_add(1)).read_to_end(&mut buf).await?;
    let actual = buf.len() as u64;
    if actual != declared {
        return Err(StoreError::SizeMismatch { declared, actual });
    }
    Ok(Bytes::from(buf))
}

/// Drain a stream of unknown length.
pub async fn read_all(mut reader: ByteReader) -> StoreResult<Bytes> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Hex-encoded BLAKE3 digest used as an object checksum.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Stat information for a stored object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub key: BlobKey,
    pub size: u64,
    pub content_type: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl BlobMeta {
    pub fn describe(key: &BlobKey, bytes: &[u8], content_type: &str) -> Self {
        Self {
            key: key.clone(),
            size: bytes.len() as u64,
            content_type: content_type.to_string(),
            checksum: checksum(bytes),
            created_at: Utc::now(),
        }
    }
}

/// A pre-authorized, expiring download link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}
