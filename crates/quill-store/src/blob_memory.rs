use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use quill_types::BlobKey;

use crate::blob::{read_exact_size, reader_from_bytes, BlobMeta, ByteReader, PresignedUrl};
use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

/// In-memory object store.
///
/// Objects live in a `BTreeMap` so prefix listings come out ordered by key.
/// Download links are `memory://` URLs signed with a keyed BLAKE3 hash of
/// the bucket, key and expiry; [`InMemoryBlobStore::verify_link`] checks them.
pub struct InMemoryBlobStore {
    bucket: String,
    secret: [u8; 32],
    objects: RwLock<BTreeMap<BlobKey, (Bytes, BlobMeta)>>,
}

impl InMemoryBlobStore {
    /// Create an empty store with a random signing secret.
    pub fn new(bucket: impl Into<String>) -> Self {
        let mut secret = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut secret);
        Self::with_secret(bucket, secret)
    }

    pub fn with_secret(bucket: impl Into<String>, secret: [u8; 32]) -> Self {
        Self {
            bucket: bucket.into(),
            secret,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .map(|m| m.values().map(|(_, meta)| meta.size).sum())
            .unwrap_or(0)
    }

    /// Check a link produced by `presigned_get` at time `now`.
    pub fn verify_link(&self, url: &str, now: DateTime<Utc>) -> bool {
        let Some(rest) = url.strip_prefix(&format!("memory://{}/", self.bucket)) else {
            return false;
        };
        let Some((key, query)) = rest.split_once('?') else {
            return false;
        };
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = Some(v),
                _ => {}
            }
        }
        match (expires, signature) {
            (Some(expires), Some(signature)) => {
                now.timestamp() <= expires && self.sign(key, expires) == signature
            }
            _ => false,
        }
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        let message = format!("{}/{key}:{expires}", self.bucket);
        hex::encode(blake3::keyed_hash(&self.secret, message.as_bytes()).as_bytes())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("bucket", &self.bucket)
            .field("object_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        key: &BlobKey,
        body: ByteReader,
        size: u64,
        content_type: &str,
    ) -> StoreResult<BlobMeta> {
        if key.as_str().is_empty() {
            return Err(StoreError::InvalidKey(String::new()));
        }
        let bytes = read_exact_size(body, size).await?;
        let meta = BlobMeta::describe(key, &bytes, content_type);
        self.objects
            .write()
            .map_err(|_| StoreError::poisoned())?
            .insert(key.clone(), (bytes, meta.clone()));
        Ok(meta)
    }

    async fn get(&self, key: &BlobKey) -> StoreResult<ByteReader> {
        let map = self.objects.read().map_err(|_| StoreError::poisoned())?;
        let (bytes, _) = map
            .get(key)
            .ok_or_else(|| StoreError::NotFound(format!("blob {key}")))?;
        Ok(reader_from_bytes(bytes.clone()))
    }

    async fn delete(&self, key: &BlobKey) -> StoreResult<bool> {
        let mut map = self.objects.write().map_err(|_| StoreError::poisoned())?;
        Ok(map.remove(key).is_some())
    }

    async fn stat(&self, key: &BlobKey) -> StoreResult<Option<BlobMeta>> {
        let map = self.objects.read().map_err(|_| StoreError::poisoned())?;
        Ok(map.get(key).map(|(_, meta)| meta.clone()))
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<BlobMeta>> {
        let map = self.objects.read().map_err(|_| StoreError::poisoned())?;
        Ok(map
            .iter()
            .filter(|(key, _)| key.as_str().starts_with(prefix))
            .map(|(_, (_, meta))| meta.clone())
            .collect())
    }

    async fn presigned_get(&self, key: &BlobKey, ttl: Duration) -> StoreResult<Option<PresignedUrl>> {
        if !self.exists(key).await? {
            return Err(StoreError::NotFound(format!("blob {key}")));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Backend(format!("invalid ttl: {e}")))?;
        let expires_at = Utc::now() + ttl;
        let expires = expires_at.timestamp();
        let url = format!(
            "memory://{}/{key}?expires={expires}&signature={}",
            self.bucket,
            self.sign(key.as_str(), expires)
        );
        Ok(Some(PresignedUrl { url, expires_at }))
    }
}
