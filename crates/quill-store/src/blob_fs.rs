use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use quill_types::BlobKey;

use crate::blob::{read_exact_size, BlobMeta, ByteReader};
use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = "meta";
const META_SUFFIX: &str = ".json";

/// Object store rooted at a local directory.
///
/// Layout:
///
/// ```text
/// <root>/objects/<key>        object bytes
/// <root>/meta/<key>.json      serialized BlobMeta
/// ```
///
/// Object bytes are written to a temporary sibling and renamed into place,
/// so readers never observe a partially written object. The metadata file
/// is written after the object; an object without metadata is invisible to
/// `stat` and `list` and is reclaimed by the next `put` or `delete` of its key.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &BlobKey) -> StoreResult<PathBuf> {
        Ok(self.root.join(OBJECTS_DIR).join(relative_key_path(key)?))
    }

    fn meta_path(&self, key: &BlobKey) -> StoreResult<PathBuf> {
        let mut path = self.root.join(META_DIR).join(relative_key_path(key)?);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(META_SUFFIX);
        path.set_file_name(name);
        Ok(path)
    }
}

/// Map a key onto a relative path, rejecting anything that could escape the
/// root directory.
fn relative_key_path(key: &BlobKey) -> StoreResult<PathBuf> {
    let raw = key.as_str();
    let invalid = || StoreError::InvalidKey(raw.to_string());
    if raw.is_empty() || raw.starts_with('/') || raw.contains('\\') {
        return Err(invalid());
    }
    let mut path = PathBuf::new();
    for segment in raw.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\0') {
            return Err(invalid());
        }
        path.push(segment);
    }
    Ok(path)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Backend(format!("no parent for {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let tmp = parent.join(format!(".{file_name}.tmp-{}", uuid::Uuid::now_v7()));
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> StoreResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        key: &BlobKey,
        body: ByteReader,
        size: u64,
        content_type: &str,
    ) -> StoreResult<BlobMeta> {
        let object_path = self.object_path(key)?;
        let meta_path = self.meta_path(key)?;
        let bytes = read_exact_size(body, size).await?;
        let meta = BlobMeta::describe(key, &bytes, content_type);

        write_atomically(&object_path, &bytes).await?;
        write_atomically(&meta_path, &serde_json::to_vec(&meta)?).await?;
        debug!(key = %key, size, "stored blob on disk");
        Ok(meta)
    }

    async fn get(&self, key: &BlobKey) -> StoreResult<ByteReader> {
        let path = self.object_path(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("blob {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &BlobKey) -> StoreResult<bool> {
        let existed = remove_if_present(&self.meta_path(key)?).await?;
        let had_object = remove_if_present(&self.object_path(key)?).await?;
        Ok(existed || had_object)
    }

    async fn stat(&self, key: &BlobKey) -> StoreResult<Option<BlobMeta>> {
        match tokio::fs::read(self.meta_path(key)?).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<BlobMeta>> {
        let meta_root = self.root.join(META_DIR);
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> StoreResult<Vec<BlobMeta>> {
            if !meta_root.exists() {
                return Ok(Vec::new());
            }
            let mut found = Vec::new();
            for entry in WalkDir::new(&meta_root) {
                let entry = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
                let name = entry.file_name().to_string_lossy();
                if !entry.file_type().is_file()
                    || name.starts_with('.')
                    || !name.ends_with(META_SUFFIX)
                {
                    continue;
                }
                let meta: BlobMeta = serde_json::from_slice(&std::fs::read(entry.path())?)?;
                if meta.key.as_str().starts_with(&prefix) {
                    found.push(meta);
                }
            }
            found.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(found)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("listing task failed: {e}")))?
    }
}
