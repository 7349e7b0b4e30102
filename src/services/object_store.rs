//! src/services/object_store.rs
//!
//! Object storage for image binaries. `ObjectStore` is the seam the media
//! pipeline writes through; `DiskObjectStore` is the local implementation,
//! sharding payloads beneath `base_path/{bucket}/{shard}/{shard}/{key}` and
//! publishing them under `public_base_url/{bucket}/{key}`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use image::ImageFormat;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object `{key}` already exists in bucket `{bucket}`")]
    ObjectAlreadyExists { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Result of a successful write.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    /// Public reference resolving to the binary.
    pub url: String,
    pub size_bytes: u64,
    /// MD5 of the payload, lowercase hex.
    pub etag: String,
}

/// An opened binary ready to be streamed out.
pub struct ObjectReader {
    pub size_bytes: u64,
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
}

/// Namespaced binary storage with public URL resolution.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write a new object. Never overwrites: an existing key is an error.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<StoredObject>;

    async fn open(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader>;

    /// Remove an object. Removing a missing key succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Every key currently stored in `bucket`, sorted.
    async fn list_keys(&self, bucket: &str) -> StorageResult<Vec<String>>;

    fn public_url(&self, bucket: &str, key: &str) -> String;
}

/// Local filesystem implementation of [`ObjectStore`].
#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix of the public URLs handed out, without trailing slash.
    pub public_base_url: String,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const TMP_PREFIX: &str = ".tmp-";

impl DiskObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Reject empty, oversized, absolute, traversing or control-character keys.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.split('/').any(|segment| segment.starts_with(TMP_PREFIX)) {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// 3–63 characters of lowercase letters, digits, dots and hyphens,
    /// starting and ending with a letter or digit, without `..`, `-.` or `.-`.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers from MD5(bucket/key), as lowercase hex.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// `base_path/bucket/{shard}/{shard}/{key}`; parents may not exist yet.
    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn checked_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)?;
        Ok(self.object_path(bucket, key))
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    /// Writes to a temporary sibling, fsyncs, then renames into place so a
    /// reader never observes a partial binary.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<StoredObject> {
        let file_path = self.checked_path(bucket, key)?;
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        if fs::try_exists(&file_path).await? {
            return Err(StorageError::ObjectAlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        if let Err(err) = write_synced(&tmp_path, &data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let etag = format!("{:x}", md5::compute(&data));
        debug!(bucket, key, bytes = data.len(), "stored object at {}", file_path.display());

        Ok(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            url: self.public_url(bucket, key),
            size_bytes: data.len() as u64,
            etag,
        })
    }

    async fn open(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        let file_path = self.checked_path(bucket, key)?;
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;
        let size_bytes = file.metadata().await?.len();
        Ok(ObjectReader {
            size_bytes,
            reader: Box::new(file),
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let file_path = self.checked_path(bucket, key)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    async fn list_keys(&self, bucket: &str) -> StorageResult<Vec<String>> {
        self.ensure_bucket_name_safe(bucket)?;
        let root = self.bucket_root(bucket);
        let mut keys = Vec::new();

        let mut shard_a_dirs = match fs::read_dir(&root).await {
            Ok(dirs) => dirs,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(StorageError::Io(err)),
        };
        while let Some(shard_a) = shard_a_dirs.next_entry().await? {
            if !shard_a.file_type().await?.is_dir() {
                continue;
            }
            let mut shard_b_dirs = fs::read_dir(shard_a.path()).await?;
            while let Some(shard_b) = shard_b_dirs.next_entry().await? {
                if shard_b.file_type().await?.is_dir() {
                    collect_keys(&shard_b.path(), &mut keys).await?;
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket, key)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Walk one shard directory, pushing every payload key found below it.
async fn collect_keys(shard_dir: &Path, keys: &mut Vec<String>) -> StorageResult<()> {
    let mut pending = vec![shard_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(shard_dir) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }
    }
    Ok(())
}

/// Collision-resistant object name: millisecond timestamp plus random suffix.
///
/// Keeps the original extension when it agrees with `mime`, otherwise uses
/// the canonical extension of `mime`.
pub fn generate_object_name(original_name: &str, mime: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let ext = extension_for(original_name, mime);
    format!("{}-{}.{}", Utc::now().timestamp_millis(), &suffix[..8], ext)
}

fn extension_for(original_name: &str, mime: &str) -> String {
    let original_ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let target = ImageFormat::from_mime_type(mime);

    if let Some(ext) = original_ext {
        if target.is_none() || ImageFormat::from_extension(&ext) == target {
            return ext;
        }
    }
    target
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
        .to_string()
}

/// Resolve a stored reference (public URL or bare key) to a key in `bucket`.
pub fn storage_key_from_reference(reference: &str, bucket: &str) -> Option<String> {
    let reference = reference.split(['?', '#']).next().unwrap_or(reference);
    let marker = format!("/{}/", bucket);
    let key = if let Some(pos) = reference.rfind(&marker) {
        &reference[pos + marker.len()..]
    } else if reference.contains("://") {
        reference.rsplit('/').next().unwrap_or("")
    } else {
        reference
    };
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// MIME type to serve a key with, from its extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(ImageFormat::from_extension)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const BUCKET: &str = "project-images";

    fn store(dir: &tempfile::TempDir) -> DiskObjectStore {
        DiskObjectStore::new(dir.path(), "http://localhost:3000/storage/")
    }

    #[tokio::test]
    async fn put_then_open_round_trips_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let stored = store
            .put(BUCKET, "a.jpg", Bytes::from_static(b"jpeg-bytes"))
            .await
            .unwrap();
        assert_eq!(stored.url, "http://localhost:3000/storage/project-images/a.jpg");
        assert_eq!(stored.size_bytes, 10);
        assert_eq!(stored.etag, format!("{:x}", md5::compute(b"jpeg-bytes")));

        let mut opened = store.open(BUCKET, "a.jpg").await.unwrap();
        let mut buf = Vec::new();
        opened.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"jpeg-bytes");
        assert_eq!(opened.size_bytes, 10);
    }

    #[tokio::test]
    async fn put_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.put(BUCKET, "a.jpg", Bytes::from_static(b"1")).await.unwrap();
        let err = store
            .put(BUCKET, "a.jpg", Bytes::from_static(b"2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes_shards() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.put(BUCKET, "a.jpg", Bytes::from_static(b"1")).await.unwrap();

        store.delete(BUCKET, "a.jpg").await.unwrap();
        store.delete(BUCKET, "a.jpg").await.unwrap();

        assert!(matches!(
            store.open(BUCKET, "a.jpg").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
        let mut root = fs::read_dir(dir.path().join(BUCKET)).await.unwrap();
        assert!(root.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_keys_reconstructs_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(store.list_keys(BUCKET).await.unwrap().is_empty());

        store.put(BUCKET, "b.jpg", Bytes::from_static(b"1")).await.unwrap();
        store.put(BUCKET, "2025/a.png", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(
            store.list_keys(BUCKET).await.unwrap(),
            vec!["2025/a.png".to_string(), "b.jpg".to_string()]
        );
    }

    #[tokio::test]
    async fn rejects_unsafe_keys_and_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        for key in ["", "/etc/passwd", "../x", "a\\b", ".tmp-123"] {
            let err = store.put(BUCKET, key, Bytes::new()).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidObjectKey), "{key}");
        }
        for bucket in ["ab", "Images", "-images", "im..ages"] {
            let err = store.put(bucket, "a.jpg", Bytes::new()).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidBucketName { .. }), "{bucket}");
        }
    }

    #[test]
    fn object_names_keep_matching_extension() {
        let name = generate_object_name("Photo.JPEG", "image/jpeg");
        assert!(name.ends_with(".jpeg"), "{name}");
        let name = generate_object_name("scan.png", "image/jpeg");
        assert!(name.ends_with(".jpg"), "{name}");
        let name = generate_object_name("noext", "image/png");
        assert!(name.ends_with(".png"), "{name}");

        let a = generate_object_name("a.jpg", "image/jpeg");
        let b = generate_object_name("a.jpg", "image/jpeg");
        assert_ne!(a, b);
    }

    #[test]
    fn references_resolve_to_keys() {
        assert_eq!(
            storage_key_from_reference(
                "http://localhost:3000/storage/project-images/170-abc.jpg",
                BUCKET
            )
            .as_deref(),
            Some("170-abc.jpg")
        );
        assert_eq!(
            storage_key_from_reference("https://cdn.example.com/x/170-abc.jpg?v=2", BUCKET)
                .as_deref(),
            Some("170-abc.jpg")
        );
        assert_eq!(
            storage_key_from_reference("170-abc.jpg", BUCKET).as_deref(),
            Some("170-abc.jpg")
        );
        assert_eq!(storage_key_from_reference("https://cdn.example.com/", BUCKET), None);
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for_key("a.jpg"), "image/jpeg");
        assert_eq!(content_type_for_key("a.png"), "image/png");
        assert_eq!(content_type_for_key("a"), "application/octet-stream");
    }
}
