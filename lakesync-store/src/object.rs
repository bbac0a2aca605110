//! Object storage: the uniform put/get/head/list/delete surface the
//! gateway flushes into.
//!
//! Objects are immutable once written; deletion is authoritative. Two
//! backends are provided: an in-memory store for tests and single-process
//! deployments, and a local-filesystem store that lays keys out as paths
//! under a base directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use lakesync_core::{Result, SyncError};

/// Metadata of a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
}

/// Uniform object-store surface over memory/local/cloud backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: Option<&str>,
    ) -> Result<()>;

    async fn get_object(&self, key: &str) -> Result<Bytes>;

    async fn head_object(&self, key: &str) -> Result<ObjectMeta>;

    /// List keys under a prefix, sorted ascending.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete_object(key).await?;
        }
        Ok(())
    }
}

// ─── Memory backend ───

#[derive(Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: Option<String>,
}

/// In-memory object store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, StoredObject>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: Option<&str>,
    ) -> Result<()> {
        debug!(key, size = bytes.len(), "put object");
        self.objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.objects
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| SyncError::Adapter(format!("object not found: {key}")))
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta> {
        self.objects
            .get(key)
            .map(|o| ObjectMeta {
                key: key.to_string(),
                size: o.bytes.len() as u64,
                content_type: o.content_type.clone(),
            })
            .ok_or_else(|| SyncError::Adapter(format!("object not found: {key}")))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }
}

// ─── Local filesystem backend ───

/// Object store that maps keys onto paths under a base directory.
pub struct LocalFsObjectStore {
    base: PathBuf,
}

impl LocalFsObjectStore {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Resolve a key to a path, refusing traversal outside the base.
    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(SyncError::Config(format!("invalid object key: {key}")));
        }
        Ok(self.base.join(rel))
    }
}

#[async_trait]
impl ObjectStore for LocalFsObjectStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        _content_type: Option<&str>,
    ) -> Result<()> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(key, size = bytes.len(), "put object to disk");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let path = self.key_to_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::Adapter(format!("object not found: {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta> {
        let path = self.key_to_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(ObjectMeta {
                key: key.to_string(),
                size: meta.len(),
                content_type: None,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::Adapter(format!("object not found: {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.base.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.base) {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
