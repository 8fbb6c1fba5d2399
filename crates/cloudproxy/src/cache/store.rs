//! # Content Store
//!
//! Sharded on-disk layout for cache entries and the staging files they are
//! written through.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{self, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::types::CacheKey;
use crate::object::Namespace;

const STAGING_SUFFIX: &str = "part";

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    shard_depth: usize,
}

impl ContentStore {
    /// Create a store rooted at `root` with `shard_depth` directory levels per entry.
    pub fn new(root: impl Into<PathBuf>, shard_depth: usize) -> Self {
        Self {
            root: root.into(),
            shard_depth,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache key of a canonical `"bucket/key"` path.
    pub fn derive_key(canonical: &str) -> CacheKey {
        CacheKey::derive(canonical)
    }

    /// Create the cache root and one directory per namespace.
    pub async fn ensure_initialized(&self) -> io::Result<()> {
        for ns in [Namespace::ObjectStore, Namespace::VideoHost] {
            fs::create_dir_all(self.root.join(ns.as_str())).await?;
        }
        Ok(())
    }

    /// Path an entry lives at. Pure; no directories are created.
    pub fn entry_path(&self, namespace: Namespace, key: &CacheKey) -> PathBuf {
        let mut path = self.root.join(namespace.as_str());
        for shard in key.shards(self.shard_depth) {
            path.push(shard);
        }
        path.push(key.as_str());
        path
    }

    /// Path an entry lives at, creating any missing shard directory on the way.
    ///
    /// Two requests racing to create the same shard both succeed.
    pub async fn sharded_path_for(
        &self,
        namespace: Namespace,
        key: &CacheKey,
    ) -> io::Result<PathBuf> {
        let mut dir = self.root.join(namespace.as_str());
        if !fs::try_exists(&dir).await? {
            fs::create_dir_all(&dir).await?;
        }

        for shard in key.shards(self.shard_depth) {
            dir.push(shard);
            if fs::try_exists(&dir).await? {
                continue;
            }
            match fs::create_dir(&dir).await {
                Ok(()) => debug!(dir = ?dir, "Created shard directory"),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }

        dir.push(key.as_str());
        Ok(dir)
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Remove a file. A path that is already gone is not an error.
    pub async fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to remove cache file");
                Err(e)
            }
        }
    }

    /// Unique sibling path a file destined for `target` is written to first.
    pub fn staging_path_for(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(
            "{name}.{}.{STAGING_SUFFIX}",
            Uuid::new_v4().simple()
        ))
    }

    /// Open a staging file for `entry`. Its parent directory must exist.
    pub async fn stage(&self, entry: &Path) -> io::Result<StagedEntry> {
        let staging_path = Self::staging_path_for(entry);
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging_path)
            .await?;

        Ok(StagedEntry {
            file: Some(file),
            staging_path,
            entry_path: entry.to_path_buf(),
            written: 0,
            finished: false,
        })
    }
}

/// A cache entry being written. Invisible to readers until [`commit`](Self::commit).
///
/// Dropping an uncommitted entry removes its staging file.
#[derive(Debug)]
pub struct StagedEntry {
    file: Option<fs::File>,
    staging_path: PathBuf,
    entry_path: PathBuf,
    written: u64,
    finished: bool,
}

impl StagedEntry {
    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("staged entry already closed"))?;
        file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    /// Flush, sync and atomically move the staging file onto the entry path.
    pub async fn commit(mut self) -> io::Result<u64> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        if let Err(e) = fs::rename(&self.staging_path, &self.entry_path).await {
            warn!(
                from = ?self.staging_path,
                to = ?self.entry_path,
                error = %e,
                "Failed to rename staging file"
            );
            return Err(e);
        }

        self.finished = true;
        debug!(path = ?self.entry_path, bytes = self.written, "Committed cache entry");
        Ok(self.written)
    }

    /// Discard everything written so far.
    pub async fn abort(mut self) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.staging_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?self.staging_path, error = %e, "Failed to remove staging file");
            }
        }
        self.finished = true;
        debug!(path = ?self.entry_path, bytes = self.written, "Aborted cache entry");
    }
}

impl Drop for StagedEntry {
    fn drop(&mut self) {
        if !self.finished {
            self.file.take();
            let _ = std::fs::remove_file(&self.staging_path);
        }
    }
}
