//! Filesystem-backed manifest store and target locks.
//!
//! Layout under the state root:
//!
//! ```text
//! <root>/manifests/<context_key>.json
//! <root>/locks/<target_key>.lock
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{BuildManifest, LockGuard, ManifestStore, StorageResult, TargetLocks};

/// Map an arbitrary key onto a safe file stem.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One JSON file per context key, replaced atomically on every `put`.
pub struct FsManifestStore {
    manifests_dir: PathBuf,
}

impl FsManifestStore {
    /// Create a store rooted at `root`. Creates `root/manifests/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let manifests_dir = root.as_ref().join("manifests");
        fs::create_dir_all(&manifests_dir)?;
        Ok(Self { manifests_dir })
    }

    fn manifest_path(&self, context_key: &str) -> PathBuf {
        self.manifests_dir
            .join(format!("{}.json", file_stem(context_key)))
    }
}

#[async_trait]
impl ManifestStore for FsManifestStore {
    async fn get(&self, context_key: &str) -> StorageResult<Option<BuildManifest>> {
        let path = self.manifest_path(context_key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let manifest = serde_json::from_slice(&bytes)?;
        Ok(Some(manifest))
    }

    async fn put(&self, context_key: &str, manifest: &BuildManifest) -> StorageResult<()> {
        let path = self.manifest_path(context_key);
        let body = serde_json::to_vec_pretty(manifest)?;

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(&self.manifests_dir)?;
        tmp.write_all(&body)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(context = %context_key, path = %path.display(), entries = manifest.len(), "manifest written");
        Ok(())
    }
}

/// Lock files created with `create_new`, removed when the guard drops.
pub struct FsTargetLocks {
    locks_dir: PathBuf,
}

impl FsTargetLocks {
    /// Create a lock table rooted at `root`. Creates `root/locks/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let locks_dir = root.as_ref().join("locks");
        fs::create_dir_all(&locks_dir)?;
        Ok(Self { locks_dir })
    }
}

#[async_trait]
impl TargetLocks for FsTargetLocks {
    async fn acquire(&self, key: &str) -> StorageResult<LockGuard> {
        let path = self.locks_dir.join(format!("{}.lock", file_stem(key)));
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::LockHeld {
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        writeln!(file, "pid={} acquired_at={}", std::process::id(), chrono::Utc::now())?;

        debug!(target_key = %key, path = %path.display(), "target lock acquired");
        Ok(LockGuard::new(key, move || {
            let _ = fs::remove_file(&path);
        }))
    }
}
