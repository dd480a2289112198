//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryManifestStore` and `MemoryTargetLocks` that satisfy the
//! trait contracts without touching the filesystem or a database.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryManifestStore
// ---------------------------------------------------------------------------

/// In-memory manifest store backed by a `HashMap<context_key, manifest>`.
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    manifests: Mutex<HashMap<String, BuildManifest>>,
    puts: Mutex<u64>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a manifest without counting it as a write.
    pub fn with_manifest(self, context_key: &str, manifest: BuildManifest) -> Self {
        self.manifests
            .lock()
            .unwrap()
            .insert(context_key.to_string(), manifest);
        self
    }

    /// Number of `put` calls observed.
    pub fn put_count(&self) -> u64 {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn get(&self, context_key: &str) -> StorageResult<Option<BuildManifest>> {
        let manifests = self.manifests.lock().unwrap();
        Ok(manifests.get(context_key).cloned())
    }

    async fn put(&self, context_key: &str, manifest: &BuildManifest) -> StorageResult<()> {
        let mut manifests = self.manifests.lock().unwrap();
        manifests.insert(context_key.to_string(), manifest.clone());
        *self.puts.lock().unwrap() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryTargetLocks
// ---------------------------------------------------------------------------

/// In-memory lock table backed by a shared `HashSet<key>`.
#[derive(Debug, Default, Clone)]
pub struct MemoryTargetLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryTargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().unwrap().contains(key)
    }
}

#[async_trait]
impl TargetLocks for MemoryTargetLocks {
    async fn acquire(&self, key: &str) -> StorageResult<LockGuard> {
        let mut held = self.held.lock().unwrap();
        if !held.insert(key.to_string()) {
            return Err(StorageError::LockHeld {
                key: key.to_string(),
            });
        }
        let table = Arc::clone(&self.held);
        let owned = key.to_string();
        Ok(LockGuard::new(key, move || {
            table.lock().unwrap().remove(&owned);
        }))
    }
}
