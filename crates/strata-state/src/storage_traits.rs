//! Storage trait definitions for Strata
//!
//! These traits define the persistence abstractions:
//! - `ManifestStore`: build manifest persistence keyed by execution context
//! - `TargetLocks`: exclusive locks serializing deployments to a shared target
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// BuildManifest
// ---------------------------------------------------------------------------

/// What one artifact looked like when it was last built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Hash of the artifact's defining SQL/DDL plus declared config
    pub content_hash: ContentDigest,
    /// Fully-qualified physical location, e.g. `APP_DB.BRONZE.CUSTOMERS`
    pub physical_location: String,
    /// When the artifact was materialized
    pub built_at: DateTime<Utc>,
}

/// Snapshot of a successful build: artifact id → entry.
///
/// Immutable once written; the next invocation reads it as its baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Identifier of the build invocation that produced this manifest
    pub build_id: String,
    /// Execution context the manifest belongs to (store key)
    pub context_key: String,
    /// When the manifest was finalized
    pub created_at: DateTime<Utc>,
    /// Per-artifact entries, ordered by artifact id
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl BuildManifest {
    /// Create an empty manifest for a build invocation.
    pub fn new(build_id: impl Into<String>, context_key: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            context_key: context_key.into(),
            created_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, artifact_id: &str) -> Option<&ManifestEntry> {
        self.entries.get(artifact_id)
    }

    pub fn insert(&mut self, artifact_id: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(artifact_id.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Manifest artifact store.
///
/// Semantics:
/// - Keyed by execution context name.
/// - `put` replaces whatever was stored under the key (last-write-wins).
/// - `get` on a key that was never written returns `Ok(None)`, not an error.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Fetch the most recent manifest for a context, if any.
    async fn get(&self, context_key: &str) -> StorageResult<Option<BuildManifest>>;

    /// Store a manifest as the most recent for a context.
    async fn put(&self, context_key: &str, manifest: &BuildManifest) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// TargetLocks
// ---------------------------------------------------------------------------

/// Held lock on a target namespace. Released when dropped.
pub struct LockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    /// The locked target key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!(target_key = %self.key, "target lock released");
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Exclusive per-target locks.
///
/// Acquisition never waits: a held lock fails fast with
/// `StorageError::LockHeld` so the caller can report the contention.
#[async_trait]
pub trait TargetLocks: Send + Sync {
    async fn acquire(&self, key: &str) -> StorageResult<LockGuard>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_and_hex() {
        let a = ContentDigest::from_bytes(b"select 1");
        let b = ContentDigest::from_bytes(b"select 1");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn digest_rejects_non_hex() {
        let err = ContentDigest::try_from("xyz".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn manifest_serde_validates_digest() {
        let json = serde_json::json!({
            "build_id": "b1",
            "context_key": "staging",
            "created_at": "2024-01-01T00:00:00Z",
            "entries": {
                "orders": {
                    "content_hash": "not-a-digest",
                    "physical_location": "APP_DB.SILVER.ORDERS",
                    "built_at": "2024-01-01T00:00:00Z"
                }
            }
        });
        assert!(serde_json::from_value::<BuildManifest>(json).is_err());
    }

    #[test]
    fn lock_guard_runs_release_once_on_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let guard = LockGuard::new("APP_DB.GOLD", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(guard.key(), "APP_DB.GOLD");
        drop(guard);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
