//! Strata-State: manifest persistence for Strata builds
//!
//! This crate owns the artifact store: the record of what a build produced,
//! where it landed and from which content hash. The next invocation's state
//! differ reads it back as its baseline.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: last-write-wins manifest storage keyed by execution context, and
//! exclusive locks for targets shared between concurrent deployments.
//!
//! ## Key Components
//!
//! - `ManifestStore`: `get(context_key)` / `put(context_key, manifest)`
//! - `TargetLocks`: per-namespace exclusive lock with drop-release guards
//! - `FsManifestStore` / `FsTargetLocks`: JSON files under a state directory
//! - `SurrealManifestStore`: SurrealDB backend (`mem://`, `surrealkv://`, remote)

mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fs_store::{FsManifestStore, FsTargetLocks};
pub use storage_traits::{
    BuildManifest, ContentDigest, LockGuard, ManifestEntry, ManifestStore, StorageResult,
    TargetLocks,
};
pub use surreal_store::SurrealManifestStore;
