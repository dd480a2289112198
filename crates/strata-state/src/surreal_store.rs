//! SurrealDB-backed ManifestStore implementation
//!
//! Manifests are stored as one row per context key. The manifest body is kept
//! as serialized JSON text so the stored bytes round-trip exactly, independent
//! of SurrealDB's datetime and record-id coercions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::{BuildManifest, ManifestStore, StorageResult};

const NAMESPACE: &str = "strata";
const DATABASE: &str = "state";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestRow {
    context_key: String,
    build_id: String,
    body: String,
}

/// SurrealDB-backed implementation of [`ManifestStore`].
pub struct SurrealManifestStore {
    db: Surreal<Any>,
}

impl SurrealManifestStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://<path>`, `ws://host`).
    ///
    /// Selects `strata/state` and defines the `manifests` table.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to {url}: {e}")))?;

        db.use_ns(NAMESPACE).use_db(DATABASE).await?;

        let store = Self { db };
        store.init_schema().await?;
        info!(url = %url, "SurrealManifestStore connected");
        Ok(store)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        debug!("Initializing manifests table");
        self.db
            .query(
                r#"
                DEFINE TABLE IF NOT EXISTS manifests SCHEMAFULL;
                DEFINE FIELD IF NOT EXISTS context_key ON manifests TYPE string;
                DEFINE FIELD IF NOT EXISTS build_id ON manifests TYPE string;
                DEFINE FIELD IF NOT EXISTS body ON manifests TYPE string;
                DEFINE INDEX IF NOT EXISTS idx_manifests_context ON manifests FIELDS context_key UNIQUE;
                "#,
            )
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl ManifestStore for SurrealManifestStore {
    async fn get(&self, context_key: &str) -> StorageResult<Option<BuildManifest>> {
        let mut res = self
            .db
            .query("SELECT context_key, build_id, body FROM manifests WHERE context_key = $key")
            .bind(("key", context_key.to_string()))
            .await?;

        let rows: Vec<ManifestRow> = res.take(0)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_str(&row.body)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, context_key: &str, manifest: &BuildManifest) -> StorageResult<()> {
        let row = ManifestRow {
            context_key: context_key.to_string(),
            build_id: manifest.build_id.clone(),
            body: serde_json::to_string(manifest)?,
        };

        // Last-write-wins: replace any previous row for the key in one transaction.
        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                DELETE manifests WHERE context_key = $key;
                CREATE manifests CONTENT $row;
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("key", context_key.to_string()))
            .bind(("row", row))
            .await?
            .check()?;

        debug!(context = %context_key, build_id = %manifest.build_id, "manifest stored");
        Ok(())
    }
}
