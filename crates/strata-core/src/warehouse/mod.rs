//! Warehouse interface consumed by the clone orchestrator, build executor,
//! infra deployer and reaper.
//!
//! The core treats the warehouse as a black box: it issues idempotent
//! create-or-replace operations and only ever inspects success/failure and
//! counts. Concrete clients live outside this crate; an in-memory fake is
//! available in [`crate::fakes`].

pub mod role;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Materialization, ObjectRef, SchemaRef, TableRef};

pub use role::with_role;

/// Errors reported by a warehouse client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WarehouseError {
    #[error("object not found: {object}")]
    NotFound { object: String },

    #[error("permission denied on {object} for role {role}")]
    PermissionDenied { object: String, role: String },

    #[error("statement failed: {detail}")]
    Execution { detail: String },

    #[error("statement timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("warehouse client error: {0}")]
    Client(String),
}

pub type WarehouseResult<T> = std::result::Result<T, WarehouseError>;

/// Outcome of a DDL/DML statement. Result rows are never inspected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// Rows or objects affected, when the client reports it.
    pub count: Option<u64>,
}

/// Operations the orchestration core needs from a warehouse.
///
/// Every create uses create-or-replace (or if-not-exists) semantics, so any
/// operation may be re-issued after a failed invocation.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Role the session is currently using.
    async fn current_role(&self) -> WarehouseResult<String>;

    /// Switch the session to `role`.
    async fn use_role(&self, role: &str) -> WarehouseResult<()>;

    async fn create_schema_if_not_exists(&self, schema: &SchemaRef) -> WarehouseResult<()>;

    /// Base tables of `database.schema` from the structural catalog.
    /// An empty schema yields an empty list.
    async fn list_base_tables(&self, database: &str, schema: &str)
        -> WarehouseResult<Vec<TableRef>>;

    /// Zero-copy structural clone of `source` into `target`.
    async fn clone_table(&self, source: &ObjectRef, target: &ObjectRef)
        -> WarehouseResult<ExecOutcome>;

    /// Re-materialize `source` into `target` keeping a random `percent` of rows.
    async fn sample_table(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        percent: u8,
    ) -> WarehouseResult<ExecOutcome>;

    /// Materialize a build artifact's select statement at `target`.
    async fn materialize(
        &self,
        target: &ObjectRef,
        materialization: Materialization,
        sql: &str,
    ) -> WarehouseResult<ExecOutcome>;

    /// Apply an idempotent object definition verbatim.
    async fn apply_ddl(&self, object: &str, ddl: &str) -> WarehouseResult<ExecOutcome>;

    /// Cascading removal; an absent schema is not an error.
    async fn drop_schema_if_exists(&self, schema: &SchemaRef) -> WarehouseResult<()>;
}
