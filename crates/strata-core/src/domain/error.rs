//! Domain-level error taxonomy for Strata.

use strata_state::StorageError;

use crate::warehouse::WarehouseError;

/// Fatal input/configuration errors. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown execution context: {0}")]
    UnknownContext(String),

    #[error("unrecognized object kind '{kind}' for {object}")]
    UnknownKind { object: String, kind: String },

    #[error("unknown materialization '{0}'")]
    UnknownMaterialization(String),

    #[error("artifact {artifact} of kind {kind} cannot be materialized as {materialization}")]
    KindMismatch {
        artifact: String,
        kind: String,
        materialization: String,
    },

    #[error("dependency cycle detected involving artifacts: {ids:?}")]
    DependencyCycle { ids: Vec<String> },

    #[error("duplicate artifact id: {0}")]
    DuplicateArtifact(String),

    #[error("artifact {artifact} depends on unknown artifact {dependency}")]
    UnknownDependency { artifact: String, dependency: String },

    #[error("unknown artifact: {0}")]
    UnknownArtifact(String),

    #[error("artifact {artifact} declares unknown namespace '{namespace}'")]
    UnknownNamespace { artifact: String, namespace: String },

    #[error("malformed clone spec: {0}")]
    MalformedCloneSpec(String),

    #[error("invalid isolated namespace: {0}")]
    InvalidIsolatedNamespace(String),

    #[error("ci context requires an isolated namespace (change request number and revision)")]
    MissingIsolatedNamespace,

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("invalid project file {path}: {detail}")]
    ProjectFile { path: String, detail: String },
}

/// Strata domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("access denied on {object} for role {role}: {detail}")]
    Access {
        object: String,
        role: String,
        detail: String,
    },

    #[error("materialization of {artifact} failed: {detail}")]
    Materialization { artifact: String, detail: String },

    #[error("clone aborted at {object}: {detail}; isolated namespace is unusable")]
    Clone { object: String, detail: String },

    #[error("teardown of {namespace} failed: {detail}")]
    Teardown { namespace: String, detail: String },

    #[error("infrastructure deploy failed at {object}: {detail}")]
    Infra { object: String, detail: String },

    #[error("{operation} timed out after {secs} seconds")]
    Timeout { operation: String, secs: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Strata domain operations.
pub type Result<T> = std::result::Result<T, StrataError>;
