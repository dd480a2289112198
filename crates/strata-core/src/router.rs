//! Namespace routing: logical zone + execution context -> physical namespace.

use serde::{Deserialize, Serialize};

use crate::domain::{
    validate_identifier, BuildArtifact, ConfigError, ExecutionContext, IsolatedNamespace,
    ObjectRef, SchemaRef,
};

/// Resolve the physical namespace an artifact declared in `declared` lands in.
///
/// In `ci` every logical zone collapses into the single isolated namespace of
/// the current change request, whatever was declared. Elsewhere the declared
/// namespace is used verbatim, falling back to `default_namespace` when empty.
pub fn resolve(
    context: ExecutionContext,
    declared: &str,
    isolated: Option<&IsolatedNamespace>,
    default_namespace: &str,
) -> Result<String, ConfigError> {
    if context.is_ci() {
        return isolated
            .map(IsolatedNamespace::id)
            .ok_or(ConfigError::MissingIsolatedNamespace);
    }
    let declared = declared.trim();
    if declared.is_empty() {
        Ok(default_namespace.to_string())
    } else {
        Ok(declared.to_string())
    }
}

/// Routing configuration fixed for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRouter {
    context: ExecutionContext,
    /// Database receiving writes: the target database, or the CI database in `ci`.
    database: String,
    default_namespace: String,
    isolated: Option<IsolatedNamespace>,
}

impl NamespaceRouter {
    pub fn new(
        context: ExecutionContext,
        database: impl Into<String>,
        default_namespace: impl Into<String>,
        isolated: Option<IsolatedNamespace>,
    ) -> Result<Self, ConfigError> {
        let database = database.into();
        validate_identifier(&database)?;
        if context.is_ci() && isolated.is_none() {
            return Err(ConfigError::MissingIsolatedNamespace);
        }
        Ok(Self {
            context,
            database,
            default_namespace: default_namespace.into(),
            isolated,
        })
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn isolated(&self) -> Option<&IsolatedNamespace> {
        self.isolated.as_ref()
    }

    /// Physical namespace for `declared`.
    pub fn resolve(&self, declared: &str) -> String {
        match (&self.isolated, self.context.is_ci()) {
            (Some(isolated), true) => isolated.id(),
            _ => {
                let declared = declared.trim();
                if declared.is_empty() {
                    self.default_namespace.clone()
                } else {
                    declared.to_string()
                }
            }
        }
    }

    pub fn schema_for(&self, declared: &str) -> SchemaRef {
        SchemaRef::new(self.database.clone(), self.resolve(declared))
    }

    /// Fully-qualified location `artifact` is materialized at.
    pub fn locate(&self, artifact: &BuildArtifact) -> ObjectRef {
        self.schema_for(&artifact.logical_namespace)
            .object(artifact.id.clone())
    }
}
