//! Execution contexts and logical namespaces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// Where a build invocation runs. Fixed for the whole invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    Local,
    Ci,
    Staging,
    Production,
}

impl ExecutionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionContext::Local => "local",
            ExecutionContext::Ci => "ci",
            ExecutionContext::Staging => "staging",
            ExecutionContext::Production => "production",
        }
    }

    pub fn is_ci(&self) -> bool {
        matches!(self, ExecutionContext::Ci)
    }

    /// Shared targets with no per-run isolation; deployments to them serialize.
    pub fn is_shared_target(&self) -> bool {
        matches!(
            self,
            ExecutionContext::Staging | ExecutionContext::Production
        )
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionContext {
    type Err = ConfigError;

    /// Accepts the canonical names plus the `dev`/`uat`/`prod` aliases.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "dev" => Ok(ExecutionContext::Local),
            "ci" => Ok(ExecutionContext::Ci),
            "staging" | "uat" => Ok(ExecutionContext::Staging),
            "production" | "prod" => Ok(ExecutionContext::Production),
            _ => Err(ConfigError::UnknownContext(s.to_string())),
        }
    }
}

/// How an artifact is physically produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Materialization {
    #[default]
    Table,
    View,
    Incremental,
    /// Statement applied verbatim (infra objects, procedures, functions).
    Ddl,
}

impl Materialization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Materialization::Table => "table",
            Materialization::View => "view",
            Materialization::Incremental => "incremental",
            Materialization::Ddl => "ddl",
        }
    }
}

impl fmt::Display for Materialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Materialization {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Materialization::Table),
            "view" => Ok(Materialization::View),
            "incremental" => Ok(Materialization::Incremental),
            "ddl" => Ok(Materialization::Ddl),
            _ => Err(ConfigError::UnknownMaterialization(s.to_string())),
        }
    }
}

/// A named zone of the pipeline (e.g. `transient`, `bronze`, `utils`).
///
/// Immutable configuration loaded once at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalNamespace {
    pub name: String,
    pub retention_days: u32,
    pub materialization_default: Materialization,
}

impl LogicalNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retention_days: 1,
            materialization_default: Materialization::Table,
        }
    }
}
