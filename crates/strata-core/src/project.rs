//! Project file (`strata.toml`) loading.
//!
//! ```toml
//! [project]
//! name = "ci_cd_project"
//! default_namespace = "PUBLIC"
//!
//! [[namespaces]]
//! name = "SILVER"
//! retention_days = 7
//! materialization = "view"
//!
//! [[artifacts]]
//! id = "ORDERS"
//! kind = "table"
//! namespace = "SILVER"
//! depends_on = ["RAW_ORDERS"]
//! sql = "models/orders.sql"
//!
//! [[infra]]
//! name = "APP_DB"
//! kind = "database"
//! ddl = "ddls/APP_DB/database.sql"
//!
//! [clone]
//! source_database = "APP_DB"
//! schemas = ["SALES"]
//! tables = ["*"]
//! sample_percent = 0
//! access_role = "CI_READER"
//! ```
//!
//! Loaded once at process start. SQL and DDL paths are relative to the
//! directory holding the project file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::domain::{
    validate_identifier, ArtifactKind, BuildArtifact, CloneSelection, CloneSpec, ConfigError,
    LogicalNamespace, Materialization, Result, SchemaRef,
};
use crate::graph::ArtifactGraph;
use crate::infra::InfraDefinition;

pub const PROJECT_FILE: &str = "strata.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectFile {
    project: ProjectSection,
    #[serde(default)]
    namespaces: Vec<NamespaceSection>,
    #[serde(default)]
    artifacts: Vec<ArtifactSection>,
    #[serde(default)]
    infra: Vec<InfraSection>,
    clone: Option<CloneSection>,
}

#[derive(Debug, Deserialize)]
struct ProjectSection {
    name: String,
    #[serde(default = "default_namespace")]
    default_namespace: String,
}

fn default_namespace() -> String {
    "PUBLIC".to_string()
}

#[derive(Debug, Deserialize)]
struct NamespaceSection {
    name: String,
    #[serde(default = "default_retention")]
    retention_days: u32,
    materialization: Option<String>,
}

fn default_retention() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct ArtifactSection {
    id: String,
    kind: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    depends_on: Vec<String>,
    materialization: Option<String>,
    sql: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InfraSection {
    name: String,
    kind: String,
    ddl: PathBuf,
}

/// Clone defaults for CI builds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloneSection {
    pub source_database: String,
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub sample_percent: u8,
    pub access_role: String,
}

impl CloneSection {
    /// Clone spec targeting `target`.
    pub fn to_spec(&self, target: SchemaRef) -> std::result::Result<CloneSpec, ConfigError> {
        let selection = CloneSelection::from_lists(&self.schemas, &self.tables)?;
        CloneSpec::new(
            self.source_database.clone(),
            selection,
            target,
            self.sample_percent,
            self.access_role.clone(),
        )
    }
}

/// A loaded project: namespaces, artifacts and infra objects.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub name: String,
    pub default_namespace: String,
    pub namespaces: Vec<LogicalNamespace>,
    pub artifacts: Vec<BuildArtifact>,
    pub infra: Vec<InfraDefinition>,
    pub clone: Option<CloneSection>,
}

impl Project {
    /// Load `<root>/strata.toml` and every file it references.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let path = root.join(PROJECT_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::ProjectFile {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Self::from_toml_str(root, &text)
    }

    /// Parse project text; referenced files are read relative to `root`.
    pub fn from_toml_str(root: impl AsRef<Path>, text: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let file: ProjectFile = toml::from_str(text).map_err(|e| ConfigError::ProjectFile {
            path: root.join(PROJECT_FILE).display().to_string(),
            detail: e.to_string(),
        })?;

        let mut namespaces = Vec::with_capacity(file.namespaces.len());
        for ns in &file.namespaces {
            validate_identifier(&ns.name)?;
            let materialization = match &ns.materialization {
                Some(m) => m.parse()?,
                None => Materialization::Table,
            };
            namespaces.push(LogicalNamespace {
                name: ns.name.clone(),
                retention_days: ns.retention_days,
                materialization_default: materialization,
            });
        }
        let declared: BTreeSet<&str> = namespaces.iter().map(|n| n.name.as_str()).collect();

        let mut artifacts = Vec::with_capacity(file.artifacts.len());
        for section in &file.artifacts {
            validate_identifier(&section.id)?;
            let kind = ArtifactKind::parse_for(&section.id, &section.kind)?;
            let namespace = if section.namespace.trim().is_empty() {
                file.project.default_namespace.clone()
            } else {
                section.namespace.clone()
            };
            validate_identifier(&namespace)?;
            if !declared.is_empty()
                && namespace != file.project.default_namespace
                && !declared.contains(namespace.as_str())
            {
                return Err(ConfigError::UnknownNamespace {
                    artifact: section.id.clone(),
                    namespace,
                }
                .into());
            }
            let materialization = match &section.materialization {
                Some(m) => {
                    let declared: Materialization = m.parse()?;
                    if !kind.accepts(declared) {
                        return Err(ConfigError::KindMismatch {
                            artifact: section.id.clone(),
                            kind: kind.to_string(),
                            materialization: declared.to_string(),
                        }
                        .into());
                    }
                    declared
                }
                None => kind.default_materialization(
                    namespaces
                        .iter()
                        .find(|n| n.name == namespace)
                        .map(|n| n.materialization_default),
                ),
            };
            let sql = read_relative(&root, &section.sql)?;
            artifacts.push(
                BuildArtifact::new(section.id.clone(), kind, namespace, sql)
                    .with_dependencies(section.depends_on.iter().cloned())
                    .with_materialization(materialization),
            );
        }

        let mut infra = Vec::with_capacity(file.infra.len());
        for section in &file.infra {
            infra.push(InfraDefinition {
                name: section.name.clone(),
                kind: section.kind.clone(),
                ddl: read_relative(&root, &section.ddl)?,
            });
        }

        debug!(
            project = %file.project.name,
            artifacts = artifacts.len(),
            infra = infra.len(),
            "project loaded"
        );
        Ok(Self {
            root,
            name: file.project.name,
            default_namespace: file.project.default_namespace,
            namespaces,
            artifacts,
            infra,
            clone: file.clone,
        })
    }

    /// Validated dependency graph of the project's artifacts.
    pub fn graph(&self) -> std::result::Result<ArtifactGraph, ConfigError> {
        ArtifactGraph::from_artifacts(self.artifacts.iter().cloned())
    }
}

fn read_relative(root: &Path, relative: &Path) -> std::result::Result<String, ConfigError> {
    let path = root.join(relative);
    std::fs::read_to_string(&path).map_err(|e| ConfigError::ProjectFile {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}
