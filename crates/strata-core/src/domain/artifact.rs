//! Build artifacts: the deployable units of a project.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use strata_state::ContentDigest;

use crate::domain::context::Materialization;
use crate::domain::error::ConfigError;

/// Kind of a deployable object.
///
/// Declaration order is the infrastructure apply order: an object of a later
/// kind never needs to exist before an object of an earlier kind is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Database,
    Warehouse,
    Schema,
    #[serde(rename = "fileformat")]
    FileFormat,
    Stage,
    Table,
    View,
    Function,
    Procedure,
}

impl ArtifactKind {
    pub const APPLY_ORDER: [ArtifactKind; 9] = [
        ArtifactKind::Database,
        ArtifactKind::Warehouse,
        ArtifactKind::Schema,
        ArtifactKind::FileFormat,
        ArtifactKind::Stage,
        ArtifactKind::Table,
        ArtifactKind::View,
        ArtifactKind::Function,
        ArtifactKind::Procedure,
    ];

    /// Position in the apply order (0 = applied first).
    pub fn apply_priority(&self) -> u8 {
        match self {
            ArtifactKind::Database => 0,
            ArtifactKind::Warehouse => 1,
            ArtifactKind::Schema => 2,
            ArtifactKind::FileFormat => 3,
            ArtifactKind::Stage => 4,
            ArtifactKind::Table => 5,
            ArtifactKind::View => 6,
            ArtifactKind::Function => 7,
            ArtifactKind::Procedure => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Database => "database",
            ArtifactKind::Warehouse => "warehouse",
            ArtifactKind::Schema => "schema",
            ArtifactKind::FileFormat => "fileformat",
            ArtifactKind::Stage => "stage",
            ArtifactKind::Table => "table",
            ArtifactKind::View => "view",
            ArtifactKind::Function => "function",
            ArtifactKind::Procedure => "procedure",
        }
    }

    /// Materialization used when an artifact declares none.
    ///
    /// Tables follow the namespace default when that default produces a
    /// table; views are views; every other kind is DDL applied verbatim.
    pub fn default_materialization(
        &self,
        namespace_default: Option<Materialization>,
    ) -> Materialization {
        match self {
            ArtifactKind::Table => match namespace_default {
                Some(m @ (Materialization::Table | Materialization::Incremental)) => m,
                _ => Materialization::Table,
            },
            ArtifactKind::View => Materialization::View,
            _ => Materialization::Ddl,
        }
    }

    /// Whether an object of this kind can be produced by `materialization`.
    pub fn accepts(&self, materialization: Materialization) -> bool {
        match self {
            ArtifactKind::Table => matches!(
                materialization,
                Materialization::Table | Materialization::Incremental
            ),
            ArtifactKind::View => materialization == Materialization::View,
            _ => materialization == Materialization::Ddl,
        }
    }

    /// Parse a kind declared for `object`. Unrecognized kinds are fatal.
    pub fn parse_for(object: &str, kind: &str) -> std::result::Result<Self, ConfigError> {
        let normalized = kind
            .trim()
            .to_ascii_lowercase()
            .replace(|c: char| c == '_' || c == ' ', "");
        Self::APPLY_ORDER
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownKind {
                object: object.to_string(),
                kind: kind.to_string(),
            })
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of deployable output: a transformed table, a view, or an infra object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Stable, globally unique id; also the physical object name.
    pub id: String,
    pub kind: ArtifactKind,
    pub logical_namespace: String,
    pub depends_on: BTreeSet<String>,
    pub materialization: Materialization,
    /// Defining SQL/DDL; may reference upstream artifacts as `{{ ref('id') }}`.
    pub sql: String,
    /// Hash of `sql` plus the declared config; recomputed on every change.
    pub content_hash: ContentDigest,
}

impl BuildArtifact {
    pub fn new(
        id: impl Into<String>,
        kind: ArtifactKind,
        logical_namespace: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        let mut artifact = Self {
            id: id.into(),
            kind,
            logical_namespace: logical_namespace.into(),
            depends_on: BTreeSet::new(),
            materialization: kind.default_materialization(None),
            sql: sql.into(),
            content_hash: ContentDigest::from_bytes(b""),
        };
        artifact.rehash();
        artifact
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self.rehash();
        self
    }

    pub fn with_materialization(mut self, materialization: Materialization) -> Self {
        self.materialization = materialization;
        self.rehash();
        self
    }

    /// Recompute `content_hash` from the SQL text and the declared config.
    pub fn rehash(&mut self) {
        self.content_hash = compute_content_hash(
            &self.sql,
            self.kind,
            &self.logical_namespace,
            self.materialization,
            &self.depends_on,
        );
    }
}

/// SHA-256 over the defining SQL and the canonical JSON of declared config.
pub fn compute_content_hash(
    sql: &str,
    kind: ArtifactKind,
    logical_namespace: &str,
    materialization: Materialization,
    depends_on: &BTreeSet<String>,
) -> ContentDigest {
    let config = serde_json::json!({
        "kind": kind.as_str(),
        "namespace": logical_namespace,
        "materialization": materialization.as_str(),
        "depends_on": depends_on,
    });
    let mut data = Vec::with_capacity(sql.len() + 128);
    data.extend_from_slice(sql.as_bytes());
    data.push(0);
    data.extend_from_slice(config.to_string().as_bytes());
    ContentDigest::from_bytes(&data)
}
