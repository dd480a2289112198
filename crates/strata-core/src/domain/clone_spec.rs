//! Clone requests and reports.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;
use crate::domain::location::{validate_identifier, SchemaRef};

/// Sentinel accepted in a raw table list meaning "clone whole schemas".
pub const FULL_CLONE_SENTINEL: &str = "*";

/// A source table addressed by schema, within the clone's source database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parse `SCHEMA.TABLE`.
    pub fn parse(s: &str) -> std::result::Result<Self, ConfigError> {
        match s.trim().split_once('.') {
            Some((schema, table)) if !table.contains('.') => {
                validate_identifier(schema)?;
                validate_identifier(table)?;
                Ok(Self::new(schema, table))
            }
            _ => Err(ConfigError::MalformedCloneSpec(format!(
                "table '{s}' is not of the form SCHEMA.TABLE"
            ))),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        validate_identifier(&self.schema)?;
        validate_identifier(&self.table)
    }

    /// Name in the flattened target namespace: `schema_table`.
    ///
    /// Prefixing with the schema keeps same-named tables from different
    /// schemas apart once every zone lands in one namespace.
    pub fn flattened_name(&self) -> String {
        format!("{}_{}", self.schema, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Which objects to clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CloneSelection {
    /// Every base table of each schema, enumerated from the source catalog.
    Full { schemas: BTreeSet<String> },
    /// Exactly these tables; the catalog is never consulted.
    Slim { tables: BTreeSet<TableRef> },
}

impl CloneSelection {
    /// Build a selection from raw lists.
    ///
    /// A non-empty table list (other than the `*` sentinel) selects slim mode
    /// and takes precedence over any schemas also supplied. Otherwise the
    /// schema list selects full mode. Both empty is malformed.
    pub fn from_lists(
        schemas: &[String],
        tables: &[String],
    ) -> std::result::Result<Self, ConfigError> {
        let explicit: Vec<&String> = tables
            .iter()
            .filter(|t| t.trim() != FULL_CLONE_SENTINEL && !t.trim().is_empty())
            .collect();

        if !explicit.is_empty() {
            let tables = explicit
                .into_iter()
                .map(|t| TableRef::parse(t))
                .collect::<std::result::Result<BTreeSet<_>, _>>()?;
            return Ok(CloneSelection::Slim { tables });
        }

        let schemas: BTreeSet<String> = schemas
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if schemas.is_empty() {
            return Err(ConfigError::MalformedCloneSpec(
                "both schema list and table list are empty".to_string(),
            ));
        }
        for schema in &schemas {
            validate_identifier(schema)?;
        }
        Ok(CloneSelection::Full { schemas })
    }
}

/// Input to the clone orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneSpec {
    pub source_database: String,
    pub selection: CloneSelection,
    /// Isolated namespace receiving the copies.
    pub target: SchemaRef,
    /// 0 = zero-copy clone; 1..=100 = independently sampled copy.
    pub sample_percent: u8,
    /// Role assumed for every source read; its masking policies apply to the copy.
    pub access_role: String,
}

impl CloneSpec {
    pub fn new(
        source_database: impl Into<String>,
        selection: CloneSelection,
        target: SchemaRef,
        sample_percent: u8,
        access_role: impl Into<String>,
    ) -> std::result::Result<Self, ConfigError> {
        let spec = Self {
            source_database: source_database.into(),
            selection,
            target,
            sample_percent,
            access_role: access_role.into(),
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        validate_identifier(&self.source_database)?;
        self.target.validate()?;
        validate_identifier(&self.access_role)?;
        if self.sample_percent > 100 {
            return Err(ConfigError::MalformedCloneSpec(format!(
                "sample percent {} is outside 0..=100",
                self.sample_percent
            )));
        }
        match &self.selection {
            CloneSelection::Full { schemas } if schemas.is_empty() => Err(
                ConfigError::MalformedCloneSpec("full clone with no schemas".to_string()),
            ),
            CloneSelection::Slim { tables } if tables.is_empty() => Err(
                ConfigError::MalformedCloneSpec("slim clone with no tables".to_string()),
            ),
            _ => Ok(()),
        }
    }

    pub fn mode(&self) -> CloneMode {
        if self.sample_percent == 0 {
            CloneMode::ZeroCopy
        } else {
            CloneMode::Sampled {
                percent: self.sample_percent,
            }
        }
    }
}

/// How each table is materialized in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneMode {
    /// Structural clone sharing storage with the source: a byte-identical
    /// snapshot of committed state, near-instant regardless of size.
    ZeroCopy,
    /// Re-materialized copy with independent random row sampling per table.
    ///
    /// Known limitation: tables are sampled independently, so referential
    /// integrity across the sampled set is not preserved (a sampled order may
    /// reference a customer that was not sampled).
    Sampled { percent: u8 },
}

/// Result of a successful clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneReport {
    pub tables_cloned: usize,
    pub mode: CloneMode,
    /// Target object names, in the order they were materialized.
    pub objects: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn table_list_takes_precedence_over_schemas() {
        let sel = CloneSelection::from_lists(
            &strings(&["SALES", "CRM"]),
            &strings(&["SALES.ORDERS"]),
        )
        .unwrap();
        assert_eq!(
            sel,
            CloneSelection::Slim {
                tables: [TableRef::new("SALES", "ORDERS")].into_iter().collect()
            }
        );
    }

    #[test]
    fn sentinel_selects_full_mode() {
        let sel = CloneSelection::from_lists(&strings(&["SALES"]), &strings(&["*"])).unwrap();
        assert!(matches!(sel, CloneSelection::Full { .. }));
    }

    #[test]
    fn empty_lists_are_malformed() {
        let err = CloneSelection::from_lists(&[], &[]).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedCloneSpec(_)));
        let err = CloneSelection::from_lists(&[], &strings(&["*"])).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedCloneSpec(_)));
    }

    #[test]
    fn table_ref_requires_schema_prefix() {
        assert!(TableRef::parse("ORDERS").is_err());
        assert!(TableRef::parse("A.B.C").is_err());
        assert_eq!(
            TableRef::parse("schema1.customers").unwrap().flattened_name(),
            "schema1_customers"
        );
    }

    #[test]
    fn sample_percent_selects_mode() {
        let target = SchemaRef::new("_DB_UTILS", "PR_1__abcdef0");
        let full = CloneSelection::Full {
            schemas: ["SALES".to_string()].into_iter().collect(),
        };
        let zero = CloneSpec::new("APP_DB", full.clone(), target.clone(), 0, "CI_ROLE").unwrap();
        assert_eq!(zero.mode(), CloneMode::ZeroCopy);
        let sampled = CloneSpec::new("APP_DB", full.clone(), target.clone(), 10, "CI_ROLE").unwrap();
        assert_eq!(sampled.mode(), CloneMode::Sampled { percent: 10 });
        assert!(CloneSpec::new("APP_DB", full, target, 101, "CI_ROLE").is_err());
    }
}
