//! Infrastructure objects: kind-priority ordering and deployment.
//!
//! The apply order is a stable partial order over kinds, not a dependency
//! graph: an object of a later kind never has to exist before an object of
//! an earlier kind is created. Within one kind, objects apply in name order.
//!
//! A deploy applies only the changed objects: those whose kind and DDL hash
//! differ from the infra manifest stored under the deploy key, or an explicit
//! list of names.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strata_state::{BuildManifest, ContentDigest, ManifestEntry, ManifestStore};
use tracing::{debug, error, info};

use crate::control::{with_timeout, Timeout};
use crate::domain::{ArtifactKind, ConfigError, Result, StrataError};
use crate::obs;
use crate::warehouse::Warehouse;

/// An infra object as declared in the project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraDefinition {
    /// Fully-qualified object name.
    pub name: String,
    pub kind: String,
    /// Idempotent definition applied verbatim.
    pub ddl: String,
}

/// An infra object with a recognized kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraObject {
    pub name: String,
    pub kind: ArtifactKind,
    pub ddl: String,
}

impl InfraObject {
    /// Hash of the kind and the DDL text.
    pub fn content_hash(&self) -> ContentDigest {
        let mut data = Vec::with_capacity(self.ddl.len() + 16);
        data.extend_from_slice(self.kind.as_str().as_bytes());
        data.push(0);
        data.extend_from_slice(self.ddl.as_bytes());
        ContentDigest::from_bytes(&data)
    }
}

impl TryFrom<InfraDefinition> for InfraObject {
    type Error = ConfigError;

    fn try_from(def: InfraDefinition) -> std::result::Result<Self, Self::Error> {
        let kind = ArtifactKind::parse_for(&def.name, &def.kind)?;
        Ok(Self {
            name: def.name,
            kind,
            ddl: def.ddl,
        })
    }
}

/// Total apply order for `definitions`.
///
/// Sorted by kind priority, then by fully-qualified name, so the result does
/// not depend on input order. Any unrecognized kind fails the whole sort.
pub fn sort_for_apply(
    definitions: impl IntoIterator<Item = InfraDefinition>,
) -> std::result::Result<Vec<InfraObject>, ConfigError> {
    let mut objects = definitions
        .into_iter()
        .map(InfraObject::try_from)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    objects.sort_by(|a, b| {
        a.kind
            .apply_priority()
            .cmp(&b.kind.apply_priority())
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(objects)
}

/// Objects applied by a successful deploy, in apply order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub applied: Vec<String>,
    /// Objects left alone, in apply order.
    pub unchanged: Vec<String>,
}

/// Which infra objects a deploy applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InfraSelection {
    /// Objects with no stored entry or a different hash.
    #[default]
    Changed,
    /// Exactly these names, whatever their hash.
    Only(BTreeSet<String>),
    All,
}

/// Split sorted `objects` into those to apply and the names left alone.
///
/// Both halves keep apply order. Naming an object that is not declared is a
/// configuration error.
pub fn select_changed(
    objects: Vec<InfraObject>,
    previous: Option<&BuildManifest>,
    selection: &InfraSelection,
) -> std::result::Result<(Vec<InfraObject>, Vec<String>), ConfigError> {
    if let InfraSelection::Only(names) = selection {
        if let Some(unknown) = names.iter().find(|n| !objects.iter().any(|o| &o.name == *n)) {
            return Err(ConfigError::UnknownArtifact(unknown.clone()));
        }
    }
    let mut apply = Vec::new();
    let mut unchanged = Vec::new();
    for object in objects {
        let selected = match selection {
            InfraSelection::All => true,
            InfraSelection::Only(names) => names.contains(&object.name),
            InfraSelection::Changed => previous
                .and_then(|m| m.get(&object.name))
                .map_or(true, |entry| entry.content_hash != object.content_hash()),
        };
        if selected {
            apply.push(object);
        } else {
            unchanged.push(object.name);
        }
    }
    Ok((apply, unchanged))
}

/// Deploy the selected subset of `objects` and record it under `key`.
///
/// The infra manifest is written only after every selected object applied;
/// after a failure the stored hashes stay as they were, so the next deploy
/// retries everything that had not landed.
pub async fn deploy_changed(
    warehouse: &dyn Warehouse,
    store: &dyn ManifestStore,
    key: &str,
    objects: Vec<InfraObject>,
    selection: &InfraSelection,
    timeout: Timeout,
) -> Result<DeployReport> {
    let previous = store.get(key).await?;
    let (to_apply, unchanged) = select_changed(objects, previous.as_ref(), selection)?;
    info!(
        key,
        changed = to_apply.len(),
        unchanged = unchanged.len(),
        "infra changes resolved"
    );

    let mut report = deploy_infra(warehouse, &to_apply, timeout).await?;

    let mut manifest = BuildManifest::new(uuid::Uuid::new_v4().to_string(), key);
    for name in &unchanged {
        if let Some(entry) = previous.as_ref().and_then(|m| m.get(name)) {
            manifest.insert(name.clone(), entry.clone());
        }
    }
    for object in &to_apply {
        manifest.insert(
            object.name.clone(),
            ManifestEntry {
                content_hash: object.content_hash(),
                physical_location: object.name.clone(),
                built_at: Utc::now(),
            },
        );
    }
    store.put(key, &manifest).await?;

    report.unchanged = unchanged;
    Ok(report)
}

/// Apply `objects` in order; the first failure aborts the deploy.
///
/// Later objects are never attempted once one fails, since a later kind may
/// need the failed object to exist.
pub async fn deploy_infra(
    warehouse: &dyn Warehouse,
    objects: &[InfraObject],
    timeout: Timeout,
) -> Result<DeployReport> {
    let mut report = DeployReport::default();
    for (position, object) in objects.iter().enumerate() {
        let start = Instant::now();
        let op = format!("apply {} {}", object.kind, object.name);
        let applied = with_timeout(&op, timeout, async {
            Ok(warehouse.apply_ddl(&object.name, &object.ddl).await?)
        })
        .await;

        match applied {
            Ok(_) => {
                debug!(
                    object = %object.name,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "infra object applied"
                );
                obs::emit_infra_applied(&object.name, object.kind.as_str(), position);
                report.applied.push(object.name.clone());
            }
            Err(err) => {
                error!(object = %object.name, kind = %object.kind, error = %err, "infra deploy aborted");
                return Err(StrataError::Infra {
                    object: object.name.clone(),
                    detail: err.to_string(),
                });
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, kind: &str) -> InfraDefinition {
        InfraDefinition {
            name: name.to_string(),
            kind: kind.to_string(),
            ddl: format!("create or replace {kind} {name}"),
        }
    }

    fn names(objects: &[InfraObject]) -> Vec<&str> {
        objects.iter().map(|o| o.name.as_str()).collect()
    }

    #[test]
    fn kind_priority_beats_input_order() {
        let sorted = sort_for_apply(vec![
            def("APP_DB.SILVER.V_ORDERS", "view"),
            def("APP_DB.SILVER.ORDERS", "table"),
            def("APP_DB", "database"),
            def("APP_DB.SILVER", "schema"),
            def("ANALYTICS_WH", "warehouse"),
        ])
        .unwrap();
        assert_eq!(
            names(&sorted),
            vec![
                "APP_DB",
                "ANALYTICS_WH",
                "APP_DB.SILVER",
                "APP_DB.SILVER.ORDERS",
                "APP_DB.SILVER.V_ORDERS"
            ]
        );
    }

    #[test]
    fn same_kind_sorted_by_name() {
        let a = sort_for_apply(vec![def("B_DB", "database"), def("A_DB", "database")]).unwrap();
        let b = sort_for_apply(vec![def("A_DB", "database"), def("B_DB", "database")]).unwrap();
        assert_eq!(a, b);
        assert_eq!(names(&a), vec!["A_DB", "B_DB"]);
    }

    #[test]
    fn only_selection_rejects_undeclared_names() {
        let objects = sort_for_apply(vec![def("APP_DB", "database")]).unwrap();
        let only = InfraSelection::Only(["GHOST_DB".to_string()].into_iter().collect());
        let err = select_changed(objects, None, &only).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownArtifact(ref n) if n == "GHOST_DB"));
    }

    #[test]
    fn hash_covers_kind_and_ddl() {
        let a = InfraObject::try_from(def("APP_DB", "database")).unwrap();
        let mut b = a.clone();
        b.ddl.push(';');
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash(), a.clone().content_hash());
    }

    #[test]
    fn unknown_kind_fails_whole_sort() {
        let err = sort_for_apply(vec![def("APP_DB", "database"), def("P", "pipe")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKind { ref object, .. } if object == "P"));
    }
}
