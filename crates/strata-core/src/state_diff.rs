//! State differ: which artifacts must be rebuilt since the last baseline.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strata_state::BuildManifest;

use crate::domain::{BuildArtifact, ConfigError};
use crate::graph::ArtifactGraph;

/// Why an artifact landed in the change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ChangeReason {
    /// No previous manifest at all: full build.
    NoBaseline,
    /// Absent from the previous manifest.
    New,
    /// Content hash differs from the manifest entry.
    HashChanged,
    /// Unchanged itself, but an upstream input changed.
    UpstreamChanged { upstream: String },
    /// Requested explicitly by the caller.
    Forced,
}

impl ChangeReason {
    pub fn label(&self) -> String {
        match self {
            ChangeReason::NoBaseline => "no baseline".to_string(),
            ChangeReason::New => "new".to_string(),
            ChangeReason::HashChanged => "modified".to_string(),
            ChangeReason::UpstreamChanged { upstream } => format!("upstream {upstream} changed"),
            ChangeReason::Forced => "forced".to_string(),
        }
    }
}

/// Artifacts that must be rebuilt, each with the first reason found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    reasons: BTreeMap<String, ChangeReason>,
}

impl ChangeSet {
    pub fn contains(&self, id: &str) -> bool {
        self.reasons.contains_key(id)
    }

    pub fn reason(&self, id: &str) -> Option<&ChangeReason> {
        self.reasons.get(id)
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    /// Changed ids in sorted order.
    pub fn ids(&self) -> BTreeSet<String> {
        self.reasons.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ChangeReason)> {
        self.reasons.iter()
    }
}

/// Compute the change set of `graph` against `previous`.
///
/// With no previous manifest every artifact is changed; this is the
/// first-run fallback, not an error. Otherwise an artifact is changed when
/// it is new, its hash differs, or any dependency is changed. Dependencies
/// are visited before dependents, so one pass in topological order reaches
/// the closure.
pub fn diff(
    previous: Option<&BuildManifest>,
    graph: &ArtifactGraph,
) -> Result<ChangeSet, ConfigError> {
    diff_with_forced(previous, graph, &[])
}

/// [`diff`] with `forced` ids treated as changed regardless of their hash.
pub fn diff_with_forced(
    previous: Option<&BuildManifest>,
    graph: &ArtifactGraph,
    forced: &[String],
) -> Result<ChangeSet, ConfigError> {
    for id in forced {
        if !graph.contains(id) {
            return Err(ConfigError::UnknownArtifact(id.clone()));
        }
    }
    let order = graph.topological_order()?;

    let mut reasons = BTreeMap::new();
    let Some(previous) = previous else {
        for artifact in order {
            reasons.insert(artifact.id.clone(), ChangeReason::NoBaseline);
        }
        return Ok(ChangeSet { reasons });
    };

    for artifact in order {
        let reason = if forced.contains(&artifact.id) {
            Some(ChangeReason::Forced)
        } else {
            match previous.get(&artifact.id) {
                None => Some(ChangeReason::New),
                Some(entry) if entry.content_hash != artifact.content_hash => {
                    Some(ChangeReason::HashChanged)
                }
                Some(_) => artifact
                    .depends_on
                    .iter()
                    .find(|dep| reasons.contains_key(*dep))
                    .map(|dep| ChangeReason::UpstreamChanged {
                        upstream: dep.clone(),
                    }),
            }
        };
        if let Some(reason) = reason {
            reasons.insert(artifact.id.clone(), reason);
        }
    }
    Ok(ChangeSet { reasons })
}

/// Convenience over raw artifacts; the graph is validated first, so a
/// cyclic set is rejected here as a [`ConfigError::DependencyCycle`].
pub fn diff_artifacts(
    previous: Option<&BuildManifest>,
    artifacts: &[BuildArtifact],
) -> Result<ChangeSet, ConfigError> {
    let graph = ArtifactGraph::from_artifacts(artifacts.iter().cloned())?;
    diff(previous, &graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strata_state::ManifestEntry;

    use crate::domain::ArtifactKind;

    fn art(id: &str, sql: &str, deps: &[&str]) -> BuildArtifact {
        BuildArtifact::new(id, ArtifactKind::Table, "silver", sql)
            .with_dependencies(deps.iter().copied())
    }

    fn manifest_of(artifacts: &[BuildArtifact]) -> BuildManifest {
        let mut m = BuildManifest::new("b0", "staging");
        for a in artifacts {
            m.insert(
                a.id.clone(),
                ManifestEntry {
                    content_hash: a.content_hash.clone(),
                    physical_location: format!("APP_DB.SILVER.{}", a.id),
                    built_at: Utc::now(),
                },
            );
        }
        m
    }

    #[test]
    fn upstream_change_closes_over_dependents() {
        let before = vec![
            art("A", "select 1", &[]),
            art("B", "select * from A", &["A"]),
            art("C", "select * from B", &["B"]),
        ];
        let manifest = manifest_of(&before);
        let mut after = before.clone();
        after[0] = art("A", "select 2", &[]);

        let changed = diff_artifacts(Some(&manifest), &after).unwrap();
        assert_eq!(
            changed.ids(),
            ["A", "B", "C"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(changed.reason("A"), Some(&ChangeReason::HashChanged));
        assert_eq!(
            changed.reason("C"),
            Some(&ChangeReason::UpstreamChanged {
                upstream: "B".to_string()
            })
        );
    }

    #[test]
    fn first_run_rebuilds_everything() {
        let arts = vec![art("A", "select 1", &[]), art("B", "select 2", &["A"])];
        let changed = diff_artifacts(None, &arts).unwrap();
        assert_eq!(changed.len(), 2);
        assert!(changed.iter().all(|(_, r)| *r == ChangeReason::NoBaseline));
    }

    #[test]
    fn unchanged_set_is_empty() {
        let arts = vec![art("A", "select 1", &[]), art("B", "select 2", &["A"])];
        let manifest = manifest_of(&arts);
        assert!(diff_artifacts(Some(&manifest), &arts).unwrap().is_empty());
    }

    #[test]
    fn new_artifact_is_changed_but_siblings_are_not() {
        let before = vec![art("A", "select 1", &[])];
        let manifest = manifest_of(&before);
        let after = vec![art("A", "select 1", &[]), art("N", "select 3", &[])];
        let changed = diff_artifacts(Some(&manifest), &after).unwrap();
        assert_eq!(changed.ids(), ["N".to_string()].into_iter().collect());
        assert_eq!(changed.reason("N"), Some(&ChangeReason::New));
    }

    #[test]
    fn forced_ids_propagate_and_unknown_ids_fail() {
        let arts = vec![art("A", "select 1", &[]), art("B", "select 2", &["A"])];
        let manifest = manifest_of(&arts);
        let graph = ArtifactGraph::from_artifacts(arts).unwrap();
        let changed = diff_with_forced(Some(&manifest), &graph, &["A".to_string()]).unwrap();
        assert_eq!(changed.len(), 2);
        assert!(matches!(
            diff_with_forced(Some(&manifest), &graph, &["Z".to_string()]),
            Err(ConfigError::UnknownArtifact(_))
        ));
    }

    #[test]
    fn cycle_is_fatal() {
        let arts = vec![art("A", "x", &["B"]), art("B", "y", &["A"])];
        assert!(matches!(
            diff_artifacts(None, &arts),
            Err(ConfigError::DependencyCycle { .. })
        ));
    }
}
