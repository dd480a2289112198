//! End-to-end build invocation: baseline → diff → (clone) → execute → persist.

use serde::{Deserialize, Serialize};
use strata_state::{ManifestStore, TargetLocks};
use tracing::{info, warn, Instrument};

use crate::clone::clone_namespace;
use crate::control::Timeout;
use crate::domain::{CloneSpec, Result};
use crate::executor::{BuildExecutor, BuildOptions, BuildOutcome};
use crate::graph::ArtifactGraph;
use crate::obs;
use crate::router::NamespaceRouter;
use crate::state_diff::{diff_with_forced, ChangeReason, ChangeSet};
use crate::warehouse::Warehouse;

/// Per-invocation inputs beyond the project itself.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Artifacts rebuilt regardless of their hash.
    pub forced: Vec<String>,
    /// Compare against the manifest stored under this key instead of the
    /// invocation's own key (e.g. a CI run diffing against `production`).
    pub state_from: Option<String>,
    /// Populate the isolated namespace before building (`ci` only).
    pub clone: Option<CloneSpec>,
}

/// What a build would do, computed without touching the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedArtifact {
    pub id: String,
    /// Where the artifact is written if built.
    pub location: String,
    pub action: PlannedAction,
    pub reason: Option<ChangeReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum PlannedAction {
    Build,
    Defer { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub baseline: Option<String>,
    pub artifacts: Vec<PlannedArtifact>,
}

impl BuildPlan {
    pub fn to_build(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.action == PlannedAction::Build)
            .count()
    }
}

/// Wires the warehouse, manifest store and deploy locks for one context.
pub struct Pipeline<'a> {
    warehouse: &'a dyn Warehouse,
    store: &'a dyn ManifestStore,
    locks: &'a dyn TargetLocks,
    router: NamespaceRouter,
    options: BuildOptions,
    clone_timeout: Timeout,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        warehouse: &'a dyn Warehouse,
        store: &'a dyn ManifestStore,
        locks: &'a dyn TargetLocks,
        router: NamespaceRouter,
    ) -> Self {
        Self {
            warehouse,
            store,
            locks,
            router,
            options: BuildOptions::default(),
            clone_timeout: Timeout::from_secs(1800),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_clone_timeout(mut self, timeout: Timeout) -> Self {
        self.clone_timeout = timeout;
        self
    }

    pub fn router(&self) -> &NamespaceRouter {
        &self.router
    }

    /// Key this invocation's manifest is stored under.
    ///
    /// CI manifests are kept per isolated namespace so concurrent change
    /// requests never overwrite each other's baseline.
    pub fn manifest_key(&self) -> String {
        match self.router.isolated() {
            Some(isolated) if self.router.context().is_ci() => format!("ci.{}", isolated.id()),
            _ => self.router.context().as_str().to_string(),
        }
    }

    fn baseline_key(&self, request: &BuildRequest) -> String {
        request
            .state_from
            .clone()
            .unwrap_or_else(|| self.manifest_key())
    }

    async fn changes(
        &self,
        graph: &ArtifactGraph,
        request: &BuildRequest,
    ) -> Result<(Option<strata_state::BuildManifest>, ChangeSet)> {
        let key = self.baseline_key(request);
        let previous = self.store.get(&key).await?;
        if previous.is_none() {
            info!(baseline = %key, "no previous manifest; full build");
        }
        let changed = diff_with_forced(previous.as_ref(), graph, &request.forced)?;
        Ok((previous, changed))
    }

    /// Resolve locations and change status for every artifact.
    pub async fn plan(&self, graph: &ArtifactGraph, request: &BuildRequest) -> Result<BuildPlan> {
        let (previous, changed) = self.changes(graph, request).await?;
        let ci = self.router.context().is_ci();
        let artifacts = graph
            .topological_order()?
            .into_iter()
            .map(|artifact| {
                let entry = previous.as_ref().and_then(|m| m.get(&artifact.id));
                let action = match entry {
                    Some(entry) if !ci && !changed.contains(&artifact.id) => PlannedAction::Defer {
                        from: entry.physical_location.clone(),
                    },
                    _ => PlannedAction::Build,
                };
                PlannedArtifact {
                    id: artifact.id.clone(),
                    location: self.router.locate(artifact).to_string(),
                    action,
                    reason: changed.reason(&artifact.id).cloned(),
                }
            })
            .collect();
        Ok(BuildPlan {
            baseline: previous.map(|m| m.build_id),
            artifacts,
        })
    }

    /// Run a full build invocation.
    ///
    /// Shared targets (staging, production) are locked for the duration. The
    /// manifest is written once, after every artifact is terminal, and only
    /// when the build fully succeeded; otherwise the previous baseline stays.
    pub async fn run(&self, graph: &ArtifactGraph, request: &BuildRequest) -> Result<BuildOutcome> {
        let executor = BuildExecutor::new(self.warehouse, &self.router, self.options.clone());
        let span = obs::build_span(executor.build_id(), self.router.context().as_str());
        self.run_with(&executor, graph, request)
            .instrument(span)
            .await
    }

    async fn run_with(
        &self,
        executor: &BuildExecutor<'_>,
        graph: &ArtifactGraph,
        request: &BuildRequest,
    ) -> Result<BuildOutcome> {
        let context = self.router.context();
        let _lock = if context.is_shared_target() {
            let key = format!("{}.{}", self.router.database(), context);
            Some(self.locks.acquire(&key).await?)
        } else {
            None
        };

        let (previous, changed) = self.changes(graph, request).await?;
        obs::emit_build_started(executor.build_id(), context.as_str(), graph.len(), changed.len());

        if let (true, Some(spec)) = (context.is_ci(), request.clone.as_ref()) {
            clone_namespace(self.warehouse, spec, self.clone_timeout).await?;
        }

        let outcome = executor.build(graph, &changed, previous.as_ref()).await?;

        if outcome.is_success() {
            let key = self.manifest_key();
            if let Err(err) = self.store.put(&key, &outcome.manifest).await {
                obs::emit_manifest_write_error(&key, &err);
                return Err(err.into());
            }
            info!(key = %key, entries = outcome.manifest.len(), "manifest persisted");
        } else {
            warn!("build incomplete; previous manifest kept as baseline");
        }

        obs::emit_build_finished(
            &outcome.build_id,
            outcome.built().len(),
            outcome.deferred().len(),
            outcome.failed().len(),
            outcome.skipped().len(),
            outcome.is_success(),
        );
        Ok(outcome)
    }
}
