//! Build executor: materialize or defer every artifact in dependency order.
//!
//! Each artifact moves `pending → {built | deferred | failed | skipped}` and
//! every state is terminal for the invocation. Artifacts of one dependency
//! level may run concurrently (bounded by `threads`); a level starts only
//! after the previous level is fully terminal, so a failure's dependents are
//! always marked skipped before anything downstream is attempted.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strata_state::{BuildManifest, ManifestEntry};
use tracing::{debug, info, warn};

use crate::control::{with_timeout, CancelToken, Timeout};
use crate::domain::{BuildArtifact, Result, StrataError};
use crate::graph::ArtifactGraph;
use crate::metrics::METRICS;
use crate::obs;
use crate::router::NamespaceRouter;
use crate::state_diff::ChangeSet;
use crate::warehouse::Warehouse;

/// Why an artifact was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    UpstreamFailed { upstream: String },
    Cancelled,
}

/// Terminal state of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ArtifactState {
    /// Materialized at `location` by this invocation.
    Built { location: String },
    /// Not rewritten; readers resolve to the previous `location`.
    Deferred { location: String },
    Failed { reason: String },
    Skipped { reason: SkipReason },
}

impl ArtifactState {
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactState::Built { .. } => "built",
            ArtifactState::Deferred { .. } => "deferred",
            ArtifactState::Failed { .. } => "failed",
            ArtifactState::Skipped { .. } => "skipped",
        }
    }

    /// Where downstream readers find this artifact, if anywhere.
    pub fn location(&self) -> Option<&str> {
        match self {
            ArtifactState::Built { location } | ArtifactState::Deferred { location } => {
                Some(location)
            }
            _ => None,
        }
    }

    fn detail(&self) -> String {
        match self {
            ArtifactState::Built { location } => location.clone(),
            ArtifactState::Deferred { location } => format!("reading {location}"),
            ArtifactState::Failed { reason } => reason.clone(),
            ArtifactState::Skipped {
                reason: SkipReason::UpstreamFailed { upstream },
            } => format!("upstream {upstream} failed"),
            ArtifactState::Skipped {
                reason: SkipReason::Cancelled,
            } => "cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    pub id: String,
    pub state: ArtifactState,
    pub duration_ms: u64,
}

/// Executor settings fixed for one invocation.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Upper bound on concurrent materializations within one level.
    pub threads: usize,
    /// Limit for one artifact's materialization.
    pub artifact_timeout: Timeout,
    pub cancel: CancelToken,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            artifact_timeout: Timeout::from_secs(900),
            cancel: CancelToken::new(),
        }
    }
}

/// Result of one build invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub build_id: String,
    pub context: String,
    /// Outcomes in dependency order.
    pub outcomes: Vec<ArtifactOutcome>,
    /// Baseline for the next run: built entries plus carried-forward
    /// entries of deferred artifacts.
    pub manifest: BuildManifest,
    pub cancelled: bool,
}

impl BuildOutcome {
    fn ids_in(&self, label: &str) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.state.label() == label)
            .map(|o| o.id.as_str())
            .collect()
    }

    pub fn built(&self) -> Vec<&str> {
        self.ids_in("built")
    }

    pub fn deferred(&self) -> Vec<&str> {
        self.ids_in("deferred")
    }

    pub fn failed(&self) -> Vec<&str> {
        self.ids_in("failed")
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.ids_in("skipped")
    }

    pub fn state_of(&self, id: &str) -> Option<&ArtifactState> {
        self.outcomes.iter().find(|o| o.id == id).map(|o| &o.state)
    }

    /// Every artifact built or deferred, and not cancelled.
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.outcomes.iter().all(|o| {
                matches!(
                    o.state,
                    ArtifactState::Built { .. } | ArtifactState::Deferred { .. }
                )
            })
    }

    /// `Err(Cancelled)` when the invocation was interrupted.
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancelled {
            Err(StrataError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// One line per artifact plus a tally.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .outcomes
            .iter()
            .map(|o| format!("{:<9} {} ({})", o.state.label(), o.id, o.state.detail()))
            .collect();
        lines.push(format!(
            "built={} deferred={} failed={} skipped={}{}",
            self.built().len(),
            self.deferred().len(),
            self.failed().len(),
            self.skipped().len(),
            if self.cancelled { " (cancelled)" } else { "" }
        ));
        lines
    }
}

fn ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\{\{\s*ref\(\s*['"]([^'"]+)['"]\s*\)\s*\}\}"#).expect("static regex")
    })
}

/// Replace every `{{ ref('id') }}` with the location `id` is read from.
///
/// A reference to an artifact with no readable location is an error.
pub fn render_refs(
    artifact_id: &str,
    sql: &str,
    locations: &HashMap<String, String>,
) -> Result<String> {
    let mut missing = None;
    let rendered = ref_pattern().replace_all(sql, |caps: &regex::Captures<'_>| {
        match locations.get(&caps[1]) {
            Some(location) => location.clone(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(reference) => Err(StrataError::Materialization {
            artifact: artifact_id.to_string(),
            detail: format!("unresolved reference to {reference}"),
        }),
        None => Ok(rendered.into_owned()),
    }
}

/// Drives one build invocation against a warehouse.
pub struct BuildExecutor<'a> {
    build_id: String,
    warehouse: &'a dyn Warehouse,
    router: &'a NamespaceRouter,
    options: BuildOptions,
}

impl<'a> BuildExecutor<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, router: &'a NamespaceRouter, options: BuildOptions) -> Self {
        Self {
            build_id: uuid::Uuid::new_v4().to_string(),
            warehouse,
            router,
            options,
        }
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Run every artifact of `graph` to a terminal state.
    ///
    /// Outside `ci`, an artifact that is not in `changed` and has an entry in
    /// `previous` is deferred: nothing is written and downstream references
    /// resolve to its previous location. In `ci` every artifact is built into
    /// the isolated namespace.
    pub async fn build(
        &self,
        graph: &ArtifactGraph,
        changed: &ChangeSet,
        previous: Option<&BuildManifest>,
    ) -> Result<BuildOutcome> {
        let build_id = self.build_id.clone();
        let context = self.router.context();
        let levels = graph.levels()?;

        let mut states: BTreeMap<String, (ArtifactState, u64)> = BTreeMap::new();
        let mut locations: HashMap<String, String> = HashMap::new();
        let mut cancelled = false;

        for level in &levels {
            let mut to_build: Vec<&BuildArtifact> = Vec::new();
            for id in level {
                if states.contains_key(id) {
                    continue;
                }
                let Some(artifact) = graph.get(id) else {
                    continue;
                };
                let previous_entry = previous.and_then(|m| m.get(id));
                match previous_entry {
                    Some(entry) if !context.is_ci() && !changed.contains(id) => {
                        let state = ArtifactState::Deferred {
                            location: entry.physical_location.clone(),
                        };
                        locations.insert(id.clone(), entry.physical_location.clone());
                        self.record(&mut states, id, state, 0);
                    }
                    _ => to_build.push(artifact),
                }
            }

            let threads = self.options.threads.max(1);
            let locations_ref = &locations;
            let results: Vec<(String, ArtifactState, u64)> = stream::iter(to_build)
                .map(|artifact| async move { self.run_artifact(artifact, locations_ref).await })
                .buffer_unordered(threads)
                .collect()
                .await;

            let mut failed = Vec::new();
            for (id, state, duration_ms) in results {
                match &state {
                    ArtifactState::Built { location } => {
                        locations.insert(id.clone(), location.clone());
                    }
                    ArtifactState::Failed { .. } => failed.push(id.clone()),
                    ArtifactState::Skipped {
                        reason: SkipReason::Cancelled,
                    } => cancelled = true,
                    _ => {}
                }
                self.record(&mut states, &id, state, duration_ms);
            }

            failed.sort();
            for id in failed {
                for dependent in graph.transitive_dependents_of(&id)? {
                    if states.contains_key(&dependent) {
                        continue;
                    }
                    let state = ArtifactState::Skipped {
                        reason: SkipReason::UpstreamFailed {
                            upstream: id.clone(),
                        },
                    };
                    self.record(&mut states, &dependent, state, 0);
                }
            }

            if self.options.cancel.is_cancelled() {
                cancelled = true;
            }
            if cancelled {
                break;
            }
        }

        if cancelled {
            warn!("build cancelled; remaining artifacts skipped");
            for id in levels.iter().flatten() {
                if !states.contains_key(id) {
                    let state = ArtifactState::Skipped {
                        reason: SkipReason::Cancelled,
                    };
                    self.record(&mut states, id, state, 0);
                }
            }
        }

        let mut manifest = BuildManifest::new(build_id.clone(), context.as_str());
        let mut outcomes = Vec::with_capacity(states.len());
        for id in levels.iter().flatten() {
            let Some((state, duration_ms)) = states.remove(id) else {
                continue;
            };
            match &state {
                ArtifactState::Built { location } => {
                    if let Some(artifact) = graph.get(id) {
                        manifest.insert(
                            id.clone(),
                            ManifestEntry {
                                content_hash: artifact.content_hash.clone(),
                                physical_location: location.clone(),
                                built_at: Utc::now(),
                            },
                        );
                    }
                }
                ArtifactState::Deferred { .. } => {
                    if let Some(entry) = previous.and_then(|m| m.get(id)) {
                        manifest.insert(id.clone(), entry.clone());
                    }
                }
                _ => {}
            }
            outcomes.push(ArtifactOutcome {
                id: id.clone(),
                state,
                duration_ms,
            });
        }

        let outcome = BuildOutcome {
            build_id,
            context: context.as_str().to_string(),
            outcomes,
            manifest,
            cancelled,
        };
        info!(
            built = outcome.built().len(),
            deferred = outcome.deferred().len(),
            failed = outcome.failed().len(),
            skipped = outcome.skipped().len(),
            "build finished"
        );
        Ok(outcome)
    }

    async fn run_artifact(
        &self,
        artifact: &BuildArtifact,
        locations: &HashMap<String, String>,
    ) -> (String, ArtifactState, u64) {
        if self.options.cancel.is_cancelled() {
            return (
                artifact.id.clone(),
                ArtifactState::Skipped {
                    reason: SkipReason::Cancelled,
                },
                0,
            );
        }

        let start = Instant::now();
        let target = self.router.locate(artifact);
        let operation = format!("materialize {}", artifact.id);
        let result = with_timeout(&operation, self.options.artifact_timeout, async {
            target.validate()?;
            let sql = render_refs(&artifact.id, &artifact.sql, locations)?;
            self.warehouse
                .create_schema_if_not_exists(&target.schema_ref())
                .await?;
            self.warehouse
                .materialize(&target, artifact.materialization, &sql)
                .await?;
            Ok(())
        })
        .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let state = match result {
            Ok(()) => {
                debug!(artifact = %artifact.id, location = %target, "artifact materialized");
                ArtifactState::Built {
                    location: target.to_string(),
                }
            }
            Err(err) => {
                warn!(artifact = %artifact.id, error = %err, "artifact failed");
                ArtifactState::Failed {
                    reason: err.to_string(),
                }
            }
        };
        (artifact.id.clone(), state, duration_ms)
    }

    fn record(
        &self,
        states: &mut BTreeMap<String, (ArtifactState, u64)>,
        id: &str,
        state: ArtifactState,
        duration_ms: u64,
    ) {
        match state {
            ArtifactState::Built { .. } => METRICS.inc_built(),
            ArtifactState::Deferred { .. } => METRICS.inc_deferred(),
            ArtifactState::Failed { .. } => METRICS.inc_failed(),
            ArtifactState::Skipped { .. } => METRICS.inc_skipped(),
        }
        obs::emit_artifact_finished(id, state.label(), duration_ms);
        states.insert(id.to_string(), (state, duration_ms));
    }
}
