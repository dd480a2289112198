//! Strata Core Library
//!
//! Environment isolation and incremental builds for a data warehouse:
//! namespace routing per execution context, per-change-request isolated
//! namespaces cloned from production, state-diffed builds that defer
//! unchanged artifacts to their last known-good location, kind-ordered
//! infrastructure deploys, and teardown.
//!
//! The warehouse is reached only through the [`Warehouse`] trait; manifests
//! through `strata_state::ManifestStore`.

pub mod clone;
pub mod control;
pub mod domain;
pub mod executor;
pub mod fakes;
pub mod graph;
pub mod infra;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod project;
pub mod reaper;
pub mod router;
pub mod state_diff;
pub mod telemetry;
pub mod template;
pub mod warehouse;

pub use clone::{clone_namespace, plan_targets, ClonePlanEntry};
pub use control::{with_timeout, CancelToken, Timeout};
pub use domain::{
    ArtifactKind, BuildArtifact, CloneMode, CloneReport, CloneSelection, CloneSpec, ConfigError,
    ExecutionContext, IsolatedNamespace, LogicalNamespace, Materialization, ObjectRef, Result,
    SchemaRef, StrataError, TableRef,
};
pub use executor::{
    render_refs, ArtifactOutcome, ArtifactState, BuildExecutor, BuildOptions, BuildOutcome,
    SkipReason,
};
pub use graph::ArtifactGraph;
pub use infra::{
    deploy_changed, deploy_infra, select_changed, sort_for_apply, DeployReport, InfraDefinition,
    InfraObject, InfraSelection,
};
pub use pipeline::{BuildPlan, BuildRequest, Pipeline, PlannedAction, PlannedArtifact};
pub use project::{CloneSection, Project, PROJECT_FILE};
pub use reaper::teardown;
pub use router::{resolve, NamespaceRouter};
pub use state_diff::{diff, diff_artifacts, diff_with_forced, ChangeReason, ChangeSet};
pub use telemetry::init_tracing;
pub use template::{apply_rewrite, plan_rewrite, RewritePlan, TemplateValues};
pub use warehouse::{with_role, ExecOutcome, Warehouse, WarehouseError, WarehouseResult};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
