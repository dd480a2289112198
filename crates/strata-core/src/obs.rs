//! Structured lifecycle events for builds, clones, teardowns and deploys.
//!
//! Every event is an `info!` line carrying an `event = "..."` field so log
//! pipelines can filter on it. Use `--json` on the CLI for machine output.

use tracing::info;

/// Span tagged with the build id, for instrumenting one invocation.
///
/// ```ignore
/// run(graph).instrument(obs::build_span("3f2c...", "staging")).await
/// // every event inside carries build_id and context
/// ```
pub fn build_span(build_id: &str, context: &str) -> tracing::Span {
    tracing::info_span!("strata.build", build_id = %build_id, context = %context)
}

pub fn emit_build_started(build_id: &str, context: &str, artifacts: usize, changed: usize) {
    info!(
        event = "build.started",
        build_id = %build_id,
        context = %context,
        artifacts = artifacts,
        changed = changed,
    );
}

/// One artifact reached a terminal state.
pub fn emit_artifact_finished(artifact: &str, state: &str, duration_ms: u64) {
    info!(
        event = "artifact.finished",
        artifact = %artifact,
        state = %state,
        duration_ms = duration_ms,
    );
}

pub fn emit_build_finished(
    build_id: &str,
    built: usize,
    deferred: usize,
    failed: usize,
    skipped: usize,
    success: bool,
) {
    info!(
        event = "build.finished",
        build_id = %build_id,
        built = built,
        deferred = deferred,
        failed = failed,
        skipped = skipped,
        success = success,
    );
}

pub fn emit_clone_finished(target: &str, tables: usize, mode: &str, duration_ms: u64) {
    info!(
        event = "clone.finished",
        target = %target,
        tables = tables,
        mode = %mode,
        duration_ms = duration_ms,
    );
}

pub fn emit_teardown_finished(namespace: &str) {
    info!(event = "teardown.finished", namespace = %namespace);
}

pub fn emit_infra_applied(object: &str, kind: &str, position: usize) {
    info!(event = "infra.applied", object = %object, kind = %kind, position = position);
}

/// Manifest could not be persisted after a successful build (warning level).
pub fn emit_manifest_write_error(context: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "manifest.write_error", context = %context, error = %error);
}
