//! Integration tests for the incremental build path: state diff, defer,
//! failure propagation, timeouts, cancellation, locking and manifest
//! persistence, all against the in-memory warehouse.

use std::time::Duration;

use chrono::Utc;
use strata_core::fakes::MemoryWarehouse;
use strata_core::{
    diff, ArtifactGraph, ArtifactKind, ArtifactState, BuildArtifact, BuildExecutor, BuildOptions,
    BuildRequest, CancelToken, ChangeReason, CloneSelection, CloneSpec, ExecutionContext,
    IsolatedNamespace, NamespaceRouter, ObjectRef, Pipeline, PlannedAction, SchemaRef,
    SkipReason, StrataError, Timeout,
};
use strata_state::fakes::{MemoryManifestStore, MemoryTargetLocks};
use strata_state::{BuildManifest, ManifestEntry, ManifestStore, StorageError, TargetLocks};

fn art(id: &str, sql: &str, deps: &[&str]) -> BuildArtifact {
    BuildArtifact::new(id, ArtifactKind::Table, "SILVER", sql).with_dependencies(deps.iter().copied())
}

fn manifest_for(context: &str, artifacts: &[&BuildArtifact], database: &str) -> BuildManifest {
    let mut m = BuildManifest::new("previous-build", context);
    for a in artifacts {
        m.insert(
            a.id.clone(),
            ManifestEntry {
                content_hash: a.content_hash.clone(),
                physical_location: format!("{database}.SILVER.{}", a.id),
                built_at: Utc::now(),
            },
        );
    }
    m
}

fn router(context: ExecutionContext) -> NamespaceRouter {
    NamespaceRouter::new(context, "APP_DB", "PUBLIC", None).unwrap()
}

fn ci_router() -> NamespaceRouter {
    let isolated = IsolatedNamespace::derive(42, "a1b2c3d").unwrap();
    NamespaceRouter::new(ExecutionContext::Ci, "CI_DB", "PUBLIC", Some(isolated)).unwrap()
}

// ---- State diff closure ----

#[test]
fn diff_closure_rebuilds_downstream_of_changed_upstream() {
    let a1 = art("A", "select 1", &[]);
    let b = art("B", "select * from {{ ref('A') }}", &["A"]);
    let c = art("C", "select * from {{ ref('B') }}", &["B"]);
    let previous = manifest_for("staging", &[&a1, &b, &c], "APP_DB");

    let a2 = art("A", "select 2", &[]);
    let graph = ArtifactGraph::from_artifacts([a2, b, c]).unwrap();
    let changed = diff(Some(&previous), &graph).unwrap();

    assert_eq!(
        changed.ids().into_iter().collect::<Vec<_>>(),
        vec!["A", "B", "C"]
    );
    assert_eq!(
        changed.reason("B"),
        Some(&ChangeReason::UpstreamChanged {
            upstream: "A".to_string()
        })
    );
}

#[test]
fn first_run_changes_every_artifact() {
    let graph = ArtifactGraph::from_artifacts([
        art("A", "select 1", &[]),
        art("B", "select 2", &["A"]),
        art("C", "select 3", &[]),
    ])
    .unwrap();
    let changed = diff(None, &graph).unwrap();
    assert_eq!(changed.len(), graph.len());
}

// ---- Defer correctness ----

#[tokio::test]
async fn staging_defers_unchanged_artifacts_without_writing() {
    let w = art("W", "select 'w'", &[]);
    let x = art("X", "select * from {{ ref('W') }}", &["W"]);
    let y = art("Y", "select 'y'", &[]);
    let previous = manifest_for("staging", &[&w, &y], "APP_DB");
    let graph = ArtifactGraph::from_artifacts([w, x, y]).unwrap();
    let changed = diff(Some(&previous), &graph).unwrap();
    assert_eq!(changed.ids().into_iter().collect::<Vec<_>>(), vec!["X"]);

    let wh = MemoryWarehouse::new();
    let router = router(ExecutionContext::Staging);
    let executor = BuildExecutor::new(&wh, &router, BuildOptions::default());
    let outcome = executor.build(&graph, &changed, Some(&previous)).await.unwrap();

    assert_eq!(outcome.built(), vec!["X"]);
    let mut deferred = outcome.deferred();
    deferred.sort();
    assert_eq!(deferred, vec!["W", "Y"]);
    assert_eq!(wh.writes(), vec!["APP_DB.SILVER.X".to_string()]);

    // X reads W from its previous location.
    let x_sql = wh
        .definition_of(&"APP_DB.SILVER.X".parse::<ObjectRef>().unwrap())
        .unwrap();
    assert_eq!(x_sql, "select * from APP_DB.SILVER.W");
    assert!(outcome.is_success());
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn deferred_reads_resolve_to_previous_location_not_current_namespace() {
    let up = art("UP", "select 1", &[]);
    let down = art("DOWN", "select * from {{ ref('UP') }}", &["UP"]).with_materialization(
        strata_core::Materialization::View,
    );
    let mut previous = manifest_for("production", &[&up], "APP_DB");
    if let Some(entry) = previous.entries.get_mut("UP") {
        entry.physical_location = "ARCHIVE_DB.SILVER.UP".to_string();
    }
    let graph = ArtifactGraph::from_artifacts([up, down]).unwrap();
    let changed = diff(Some(&previous), &graph).unwrap();

    let wh = MemoryWarehouse::new();
    let router = router(ExecutionContext::Production);
    let outcome = BuildExecutor::new(&wh, &router, BuildOptions::default())
        .build(&graph, &changed, Some(&previous))
        .await
        .unwrap();

    assert_eq!(
        outcome.state_of("UP"),
        Some(&ArtifactState::Deferred {
            location: "ARCHIVE_DB.SILVER.UP".to_string()
        })
    );
    let sql = wh
        .definition_of(&"APP_DB.SILVER.DOWN".parse::<ObjectRef>().unwrap())
        .unwrap();
    assert_eq!(sql, "select * from ARCHIVE_DB.SILVER.UP");
}

#[tokio::test]
async fn ci_builds_every_artifact_into_isolated_namespace() {
    let a = art("A", "select 1", &[]);
    let b = art("B", "select * from {{ ref('A') }}", &["A"]);
    let previous = manifest_for("production", &[&a, &b], "APP_DB");
    let graph = ArtifactGraph::from_artifacts([a, b]).unwrap();
    let changed = diff(Some(&previous), &graph).unwrap();
    assert!(changed.is_empty());

    let wh = MemoryWarehouse::new();
    let router = ci_router();
    let outcome = BuildExecutor::new(&wh, &router, BuildOptions::default())
        .build(&graph, &changed, Some(&previous))
        .await
        .unwrap();

    assert_eq!(outcome.built(), vec!["A", "B"]);
    assert!(outcome.deferred().is_empty());
    assert_eq!(
        wh.objects_in(&SchemaRef::new("CI_DB", "PR_42__a1b2c3d")),
        vec!["A".to_string(), "B".to_string()]
    );
}

// ---- Failure propagation ----

#[tokio::test]
async fn failure_skips_dependents_but_not_siblings() {
    let graph = ArtifactGraph::from_artifacts([
        art("A", "select 1", &[]),
        art("B", "select * from {{ ref('A') }}", &["A"]),
        art("B2", "select * from {{ ref('B') }}", &["B"]),
        art("C", "select 3", &[]),
    ])
    .unwrap();
    let changed = diff(None, &graph).unwrap();

    let wh = MemoryWarehouse::new();
    wh.fail_on("APP_DB.SILVER.A");
    let router = router(ExecutionContext::Staging);
    let outcome = BuildExecutor::new(&wh, &router, BuildOptions::default())
        .build(&graph, &changed, None)
        .await
        .unwrap();

    assert!(matches!(outcome.state_of("A"), Some(ArtifactState::Failed { .. })));
    for id in ["B", "B2"] {
        assert_eq!(
            outcome.state_of(id),
            Some(&ArtifactState::Skipped {
                reason: SkipReason::UpstreamFailed {
                    upstream: "A".to_string()
                }
            })
        );
    }
    assert_eq!(outcome.built(), vec!["C"]);
    assert_ne!(outcome.exit_code(), 0);
    assert!(!wh.writes().iter().any(|w| w.ends_with(".B") || w.ends_with(".B2")));
    assert!(!outcome.manifest.entries.contains_key("A"));
    assert!(outcome.ensure_not_cancelled().is_ok());
}

#[tokio::test]
async fn unsafe_artifact_id_fails_without_writing() {
    let graph = ArtifactGraph::from_artifacts([
        art("orders v2; drop schema APP_DB.GOLD", "select 1", &[]),
        art("C", "select 3", &[]),
    ])
    .unwrap();
    let changed = diff(None, &graph).unwrap();

    let wh = MemoryWarehouse::new();
    let router = router(ExecutionContext::Staging);
    let outcome = BuildExecutor::new(&wh, &router, BuildOptions::default())
        .build(&graph, &changed, None)
        .await
        .unwrap();

    assert!(matches!(
        outcome.state_of("orders v2; drop schema APP_DB.GOLD"),
        Some(ArtifactState::Failed { reason }) if reason.contains("invalid identifier")
    ));
    assert_eq!(wh.writes(), vec!["APP_DB.SILVER.C".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn artifact_timeout_is_a_failure() {
    let graph = ArtifactGraph::from_artifacts([
        art("SLOW", "select 1", &[]),
        art("AFTER", "select * from {{ ref('SLOW') }}", &["SLOW"]),
    ])
    .unwrap();
    let changed = diff(None, &graph).unwrap();

    let wh = MemoryWarehouse::new();
    wh.delay_on("APP_DB.SILVER.SLOW", Duration::from_secs(120));
    let router = router(ExecutionContext::Local);
    let options = BuildOptions {
        artifact_timeout: Timeout::from_secs(10),
        ..BuildOptions::default()
    };
    let outcome = BuildExecutor::new(&wh, &router, options)
        .build(&graph, &changed, None)
        .await
        .unwrap();

    match outcome.state_of("SLOW") {
        Some(ArtifactState::Failed { reason }) => assert!(reason.contains("timed out")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(outcome.state_of("AFTER"), Some(ArtifactState::Skipped { .. })));
    assert!(wh.writes().is_empty());
}

#[tokio::test]
async fn parallel_levels_produce_same_result_as_sequential() {
    let artifacts = vec![
        art("A", "select 1", &[]),
        art("B", "select 2", &[]),
        art("C", "select 3", &[]),
        art("D", "select * from {{ ref('A') }} join {{ ref('B') }}", &["A", "B"]),
    ];
    let graph = ArtifactGraph::from_artifacts(artifacts).unwrap();
    let changed = diff(None, &graph).unwrap();
    let router = router(ExecutionContext::Local);

    let wh = MemoryWarehouse::new();
    let options = BuildOptions {
        threads: 4,
        ..BuildOptions::default()
    };
    let outcome = BuildExecutor::new(&wh, &router, options)
        .build(&graph, &changed, None)
        .await
        .unwrap();
    assert_eq!(outcome.built(), vec!["A", "B", "C", "D"]);
    let writes = wh.writes();
    let d = writes.iter().position(|w| w.ends_with(".D")).unwrap();
    assert_eq!(d, writes.len() - 1, "D is written after its whole level");
}

// ---- Cancellation ----

#[tokio::test]
async fn cancelled_build_skips_pending_artifacts() {
    let graph = ArtifactGraph::from_artifacts([
        art("A", "select 1", &[]),
        art("B", "select * from {{ ref('A') }}", &["A"]),
    ])
    .unwrap();
    let changed = diff(None, &graph).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let wh = MemoryWarehouse::new();
    let router = router(ExecutionContext::Local);
    let options = BuildOptions {
        cancel,
        ..BuildOptions::default()
    };
    let outcome = BuildExecutor::new(&wh, &router, options)
        .build(&graph, &changed, None)
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.skipped(), vec!["A", "B"]);
    assert_eq!(outcome.exit_code(), 1);
    assert!(matches!(outcome.ensure_not_cancelled(), Err(StrataError::Cancelled)));
    assert!(wh.writes().is_empty());
}

// ---- Pipeline: persistence and locking ----

#[tokio::test]
async fn successful_build_persists_manifest_and_next_run_defers() {
    let graph = ArtifactGraph::from_artifacts([
        art("A", "select 1", &[]),
        art("B", "select * from {{ ref('A') }}", &["A"]),
    ])
    .unwrap();
    let wh = MemoryWarehouse::new();
    let store = MemoryManifestStore::new();
    let locks = MemoryTargetLocks::new();
    let pipeline = Pipeline::new(&wh, &store, &locks, router(ExecutionContext::Staging));

    let first = pipeline.run(&graph, &BuildRequest::default()).await.unwrap();
    assert_eq!(first.built(), vec!["A", "B"]);
    assert_eq!(store.put_count(), 1);
    assert!(!locks.is_held("APP_DB.staging"));

    let second = pipeline.run(&graph, &BuildRequest::default()).await.unwrap();
    assert_eq!(second.deferred(), vec!["A", "B"]);
    assert_eq!(wh.writes().len(), 2, "second run writes nothing");

    let stored = store.get("staging").await.unwrap().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored.get("B").unwrap().physical_location, "APP_DB.SILVER.B");
}

#[tokio::test]
async fn failed_build_keeps_previous_baseline() {
    let graph = ArtifactGraph::from_artifacts([art("A", "select 1", &[])]).unwrap();
    let wh = MemoryWarehouse::new();
    wh.fail_on("APP_DB.SILVER.A");
    let store = MemoryManifestStore::new();
    let locks = MemoryTargetLocks::new();
    let pipeline = Pipeline::new(&wh, &store, &locks, router(ExecutionContext::Production));

    let outcome = pipeline.run(&graph, &BuildRequest::default()).await.unwrap();
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(store.put_count(), 0);
    assert!(store.get("production").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_deploy_to_same_target_is_rejected() {
    let graph = ArtifactGraph::from_artifacts([art("A", "select 1", &[])]).unwrap();
    let wh = MemoryWarehouse::new();
    let store = MemoryManifestStore::new();
    let locks = MemoryTargetLocks::new();
    let _held = locks.acquire("APP_DB.production").await.unwrap();

    let pipeline = Pipeline::new(&wh, &store, &locks, router(ExecutionContext::Production));
    let err = pipeline.run(&graph, &BuildRequest::default()).await.unwrap_err();
    assert!(matches!(err, StrataError::Storage(StorageError::LockHeld { .. })));
    assert!(wh.writes().is_empty());
}

#[tokio::test]
async fn forced_artifact_rebuilds_with_dependents() {
    let a = art("A", "select 1", &[]);
    let b = art("B", "select * from {{ ref('A') }}", &["A"]);
    let c = art("C", "select 3", &[]);
    let store = MemoryManifestStore::new()
        .with_manifest("local", manifest_for("local", &[&a, &b, &c], "APP_DB"));
    let graph = ArtifactGraph::from_artifacts([a, b, c]).unwrap();
    let wh = MemoryWarehouse::new();
    let locks = MemoryTargetLocks::new();
    let pipeline = Pipeline::new(&wh, &store, &locks, router(ExecutionContext::Local));

    let request = BuildRequest {
        forced: vec!["A".to_string()],
        ..BuildRequest::default()
    };
    let plan = pipeline.plan(&graph, &request).await.unwrap();
    assert_eq!(plan.to_build(), 2);
    let c_plan = plan.artifacts.iter().find(|p| p.id == "C").unwrap();
    assert_eq!(
        c_plan.action,
        PlannedAction::Defer {
            from: "APP_DB.SILVER.C".to_string()
        }
    );
    assert!(wh.ops().is_empty(), "plan never touches the warehouse");

    let outcome = pipeline.run(&graph, &request).await.unwrap();
    assert_eq!(outcome.built(), vec!["A", "B"]);
    assert_eq!(outcome.deferred(), vec!["C"]);
}

#[tokio::test]
async fn ci_pipeline_clones_before_building() {
    let wh = MemoryWarehouse::new()
        .with_table("APP_DB", "SALES", "ORDERS")
        .with_table("APP_DB", "CRM", "CUSTOMERS");
    let store = MemoryManifestStore::new();
    let locks = MemoryTargetLocks::new();
    let router = ci_router();
    let target = router.schema_for("");
    let spec = CloneSpec::new(
        "APP_DB",
        CloneSelection::from_lists(&["SALES".to_string()], &[]).unwrap(),
        target.clone(),
        0,
        "CI_READER",
    )
    .unwrap();
    let graph = ArtifactGraph::from_artifacts([art(
        "ORDER_FACTS",
        "select * from CI_DB.PR_42__a1b2c3d.SALES_ORDERS",
        &[],
    )])
    .unwrap();

    let pipeline = Pipeline::new(&wh, &store, &locks, router);
    let request = BuildRequest {
        clone: Some(spec),
        ..BuildRequest::default()
    };
    let outcome = pipeline.run(&graph, &request).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(
        wh.objects_in(&target),
        vec!["ORDER_FACTS".to_string(), "SALES_ORDERS".to_string()]
    );
    assert!(store.get("ci.PR_42__a1b2c3d").await.unwrap().is_some());
}
