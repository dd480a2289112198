//! Clone orchestrator and lifecycle reaper against the in-memory warehouse.

use std::time::Duration;

use strata_core::fakes::{MemoryWarehouse, WarehouseOp};
use strata_core::{
    clone_namespace, teardown, CloneMode, CloneSelection, CloneSpec, IsolatedNamespace, SchemaRef,
    StrataError, Timeout, Warehouse,
};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn target() -> SchemaRef {
    let ns = IsolatedNamespace::derive(42, "a1b2c3d").unwrap();
    SchemaRef::new("CI_DB", ns.id())
}

fn spec(schemas: &[&str], tables: &[&str], percent: u8) -> CloneSpec {
    let selection = CloneSelection::from_lists(&strings(schemas), &strings(tables)).unwrap();
    CloneSpec::new("APP_DB", selection, target(), percent, "CI_READER").unwrap()
}

fn production() -> MemoryWarehouse {
    MemoryWarehouse::new()
        .with_table("APP_DB", "SALES", "ORDERS")
        .with_table("APP_DB", "SALES", "REFUNDS")
        .with_table("APP_DB", "CRM", "CUSTOMERS")
}

#[tokio::test]
async fn full_clone_flattens_every_base_table() {
    let wh = production();
    let report = clone_namespace(&wh, &spec(&["SALES", "CRM"], &["*"], 0), Timeout::none())
        .await
        .unwrap();

    assert_eq!(report.mode, CloneMode::ZeroCopy);
    assert_eq!(report.tables_cloned, 3);
    assert_eq!(
        wh.objects_in(&target()),
        strings(&["CRM_CUSTOMERS", "SALES_ORDERS", "SALES_REFUNDS"])
    );
    let reads_as_reader = wh.ops().iter().all(|op| match op {
        WarehouseOp::ListTables { role, .. } | WarehouseOp::CloneTable { role, .. } => {
            role == "CI_READER"
        }
        _ => true,
    });
    assert!(reads_as_reader, "every source read runs under the access role");
}

#[tokio::test]
async fn clone_is_idempotent() {
    let wh = production();
    let spec = spec(&["SALES", "CRM"], &[], 0);
    clone_namespace(&wh, &spec, Timeout::none()).await.unwrap();
    let first = wh.objects_in(&target());
    clone_namespace(&wh, &spec, Timeout::none()).await.unwrap();
    assert_eq!(wh.objects_in(&target()), first);
}

#[tokio::test]
async fn slim_mode_never_enumerates_the_catalog() {
    let wh = production();
    let report = clone_namespace(
        &wh,
        &spec(&["SALES", "CRM"], &["SALES.ORDERS"], 0),
        Timeout::none(),
    )
    .await
    .unwrap();

    assert_eq!(report.objects, strings(&["SALES_ORDERS"]));
    assert!(!wh
        .ops()
        .iter()
        .any(|op| matches!(op, WarehouseOp::ListTables { .. })));
    assert_eq!(wh.objects_in(&target()), strings(&["SALES_ORDERS"]));
}

#[tokio::test]
async fn flattened_name_collision_aborts_before_writing() {
    let wh = MemoryWarehouse::new()
        .with_table("APP_DB", "A_B", "C")
        .with_table("APP_DB", "A", "B_C");
    let err = clone_namespace(&wh, &spec(&[], &["A_B.C", "A.B_C"], 0), Timeout::none())
        .await
        .unwrap_err();

    assert!(matches!(err, StrataError::Clone { ref detail, .. } if detail.contains("A_B_C")));
    assert!(wh.writes().is_empty());
}

#[tokio::test]
async fn sampled_mode_copies_with_percent() {
    let wh = production();
    let report = clone_namespace(&wh, &spec(&["CRM"], &[], 10), Timeout::none())
        .await
        .unwrap();

    assert_eq!(report.mode, CloneMode::Sampled { percent: 10 });
    let sampled: Vec<u8> = wh
        .ops()
        .iter()
        .filter_map(|op| match op {
            WarehouseOp::SampleTable { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(sampled, vec![10]);
    assert!(!wh
        .ops()
        .iter()
        .any(|op| matches!(op, WarehouseOp::CloneTable { .. })));
}

#[tokio::test]
async fn failure_aborts_clone_and_restores_role() {
    let wh = production().with_role("DEPLOYER");
    wh.fail_on("APP_DB.SALES.REFUNDS");

    let err = clone_namespace(&wh, &spec(&["SALES"], &[], 0), Timeout::none())
        .await
        .unwrap_err();

    assert!(matches!(err, StrataError::Clone { ref object, .. } if object == "APP_DB.SALES.REFUNDS"));
    assert_eq!(wh.current_role().await.unwrap(), "DEPLOYER");
    assert!(!wh.has_schema(&target()), "a half-cloned namespace is dropped");
    assert!(wh.objects_in(&target()).is_empty());
}

#[tokio::test]
async fn unsafe_catalog_name_aborts_before_writing() {
    let wh = production().with_table("APP_DB", "SALES", "order lines");
    let err = clone_namespace(&wh, &spec(&["SALES"], &[], 0), Timeout::none())
        .await
        .unwrap_err();

    assert!(matches!(err, StrataError::Clone { ref object, .. } if object == "APP_DB.SALES.order lines"));
    assert!(wh.writes().is_empty());
    assert!(!wh.has_schema(&target()));
}

#[tokio::test]
async fn restricted_source_is_access_error() {
    let wh = production().restrict_reads("APP_DB", "PROD_OWNER");
    let err = clone_namespace(&wh, &spec(&["SALES"], &[], 0), Timeout::none())
        .await
        .unwrap_err();

    assert!(matches!(err, StrataError::Access { ref role, .. } if role == "CI_READER"));
    assert!(wh.writes().is_empty());
}

#[tokio::test]
async fn denied_access_role_is_access_error() {
    let wh = production().deny_role("CI_READER");
    let err = clone_namespace(&wh, &spec(&["SALES"], &[], 0), Timeout::none())
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::Access { .. }));
    assert_eq!(wh.current_role().await.unwrap(), "SYSADMIN");
}

#[tokio::test(start_paused = true)]
async fn clone_timeout_aborts_and_restores_role() {
    let wh = production();
    wh.delay_on("APP_DB.SALES.ORDERS", Duration::from_secs(3600));

    let err = clone_namespace(&wh, &spec(&["SALES"], &[], 0), Timeout::from_secs(60))
        .await
        .unwrap_err();

    assert!(matches!(err, StrataError::Clone { ref detail, .. } if detail.contains("timed out")));
    assert_eq!(wh.current_role().await.unwrap(), "SYSADMIN");
}

#[tokio::test]
async fn teardown_is_idempotent() {
    let wh = production();
    clone_namespace(&wh, &spec(&["CRM"], &[], 0), Timeout::none())
        .await
        .unwrap();
    assert!(wh.has_schema(&target()));

    let dropped = teardown(&wh, "CI_DB", 42, "a1b2c3d").await.unwrap();
    assert_eq!(dropped, target());
    assert!(!wh.has_schema(&target()));
    assert!(wh.objects_in(&target()).is_empty());

    let again = teardown(&wh, "CI_DB", 42, "A1B2C3D").await.unwrap();
    assert_eq!(again, target());
}

#[tokio::test]
async fn teardown_leaves_other_change_requests_alone() {
    let wh = production();
    let other = SchemaRef::new("CI_DB", "PR_43__a1b2c3d");
    wh.create_schema_if_not_exists(&other).await.unwrap();

    teardown(&wh, "CI_DB", 42, "a1b2c3d").await.unwrap();
    assert!(wh.has_schema(&other));
}
