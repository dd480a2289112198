//! `CommandWarehouse` against small shell scripts standing in for a SQL tool.

use std::path::Path;

use strata_core::{
    clone_namespace, CloneSelection, CloneSpec, SchemaRef, StrataError, TableRef, Timeout,
    Warehouse, WarehouseError,
};
use strata_warehouse::{ClientConfig, CommandWarehouse};

fn shell(script: &str) -> ClientConfig {
    ClientConfig {
        command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        statement_timeout: Timeout::none(),
        initial_role: Some("DEPLOYER".to_string()),
        compute_warehouse: None,
    }
}

/// A tool that appends every script it receives to `log`.
fn recording(log: &Path) -> ClientConfig {
    shell(&format!("cat >> '{}'", log.display()))
}

#[tokio::test]
async fn successful_statement_returns_stdout() {
    let wh = CommandWarehouse::new(shell("cat > /dev/null; echo '3 rows inserted'")).unwrap();
    let outcome = wh
        .apply_ddl("APP_DB", "create database if not exists APP_DB")
        .await
        .unwrap();
    assert_eq!(outcome.count, Some(3));
}

#[tokio::test]
async fn role_switch_prefixes_later_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("statements.sql");
    let wh = CommandWarehouse::new(recording(&log)).unwrap();

    wh.use_role("CI_READER").await.unwrap();
    wh.create_schema_if_not_exists(&SchemaRef::new("CI_DB", "PR_1__abcdef0"))
        .await
        .unwrap();

    let text = std::fs::read_to_string(&log).unwrap();
    assert_eq!(
        text,
        "USE ROLE CI_READER;\nUSE ROLE CI_READER;\nCREATE SCHEMA IF NOT EXISTS CI_DB.PR_1__abcdef0;\n"
    );
    assert_eq!(wh.current_role().await.unwrap(), "CI_READER");
}

#[tokio::test]
async fn compute_warehouse_is_selected_after_role() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("statements.sql");
    let wh = CommandWarehouse::new(recording(&log).with_compute_warehouse("ANALYTICS_WH")).unwrap();
    wh.apply_ddl("APP_DB", "create database if not exists APP_DB;")
        .await
        .unwrap();

    let text = std::fs::read_to_string(&log).unwrap();
    assert_eq!(
        text,
        "USE ROLE DEPLOYER;\nUSE WAREHOUSE ANALYTICS_WH;\ncreate database if not exists APP_DB;\n"
    );
}

#[tokio::test]
async fn catalog_rows_are_parsed() {
    let wh = CommandWarehouse::new(shell(
        "cat > /dev/null; printf 'TABLE_SCHEMA\\tTABLE_NAME\\nSALES\\tORDERS\\nSALES\\tREFUNDS\\n'",
    ))
    .unwrap();
    let tables = wh.list_base_tables("APP_DB", "SALES").await.unwrap();
    assert_eq!(
        tables,
        vec![TableRef::new("SALES", "ORDERS"), TableRef::new("SALES", "REFUNDS")]
    );
}

#[tokio::test]
async fn denied_statement_is_permission_error() {
    let wh = CommandWarehouse::new(shell(
        "cat > /dev/null; echo 'SQL access control error: Insufficient privileges' >&2; exit 1",
    ))
    .unwrap();
    let err = wh
        .list_base_tables("APP_DB", "SALES")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WarehouseError::PermissionDenied {
            object: "APP_DB.SALES".to_string(),
            role: "DEPLOYER".to_string()
        }
    );
}

#[tokio::test]
async fn denied_role_is_not_adopted() {
    let wh = CommandWarehouse::new(shell(
        "cat > /dev/null; echo \"Role 'GHOST' does not exist or not authorized.\" >&2; exit 1",
    ))
    .unwrap();
    let err = wh.use_role("GHOST").await.unwrap_err();
    assert!(matches!(err, WarehouseError::PermissionDenied { .. }));
    assert_eq!(wh.current_role().await.unwrap(), "DEPLOYER");
}

#[tokio::test]
async fn slow_statement_times_out() {
    let config = shell("sleep 5").with_statement_timeout(Timeout::from_secs(1));
    let wh = CommandWarehouse::new(config).unwrap();
    let err = wh
        .drop_schema_if_exists(&SchemaRef::new("CI_DB", "PR_1__abcdef0"))
        .await
        .unwrap_err();
    assert_eq!(err, WarehouseError::Timeout { secs: 1 });
}

#[tokio::test]
async fn missing_program_is_client_error() {
    let config = ClientConfig::parse("strata-no-such-sql-tool --quiet").unwrap();
    let wh = CommandWarehouse::new(config).unwrap();
    let err = wh.current_role().await.unwrap_err();
    assert!(matches!(err, WarehouseError::Client(ref m) if m.contains("strata-no-such-sql-tool")));
}

#[tokio::test]
async fn slim_clone_issues_clone_statements_under_access_role() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("statements.sql");
    let wh = CommandWarehouse::new(recording(&log)).unwrap();

    let target = SchemaRef::new("CI_DB", "PR_5__abcdef0");
    let selection =
        CloneSelection::from_lists(&[], &["SALES.ORDERS".to_string()]).unwrap();
    let spec = CloneSpec::new("APP_DB", selection, target, 0, "CI_READER").unwrap();
    let report = clone_namespace(&wh, &spec, Timeout::none()).await.unwrap();
    assert_eq!(report.objects, vec!["SALES_ORDERS".to_string()]);

    let text = std::fs::read_to_string(&log).unwrap();
    assert!(text.contains(
        "USE ROLE CI_READER;\nCREATE OR REPLACE TABLE CI_DB.PR_5__abcdef0.SALES_ORDERS CLONE APP_DB.SALES.ORDERS;\n"
    ));
    assert!(!text.contains("information_schema"));
    assert!(text.ends_with("USE ROLE DEPLOYER;\n"));
}

#[tokio::test]
async fn failed_clone_surfaces_as_clone_error() {
    let wh = CommandWarehouse::new(shell(
        "if grep -q CLONE; then echo 'Warehouse suspended' >&2; exit 1; fi",
    ))
    .unwrap();
    let selection = CloneSelection::from_lists(&[], &["SALES.ORDERS".to_string()]).unwrap();
    let spec = CloneSpec::new(
        "APP_DB",
        selection,
        SchemaRef::new("CI_DB", "PR_5__abcdef0"),
        0,
        "CI_READER",
    )
    .unwrap();
    let err = clone_namespace(&wh, &spec, Timeout::none()).await.unwrap_err();
    assert!(matches!(err, StrataError::Clone { ref detail, .. } if detail.contains("Warehouse suspended")));
}
