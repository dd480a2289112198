//! Clone orchestrator: populate an isolated namespace from production data.
//!
//! The object list is resolved once (from the catalog in full mode, or taken
//! verbatim in slim mode) and then materialized table by table under the
//! access role. Any failure aborts the whole clone and drops the target, so
//! no partially populated namespace survives for a later build.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::control::{with_timeout, Timeout};
use crate::domain::{
    CloneMode, CloneReport, CloneSelection, CloneSpec, ObjectRef, Result, SchemaRef, StrataError,
    TableRef,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::warehouse::{with_role, Warehouse, WarehouseError};

/// A source table paired with its flattened target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClonePlanEntry {
    pub source: ObjectRef,
    pub target: ObjectRef,
}

/// Pair each table with its `schema_table` target name.
///
/// Fails before anything is written if a table name is not a plain
/// identifier (catalog rows are not trusted), or if two sources would
/// flatten to the same target name (e.g. `A_B.C` and `A.B_C`).
pub fn plan_targets(spec: &CloneSpec, tables: &[TableRef]) -> Result<Vec<ClonePlanEntry>> {
    let mut seen: BTreeMap<String, &TableRef> = BTreeMap::new();
    let mut plan = Vec::with_capacity(tables.len());
    for table in tables {
        table.validate().map_err(|e| StrataError::Clone {
            object: format!("{}.{table}", spec.source_database),
            detail: e.to_string(),
        })?;
        let flattened = table.flattened_name();
        if let Some(existing) = seen.insert(flattened.clone(), table) {
            return Err(StrataError::Clone {
                object: table.to_string(),
                detail: format!("target name {flattened} collides with {existing}"),
            });
        }
        plan.push(ClonePlanEntry {
            source: ObjectRef {
                database: spec.source_database.clone(),
                schema: table.schema.clone(),
                name: table.table.clone(),
            },
            target: spec.target.object(flattened),
        });
    }
    Ok(plan)
}

/// Clone `spec` into its target namespace.
///
/// `timeout` bounds catalog enumeration plus materialization; on expiry the
/// clone is reported as aborted like any other failure. After any failure
/// the target schema is dropped, taking already copied tables with it.
pub async fn clone_namespace(
    warehouse: &dyn Warehouse,
    spec: &CloneSpec,
    timeout: Timeout,
) -> Result<CloneReport> {
    spec.validate()?;
    let start = Instant::now();
    let target = spec.target.to_string();

    let operation = format!("clone into {target}");

    let outcome = async {
        warehouse
            .create_schema_if_not_exists(&spec.target)
            .await
            .map_err(|e| map_clone_error(&target, &spec.access_role, e))?;

        // The timeout sits inside the role scope so an expired clone still
        // gives the caller role back.
        with_role(warehouse, &spec.access_role, || async move {
            with_timeout(&operation, timeout, async {
                let tables = resolve_tables(warehouse, spec).await?;
                let plan = plan_targets(spec, &tables)?;
                materialize_all(warehouse, spec, &plan).await
            })
            .await
        })
        .await
    }
    .await;

    match outcome {
        Ok(report) => {
            METRICS.add_tables_cloned(report.tables_cloned as u64);
            obs::emit_clone_finished(
                &target,
                report.tables_cloned,
                mode_label(report.mode),
                start.elapsed().as_millis() as u64,
            );
            Ok(report)
        }
        Err(err) => {
            error!(target = %target, error = %err, "clone aborted; dropping isolated namespace");
            discard_partial(warehouse, &spec.target).await;
            Err(match err {
                StrataError::Timeout { .. } => StrataError::Clone {
                    object: target,
                    detail: err.to_string(),
                },
                other => other,
            })
        }
    }
}

async fn discard_partial(warehouse: &dyn Warehouse, target: &SchemaRef) {
    if let Err(e) = warehouse.drop_schema_if_exists(target).await {
        warn!(target = %target, error = %e, "could not drop partially cloned namespace");
    }
}

fn mode_label(mode: CloneMode) -> &'static str {
    match mode {
        CloneMode::ZeroCopy => "zero_copy",
        CloneMode::Sampled { .. } => "sampled",
    }
}

/// Object list for `spec`. Slim mode never touches the catalog.
async fn resolve_tables(warehouse: &dyn Warehouse, spec: &CloneSpec) -> Result<Vec<TableRef>> {
    match &spec.selection {
        CloneSelection::Slim { tables } => {
            debug!(tables = tables.len(), "slim clone: using explicit table list");
            Ok(tables.iter().cloned().collect())
        }
        CloneSelection::Full { schemas } => {
            let mut tables = Vec::new();
            for schema in schemas {
                let found = warehouse
                    .list_base_tables(&spec.source_database, schema)
                    .await
                    .map_err(|e| {
                        map_clone_error(
                            &format!("{}.{}", spec.source_database, schema),
                            &spec.access_role,
                            e,
                        )
                    })?;
                debug!(schema = %schema, tables = found.len(), "catalog enumerated");
                tables.extend(found);
            }
            Ok(tables)
        }
    }
}

async fn materialize_all(
    warehouse: &dyn Warehouse,
    spec: &CloneSpec,
    plan: &[ClonePlanEntry],
) -> Result<CloneReport> {
    let mode = spec.mode();
    let mut objects = Vec::with_capacity(plan.len());
    for entry in plan {
        let result = match mode {
            CloneMode::ZeroCopy => warehouse.clone_table(&entry.source, &entry.target).await,
            CloneMode::Sampled { percent } => {
                warehouse
                    .sample_table(&entry.source, &entry.target, percent)
                    .await
            }
        };
        result.map_err(|e| map_clone_error(&entry.source.to_string(), &spec.access_role, e))?;
        debug!(source = %entry.source, target = %entry.target, "table cloned");
        objects.push(entry.target.name.clone());
    }
    info!(tables = objects.len(), mode = mode_label(mode), "clone complete");
    Ok(CloneReport {
        tables_cloned: objects.len(),
        mode,
        objects,
    })
}

fn map_clone_error(object: &str, role: &str, err: WarehouseError) -> StrataError {
    match err {
        WarehouseError::PermissionDenied { .. } => StrataError::Access {
            object: object.to_string(),
            role: role.to_string(),
            detail: err.to_string(),
        },
        other => StrataError::Clone {
            object: object.to_string(),
            detail: other.to_string(),
        },
    }
}
