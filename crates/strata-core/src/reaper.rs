//! Lifecycle reaper: drop a change request's isolated namespace.

use tracing::info;

use crate::domain::{IsolatedNamespace, Result, SchemaRef, StrataError};
use crate::metrics::METRICS;
use crate::obs;
use crate::warehouse::Warehouse;

/// Drop the isolated namespace of `change_request` at `revision`.
///
/// The namespace id is re-derived with the same rule used to create it; it is
/// never looked up. Dropping an absent namespace succeeds. Returns the
/// dropped schema.
pub async fn teardown(
    warehouse: &dyn Warehouse,
    ci_database: &str,
    change_request: u64,
    revision: &str,
) -> Result<SchemaRef> {
    let isolated = IsolatedNamespace::derive(change_request, revision)?;
    let schema = SchemaRef::new(ci_database, isolated.id());
    schema.validate()?;

    warehouse
        .drop_schema_if_exists(&schema)
        .await
        .map_err(|e| StrataError::Teardown {
            namespace: schema.to_string(),
            detail: e.to_string(),
        })?;

    info!(namespace = %schema, "isolated namespace dropped");
    METRICS.inc_namespaces_dropped();
    obs::emit_teardown_finished(&schema.to_string());
    Ok(schema)
}
