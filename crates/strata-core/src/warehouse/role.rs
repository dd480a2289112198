//! Scoped access-role acquisition.

use std::future::Future;

use tracing::{debug, warn};

use crate::domain::{Result, StrataError};
use crate::warehouse::Warehouse;

/// Run `body` with the session switched to `role`, then switch back.
///
/// The caller's original role is restored on every exit path of `body`:
/// success, error, or timeout reported as an error. If `body` failed and the
/// restore fails as well, the body's error wins and the restore failure is
/// logged. If `body` succeeded but the restore fails, the restore failure is
/// returned, since the session is left holding an elevated role.
pub async fn with_role<T, F, Fut>(warehouse: &dyn Warehouse, role: &str, body: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let previous = warehouse.current_role().await?;
    warehouse
        .use_role(role)
        .await
        .map_err(|e| StrataError::Access {
            object: format!("role {role}"),
            role: role.to_string(),
            detail: e.to_string(),
        })?;
    debug!(role = %role, previous = %previous, "access role acquired");

    let outcome = body().await;

    let restored = warehouse.use_role(&previous).await;
    match (outcome, restored) {
        (Ok(value), Ok(())) => {
            debug!(role = %previous, "access role restored");
            Ok(value)
        }
        (Ok(_), Err(e)) => Err(StrataError::Access {
            object: format!("role {previous}"),
            role: previous,
            detail: format!("failed to restore caller role: {e}"),
        }),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(e)) => {
            warn!(role = %previous, error = %e, "failed to restore caller role after error");
            Err(err)
        }
    }
}
