//! Strata-Warehouse: concrete [`strata_core::Warehouse`] implementations.
//!
//! - [`sql`]: the statement text for every warehouse operation
//! - [`CommandWarehouse`]: pipes statements to an external SQL tool, with a
//!   per-statement timeout and stderr classification
//! - [`DryRunWarehouse`]: records statements instead of executing them

pub mod client;
pub mod dry_run;
pub mod sql;

pub use client::{ClientConfig, CommandWarehouse, StatementOutput};
pub use dry_run::DryRunWarehouse;
