//! Warehouse that renders statements without executing them.

use std::sync::Mutex;

use async_trait::async_trait;
use strata_core::{
    ExecOutcome, Materialization, ObjectRef, SchemaRef, TableRef, Warehouse, WarehouseResult,
};
use tracing::info;

use crate::sql;

/// Records every statement a run would issue.
///
/// Catalog queries return no tables, so a dry-run full clone plans nothing
/// beyond the target schema.
#[derive(Debug)]
pub struct DryRunWarehouse {
    role: Mutex<String>,
    statements: Mutex<Vec<String>>,
}

impl DryRunWarehouse {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: Mutex::new(role.into()),
            statements: Mutex::new(Vec::new()),
        }
    }

    /// Statements in issue order.
    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn record(&self, statement: String) {
        info!(statement = %statement, "dry run");
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(statement);
        }
    }
}

#[async_trait]
impl Warehouse for DryRunWarehouse {
    async fn current_role(&self) -> WarehouseResult<String> {
        Ok(self.role.lock().map(|r| r.clone()).unwrap_or_default())
    }

    async fn use_role(&self, role: &str) -> WarehouseResult<()> {
        self.record(sql::use_role(role));
        if let Ok(mut current) = self.role.lock() {
            *current = role.to_string();
        }
        Ok(())
    }

    async fn create_schema_if_not_exists(&self, schema: &SchemaRef) -> WarehouseResult<()> {
        self.record(sql::create_schema(schema));
        Ok(())
    }

    async fn list_base_tables(
        &self,
        database: &str,
        schema: &str,
    ) -> WarehouseResult<Vec<TableRef>> {
        self.record(sql::list_base_tables(database, schema));
        Ok(Vec::new())
    }

    async fn clone_table(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
    ) -> WarehouseResult<ExecOutcome> {
        self.record(sql::clone_table(source, target));
        Ok(ExecOutcome::default())
    }

    async fn sample_table(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        percent: u8,
    ) -> WarehouseResult<ExecOutcome> {
        self.record(sql::sample_table(source, target, percent));
        Ok(ExecOutcome::default())
    }

    async fn materialize(
        &self,
        target: &ObjectRef,
        materialization: Materialization,
        sql: &str,
    ) -> WarehouseResult<ExecOutcome> {
        for statement in sql::materialize(target, materialization, sql) {
            self.record(statement);
        }
        Ok(ExecOutcome::default())
    }

    async fn apply_ddl(&self, _object: &str, ddl: &str) -> WarehouseResult<ExecOutcome> {
        self.record(ddl.trim().to_string());
        Ok(ExecOutcome::default())
    }

    async fn drop_schema_if_exists(&self, schema: &SchemaRef) -> WarehouseResult<()> {
        self.record(sql::drop_schema(schema));
        Ok(())
    }
}
