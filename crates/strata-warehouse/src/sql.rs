//! Warehouse SQL for every operation the core issues.
//!
//! Identifiers are interpolated as written. Callers validate them first:
//! project load checks artifact ids and namespaces, the executor checks each
//! `ObjectRef` before its first statement, and clone planning checks every
//! catalog `TableRef`. Only string literals are quoted here.

use strata_core::{Materialization, ObjectRef, SchemaRef};

pub const CURRENT_ROLE: &str = "SELECT CURRENT_ROLE()";

pub fn use_role(role: &str) -> String {
    format!("USE ROLE {role}")
}

pub fn use_warehouse(warehouse: &str) -> String {
    format!("USE WAREHOUSE {warehouse}")
}

pub fn create_schema(schema: &SchemaRef) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {schema}")
}

/// Catalog query for the base tables of one schema. Views and other
/// non-table objects are excluded.
pub fn list_base_tables(database: &str, schema: &str) -> String {
    format!(
        "SELECT table_schema, table_name FROM {database}.information_schema.tables \
         WHERE table_schema = {} AND table_type = 'BASE TABLE' ORDER BY table_name",
        quote_literal(schema)
    )
}

pub fn clone_table(source: &ObjectRef, target: &ObjectRef) -> String {
    format!("CREATE OR REPLACE TABLE {target} CLONE {source}")
}

pub fn sample_table(source: &ObjectRef, target: &ObjectRef, percent: u8) -> String {
    format!("CREATE OR REPLACE TABLE {target} AS SELECT * FROM {source} SAMPLE ({percent})")
}

/// Statements that materialize `sql` at `target`.
///
/// Incremental artifacts create an empty table with the query's shape on
/// first run and append on every run.
pub fn materialize(target: &ObjectRef, materialization: Materialization, sql: &str) -> Vec<String> {
    let body = strip_terminator(sql);
    match materialization {
        Materialization::Table => vec![format!("CREATE OR REPLACE TABLE {target} AS {body}")],
        Materialization::View => vec![format!("CREATE OR REPLACE VIEW {target} AS {body}")],
        Materialization::Incremental => vec![
            format!("CREATE TABLE IF NOT EXISTS {target} AS SELECT * FROM ({body}) WHERE 1 = 0"),
            format!("INSERT INTO {target} {body}"),
        ],
        Materialization::Ddl => vec![body.to_string()],
    }
}

pub fn drop_schema(schema: &SchemaRef) -> String {
    format!("DROP SCHEMA IF EXISTS {schema} CASCADE")
}

/// Single-quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// One script for the client: optional role switch, then each statement
/// terminated by `;`.
pub fn script(role: Option<&str>, statements: &[String]) -> String {
    let mut out = String::new();
    if let Some(role) = role {
        out.push_str(&use_role(role));
        out.push_str(";\n");
    }
    for statement in statements {
        out.push_str(strip_terminator(statement));
        out.push_str(";\n");
    }
    out
}
