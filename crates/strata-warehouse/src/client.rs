//! Warehouse client backed by an external SQL command-line tool.
//!
//! Every operation becomes one short script written to the tool's stdin.
//! Each invocation is a fresh session, so the active role is carried by the
//! client and replayed as a `USE ROLE` prefix on every script.

use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use strata_core::{
    ExecOutcome, Materialization, ObjectRef, SchemaRef, TableRef, Timeout, Warehouse,
    WarehouseError, WarehouseResult,
};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::sql;

/// How to reach the SQL tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Program and arguments. The tool must read statements from stdin and
    /// print result rows as tab- or comma-separated lines.
    pub command: Vec<String>,
    pub statement_timeout: Timeout,
    /// Role the session starts in; queried from the warehouse when unset.
    pub initial_role: Option<String>,
    /// Compute warehouse selected before every script.
    pub compute_warehouse: Option<String>,
}

impl ClientConfig {
    /// Whitespace-split `command_line` into program and arguments.
    pub fn parse(command_line: &str) -> WarehouseResult<Self> {
        let command: Vec<String> = command_line.split_whitespace().map(String::from).collect();
        if command.is_empty() {
            return Err(WarehouseError::Client("empty SQL client command".to_string()));
        }
        Ok(Self {
            command,
            statement_timeout: Timeout::none(),
            initial_role: None,
            compute_warehouse: None,
        })
    }

    pub fn with_statement_timeout(mut self, timeout: Timeout) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_initial_role(mut self, role: impl Into<String>) -> Self {
        self.initial_role = Some(role.into());
        self
    }

    pub fn with_compute_warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.compute_warehouse = Some(warehouse.into());
        self
    }
}

/// Captured result of one script.
#[derive(Debug, Clone)]
pub struct StatementOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

pub struct CommandWarehouse {
    config: ClientConfig,
    role: Mutex<Option<String>>,
}

impl CommandWarehouse {
    pub fn new(config: ClientConfig) -> WarehouseResult<Self> {
        if config.command.is_empty() {
            return Err(WarehouseError::Client("empty SQL client command".to_string()));
        }
        let role = Mutex::new(config.initial_role.clone());
        Ok(Self { config, role })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn active_role(&self) -> Option<String> {
        self.role.lock().ok().and_then(|r| r.clone())
    }

    fn set_role(&self, role: &str) {
        if let Ok(mut current) = self.role.lock() {
            *current = Some(role.to_string());
        }
    }

    /// Run `statements` as one script under the active role.
    ///
    /// `object` names what the statements act on; it is reported in
    /// not-found and permission errors.
    pub async fn execute(
        &self,
        object: &str,
        statements: &[String],
    ) -> WarehouseResult<StatementOutput> {
        let role = self.active_role();
        let script = match &self.config.compute_warehouse {
            Some(compute) => {
                let mut all = vec![sql::use_warehouse(compute)];
                all.extend_from_slice(statements);
                sql::script(role.as_deref(), &all)
            }
            None => sql::script(role.as_deref(), statements),
        };
        let output = self.run_script(&script).await?;
        if output.exit_code != 0 {
            let err = classify_failure(
                object,
                role.as_deref().unwrap_or("<session default>"),
                output.exit_code,
                &output.stderr,
            );
            warn!(object = %object, exit_code = output.exit_code, error = %err, "statement failed");
            return Err(err);
        }
        debug!(object = %object, duration_ms = output.duration_ms, "statement executed");
        Ok(output)
    }

    async fn run_script(&self, script: &str) -> WarehouseResult<StatementOutput> {
        let start = Instant::now();
        let program = &self.config.command[0];
        let mut child = Command::new(program)
            .args(&self.config.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WarehouseError::Client(format!("cannot start {program}: {e}")))?;

        let stdin = child.stdin.take();
        let run = async move {
            if let Some(mut stdin) = stdin {
                // A tool that exits without draining stdin closes the pipe early.
                match stdin.write_all(script.as_bytes()).await {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            child.wait_with_output().await
        };

        let timeout = self.config.statement_timeout;
        let waited = if timeout.is_enabled() {
            tokio::time::timeout(Duration::from_secs(timeout.secs()), run)
                .await
                .map_err(|_| WarehouseError::Timeout {
                    secs: timeout.secs(),
                })?
        } else {
            run.await
        };
        let output = waited.map_err(|e| WarehouseError::Client(format!("{program}: {e}")))?;

        Ok(StatementOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute_counted(
        &self,
        object: &str,
        statements: &[String],
    ) -> WarehouseResult<ExecOutcome> {
        let output = self.execute(object, statements).await?;
        Ok(ExecOutcome {
            count: parse_count(&output.stdout),
        })
    }
}

fn permission_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)insufficient privileges|permission denied|access denied|not authorized")
            .expect("static regex")
    })
}

fn missing_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)does not exist|not found").expect("static regex"))
}

fn count_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s+rows?\s+(?:affected|inserted|produced)").expect("static regex")
    })
}

/// Map a failed script's stderr to a [`WarehouseError`].
///
/// "does not exist" wins over "not authorized": warehouses report a missing
/// object and an invisible one with the same message.
pub fn classify_failure(object: &str, role: &str, exit_code: i32, stderr: &str) -> WarehouseError {
    if missing_pattern().is_match(stderr) {
        return WarehouseError::NotFound {
            object: object.to_string(),
        };
    }
    if permission_pattern().is_match(stderr) {
        return WarehouseError::PermissionDenied {
            object: object.to_string(),
            role: role.to_string(),
        };
    }
    let detail = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("client exited with code {exit_code}"));
    WarehouseError::Execution { detail }
}

/// Last affected-row count reported on stdout, if any.
pub fn parse_count(stdout: &str) -> Option<u64> {
    count_pattern()
        .captures_iter(stdout)
        .last()
        .and_then(|c| c[1].parse().ok())
}

/// `(schema, table)` rows from tab- or comma-separated catalog output.
/// A header row and blank lines are skipped.
pub fn parse_table_rows(stdout: &str) -> Vec<TableRef> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let sep = if line.contains('\t') { '\t' } else { ',' };
            let mut fields = line.split(sep).map(|f| f.trim().trim_matches('"'));
            let schema = fields.next()?;
            let table = fields.next()?;
            if schema.is_empty() || table.is_empty() || schema.eq_ignore_ascii_case("table_schema")
            {
                return None;
            }
            Some(TableRef::new(schema, table))
        })
        .collect()
}

#[async_trait]
impl Warehouse for CommandWarehouse {
    async fn current_role(&self) -> WarehouseResult<String> {
        if let Some(role) = self.active_role() {
            return Ok(role);
        }
        let output = self
            .execute("current role", &[sql::CURRENT_ROLE.to_string()])
            .await?;
        let role = output
            .stdout
            .lines()
            .map(|l| l.trim().trim_matches('"'))
            .find(|l| !l.is_empty() && !l.eq_ignore_ascii_case("CURRENT_ROLE()"))
            .ok_or_else(|| WarehouseError::Client("client reported no current role".to_string()))?
            .to_string();
        self.set_role(&role);
        Ok(role)
    }

    async fn use_role(&self, role: &str) -> WarehouseResult<()> {
        let current = self.active_role();
        let script = sql::script(Some(role), &[]);
        let output = self.run_script(&script).await?;
        if output.exit_code != 0 {
            return Err(
                match classify_failure(
                    &format!("role {role}"),
                    current.as_deref().unwrap_or("<session default>"),
                    output.exit_code,
                    &output.stderr,
                ) {
                    WarehouseError::NotFound { object } => WarehouseError::PermissionDenied {
                        object,
                        role: current.unwrap_or_default(),
                    },
                    other => other,
                },
            );
        }
        self.set_role(role);
        debug!(role = %role, "session role switched");
        Ok(())
    }

    async fn create_schema_if_not_exists(&self, schema: &SchemaRef) -> WarehouseResult<()> {
        self.execute(&schema.to_string(), &[sql::create_schema(schema)])
            .await?;
        Ok(())
    }

    async fn list_base_tables(
        &self,
        database: &str,
        schema: &str,
    ) -> WarehouseResult<Vec<TableRef>> {
        let object = format!("{database}.{schema}");
        let output = self
            .execute(&object, &[sql::list_base_tables(database, schema)])
            .await?;
        Ok(parse_table_rows(&output.stdout))
    }

    async fn clone_table(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
    ) -> WarehouseResult<ExecOutcome> {
        self.execute_counted(&source.to_string(), &[sql::clone_table(source, target)])
            .await
    }

    async fn sample_table(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        percent: u8,
    ) -> WarehouseResult<ExecOutcome> {
        self.execute_counted(
            &source.to_string(),
            &[sql::sample_table(source, target, percent)],
        )
        .await
    }

    async fn materialize(
        &self,
        target: &ObjectRef,
        materialization: Materialization,
        sql: &str,
    ) -> WarehouseResult<ExecOutcome> {
        self.execute_counted(
            &target.to_string(),
            &sql::materialize(target, materialization, sql),
        )
        .await
    }

    async fn apply_ddl(&self, object: &str, ddl: &str) -> WarehouseResult<ExecOutcome> {
        self.execute_counted(object, &[ddl.to_string()]).await
    }

    async fn drop_schema_if_exists(&self, schema: &SchemaRef) -> WarehouseResult<()> {
        self.execute(&schema.to_string(), &[sql::drop_schema(schema)])
            .await?;
        Ok(())
    }
}
