//! In-memory warehouse fake (testing only)
//!
//! `MemoryWarehouse` keeps a catalog of source tables, the set of created
//! schemas and objects, and an ordered log of every operation with the role
//! in effect when it ran. Failures and latency can be injected per object.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Materialization, ObjectRef, SchemaRef, TableRef};
use crate::warehouse::{ExecOutcome, Warehouse, WarehouseError, WarehouseResult};

/// One recorded warehouse call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseOp {
    UseRole(String),
    CreateSchema(SchemaRef),
    ListTables {
        database: String,
        schema: String,
        role: String,
    },
    CloneTable {
        source: ObjectRef,
        target: ObjectRef,
        role: String,
    },
    SampleTable {
        source: ObjectRef,
        target: ObjectRef,
        percent: u8,
        role: String,
    },
    Materialize {
        target: ObjectRef,
        materialization: Materialization,
        sql: String,
    },
    ApplyDdl {
        object: String,
    },
    DropSchema(SchemaRef),
}

impl WarehouseOp {
    /// Whether this call writes a physical object.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            WarehouseOp::CloneTable { .. }
                | WarehouseOp::SampleTable { .. }
                | WarehouseOp::Materialize { .. }
                | WarehouseOp::ApplyDdl { .. }
        )
    }

    /// Name of the object written, if any.
    pub fn written_object(&self) -> Option<String> {
        match self {
            WarehouseOp::CloneTable { target, .. }
            | WarehouseOp::SampleTable { target, .. }
            | WarehouseOp::Materialize { target, .. } => Some(target.to_string()),
            WarehouseOp::ApplyDdl { object } => Some(object.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    role: String,
    denied_roles: HashSet<String>,
    /// database -> the only role allowed to read it
    read_roles: HashMap<String, String>,
    catalog: BTreeMap<SchemaRef, BTreeSet<String>>,
    schemas: BTreeSet<SchemaRef>,
    objects: BTreeMap<ObjectRef, String>,
    ops: Vec<WarehouseOp>,
    fail_on: HashSet<String>,
    delay_on: HashMap<String, Duration>,
}

/// In-memory warehouse backed by a `Mutex<State>`.
#[derive(Debug)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
}

impl Default for MemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                role: "SYSADMIN".to_string(),
                ..State::default()
            }),
        }
    }

    /// Start the session with `role`.
    pub fn with_role(self, role: &str) -> Self {
        self.state.lock().unwrap().role = role.to_string();
        self
    }

    /// Refuse any switch to `role`.
    pub fn deny_role(self, role: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .denied_roles
            .insert(role.to_string());
        self
    }

    /// Only `role` may read from `database`.
    pub fn restrict_reads(self, database: &str, role: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .read_roles
            .insert(database.to_string(), role.to_string());
        self
    }

    /// Seed a source base table.
    pub fn with_table(self, database: &str, schema: &str, table: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let schema_ref = SchemaRef::new(database, schema);
            state.schemas.insert(schema_ref.clone());
            state
                .catalog
                .entry(schema_ref.clone())
                .or_default()
                .insert(table.to_string());
            state
                .objects
                .insert(schema_ref.object(table), format!("source {database}.{schema}.{table}"));
        }
        self
    }

    /// Seed an existing schema with no tables.
    pub fn with_schema(self, database: &str, schema: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let schema_ref = SchemaRef::new(database, schema);
            state.schemas.insert(schema_ref.clone());
            state.catalog.entry(schema_ref).or_default();
        }
        self
    }

    /// Seed an already materialized object, e.g. a previous build's output.
    pub fn with_object(self, object: &ObjectRef) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.schemas.insert(object.schema_ref());
            state.objects.insert(object.clone(), "seeded".to_string());
        }
        self
    }

    /// Fail every operation that touches `object` (a `DB.S.N`, `DB.S` or infra name).
    pub fn fail_on(&self, object: &str) {
        self.state.lock().unwrap().fail_on.insert(object.to_string());
    }

    /// Stop failing operations on `object`.
    pub fn heal(&self, object: &str) {
        self.state.lock().unwrap().fail_on.remove(object);
    }

    /// Sleep for `delay` before any operation that touches `object`.
    pub fn delay_on(&self, object: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delay_on
            .insert(object.to_string(), delay);
    }

    pub fn ops(&self) -> Vec<WarehouseOp> {
        self.state.lock().unwrap().ops.clone()
    }

    /// Objects written, in call order.
    pub fn writes(&self) -> Vec<String> {
        self.ops()
            .iter()
            .filter_map(WarehouseOp::written_object)
            .collect()
    }

    pub fn has_schema(&self, schema: &SchemaRef) -> bool {
        self.state.lock().unwrap().schemas.contains(schema)
    }

    pub fn has_object(&self, object: &ObjectRef) -> bool {
        self.state.lock().unwrap().objects.contains_key(object)
    }

    /// Sorted object names inside `schema`.
    pub fn objects_in(&self, schema: &SchemaRef) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|o| o.schema_ref() == *schema)
            .map(|o| o.name.clone())
            .collect()
    }

    /// SQL last materialized at `object`.
    pub fn definition_of(&self, object: &ObjectRef) -> Option<String> {
        self.state.lock().unwrap().objects.get(object).cloned()
    }

    async fn pause_for(&self, keys: &[String]) {
        let delay = {
            let state = self.state.lock().unwrap();
            keys.iter().find_map(|k| state.delay_on.get(k).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_fail(state: &State, keys: &[String]) -> WarehouseResult<()> {
        match keys.iter().find(|k| state.fail_on.contains(*k)) {
            Some(k) => Err(WarehouseError::Execution {
                detail: format!("injected failure on {k}"),
            }),
            None => Ok(()),
        }
    }

    fn check_read(state: &State, database: &str, object: &str) -> WarehouseResult<()> {
        match state.read_roles.get(database) {
            Some(required) if *required != state.role => Err(WarehouseError::PermissionDenied {
                object: object.to_string(),
                role: state.role.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn copy_table(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        op: WarehouseOp,
    ) -> WarehouseResult<ExecOutcome> {
        let mut state = self.state.lock().unwrap();
        let keys = [source.to_string(), target.to_string()];
        Self::check_fail(&state, &keys)?;
        Self::check_read(&state, &source.database, &source.to_string())?;
        if !state.objects.contains_key(source) {
            return Err(WarehouseError::NotFound {
                object: source.to_string(),
            });
        }
        if !state.schemas.contains(&target.schema_ref()) {
            return Err(WarehouseError::NotFound {
                object: target.schema_ref().to_string(),
            });
        }
        state
            .objects
            .insert(target.clone(), format!("copy of {source}"));
        state.ops.push(op);
        Ok(ExecOutcome { count: Some(1) })
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn current_role(&self) -> WarehouseResult<String> {
        Ok(self.state.lock().unwrap().role.clone())
    }

    async fn use_role(&self, role: &str) -> WarehouseResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.denied_roles.contains(role) {
            return Err(WarehouseError::PermissionDenied {
                object: format!("role {role}"),
                role: state.role.clone(),
            });
        }
        state.role = role.to_string();
        state.ops.push(WarehouseOp::UseRole(role.to_string()));
        Ok(())
    }

    async fn create_schema_if_not_exists(&self, schema: &SchemaRef) -> WarehouseResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, &[schema.to_string()])?;
        state.schemas.insert(schema.clone());
        state.ops.push(WarehouseOp::CreateSchema(schema.clone()));
        Ok(())
    }

    async fn list_base_tables(
        &self,
        database: &str,
        schema: &str,
    ) -> WarehouseResult<Vec<TableRef>> {
        let mut state = self.state.lock().unwrap();
        let schema_ref = SchemaRef::new(database, schema);
        Self::check_read(&state, database, &schema_ref.to_string())?;
        let role = state.role.clone();
        state.ops.push(WarehouseOp::ListTables {
            database: database.to_string(),
            schema: schema.to_string(),
            role,
        });
        Ok(state
            .catalog
            .get(&schema_ref)
            .map(|tables| tables.iter().map(|t| TableRef::new(schema, t.clone())).collect())
            .unwrap_or_default())
    }

    async fn clone_table(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
    ) -> WarehouseResult<ExecOutcome> {
        self.pause_for(&[source.to_string(), target.to_string()])
            .await;
        let role = self.state.lock().unwrap().role.clone();
        self.copy_table(
            source,
            target,
            WarehouseOp::CloneTable {
                source: source.clone(),
                target: target.clone(),
                role,
            },
        )
    }

    async fn sample_table(
        &self,
        source: &ObjectRef,
        target: &ObjectRef,
        percent: u8,
    ) -> WarehouseResult<ExecOutcome> {
        self.pause_for(&[source.to_string(), target.to_string()])
            .await;
        let role = self.state.lock().unwrap().role.clone();
        self.copy_table(
            source,
            target,
            WarehouseOp::SampleTable {
                source: source.clone(),
                target: target.clone(),
                percent,
                role,
            },
        )
    }

    async fn materialize(
        &self,
        target: &ObjectRef,
        materialization: Materialization,
        sql: &str,
    ) -> WarehouseResult<ExecOutcome> {
        self.pause_for(&[target.to_string(), target.name.clone()])
            .await;
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, &[target.to_string(), target.name.clone()])?;
        if !state.schemas.contains(&target.schema_ref()) {
            return Err(WarehouseError::NotFound {
                object: target.schema_ref().to_string(),
            });
        }
        state.objects.insert(target.clone(), sql.to_string());
        state.ops.push(WarehouseOp::Materialize {
            target: target.clone(),
            materialization,
            sql: sql.to_string(),
        });
        Ok(ExecOutcome { count: Some(1) })
    }

    async fn apply_ddl(&self, object: &str, _ddl: &str) -> WarehouseResult<ExecOutcome> {
        self.pause_for(&[object.to_string()]).await;
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, &[object.to_string()])?;
        state.ops.push(WarehouseOp::ApplyDdl {
            object: object.to_string(),
        });
        Ok(ExecOutcome { count: Some(1) })
    }

    async fn drop_schema_if_exists(&self, schema: &SchemaRef) -> WarehouseResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, &[schema.to_string()])?;
        state.schemas.remove(schema);
        state.objects.retain(|o, _| o.schema_ref() != *schema);
        state.catalog.remove(schema);
        state.ops.push(WarehouseOp::DropSchema(schema.clone()));
        Ok(())
    }
}
