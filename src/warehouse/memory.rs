use anyhow::Result;
use chrono::NaiveDate;
use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tracing::{debug, info, instrument, warn};

use super::{
    sql::{parse_statement, split_statements, Statement},
    BatchOutcome, EngineError, Value, Warehouse,
};
use crate::schema::{ColumnType, DeltaRecord, ObjectKind, ObjectName, TableDef};

/// How `create_table` treats an existing table of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// `CREATE TABLE`: fail if it exists.
    Create,
    /// `CREATE OR REPLACE TABLE`: drop data and structure, recreate empty.
    Replace,
    /// `CREATE TABLE IF NOT EXISTS`: keep the existing table untouched.
    IfNotExists,
}

#[derive(Debug, Clone)]
struct TableData {
    def: TableDef,
    rows: Vec<Vec<Value>>,
    keys: HashSet<Value>,
}

impl TableData {
    fn empty(def: TableDef) -> Self {
        Self {
            def,
            rows: Vec::new(),
            keys: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum Object {
    Table(TableData),
    View { body: String },
}

impl Object {
    fn kind(&self) -> ObjectKind {
        match self {
            Object::Table(_) => ObjectKind::Table,
            Object::View { .. } => ObjectKind::View,
        }
    }
}

#[derive(Debug, Default)]
struct SchemaState {
    objects: BTreeMap<String, Object>,
    create_denied: bool,
}

/// Schemas and their objects. All DDL and DML takes the single write lock,
/// so concurrent statements against one object apply in lock order.
#[derive(Debug, Default)]
pub struct Catalog {
    schemas: RwLock<BTreeMap<String, SchemaState>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, SchemaState>> {
        self.schemas.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SchemaState>> {
        self.schemas.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_schema(&self, name: &str, if_not_exists: bool) -> Result<(), EngineError> {
        let name = name.to_ascii_lowercase();
        let mut schemas = self.write();
        if schemas.contains_key(&name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(EngineError::AlreadyExists(name));
        }
        schemas.insert(name, SchemaState::default());
        Ok(())
    }

    /// Deny (or re-allow) object creation in `schema` for the current principal.
    pub fn set_create_denied(&self, schema: &str, denied: bool) -> Result<(), EngineError> {
        let schema = schema.to_ascii_lowercase();
        let mut schemas = self.write();
        let state = schemas
            .get_mut(&schema)
            .ok_or(EngineError::SchemaMissing(schema))?;
        state.create_denied = denied;
        Ok(())
    }

    fn writable<'a>(
        schemas: &'a mut BTreeMap<String, SchemaState>,
        schema: &str,
    ) -> Result<&'a mut SchemaState, EngineError> {
        let state = schemas
            .get_mut(schema)
            .ok_or_else(|| EngineError::SchemaMissing(schema.to_string()))?;
        if state.create_denied {
            return Err(EngineError::PermissionDenied(schema.to_string()));
        }
        Ok(state)
    }

    #[instrument(level = "debug", skip(self, def), fields(table = %def.name))]
    pub fn create_table(&self, def: TableDef, mode: CreateMode) -> Result<(), EngineError> {
        let mut schemas = self.write();
        let state = Self::writable(&mut schemas, &def.name.schema)?;
        match (state.objects.get(&def.name.name), mode) {
            (Some(Object::View { .. }), _) => {
                return Err(EngineError::NameConflict {
                    name: def.name.to_string(),
                    existing: "VIEW",
                })
            }
            (Some(Object::Table(_)), CreateMode::Create) => {
                return Err(EngineError::AlreadyExists(def.name.to_string()))
            }
            (Some(Object::Table(_)), CreateMode::IfNotExists) => return Ok(()),
            (Some(Object::Table(old)), CreateMode::Replace) => {
                debug!(discarded_rows = old.rows.len(), "replacing table");
            }
            (None, _) => {}
        }
        state
            .objects
            .insert(def.name.name.clone(), Object::Table(TableData::empty(def)));
        Ok(())
    }

    pub fn create_view(
        &self,
        name: &ObjectName,
        body: &str,
        replace: bool,
        if_not_exists: bool,
    ) -> Result<(), EngineError> {
        let mut schemas = self.write();
        let state = Self::writable(&mut schemas, &name.schema)?;
        match state.objects.get(&name.name) {
            Some(Object::Table(_)) => {
                return Err(EngineError::NameConflict {
                    name: name.to_string(),
                    existing: "TABLE",
                })
            }
            Some(Object::View { .. }) if if_not_exists => return Ok(()),
            Some(Object::View { .. }) if !replace => {
                return Err(EngineError::AlreadyExists(name.to_string()))
            }
            _ => {}
        }
        state.objects.insert(
            name.name.clone(),
            Object::View {
                body: body.to_string(),
            },
        );
        Ok(())
    }

    pub fn drop_object(
        &self,
        kind: ObjectKind,
        name: &ObjectName,
        if_exists: bool,
    ) -> Result<(), EngineError> {
        let mut schemas = self.write();
        let state = Self::writable(&mut schemas, &name.schema)?;
        match state.objects.get(&name.name).map(Object::kind) {
            None if if_exists => Ok(()),
            None => Err(EngineError::ObjectMissing(name.to_string())),
            Some(existing) if existing != kind => Err(EngineError::NameConflict {
                name: name.to_string(),
                existing: existing.as_str(),
            }),
            Some(_) => {
                state.objects.remove(&name.name);
                Ok(())
            }
        }
    }

    /// Insert rows in declared column order, or in `columns` order when
    /// given. All rows are checked before any is stored.
    pub fn insert(
        &self,
        table: &ObjectName,
        columns: Option<&[String]>,
        rows: Vec<Vec<Value>>,
    ) -> Result<usize, EngineError> {
        let mut schemas = self.write();
        let data = table_mut(&mut schemas, table)?;
        let def = &data.def;

        let positions: Vec<usize> = match columns {
            None => (0..def.columns.len()).collect(),
            Some(cols) => cols
                .iter()
                .map(|c| {
                    def.columns
                        .iter()
                        .position(|d| d.name.eq_ignore_ascii_case(c))
                        .ok_or_else(|| EngineError::UnknownColumn(c.clone()))
                })
                .collect::<Result<_, _>>()?,
        };

        let key_idx = def.key_index();
        let mut staged = Vec::with_capacity(rows.len());
        let mut new_keys = HashSet::new();

        for row in rows {
            if row.len() != positions.len() {
                return Err(EngineError::ArityMismatch {
                    table: table.to_string(),
                    expected: positions.len(),
                    got: row.len(),
                });
            }
            let mut full = vec![Value::Null; def.columns.len()];
            for (value, &pos) in row.into_iter().zip(&positions) {
                full[pos] = coerce(value, &def.columns[pos].name, def.columns[pos].ty)?;
            }
            for (col, value) in def.columns.iter().zip(&full) {
                if !col.nullable && *value == Value::Null {
                    return Err(EngineError::NullKey(col.name.clone()));
                }
            }
            if let Some(k) = key_idx {
                let key = full[k].clone();
                if data.keys.contains(&key) || !new_keys.insert(key.clone()) {
                    return Err(EngineError::DuplicateKey {
                        table: table.to_string(),
                        key: key.to_string(),
                    });
                }
            }
            staged.push(full);
        }

        let n = staged.len();
        data.keys.extend(new_keys);
        data.rows.extend(staged);
        Ok(n)
    }

    pub fn insert_record(&self, table: &ObjectName, rec: &DeltaRecord) -> Result<(), EngineError> {
        self.insert(table, None, vec![rec.to_row()]).map(|_| ())
    }

    /// Current shape of a table, as the catalog reports it.
    pub fn describe(&self, table: &ObjectName) -> Result<TableDef, EngineError> {
        let schemas = self.read();
        table_ref(&schemas, table).map(|t| t.def.clone())
    }

    pub fn row_count(&self, table: &ObjectName) -> Result<usize, EngineError> {
        let schemas = self.read();
        table_ref(&schemas, table).map(|t| t.rows.len())
    }

    pub fn rows(&self, table: &ObjectName) -> Result<Vec<Vec<Value>>, EngineError> {
        let schemas = self.read();
        table_ref(&schemas, table).map(|t| t.rows.clone())
    }

    pub fn view_body(&self, view: &ObjectName) -> Result<String, EngineError> {
        let schemas = self.read();
        let state = schemas
            .get(&view.schema)
            .ok_or_else(|| EngineError::SchemaMissing(view.schema.clone()))?;
        match state.objects.get(&view.name) {
            Some(Object::View { body }) => Ok(body.clone()),
            _ => Err(EngineError::ObjectMissing(view.to_string())),
        }
    }

    pub fn list(&self, schema: &str, kind: ObjectKind) -> Result<Vec<String>, EngineError> {
        let schema = schema.to_ascii_lowercase();
        let schemas = self.read();
        let state = schemas
            .get(&schema)
            .ok_or(EngineError::SchemaMissing(schema))?;
        Ok(state
            .objects
            .iter()
            .filter(|(_, o)| o.kind() == kind)
            .map(|(n, _)| n.clone())
            .collect())
    }

    /// Execute one parsed statement; returns rows affected.
    pub fn apply(&self, stmt: Statement) -> Result<usize, EngineError> {
        match stmt {
            Statement::Connectivity => Ok(0),
            Statement::CreateSchema {
                name,
                replace,
                if_not_exists,
            } => {
                if replace {
                    self.write().insert(name, SchemaState::default());
                    Ok(0)
                } else {
                    self.create_schema(&name, if_not_exists).map(|_| 0)
                }
            }
            Statement::CreateTable(ct) => {
                let mode = match (ct.replace, ct.if_not_exists) {
                    (true, _) => CreateMode::Replace,
                    (false, true) => CreateMode::IfNotExists,
                    (false, false) => CreateMode::Create,
                };
                self.create_table(ct.def, mode).map(|_| 0)
            }
            Statement::CreateView {
                name,
                replace,
                if_not_exists,
                body,
            } => self
                .create_view(&name, &body, replace, if_not_exists)
                .map(|_| 0),
            Statement::Drop {
                kind,
                name,
                if_exists,
            } => self.drop_object(kind, &name, if_exists).map(|_| 0),
            Statement::Insert {
                table,
                columns,
                rows,
            } => self.insert(&table, columns.as_deref(), rows),
        }
    }
}

fn table_ref<'a>(
    schemas: &'a BTreeMap<String, SchemaState>,
    table: &ObjectName,
) -> Result<&'a TableData, EngineError> {
    let state = schemas
        .get(&table.schema)
        .ok_or_else(|| EngineError::SchemaMissing(table.schema.clone()))?;
    match state.objects.get(&table.name) {
        Some(Object::Table(t)) => Ok(t),
        _ => Err(EngineError::ObjectMissing(table.to_string())),
    }
}

fn table_mut<'a>(
    schemas: &'a mut BTreeMap<String, SchemaState>,
    table: &ObjectName,
) -> Result<&'a mut TableData, EngineError> {
    let state = schemas
        .get_mut(&table.schema)
        .ok_or_else(|| EngineError::SchemaMissing(table.schema.clone()))?;
    match state.objects.get_mut(&table.name) {
        Some(Object::Table(t)) => Ok(t),
        _ => Err(EngineError::ObjectMissing(table.to_string())),
    }
}

/// Convert a literal to the column's type. Over-long strings are rejected,
/// never truncated.
fn coerce(value: Value, column: &str, ty: ColumnType) -> Result<Value, EngineError> {
    let mismatch = |shown: String| EngineError::TypeMismatch {
        column: column.to_string(),
        value: shown,
        expected: ty.to_string(),
    };
    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (ColumnType::Integer, Value::Int(i)) => Ok(Value::Int(i)),
        (ColumnType::Integer, Value::Text(s)) => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| mismatch(format!("'{}'", s))),
        (ColumnType::Date, Value::Date(d)) => Ok(Value::Date(d)),
        (ColumnType::Date, Value::Text(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| mismatch(format!("'{}'", s))),
        (ColumnType::Varchar(max), v) => {
            let s = match v {
                Value::Text(s) => s,
                Value::Int(i) => i.to_string(),
                Value::Date(d) => d.format("%Y-%m-%d").to_string(),
                Value::Null => return Ok(Value::Null),
            };
            match max {
                Some(max) if s.chars().count() > max as usize => Err(EngineError::ValueTooLong {
                    column: column.to_string(),
                    value: s,
                    max,
                }),
                _ => Ok(Value::Text(s)),
            }
        }
        (_, v) => Err(mismatch(v.to_string())),
    }
}

/// [`Warehouse`] over a shared [`Catalog`].
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    catalog: Arc<Catalog>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// A warehouse with `schemas` already created.
    pub fn with_schemas<I, S>(schemas: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wh = Self::new();
        for s in schemas {
            wh.catalog.create_schema(s.as_ref(), true)?;
        }
        Ok(wh)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Execute statements in order, stopping at the first failure.
    pub fn run_batch(&self, sql: &str) -> (usize, Result<usize, EngineError>) {
        let mut executed = 0;
        let mut affected = 0;
        for stmt in split_statements(sql) {
            match parse_statement(&stmt).and_then(|s| self.catalog.apply(s)) {
                Ok(n) => {
                    executed += 1;
                    affected += n;
                }
                Err(e) => return (executed, Err(e)),
            }
        }
        (executed, Ok(affected))
    }
}

impl Warehouse for MemoryWarehouse {
    fn label(&self) -> &'static str {
        "memory"
    }

    async fn execute_batch(&self, sql: &str) -> Result<BatchOutcome> {
        match self.run_batch(sql) {
            (executed, Ok(affected)) => {
                info!(executed, affected, "memory batch complete");
                Ok(BatchOutcome::ok(
                    executed,
                    format!("{} statement(s) executed, {} row(s) affected", executed, affected),
                ))
            }
            (executed, Err(e)) => {
                warn!(executed, error = %e, "memory batch failed");
                Ok(BatchOutcome::failed(
                    executed,
                    format!("{} statement(s) executed", executed),
                    e.to_string(),
                ))
            }
        }
    }

    async fn list_objects(&self, schema: &str, kind: ObjectKind) -> Result<Vec<String>> {
        Ok(self.catalog.list(schema, kind)?)
    }
}
