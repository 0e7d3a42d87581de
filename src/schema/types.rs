// src/schema/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column types understood by the DDL tree and the in-memory warehouse.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Eq, Hash)]
#[serde(tag = "kind", content = "len", rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    /// `VARCHAR(n)`; `None` is an unbounded string.
    Varchar(Option<u32>),
    Date,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => f.write_str("INTEGER"),
            ColumnType::Varchar(Some(n)) => write!(f, "VARCHAR({})", n),
            ColumnType::Varchar(None) => f.write_str("VARCHAR"),
            ColumnType::Date => f.write_str("DATE"),
        }
    }
}

/// A single column definition as declared in a `CREATE TABLE` statement.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: true,
        }
    }

    pub fn required(name: &str, ty: ColumnType) -> Self {
        Self {
            nullable: false,
            ..Self::new(name, ty)
        }
    }
}

/// `schema.object`, both parts stored lowercase.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectName {
    pub schema: String,
    pub name: String,
}

impl ObjectName {
    pub fn new(schema: &str, name: &str) -> Self {
        Self {
            schema: schema.to_ascii_lowercase(),
            name: name.to_ascii_lowercase(),
        }
    }

    /// Parse `schema.object`. Unqualified names are rejected.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (schema, name) = qualified.trim().split_once('.')?;
        if schema.is_empty() || name.is_empty() || name.contains('.') {
            return None;
        }
        Some(Self::new(schema, name))
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Table shape: ordered columns plus an optional single-column primary key.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq)]
pub struct TableDef {
    pub name: ObjectName,
    pub columns: Vec<Column>,
    pub primary_key: Option<String>,
}

impl TableDef {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Index of the primary key column, if one is declared.
    pub fn key_index(&self) -> Option<usize> {
        let pk = self.primary_key.as_deref()?;
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(pk))
    }
}
