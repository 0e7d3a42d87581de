//! Host engines that DDL batches are submitted to.
//!
//! [`SnowSql`] drives the `snowsql` command-line client against a Snowflake
//! account. [`MemoryWarehouse`] is an in-process catalog that executes the
//! same DDL subset and enforces column types and primary keys; it backs the
//! `--target memory` dry run and the test-suite.

pub mod error;
pub mod memory;
pub mod snowsql;
pub mod sql;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::EngineError;
pub use memory::{Catalog, CreateMode, MemoryWarehouse};
pub use snowsql::SnowSql;

use crate::schema::ObjectKind;

/// Query used to verify that a warehouse is reachable.
pub const CONNECTIVITY_QUERY: &str = "SELECT CURRENT_USER(), CURRENT_ACCOUNT(), CURRENT_REGION();";

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Date(NaiveDate),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Date(d) => write!(f, "DATE '{}'", d.format("%Y-%m-%d")),
        }
    }
}

/// Result of submitting one batch.
///
/// Engine-side failures are reported here with `success == false`; `Err` from
/// [`Warehouse::execute_batch`] means the batch could not be submitted at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub success: bool,
    /// Statements that completed before the batch stopped.
    pub executed: usize,
    pub stdout: String,
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn ok(executed: usize, stdout: String) -> Self {
        Self {
            success: true,
            executed,
            stdout,
            error: None,
        }
    }

    pub fn failed(executed: usize, stdout: String, error: String) -> Self {
        Self {
            success: false,
            executed,
            stdout,
            error: Some(error),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait Warehouse {
    /// Short label used in logs.
    fn label(&self) -> &'static str;

    /// Run [`CONNECTIVITY_QUERY`]; `Ok(false)` when the engine answered with
    /// an error.
    async fn test_connection(&self) -> Result<bool> {
        Ok(self.execute_batch(CONNECTIVITY_QUERY).await?.success)
    }

    /// Submit `sql` (one or more `;`-separated statements) as a single unit.
    async fn execute_batch(&self, sql: &str) -> Result<BatchOutcome>;

    /// Names of objects of `kind` in `schema`, sorted. Base tables only for
    /// [`ObjectKind::Table`].
    async fn list_objects(&self, schema: &str, kind: ObjectKind) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_display_quotes_and_escapes() {
        assert_eq!(Value::Text("it's".into()).to_string(), "'it''s'");
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).to_string(),
            "DATE '2024-01-02'"
        );
        assert_eq!(Value::Null.to_string(), "NULL");
    }
}
