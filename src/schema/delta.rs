//! The `stage.table01_delta` staging table: change-tracking rows for `table01`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::types::{Column, ColumnType, ObjectName, TableDef};
use crate::warehouse::Value;

pub const SCHEMA: &str = "stage";
pub const TABLE: &str = "table01_delta";
pub const CHANGE_TYPE_LEN: u32 = 20;

/// Declared shape of `stage.table01_delta`.
///
/// Only `delta_id` is constrained. `change_type` carries no check constraint
/// and `table01_id` no foreign key.
pub fn table01_delta() -> TableDef {
    TableDef {
        name: ObjectName::new(SCHEMA, TABLE),
        columns: vec![
            Column::required("delta_id", ColumnType::Integer),
            Column::new("table01_id", ColumnType::Integer),
            Column::new("change_type", ColumnType::Varchar(Some(CHANGE_TYPE_LEN))),
            Column::new("change_date", ColumnType::Date),
        ],
        primary_key: Some("delta_id".to_string()),
    }
}

/// Conventional `change_type` spellings. Nothing enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// One row of `stage.table01_delta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub delta_id: i64,
    pub table01_id: Option<i64>,
    pub change_type: Option<String>,
    pub change_date: Option<NaiveDate>,
}

impl DeltaRecord {
    pub fn new(delta_id: i64, table01_id: i64, change_type: &str, change_date: NaiveDate) -> Self {
        Self {
            delta_id,
            table01_id: Some(table01_id),
            change_type: Some(change_type.to_string()),
            change_date: Some(change_date),
        }
    }

    pub fn of_kind(
        delta_id: i64,
        table01_id: i64,
        kind: ChangeKind,
        change_date: NaiveDate,
    ) -> Self {
        Self::new(delta_id, table01_id, kind.as_str(), change_date)
    }

    /// Values in declared column order.
    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int(self.delta_id),
            self.table01_id.map_or(Value::Null, Value::Int),
            self.change_type
                .as_ref()
                .map_or(Value::Null, |s| Value::Text(s.clone())),
            self.change_date.map_or(Value::Null, Value::Date),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_columns_in_order() {
        let def = table01_delta();
        assert_eq!(def.name.to_string(), "stage.table01_delta");
        assert_eq!(
            def.column_names(),
            vec!["delta_id", "table01_id", "change_type", "change_date"]
        );
        assert_eq!(def.key_index(), Some(0));
        assert!(!def.columns[0].nullable);
        assert!(def.columns[1..].iter().all(|c| c.nullable));
    }

    #[test]
    fn record_to_row_keeps_nulls() {
        let rec = DeltaRecord {
            delta_id: 7,
            table01_id: None,
            change_type: None,
            change_date: None,
        };
        assert_eq!(
            rec.to_row(),
            vec![Value::Int(7), Value::Null, Value::Null, Value::Null]
        );
    }

    #[test]
    fn change_kind_serializes_uppercase() {
        let rec = DeltaRecord::of_kind(
            1,
            100,
            ChangeKind::Delete,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"change_type\":\"DELETE\""));
        assert!(json.contains("\"change_date\":\"2024-01-01\""));
    }
}
