pub mod delta;
pub mod parse;
pub mod types;
pub mod write;

pub use delta::{table01_delta, ChangeKind, DeltaRecord};
pub use parse::{detect_schema, parse_create_table, CreateTable};
pub use types::{Column, ColumnType, ObjectName, TableDef};
pub use write::{drop_sql, write_table_ddl, ObjectKind};
