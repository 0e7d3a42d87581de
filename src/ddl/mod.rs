//! The DDL tree: `<root>/<table folder>/<prefix>.<object>.sql`, where the
//! prefix is the logical schema the file creates objects in.

pub mod placeholders;
pub mod tree;

pub use placeholders::{SchemaMap, LOGICAL_SCHEMAS};
pub use tree::{
    collect_schema_files, discover_table_folders, join_batch, validate, DdlFile, SchemaMismatch,
    Validation, UNKNOWN_SCHEMA,
};
