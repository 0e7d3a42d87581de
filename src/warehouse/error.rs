use thiserror::Error;

/// Errors raised by a host engine while executing a statement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("schema '{0}' does not exist")]
    SchemaMissing(String),
    #[error("insufficient privileges to create objects in schema '{0}'")]
    PermissionDenied(String),
    #[error("object '{name}' already exists as {existing}")]
    NameConflict { name: String, existing: &'static str },
    #[error("object '{0}' already exists")]
    AlreadyExists(String),
    #[error("object '{0}' does not exist")]
    ObjectMissing(String),
    #[error("duplicate key value {key} violates primary key of '{table}'")]
    DuplicateKey { table: String, key: String },
    #[error("NULL result in a non-nullable column '{0}'")]
    NullKey(String),
    #[error("string '{value}' is too long for column '{column}' (max {max})")]
    ValueTooLong {
        column: String,
        value: String,
        max: u32,
    },
    #[error("value {value} is not a valid {expected} for column '{column}'")]
    TypeMismatch {
        column: String,
        value: String,
        expected: String,
    },
    #[error("insert into '{table}' expected {expected} values, got {got}")]
    ArityMismatch {
        table: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid identifier '{0}'")]
    UnknownColumn(String),
    #[error("SQL compilation error: {0}")]
    Syntax(String),
    #[error("unsupported statement: {0}")]
    Unsupported(String),
}
