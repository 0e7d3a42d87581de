pub mod config;
pub mod ddl;
pub mod runner;
pub mod schema;
pub mod warehouse;
