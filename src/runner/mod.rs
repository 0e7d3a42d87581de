//! Execution flows over a [`Warehouse`]: connectivity check, per-schema and
//! all-schema DDL runs, and schema drops.

pub mod drop;
pub mod execute;
pub mod summary;

use anyhow::{bail, Result};
use tracing::{error, info};

use crate::warehouse::Warehouse;

pub use drop::{
    confirmation_phrase, drop_all, drop_objects, require_confirmation, DropOutcome, DropSummary,
};
pub use execute::{execute_all, execute_schema, ExecutionResult};
pub use summary::ExecutionSummary;

/// Run the connectivity query; every flow starts here.
pub async fn check_connection<W: Warehouse>(wh: &W) -> Result<()> {
    info!(target = wh.label(), "testing connection");
    if wh.test_connection().await? {
        info!("connection successful");
        Ok(())
    } else {
        error!("connection failed");
        bail!("connection to {} failed", wh.label())
    }
}
