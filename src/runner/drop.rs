use anyhow::{bail, Result};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::{
    schema::{drop_sql, ObjectKind, ObjectName},
    warehouse::Warehouse,
};

/// Result of dropping every object of one kind from a schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropOutcome {
    pub kind: ObjectKind,
    pub dropped: Vec<String>,
    pub success: bool,
    pub duration_secs: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropSummary {
    pub schema: String,
    pub views: DropOutcome,
    pub tables: DropOutcome,
    pub duration_secs: f64,
}

/// Phrase an operator must type to drop everything in `schema`.
pub fn confirmation_phrase(schema: &str) -> String {
    format!("DELETE {}", schema.to_uppercase())
}

pub fn require_confirmation(schema: &str, given: Option<&str>) -> Result<()> {
    let want = confirmation_phrase(schema);
    match given {
        Some(g) if g == want => Ok(()),
        _ => bail!("drop cancelled: pass --confirm \"{}\" to proceed", want),
    }
}

/// Drop all objects of `kind` in `schema` in one batch.
/// Views use `DROP VIEW IF EXISTS`, tables `DROP TABLE IF EXISTS ... CASCADE`.
pub async fn drop_objects<W: Warehouse>(
    wh: &W,
    schema: &str,
    kind: ObjectKind,
) -> Result<DropOutcome> {
    let started = Instant::now();
    info!("dropping all {}s from {} schema", kind.as_str(), schema.to_uppercase());

    let names = wh.list_objects(schema, kind).await?;
    if names.is_empty() {
        info!("no {}s found in {} schema", kind.as_str(), schema.to_uppercase());
        return Ok(DropOutcome {
            kind,
            dropped: Vec::new(),
            success: true,
            duration_secs: started.elapsed().as_secs_f64(),
            error: None,
        });
    }

    info!("found {} {}(s) to drop: {}", names.len(), kind.as_str(), names.join(", "));
    let batch: Vec<String> = names
        .iter()
        .map(|n| drop_sql(kind, &ObjectName::new(schema, n)))
        .collect();

    let outcome = wh.execute_batch(&batch.join("\n")).await?;
    let duration_secs = started.elapsed().as_secs_f64();
    if outcome.success {
        info!("dropped {} {}(s) in {:.2}s", names.len(), kind.as_str(), duration_secs);
    } else {
        error!(
            error = outcome.error.as_deref().unwrap_or_default(),
            "failed to drop some {}s",
            kind.as_str()
        );
    }

    Ok(DropOutcome {
        kind,
        dropped: if outcome.success { names } else { Vec::new() },
        success: outcome.success,
        duration_secs,
        error: outcome.error,
    })
}

/// Views first, since they depend on tables; then tables. A failure on
/// views is logged and tables are still dropped.
pub async fn drop_all<W: Warehouse>(wh: &W, schema: &str) -> Result<DropSummary> {
    let started = Instant::now();
    info!("dropping all objects from {} schema", schema.to_uppercase());

    let views = drop_objects(wh, schema, ObjectKind::View).await?;
    if !views.success {
        warn!("failed to drop views, continuing with tables");
    }
    let tables = drop_objects(wh, schema, ObjectKind::Table).await?;

    let summary = DropSummary {
        schema: schema.to_string(),
        views,
        tables,
        duration_secs: started.elapsed().as_secs_f64(),
    };
    info!(
        schema = %summary.schema,
        views_ok = summary.views.success,
        tables_ok = summary.tables.success,
        "drop summary: {:.2}s total",
        summary.duration_secs
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::MemoryWarehouse;

    async fn populated() -> Result<MemoryWarehouse> {
        let wh = MemoryWarehouse::with_schemas(["raw", "stage"])?;
        let out = wh
            .execute_batch(
                "CREATE TABLE raw.t1 (id INTEGER);\n\
                 CREATE TABLE raw.t2 (id INTEGER);\n\
                 CREATE VIEW raw.v1 AS SELECT * FROM raw.t1;\n\
                 CREATE TABLE stage.keep (id INTEGER);",
            )
            .await?;
        assert!(out.success);
        Ok(wh)
    }

    #[test]
    fn confirmation() {
        assert_eq!(confirmation_phrase("raw"), "DELETE RAW");
        assert!(require_confirmation("raw", Some("DELETE RAW")).is_ok());
        assert!(require_confirmation("raw", Some("delete raw")).is_err());
        assert!(require_confirmation("raw", None).is_err());
    }

    #[tokio::test]
    async fn drops_only_requested_kind() -> Result<()> {
        let wh = populated().await?;
        let out = drop_objects(&wh, "raw", ObjectKind::View).await?;
        assert!(out.success);
        assert_eq!(out.dropped, vec!["v1"]);
        assert_eq!(wh.catalog().list("raw", ObjectKind::Table)?, vec!["t1", "t2"]);
        Ok(())
    }

    #[tokio::test]
    async fn drop_all_clears_schema_only() -> Result<()> {
        let wh = populated().await?;
        let summary = drop_all(&wh, "raw").await?;
        assert!(summary.views.success && summary.tables.success);
        assert_eq!(summary.tables.dropped, vec!["t1", "t2"]);
        assert!(wh.catalog().list("raw", ObjectKind::Table)?.is_empty());
        assert!(wh.catalog().list("raw", ObjectKind::View)?.is_empty());
        assert_eq!(wh.catalog().list("stage", ObjectKind::Table)?, vec!["keep"]);

        let again = drop_all(&wh, "raw").await?;
        assert!(again.tables.success && again.tables.dropped.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn permission_failure_is_reported() -> Result<()> {
        let wh = populated().await?;
        wh.catalog().set_create_denied("raw", true)?;
        let out = drop_objects(&wh, "raw", ObjectKind::Table).await?;
        assert!(!out.success);
        assert!(out.dropped.is_empty());
        assert!(out.error.unwrap().contains("insufficient privileges"));
        Ok(())
    }
}
