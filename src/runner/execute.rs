use anyhow::Result;
use serde::Serialize;
use std::{path::Path, time::Instant};
use tracing::{error, info, instrument, warn};

use crate::{
    ddl::{collect_schema_files, join_batch, validate, SchemaMap, LOGICAL_SCHEMAS},
    warehouse::Warehouse,
};

/// Outcome of one schema batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Physical schema the batch targeted.
    pub schema: String,
    /// File prefix the statements were collected by.
    pub prefix: String,
    pub success: bool,
    pub file_count: usize,
    pub files: Vec<String>,
    pub duration_secs: f64,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn empty(schema: &str, prefix: &str, started: Instant, error: Option<String>) -> Self {
        Self {
            schema: schema.to_string(),
            prefix: prefix.to_string(),
            success: false,
            file_count: 0,
            files: Vec::new(),
            duration_secs: started.elapsed().as_secs_f64(),
            error,
        }
    }
}

/// Execute every `<prefix>.*.sql` file under `root` as one batch, as written.
///
/// A file whose statement targets a schema other than `prefix` stops the
/// run before anything is submitted.
#[instrument(skip(wh, root), fields(root = %root.as_ref().display()))]
pub async fn execute_schema<W: Warehouse, P: AsRef<Path>>(
    wh: &W,
    root: P,
    prefix: &str,
    target: &str,
) -> Result<ExecutionResult> {
    let started = Instant::now();
    info!(
        "executing {} schema objects (from {}.* files)",
        target.to_uppercase(),
        prefix
    );

    let files = collect_schema_files(&root, prefix)?;
    let validation = validate(prefix, files);

    if !validation.is_ok() {
        for m in &validation.mismatches {
            error!(
                file = %m.file,
                "schema mismatch: prefix '{}' but SQL creates objects in '{}'",
                m.prefix,
                m.detected
            );
        }
        error!("stopping execution: file prefix must match the schema used in SQL statements");
        let names: Vec<&str> = validation.mismatches.iter().map(|m| m.file.as_str()).collect();
        return Ok(ExecutionResult::empty(
            target,
            prefix,
            started,
            Some(format!("schema mismatch in {}", names.join(", "))),
        ));
    }

    if validation.accepted.is_empty() {
        warn!("no SQL files found with prefix '{}'", prefix);
        return Ok(ExecutionResult::empty(
            target,
            prefix,
            started,
            Some(format!("no SQL files found with prefix '{}'", prefix)),
        ));
    }

    for (file, detected) in &validation.accepted {
        info!("  {} -> {} schema", file.name, detected);
    }

    let batch = join_batch(&validation.statements());
    info!(
        statements = validation.accepted.len(),
        "executing batch for {} schema",
        target.to_uppercase()
    );
    let outcome = wh.execute_batch(&batch).await?;
    let duration_secs = started.elapsed().as_secs_f64();

    if outcome.success {
        info!(
            "executed {} statement(s) in {:.2}s",
            validation.accepted.len(),
            duration_secs
        );
    } else {
        error!(
            error = outcome.error.as_deref().unwrap_or_default(),
            "batch execution failed; check that '{}' exists and the SQL is valid",
            target
        );
    }

    Ok(ExecutionResult {
        schema: target.to_string(),
        prefix: prefix.to_string(),
        success: outcome.success,
        file_count: validation.accepted.len(),
        files: validation
            .accepted
            .iter()
            .map(|(f, _)| f.name.clone())
            .collect(),
        duration_secs,
        error: outcome.error,
    })
}

/// Execute `raw`, `stage` and `curated` files in that order, one batch per
/// schema, with logical schema qualifiers rewritten through `map`.
///
/// Schemas without files are skipped. A failed batch does not stop the
/// schemas after it.
#[instrument(skip(wh, root, map), fields(root = %root.as_ref().display()))]
pub async fn execute_all<W: Warehouse, P: AsRef<Path>>(
    wh: &W,
    root: P,
    map: &SchemaMap,
) -> Result<Vec<ExecutionResult>> {
    let order: Vec<&str> = LOGICAL_SCHEMAS.iter().map(|s| map.physical(s)).collect();
    info!("execution order: {}", order.join(" -> "));

    let mut results = Vec::new();
    for logical in LOGICAL_SCHEMAS {
        let started = Instant::now();
        let physical = map.physical(logical);
        let files = collect_schema_files(&root, logical)?;
        if files.is_empty() {
            warn!("no SQL files found for {} schema", logical);
            continue;
        }

        let statements: Vec<String> = files
            .iter()
            .map(|f| map.replace_placeholders(&f.sql))
            .collect();
        info!(
            statements = statements.len(),
            "executing batch for {} schema (from {} files)",
            physical.to_uppercase(),
            logical
        );

        let outcome = wh.execute_batch(&join_batch(&statements)).await?;
        if outcome.success {
            info!("executed {} statement(s) for {}", statements.len(), physical.to_uppercase());
        } else {
            error!(
                error = outcome.error.as_deref().unwrap_or_default(),
                "batch execution failed for {}",
                physical.to_uppercase()
            );
        }

        results.push(ExecutionResult {
            schema: physical.to_string(),
            prefix: logical.to_string(),
            success: outcome.success,
            file_count: files.len(),
            files: files.into_iter().map(|f| f.name).collect(),
            duration_secs: started.elapsed().as_secs_f64(),
            error: outcome.error,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schema::{table01_delta, ObjectName},
        warehouse::MemoryWarehouse,
    };
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn tree(root: &Path) {
        write(
            root,
            "table01/raw.table01.sql",
            "CREATE OR REPLACE TABLE raw.table01 (id INTEGER PRIMARY KEY, name VARCHAR(50))",
        );
        write(
            root,
            "table01/stage.table01_delta.sql",
            &format!("{};", table01_delta().create_or_replace_sql()),
        );
        write(
            root,
            "table01/curated.table01_v.sql",
            "CREATE OR REPLACE VIEW curated.table01_v AS SELECT * FROM stage.table01_delta",
        );
    }

    #[tokio::test]
    async fn execute_schema_runs_files_as_written() -> Result<()> {
        let tmp = tempdir()?;
        tree(tmp.path());
        let wh = MemoryWarehouse::with_schemas(["stage"])?;

        let res = execute_schema(&wh, tmp.path(), "stage", "stage").await?;
        assert!(res.success, "{:?}", res.error);
        assert_eq!(res.file_count, 1);
        assert_eq!(res.files, vec!["stage.table01_delta.sql"]);
        assert_eq!(
            wh.catalog().describe(&ObjectName::new("stage", "table01_delta"))?,
            table01_delta()
        );
        Ok(())
    }

    #[tokio::test]
    async fn mismatch_stops_before_execution() -> Result<()> {
        let tmp = tempdir()?;
        tree(tmp.path());
        write(tmp.path(), "table02/stage.wrong.sql", "CREATE TABLE raw.wrong (id INTEGER)");
        let wh = MemoryWarehouse::with_schemas(["raw", "stage"])?;

        let res = execute_schema(&wh, tmp.path(), "stage", "stage").await?;
        assert!(!res.success);
        assert_eq!(res.file_count, 0);
        assert!(res.error.unwrap().contains("stage.wrong.sql"));
        assert!(wh.catalog().list("stage", crate::schema::ObjectKind::Table)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_schema_fails_the_batch() -> Result<()> {
        let tmp = tempdir()?;
        tree(tmp.path());
        let wh = MemoryWarehouse::new();
        let res = execute_schema(&wh, tmp.path(), "stage", "stage").await?;
        assert!(!res.success);
        assert_eq!(res.file_count, 1);
        assert_eq!(res.error.as_deref(), Some("schema 'stage' does not exist"));

        let none = execute_schema(&wh, tmp.path(), "nothing", "nothing").await?;
        assert!(!none.success);
        assert_eq!(none.file_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn execute_all_maps_schemas_in_order() -> Result<()> {
        let tmp = tempdir()?;
        tree(tmp.path());
        let map = SchemaMap::new("raw_dev", "stage_dev", "curated_dev");
        let wh = MemoryWarehouse::with_schemas(["raw_dev", "stage_dev", "curated_dev"])?;

        let results = execute_all(&wh, tmp.path(), &map).await?;
        let order: Vec<(&str, &str, bool)> = results
            .iter()
            .map(|r| (r.prefix.as_str(), r.schema.as_str(), r.success))
            .collect();
        assert_eq!(
            order,
            vec![
                ("raw", "raw_dev", true),
                ("stage", "stage_dev", true),
                ("curated", "curated_dev", true)
            ]
        );
        assert_eq!(
            wh.catalog().view_body(&ObjectName::new("curated_dev", "table01_v"))?,
            "SELECT * FROM stage_dev.table01_delta"
        );
        Ok(())
    }

    #[tokio::test]
    async fn execute_all_continues_after_failure() -> Result<()> {
        let tmp = tempdir()?;
        tree(tmp.path());
        let wh = MemoryWarehouse::with_schemas(["stage", "curated"])?;
        let results = execute_all(&wh, tmp.path(), &SchemaMap::default()).await?;
        assert_eq!(results.len(), 3);
        assert!(!results[0].success);
        assert!(results[1].success);
        assert!(results[2].success);
        Ok(())
    }
}
