// src/ddl/tree.rs

use anyhow::{Context, Result};
use glob::glob;
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

use crate::schema::detect_schema;

pub const UNKNOWN_SCHEMA: &str = "unknown";

/// One non-empty `<prefix>.<object>.sql` file from a table folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DdlFile {
    pub path: PathBuf,
    pub name: String,
    pub prefix: String,
    /// Trimmed file content.
    pub sql: String,
}

impl DdlFile {
    /// Schema the statement creates objects in, or [`UNKNOWN_SCHEMA`].
    pub fn detected_schema(&self) -> String {
        detect_schema(&self.sql).unwrap_or_else(|| UNKNOWN_SCHEMA.to_string())
    }
}

/// A file whose statement targets a schema other than its prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaMismatch {
    pub file: String,
    pub prefix: String,
    pub detected: String,
}

/// Outcome of checking files against their prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Validation {
    /// Files to execute, each with the schema detected in it.
    pub accepted: Vec<(DdlFile, String)>,
    pub mismatches: Vec<SchemaMismatch>,
    /// Files with no recognisable `CREATE ... schema.object`.
    pub undetected: Vec<String>,
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn statements(&self) -> Vec<&str> {
        self.accepted.iter().map(|(f, _)| f.sql.as_str()).collect()
    }
}

/// Immediate sub-directories of `root`, sorted.
pub fn discover_table_folders<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    let mut folders: Vec<PathBuf> = fs::read_dir(root)
        .with_context(|| format!("reading DDL root {}", root.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    folders.sort();
    Ok(folders)
}

/// Every non-empty `<prefix>.*.sql` file under `root`, folder by folder,
/// sorted by name within each folder.
#[instrument(level = "debug", skip(root), fields(root = %root.as_ref().display()))]
pub fn collect_schema_files<P: AsRef<Path>>(root: P, prefix: &str) -> Result<Vec<DdlFile>> {
    let mut files = Vec::new();
    for folder in discover_table_folders(&root)? {
        let folder = glob::Pattern::escape(&folder.to_string_lossy());
        let pattern = format!("{}/{}.*.sql", folder, prefix);
        let mut paths: Vec<PathBuf> = glob(&pattern)
            .context("invalid glob pattern for DDL files")?
            .filter_map(|entry| match entry {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("cannot read glob entry: {:?}", e);
                    None
                }
            })
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        for path in paths {
            let sql = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?
                .trim()
                .to_string();
            if sql.is_empty() {
                debug!(path = %path.display(), "skipping empty file");
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push(DdlFile {
                path,
                name,
                prefix: prefix.to_string(),
                sql,
            });
        }
    }
    debug!(count = files.len(), "collected DDL files");
    Ok(files)
}

/// Check that each file creates objects in the schema its prefix names.
/// Files without a detectable schema are accepted with a warning.
pub fn validate(prefix: &str, files: Vec<DdlFile>) -> Validation {
    let mut out = Validation::default();
    for file in files {
        let detected = file.detected_schema();
        if detected == UNKNOWN_SCHEMA {
            warn!(file = %file.name, "could not detect schema");
            out.undetected.push(file.name.clone());
        } else if !detected.eq_ignore_ascii_case(prefix) {
            warn!(file = %file.name, prefix, detected = %detected, "schema mismatch");
            out.mismatches.push(SchemaMismatch {
                file: file.name.clone(),
                prefix: prefix.to_string(),
                detected,
            });
            continue;
        }
        out.accepted.push((file, detected));
    }
    out
}

/// Join statements into one batch: `";\n\n"` between, `;` at the end.
/// Trailing semicolons already in a statement are not doubled.
pub fn join_batch<S: AsRef<str>>(statements: &[S]) -> String {
    let parts: Vec<&str> = statements
        .iter()
        .map(|s| s.as_ref().trim().trim_end_matches(';').trim_end())
        .collect();
    format!("{};", parts.join(";\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn collects_prefix_files_in_folder_order() -> Result<()> {
        let tmp = tempdir()?;
        let root = tmp.path();
        write(
            root,
            "table02/stage.table02_delta.sql",
            "CREATE TABLE stage.table02_delta (id INTEGER)",
        );
        write(root, "table01/stage.b.sql", "CREATE TABLE stage.b (id INTEGER)");
        write(root, "table01/stage.a.sql", "  CREATE TABLE stage.a (id INTEGER)\n");
        write(root, "table01/raw.table01.sql", "CREATE TABLE raw.table01 (id INTEGER)");
        write(root, "table01/stage.empty.sql", "  \n");
        write(root, "table01/stage.notes.txt", "ignored");
        write(root, "loose.stage.x.sql", "ignored: not in a folder");

        let files = collect_schema_files(root, "stage")?;
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["stage.a.sql", "stage.b.sql", "stage.table02_delta.sql"]);
        assert_eq!(files[0].sql, "CREATE TABLE stage.a (id INTEGER)");
        Ok(())
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(collect_schema_files("/definitely/not/here", "raw").is_err());
    }

    #[test]
    fn validation_flags_mismatches_and_unknowns() {
        let mk = |name: &str, sql: &str| DdlFile {
            path: PathBuf::from(name),
            name: name.to_string(),
            prefix: "stage".into(),
            sql: sql.to_string(),
        };
        let v = validate(
            "stage",
            vec![
                mk("stage.ok.sql", "CREATE OR REPLACE TABLE STAGE.ok (id INTEGER)"),
                mk("stage.bad.sql", "CREATE TABLE raw.bad (id INTEGER)"),
                mk("stage.grant.sql", "GRANT SELECT ON stage.ok TO ROLE r"),
            ],
        );
        assert!(!v.is_ok());
        assert_eq!(v.accepted.len(), 2);
        assert_eq!(v.accepted[0].1, "stage");
        assert_eq!(v.accepted[1].1, UNKNOWN_SCHEMA);
        assert_eq!(
            v.mismatches,
            vec![SchemaMismatch {
                file: "stage.bad.sql".into(),
                prefix: "stage".into(),
                detected: "raw".into(),
            }]
        );
        assert_eq!(v.undetected, vec!["stage.grant.sql"]);
    }

    #[test]
    fn batch_join_format() {
        assert_eq!(join_batch(&["A", "B;"]), "A;\n\nB;");
        assert_eq!(join_batch(&["only one"]), "only one;");
    }
}
