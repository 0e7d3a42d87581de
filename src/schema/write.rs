use anyhow::{Context, Result};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use super::types::{ObjectName, TableDef};

/// Object kinds that the drop flows know how to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    View,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
        }
    }
}

impl TableDef {
    /// Render as `CREATE OR REPLACE TABLE`, one column per line.
    ///
    /// A primary key is emitted inline on its column, which also implies
    /// `NOT NULL` there.
    pub fn create_or_replace_sql(&self) -> String {
        let pk = self.key_index();
        let cols: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut line = format!("    {} {}", c.name, c.ty);
                if Some(i) == pk {
                    line.push_str(" PRIMARY KEY");
                } else if !c.nullable {
                    line.push_str(" NOT NULL");
                }
                line
            })
            .collect();
        format!(
            "CREATE OR REPLACE TABLE {} (\n{}\n)",
            self.name,
            cols.join(",\n")
        )
    }
}

/// `DROP ... IF EXISTS` for one object. Tables cascade so dependent
/// constraints do not block the drop.
pub fn drop_sql(kind: ObjectKind, name: &ObjectName) -> String {
    match kind {
        ObjectKind::View => format!("DROP VIEW IF EXISTS {};", name),
        ObjectKind::Table => format!("DROP TABLE IF EXISTS {} CASCADE;", name),
    }
}

/// Write `def` as `<dir>/<schema>.<table>.sql`, replacing any existing file.
///
/// The content goes to a dot-prefixed temporary file first and is renamed
/// into place.
pub fn write_table_ddl<P: AsRef<Path>>(dir: P, def: &TableDef) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let file_name = format!("{}.sql", def.name);
    let path = dir.join(&file_name);
    let tmp_path = dir.join(format!(".{}.tmp", file_name));

    let mut tmp = fs::File::create(&tmp_path)
        .with_context(|| format!("creating {}", tmp_path.display()))?;
    tmp.write_all(def.create_or_replace_sql().as_bytes())?;
    tmp.write_all(b";\n")?;

    fs::rename(&tmp_path, &path)
        .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()))?;
    Ok(path)
}
