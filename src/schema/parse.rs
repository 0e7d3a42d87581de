// src/schema/parse.rs

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, trace, warn};

use super::types::{Column, ColumnType, ObjectName, TableDef};

static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*CREATE\s+(OR\s+REPLACE\s+)?TABLE\s+(IF\s+NOT\s+EXISTS\s+)?([A-Za-z_][\w$]*)\.([A-Za-z_][\w$]*)\s*\((.*)\)\s*;?\s*$",
    )
    .unwrap()
});

static COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^([A-Za-z_][\w$]*)\s+([A-Za-z_]+)(?:\s*\(\s*(\d+)(?:\s*,\s*(\d+))?\s*\))?\s*(.*)$")
        .unwrap()
});

static TABLE_PK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(?:CONSTRAINT\s+[A-Za-z_][\w$]*\s+)?PRIMARY\s+KEY\s*\(\s*([A-Za-z_][\w$]*)\s*\)$")
        .unwrap()
});

static OBJECT_SCHEMA: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)CREATE\s+(?:OR\s+REPLACE\s+)?TABLE\s+(\w+)\.").unwrap(),
        Regex::new(r"(?i)CREATE\s+(?:OR\s+REPLACE\s+)?VIEW\s+(\w+)\.").unwrap(),
    ]
});

/// A parsed `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub def: TableDef,
    /// `CREATE OR REPLACE`
    pub replace: bool,
    /// `IF NOT EXISTS`
    pub if_not_exists: bool,
}

/// Drop `--` comments outside string literals so they cannot hide inside a
/// column list. The newline ending a comment is kept.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_quote = false;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                out.push(ch);
            }
            '-' if !in_quote && chars.peek() == Some(&'-') => {
                if chars.by_ref().any(|c| c == '\n') {
                    out.push('\n');
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Schema of the first `CREATE [OR REPLACE] TABLE|VIEW schema.object` in
/// `sql`, lowercased. Tables are looked for before views.
pub fn detect_schema(sql: &str) -> Option<String> {
    OBJECT_SCHEMA.iter().find_map(|re| {
        re.captures(sql)
            .and_then(|c| c.get(1).map(|m| m.as_str().to_ascii_lowercase()))
    })
}

/// Parse a `CREATE [OR REPLACE] TABLE schema.name (...)` statement.
#[instrument(level = "debug", skip(sql), fields(sql_len = sql.len()))]
pub fn parse_create_table(sql: &str) -> Result<CreateTable> {
    let sql = strip_comments(sql);
    let caps = CREATE_TABLE
        .captures(&sql)
        .ok_or_else(|| anyhow!("not a CREATE TABLE statement"))?;

    let replace = caps.get(1).is_some();
    let if_not_exists = caps.get(2).is_some();
    if replace && if_not_exists {
        bail!("OR REPLACE and IF NOT EXISTS are mutually exclusive");
    }
    let name = ObjectName::new(&caps[3], &caps[4]);
    trace!(table = %name, replace, "parsed table name");

    let mut columns: Vec<Column> = Vec::new();
    let mut primary_key: Option<String> = None;

    for item in split_top_level(&caps[5]) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        if let Some(pk) = TABLE_PK.captures(item) {
            set_primary_key(&mut primary_key, &pk[1])?;
            continue;
        }

        let col = COLUMN
            .captures(item)
            .ok_or_else(|| anyhow!("bad column definition `{}`", item))?;
        let col_name = col[1].to_ascii_lowercase();
        let ty = map_type(&col[2], col.get(3), col.get(4))
            .with_context(|| format!("column `{}` of {}", col_name, name))?;

        let (not_null, is_pk) = parse_options(&col[5])
            .with_context(|| format!("column `{}` of {}", col_name, name))?;
        if is_pk {
            set_primary_key(&mut primary_key, &col_name)?;
        }

        if columns.iter().any(|c| c.name == col_name) {
            bail!("duplicate column `{}` in {}", col_name, name);
        }
        trace!(name = %col_name, ty = %ty, not_null, is_pk, "parsed column");
        columns.push(Column {
            name: col_name,
            ty,
            nullable: !not_null,
        });
    }

    if columns.is_empty() {
        bail!("{} declares no columns", name);
    }

    if let Some(pk) = &primary_key {
        let col = columns
            .iter_mut()
            .find(|c| &c.name == pk)
            .ok_or_else(|| anyhow!("primary key `{}` is not a column of {}", pk, name))?;
        col.nullable = false;
    }

    debug!(table = %name, columns = columns.len(), "finished CREATE TABLE parsing");
    Ok(CreateTable {
        def: TableDef {
            name,
            columns,
            primary_key,
        },
        replace,
        if_not_exists,
    })
}

fn set_primary_key(slot: &mut Option<String>, col: &str) -> Result<()> {
    let col = col.to_ascii_lowercase();
    if let Some(existing) = slot.as_deref() {
        if existing != col {
            bail!("composite or multiple primary keys are not supported ({}, {})", existing, col);
        }
    }
    *slot = Some(col);
    Ok(())
}

fn map_type(
    raw: &str,
    len: Option<regex::Match<'_>>,
    scale: Option<regex::Match<'_>>,
) -> Result<ColumnType> {
    let upper = raw.to_ascii_uppercase();
    let len: Option<u32> = len.map(|m| m.as_str().parse()).transpose()?;
    let scale: Option<u32> = scale.map(|m| m.as_str().parse()).transpose()?;

    match upper.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "SMALLINT" if len.is_none() => Ok(ColumnType::Integer),
        "NUMBER" | "NUMERIC" | "DECIMAL" if scale.unwrap_or(0) == 0 => Ok(ColumnType::Integer),
        "VARCHAR" | "STRING" | "TEXT" | "CHAR" | "CHARACTER" => {
            if len == Some(0) {
                bail!("{}(0) is not a valid length", upper);
            }
            if scale.is_some() {
                bail!("{} takes a single length", upper);
            }
            // CHAR without a length is CHAR(1)
            let len = if len.is_none() && upper.starts_with("CHAR") {
                Some(1)
            } else {
                len
            };
            Ok(ColumnType::Varchar(len))
        }
        "DATE" if len.is_none() => Ok(ColumnType::Date),
        _ => {
            warn!(ty = %raw, "unsupported column type");
            bail!("unsupported column type `{}`", raw)
        }
    }
}

/// Returns `(not_null, primary_key)` for the text after the column type.
fn parse_options(rest: &str) -> Result<(bool, bool)> {
    let words: Vec<String> = rest
        .split_whitespace()
        .map(|w| w.to_ascii_uppercase())
        .collect();
    let mut not_null = false;
    let mut pk = false;
    let mut i = 0;
    while i < words.len() {
        match (words[i].as_str(), words.get(i + 1).map(String::as_str)) {
            ("NOT", Some("NULL")) => {
                not_null = true;
                i += 2;
            }
            ("PRIMARY", Some("KEY")) => {
                pk = true;
                i += 2;
            }
            ("NULL", _) => i += 1,
            (other, _) => bail!("unsupported column option `{}`", other),
        }
    }
    Ok((not_null, pk))
}

/// Split on commas that are not nested inside parentheses or quotes.
pub(crate) fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth = depth.saturating_sub(1),
            ',' if !in_quote && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
