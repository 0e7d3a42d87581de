// src/warehouse/sql.rs

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use super::{EngineError, Value};
use crate::schema::{
    parse::strip_comments, parse_create_table, CreateTable, ObjectKind, ObjectName,
};

const IDENT: &str = r"[A-Za-z_][\w$]*";

static CREATE_SCHEMA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^CREATE\s+(OR\s+REPLACE\s+)?SCHEMA\s+(IF\s+NOT\s+EXISTS\s+)?({IDENT})$"
    ))
    .unwrap()
});

static CREATE_TABLE_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^CREATE\s+(?:OR\s+REPLACE\s+)?TABLE\b").unwrap());

static CREATE_VIEW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^CREATE\s+(OR\s+REPLACE\s+)?VIEW\s+(IF\s+NOT\s+EXISTS\s+)?({IDENT}\.{IDENT})\s+AS\s+(.+)$"
    ))
    .unwrap()
});

static DROP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^DROP\s+(TABLE|VIEW)\s+(IF\s+EXISTS\s+)?({IDENT}\.{IDENT})(?:\s+(?:CASCADE|RESTRICT))?$"
    ))
    .unwrap()
});

static INSERT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)^INSERT\s+INTO\s+({IDENT}\.{IDENT})\s*(?:\(([^)]*)\))?\s*VALUES\s*(.+)$"
    ))
    .unwrap()
});

static CONNECTIVITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^SELECT\s+CURRENT_[A-Z_]+\s*\(\s*\)").unwrap());

/// Statements the in-memory warehouse can execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateSchema {
        name: String,
        replace: bool,
        if_not_exists: bool,
    },
    CreateTable(CreateTable),
    CreateView {
        name: ObjectName,
        replace: bool,
        if_not_exists: bool,
        body: String,
    },
    Drop {
        kind: ObjectKind,
        name: ObjectName,
        if_exists: bool,
    },
    Insert {
        table: ObjectName,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Value>>,
    },
    Connectivity,
}

/// Split a batch on `;` outside of string literals, dropping comments and
/// empty statements.
pub fn split_statements(batch: &str) -> Vec<String> {
    let cleaned = strip_comments(batch);
    let mut out = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    for (i, ch) in cleaned.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            ';' if !in_quote => {
                push_trimmed(&mut out, &cleaned[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_trimmed(&mut out, &cleaned[start..]);
    out
}

fn push_trimmed(out: &mut Vec<String>, stmt: &str) {
    let stmt = stmt.trim();
    if !stmt.is_empty() {
        out.push(stmt.to_string());
    }
}

fn object_name(raw: &str) -> Result<ObjectName, EngineError> {
    ObjectName::parse(raw).ok_or_else(|| EngineError::Syntax(format!("bad object name '{}'", raw)))
}

/// Parse one statement (no trailing `;`).
pub fn parse_statement(sql: &str) -> Result<Statement, EngineError> {
    let sql = sql.trim().trim_end_matches(';').trim();
    trace!(len = sql.len(), "parsing statement");

    if CONNECTIVITY.is_match(sql) {
        return Ok(Statement::Connectivity);
    }

    if let Some(c) = CREATE_SCHEMA.captures(sql) {
        return Ok(Statement::CreateSchema {
            name: c[3].to_ascii_lowercase(),
            replace: c.get(1).is_some(),
            if_not_exists: c.get(2).is_some(),
        });
    }

    if CREATE_TABLE_HEAD.is_match(sql) {
        return parse_create_table(sql)
            .map(Statement::CreateTable)
            .map_err(|e| EngineError::Syntax(format!("{:#}", e)));
    }

    if let Some(c) = CREATE_VIEW.captures(sql) {
        return Ok(Statement::CreateView {
            name: object_name(&c[3])?,
            replace: c.get(1).is_some(),
            if_not_exists: c.get(2).is_some(),
            body: c[4].trim().to_string(),
        });
    }

    if let Some(c) = DROP.captures(sql) {
        let kind = if c[1].eq_ignore_ascii_case("view") {
            ObjectKind::View
        } else {
            ObjectKind::Table
        };
        return Ok(Statement::Drop {
            kind,
            name: object_name(&c[3])?,
            if_exists: c.get(2).is_some(),
        });
    }

    if let Some(c) = INSERT.captures(sql) {
        let columns = c.get(2).map(|m| {
            m.as_str()
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .collect::<Vec<_>>()
        });
        if columns.as_ref().is_some_and(|cols| cols.iter().any(String::is_empty)) {
            return Err(EngineError::Syntax("empty column name in INSERT".into()));
        }
        return Ok(Statement::Insert {
            table: object_name(&c[1])?,
            columns,
            rows: parse_tuples(&c[3])?,
        });
    }

    let head: String = sql.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
    Err(EngineError::Unsupported(head))
}

/// Parse `(v, ...), (v, ...)` into rows of literals.
pub fn parse_tuples(src: &str) -> Result<Vec<Vec<Value>>, EngineError> {
    let mut cur = Cursor { src, pos: 0 };
    let mut rows = Vec::new();
    loop {
        cur.skip_ws();
        cur.expect('(')?;
        let mut row = Vec::new();
        loop {
            row.push(cur.literal()?);
            cur.skip_ws();
            if cur.eat(',') {
                continue;
            }
            cur.expect(')')?;
            break;
        }
        rows.push(row);
        cur.skip_ws();
        if cur.eat(',') {
            continue;
        }
        if cur.at_end() {
            return Ok(rows);
        }
        return Err(cur.error("expected ',' or end of VALUES"));
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: char) -> Result<(), EngineError> {
        self.skip_ws();
        if self.eat(want) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", want)))
        }
    }

    fn error(&self, msg: &str) -> EngineError {
        let near: String = self.src[self.pos..].chars().take(16).collect();
        EngineError::Syntax(format!("{} near '{}'", msg, near))
    }

    fn quoted(&mut self) -> Result<String, EngineError> {
        self.expect('\'')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\'') if self.peek() == Some('\'') => {
                    self.bump();
                    out.push('\'');
                }
                Some('\'') => return Ok(out),
                Some(ch) => out.push(ch),
                None => return Err(self.error("unterminated string literal")),
            }
        }
    }

    fn literal(&mut self) -> Result<Value, EngineError> {
        self.skip_ws();
        if self.peek() == Some('\'') {
            return self.quoted().map(Value::Text);
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+')
        {
            self.bump();
        }
        let word = &self.src[start..self.pos];
        if word.eq_ignore_ascii_case("NULL") {
            return Ok(Value::Null);
        }
        if word.eq_ignore_ascii_case("DATE") {
            self.skip_ws();
            let text = self.quoted()?;
            return NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| EngineError::Syntax(format!("bad date literal '{}'", text)));
        }
        word.parse::<i64>()
            .map(Value::Int)
            .map_err(|_| self.error("expected a literal"))
    }
}
