use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Logical schema prefixes, in execution order.
pub const LOGICAL_SCHEMAS: [&str; 3] = ["raw", "stage", "curated"];

static PLACEHOLDERS: Lazy<[(&'static str, Regex); 3]> = Lazy::new(|| {
    LOGICAL_SCHEMAS.map(|s| (s, Regex::new(&format!(r"\b{}\.", s)).unwrap()))
});

/// Logical → physical schema names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaMap {
    pub raw: String,
    pub stage: String,
    pub curated: String,
}

impl SchemaMap {
    pub fn new(raw: &str, stage: &str, curated: &str) -> Self {
        Self {
            raw: raw.to_string(),
            stage: stage.to_string(),
            curated: curated.to_string(),
        }
    }

    /// Physical name for a logical prefix; unknown prefixes map to themselves.
    pub fn physical<'a>(&'a self, logical: &'a str) -> &'a str {
        match logical {
            "raw" => &self.raw,
            "stage" => &self.stage,
            "curated" => &self.curated,
            other => other,
        }
    }

    /// Rewrite `raw.`, `stage.` and `curated.` qualifiers at word boundaries.
    ///
    /// Each logical name is substituted once against the original text's
    /// qualifiers, so a physical name that happens to equal another logical
    /// name is not rewritten twice.
    pub fn replace_placeholders(&self, sql: &str) -> String {
        let mut hits: Vec<(usize, usize, &str)> = Vec::new();
        for (logical, re) in PLACEHOLDERS.iter() {
            for m in re.find_iter(sql) {
                hits.push((m.start(), m.end(), self.physical(logical)));
            }
        }
        hits.sort_by_key(|h| h.0);

        let mut out = String::with_capacity(sql.len());
        let mut last = 0;
        for (start, end, physical) in hits {
            out.push_str(&sql[last..start]);
            out.push_str(physical);
            out.push('.');
            last = end;
        }
        out.push_str(&sql[last..]);
        out
    }
}

impl Default for SchemaMap {
    fn default() -> Self {
        Self::new("raw", "stage", "curated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_qualified_names_only() {
        let map = SchemaMap::new("raw_dev", "stage_dev", "curated_dev");
        let sql = "CREATE OR REPLACE VIEW curated.v AS SELECT * FROM stage.t JOIN raw.r ON backstage.x = 1";
        assert_eq!(
            map.replace_placeholders(sql),
            "CREATE OR REPLACE VIEW curated_dev.v AS SELECT * FROM stage_dev.t JOIN raw_dev.r ON backstage.x = 1"
        );
    }

    #[test]
    fn swapped_names_are_not_rewritten_twice() {
        let map = SchemaMap::new("stage", "raw", "curated");
        assert_eq!(
            map.replace_placeholders("INSERT INTO stage.t SELECT * FROM raw.s"),
            "INSERT INTO raw.t SELECT * FROM stage.s"
        );
    }

    #[test]
    fn identity_map_is_a_no_op() {
        let sql = "CREATE OR REPLACE TABLE stage.table01_delta (delta_id INTEGER PRIMARY KEY)";
        assert_eq!(SchemaMap::default().replace_placeholders(sql), sql);
    }
}
