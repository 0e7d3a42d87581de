use serde::Serialize;
use std::fmt;

use super::ExecutionResult;

/// Totals across one or more schema batches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub results: Vec<ExecutionResult>,
    pub total_files: usize,
    pub total_secs: f64,
    pub secs_per_file: f64,
    pub all_succeeded: bool,
}

impl ExecutionSummary {
    /// `total_secs` is wall-clock for the whole run, which includes time
    /// outside the batches themselves.
    pub fn new(results: Vec<ExecutionResult>, total_secs: f64) -> Self {
        let total_files = results.iter().map(|r| r.file_count).sum();
        let secs_per_file = if total_files > 0 {
            total_secs / total_files as f64
        } else {
            0.0
        };
        let all_succeeded = !results.is_empty() && results.iter().all(|r| r.success);
        Self {
            results,
            total_files,
            total_secs,
            secs_per_file,
            all_succeeded,
        }
    }
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(80))?;
        writeln!(f, "EXECUTION SUMMARY")?;
        writeln!(f, "{}", "=".repeat(80))?;
        for r in self.results.iter().filter(|r| r.file_count > 0) {
            writeln!(
                f,
                "  [{}] {}: {:.2}s | {} files | {:.2}s per file",
                if r.success { "ok" } else { "FAILED" },
                r.schema.to_uppercase(),
                r.duration_secs,
                r.file_count,
                r.duration_secs / r.file_count as f64
            )?;
        }
        writeln!(f)?;
        writeln!(f, "  TOTAL FILES EXECUTED: {}", self.total_files)?;
        writeln!(
            f,
            "  TOTAL EXECUTION TIME: {:.2} seconds ({:.2} minutes)",
            self.total_secs,
            self.total_secs / 60.0
        )?;
        writeln!(f, "  AVERAGE TIME PER FILE: {:.2} seconds", self.secs_per_file)?;
        write!(f, "{}", "=".repeat(80))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(schema: &str, files: usize, secs: f64, success: bool) -> ExecutionResult {
        ExecutionResult {
            schema: schema.into(),
            prefix: schema.into(),
            success,
            file_count: files,
            files: Vec::new(),
            duration_secs: secs,
            error: None,
        }
    }

    #[test]
    fn totals_and_rendering() {
        let s = ExecutionSummary::new(
            vec![
                result("raw", 3, 1.5, true),
                result("stage", 1, 0.5, true),
                result("curated", 0, 0.0, false),
            ],
            4.0,
        );
        assert_eq!(s.total_files, 4);
        assert_eq!(s.secs_per_file, 1.0);
        assert!(!s.all_succeeded);

        let text = s.to_string();
        assert!(text.contains("[ok] RAW: 1.50s | 3 files | 0.50s per file"));
        assert!(!text.contains("CURATED"));
        assert!(text.contains("TOTAL FILES EXECUTED: 4"));
    }

    #[test]
    fn empty_run() {
        let s = ExecutionSummary::new(Vec::new(), 0.2);
        assert_eq!(s.secs_per_file, 0.0);
        assert!(!s.all_succeeded);
    }
}
