use anyhow::{anyhow, Context, Result};
use std::{ffi::OsString, path::PathBuf, process::Stdio, time::Duration};
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

use super::{sql::split_statements, BatchOutcome, Warehouse};
use crate::{
    config::{Config, ConnectionConfig, PASSWORD_ENV},
    schema::ObjectKind,
};

/// stderr fragments that mean the batch failed even when `snowsql` exits 0.
const ERROR_MARKERS: [&str; 2] = ["SQL compilation error", "does not exist"];

/// Output options for machine-readable listings.
const PLAIN_OUTPUT: [&str; 8] = [
    "-o",
    "output_format=plain",
    "-o",
    "friendly=false",
    "-o",
    "timing=false",
    "-o",
    "header=false",
];

/// Captured output of one `snowsql` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Set when the client was killed for exceeding the timeout.
    pub timed_out: Option<Duration>,
}

impl Invocation {
    fn timed_out(limit: Duration) -> Self {
        Self {
            status: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: Some(limit),
        }
    }

    /// Timeout, non-zero exit, or an error marker on stderr.
    pub fn failed(&self) -> bool {
        self.timed_out.is_some()
            || self.status != Some(0)
            || ERROR_MARKERS.iter().any(|m| self.stderr.contains(m))
    }

    /// Message describing a failed invocation.
    pub fn error_message(&self) -> String {
        match self.timed_out {
            Some(limit) => format!("timed out after {:?}", limit),
            None if self.stderr.trim().is_empty() => {
                format!("snowsql exited with status {:?}", self.status)
            }
            None => self.stderr.trim().to_string(),
        }
    }
}

/// Runs batches through the `snowsql` command-line client.
#[derive(Debug, Clone)]
pub struct SnowSql {
    program: PathBuf,
    connection: ConnectionConfig,
    timeout: Option<Duration>,
}

impl SnowSql {
    pub fn new(program: impl Into<PathBuf>, connection: ConnectionConfig) -> Self {
        Self {
            program: program.into(),
            connection,
            timeout: None,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.snowsql.path, cfg.connection.clone()).with_timeout(cfg.snowsql.timeout())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connection arguments, without the query.
    pub fn connection_args(&self) -> Vec<OsString> {
        let c = &self.connection;
        let mut args: Vec<OsString> = [
            ("-a", &c.account),
            ("-u", &c.user),
            ("-w", &c.warehouse),
            ("-d", &c.database),
            ("-r", &c.role),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [OsString::from(flag), OsString::from(value.as_str())])
        .collect();
        if let Some(region) = c.region.as_deref().filter(|r| !r.is_empty()) {
            args.push("--region".into());
            args.push(region.into());
        }
        args
    }

    /// Run `query` with optional `-o` output options. Only a failure to
    /// start or wait on the client is an `Err`; a timeout kills the child and
    /// comes back as a failed [`Invocation`].
    #[instrument(level = "debug", skip(self, query, extra), fields(query_len = query.len()))]
    pub async fn invoke(&self, query: &str, extra: &[&str]) -> Result<Invocation> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.connection_args())
            .arg("-q")
            .arg(query)
            .args(extra)
            .env(PASSWORD_ENV, &self.connection.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            "Running: {} -a {} -u {} -w {}... [query hidden]",
            self.program.display(),
            self.connection.account,
            self.connection.user,
            self.connection.warehouse
        );

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", self.program.display()))?;
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    // dropping the wait future kills the child
                    error!(?limit, "snowsql timed out");
                    return Ok(Invocation::timed_out(limit));
                }
            },
            None => child.wait_with_output().await,
        }
        .with_context(|| format!("waiting for {}", self.program.display()))?;

        let inv = Invocation {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: None,
        };
        debug!(status = ?inv.status, stdout = %inv.stdout, "snowsql finished");
        if !inv.stderr.is_empty() {
            warn!(stderr = %inv.stderr, "snowsql stderr");
        }
        Ok(inv)
    }
}

/// Lines the client prints around results when `friendly` output is on.
const BANNER_PREFIXES: [&str; 2] = ["Type SQL statements", "Goodbye!"];

/// Object names from `output_format=plain` output: one per line, skipping
/// banner, border and sign-off lines.
pub fn parse_plain_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('*') && !l.starts_with('+'))
        .filter(|l| !BANNER_PREFIXES.iter().any(|b| l.starts_with(b)))
        .map(|l| l.trim_matches(|c| c == '|' || c == ' ').to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// `INFORMATION_SCHEMA` query listing base tables or views of `schema`.
pub fn listing_query(database: &str, schema: &str, kind: ObjectKind) -> String {
    let schema = schema.to_ascii_uppercase();
    match kind {
        ObjectKind::View => format!(
            "SELECT TABLE_NAME FROM {}.INFORMATION_SCHEMA.VIEWS WHERE TABLE_SCHEMA = '{}' ORDER BY TABLE_NAME;",
            database, schema
        ),
        ObjectKind::Table => format!(
            "SELECT TABLE_NAME FROM {}.INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = '{}' AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME;",
            database, schema
        ),
    }
}

impl Warehouse for SnowSql {
    fn label(&self) -> &'static str {
        "snowsql"
    }

    async fn execute_batch(&self, sql: &str) -> Result<BatchOutcome> {
        let inv = self.invoke(sql, &[]).await?;
        if inv.failed() {
            error!(status = ?inv.status, "snowsql batch failed");
            let msg = inv.error_message();
            // snowsql reports per statement, so the count is unknown
            return Ok(BatchOutcome::failed(0, inv.stdout, msg));
        }
        let executed = split_statements(sql).len();
        Ok(BatchOutcome::ok(executed, inv.stdout))
    }

    async fn list_objects(&self, schema: &str, kind: ObjectKind) -> Result<Vec<String>> {
        let query = listing_query(&self.connection.database, schema, kind);
        let inv = self.invoke(&query, &PLAIN_OUTPUT).await?;
        if inv.failed() {
            return Err(anyhow!(
                "listing {}s in {} failed: {}",
                kind.as_str(),
                schema,
                inv.error_message()
            ));
        }
        let mut names = parse_plain_listing(&inv.stdout);
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionConfig {
        ConnectionConfig {
            account: "xy12345".into(),
            user: "deployer".into(),
            password: "secret".into(),
            warehouse: "compute_wh".into(),
            database: "analytics".into(),
            role: "sysadmin".into(),
            region: None,
        }
    }

    #[test]
    fn connection_args_order_and_region() {
        let mut c = connection();
        let args = SnowSql::new("snowsql", c.clone()).connection_args();
        let want = [
            "-a", "xy12345", "-u", "deployer", "-w", "compute_wh", "-d", "analytics", "-r",
            "sysadmin",
        ];
        assert_eq!(args, want.map(OsString::from).to_vec());
        c.region = Some("us-west-2".into());
        let args = SnowSql::new("snowsql", c).connection_args();
        assert_eq!(&args[10..], &[OsString::from("--region"), OsString::from("us-west-2")]);
    }

    #[test]
    fn failure_detection() {
        let ok = Invocation {
            status: Some(0),
            stdout: "+---+".into(),
            stderr: String::new(),
            timed_out: None,
        };
        assert!(!ok.failed());
        let compile = Invocation {
            stderr: "002003 (02000): SQL compilation error:\nSchema 'STAGE' does not exist".into(),
            ..ok.clone()
        };
        assert!(compile.failed());
        let exit = Invocation {
            status: Some(1),
            ..ok.clone()
        };
        assert!(exit.failed());
        let killed = Invocation { status: None, ..ok };
        assert!(killed.failed());
        assert_eq!(killed.error_message(), "snowsql exited with status None");

        let slow = Invocation::timed_out(Duration::from_millis(500));
        assert!(slow.failed());
        assert_eq!(slow.error_message(), "timed out after 500ms");
    }

    #[test]
    fn plain_listing() {
        // friendly=false, header=false
        assert_eq!(
            parse_plain_listing("TABLE01\nTABLE01_DELTA\n"),
            vec!["TABLE01", "TABLE01_DELTA"]
        );

        // banner and borders from a client that ignores the options
        let out = "* SnowSQL * v1.2.32\nType SQL statements or !help\n+------+\n\
                   | TABLE01 |\n| TABLE01_DELTA |\n+------+\n\nGoodbye!\n";
        assert_eq!(parse_plain_listing(out), vec!["TABLE01", "TABLE01_DELTA"]);
    }

    #[test]
    fn listing_queries() {
        let q = listing_query("analytics", "raw", ObjectKind::Table);
        assert!(q.contains("analytics.INFORMATION_SCHEMA.TABLES"));
        assert!(q.contains("TABLE_SCHEMA = 'RAW'"));
        assert!(q.contains("'BASE TABLE'"));
        let q = listing_query("analytics", "raw", ObjectKind::View);
        assert!(q.contains("INFORMATION_SCHEMA.VIEWS"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn drives_a_fake_client() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir()?;
        let script = tmp.path().join("snowsql");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             case \"$*\" in\n\
               *BROKEN*) echo 'SQL compilation error: syntax' >&2 ;;\n\
               *INFORMATION_SCHEMA.VIEWS*) printf 'V2\\nV1\\nGoodbye!\\n' ;;\n\
               *) echo \"pwd=$SNOWSQL_PWD args=$#\" ;;\n\
             esac\n",
        )?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

        let wh = SnowSql::new(&script, connection()).with_timeout(Some(Duration::from_secs(30)));

        let ok = wh.execute_batch("CREATE SCHEMA a;\n\nCREATE SCHEMA b;").await?;
        assert!(ok.success);
        assert_eq!(ok.executed, 2);
        assert_eq!(ok.stdout.trim(), "pwd=secret args=12");

        let bad = wh.execute_batch("BROKEN").await?;
        assert!(!bad.success);
        assert!(bad.error.unwrap().contains("SQL compilation error"));

        assert_eq!(wh.list_objects("raw", ObjectKind::View).await?, vec!["V1", "V2"]);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_fails_the_batch_and_later_schemas_still_run() -> Result<()> {
        use crate::{ddl::SchemaMap, runner::execute_all};
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir()?;
        let script = tmp.path().join("snowsql");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             case \"$*\" in\n\
               *raw.*) sleep 5 ;;\n\
               *) echo ok ;;\n\
             esac\n",
        )?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

        let ddl = tmp.path().join("ddl/table01");
        std::fs::create_dir_all(&ddl)?;
        std::fs::write(ddl.join("raw.table01.sql"), "CREATE TABLE raw.table01 (id INTEGER)")?;
        std::fs::write(
            ddl.join("stage.table01_delta.sql"),
            "CREATE OR REPLACE TABLE stage.table01_delta (delta_id INTEGER PRIMARY KEY)",
        )?;

        let limit = Duration::from_millis(500);
        let wh = SnowSql::new(&script, connection()).with_timeout(Some(limit));

        let slow = wh.execute_batch("CREATE TABLE raw.t (id INTEGER);").await?;
        assert!(!slow.success);
        assert_eq!(slow.error.as_deref(), Some("timed out after 500ms"));

        let results = execute_all(&wh, tmp.path().join("ddl"), &SchemaMap::default()).await?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].prefix, "raw");
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("timed out after 500ms"));
        assert_eq!(results[1].prefix, "stage");
        assert!(results[1].success);
        Ok(())
    }
}
