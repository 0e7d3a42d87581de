// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

use crate::ddl::SchemaMap;

pub const DEFAULT_CONFIG_PATH: &str = "sfautomator.yaml";
pub const PASSWORD_ENV: &str = "SNOWSQL_PWD";
pub const DDL_ROOT_ENV: &str = "SFAUTOMATOR_DDL_ROOT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config field `{0}` must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnowSqlConfig {
    #[serde(default = "default_snowsql_path")]
    pub path: PathBuf,
    /// Per-batch limit; none means wait for the client indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_snowsql_path() -> PathBuf {
    PathBuf::from("snowsql")
}

impl Default for SnowSqlConfig {
    fn default() -> Self {
        Self {
            path: default_snowsql_path(),
            timeout_secs: None,
        }
    }
}

impl SnowSqlConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConnectionConfig {
    pub account: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub warehouse: String,
    pub database: String,
    pub role: String,
    #[serde(default)]
    pub region: Option<String>,
}

// Hand-written so the password never reaches a log line.
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"***")
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("role", &self.role)
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemasConfig {
    pub first: String,
    pub second: String,
    pub third: String,
}

impl Default for SchemasConfig {
    fn default() -> Self {
        Self {
            first: "raw".into(),
            second: "stage".into(),
            third: "curated".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DdlConfig {
    pub root: PathBuf,
}

impl Default for DdlConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("ddl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DropConfig {
    #[serde(default)]
    pub target_schema: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub snowsql: SnowSqlConfig,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub schemas: SchemasConfig,
    #[serde(default)]
    pub ddl: DdlConfig,
    #[serde(default)]
    pub drop: DropConfig,
}

impl Config {
    /// Read a YAML config, apply environment overrides and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let mut cfg = Self::from_yaml(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.apply_env(|k| env::var(k).ok());
        cfg.validate()?;
        debug!(config = ?cfg, "loaded config");
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// A config for the in-memory target: default schemas and DDL root,
    /// no connection.
    pub fn memory_default() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|k| env::var(k).ok());
        cfg
    }

    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(pwd) = lookup(PASSWORD_ENV).filter(|p| !p.is_empty()) {
            self.connection.password = pwd;
        }
        if let Some(root) = lookup(DDL_ROOT_ENV).filter(|p| !p.is_empty()) {
            self.ddl.root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.connection;
        let required = [
            ("connection.account", &c.account),
            ("connection.user", &c.user),
            ("connection.warehouse", &c.warehouse),
            ("connection.database", &c.database),
            ("connection.role", &c.role),
            ("schemas.first", &self.schemas.first),
            ("schemas.second", &self.schemas.second),
            ("schemas.third", &self.schemas.third),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(field));
            }
        }
        if self.snowsql.path.as_os_str().is_empty() {
            return Err(ConfigError::Empty("snowsql.path"));
        }
        Ok(())
    }

    pub fn schema_map(&self) -> SchemaMap {
        SchemaMap::new(
            &self.schemas.first,
            &self.schemas.second,
            &self.schemas.third,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
snowsql:
  path: /opt/snowsql/snowsql
  timeout_secs: 30
connection:
  account: xy12345
  user: deployer
  password: from-file
  warehouse: compute_wh
  database: analytics
  role: sysadmin
schemas:
  first: raw_dev
  second: stage_dev
  third: curated_dev
ddl:
  root: ./ddl
drop:
  target_schema: raw_dev
"#;

    #[test]
    fn parses_full_config() -> Result<()> {
        let cfg = Config::from_yaml(SAMPLE)?;
        assert_eq!(cfg.snowsql.path, PathBuf::from("/opt/snowsql/snowsql"));
        assert_eq!(cfg.snowsql.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.connection.region, None);
        assert_eq!(cfg.schemas.second, "stage_dev");
        assert_eq!(cfg.drop.target_schema.as_deref(), Some("raw_dev"));
        cfg.validate()?;
        Ok(())
    }

    #[test]
    fn defaults_fill_optional_sections() -> Result<()> {
        let cfg = Config::from_yaml(
            "connection: {account: a, user: u, warehouse: w, database: d, role: r}",
        )?;
        assert_eq!(cfg.snowsql, SnowSqlConfig::default());
        assert_eq!(cfg.schemas, SchemasConfig::default());
        assert_eq!(cfg.ddl.root, PathBuf::from("ddl"));
        assert!(cfg.connection.password.is_empty());
        Ok(())
    }

    #[test]
    fn env_overrides_password_and_root() -> Result<()> {
        let mut cfg = Config::from_yaml(SAMPLE)?;
        let vars: HashMap<&str, &str> =
            [(PASSWORD_ENV, "from-env"), (DDL_ROOT_ENV, "/srv/ddl")].into();
        cfg.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.connection.password, "from-env");
        assert_eq!(cfg.ddl.root, PathBuf::from("/srv/ddl"));
        Ok(())
    }

    #[test]
    fn validate_rejects_blank_fields() -> Result<()> {
        let mut cfg = Config::from_yaml(SAMPLE)?;
        cfg.connection.role = "  ".into();
        assert_eq!(cfg.validate(), Err(ConfigError::Empty("connection.role")));
        Ok(())
    }

    #[test]
    fn debug_hides_password() -> Result<()> {
        let cfg = Config::from_yaml(SAMPLE)?;
        let shown = format!("{:?}", cfg);
        assert!(!shown.contains("from-file"));
        Ok(())
    }

    #[test]
    fn load_reads_file() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("sfautomator.yaml");
        fs::write(&path, SAMPLE)?;
        let cfg = Config::load(&path)?;
        assert_eq!(cfg.connection.account, "xy12345");
        assert!(Config::load(tmp.path().join("missing.yaml")).is_err());
        Ok(())
    }
}
