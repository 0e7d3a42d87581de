use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sfautomator::{
    config::{Config, DEFAULT_CONFIG_PATH},
    runner::{self, ExecutionSummary},
    schema::{self, ObjectKind},
    warehouse::{MemoryWarehouse, SnowSql, Warehouse},
};
use serde::Serialize;
use std::{path::PathBuf, process::ExitCode, time::Instant};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Execute and drop Snowflake DDL trees")]
struct Args {
    /// YAML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Engine to run against; `memory` validates every statement in-process
    #[arg(long, value_enum, default_value_t = Target::Snowsql)]
    target: Target,

    /// Print results as JSON on stdout
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Snowsql,
    Memory,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum DropWhat {
    Views,
    Tables,
    All,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the connectivity query
    Check,
    /// Print the stage.table01_delta DDL, or write it under `--out`
    Render {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Execute DDL files
    Run {
        /// Execute `<schema>.*.sql` files as written
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        schema: Option<String>,
        /// Execute raw -> stage -> curated with schema names from config
        #[arg(long)]
        all: bool,
    },
    /// Drop views and/or tables from a schema
    Drop {
        /// Defaults to `drop.target_schema` from config
        #[arg(long)]
        schema: Option<String>,
        #[arg(long, value_enum, default_value_t = DropWhat::All)]
        what: DropWhat,
        /// Must equal `DELETE <SCHEMA>`
        #[arg(long)]
        confirm: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Cmd::Render { out } = &args.command {
        let def = schema::table01_delta();
        match out {
            Some(dir) => {
                let path = schema::write_table_ddl(dir, &def)?;
                info!("wrote {}", path.display());
            }
            None => println!("{};", def.create_or_replace_sql()),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = match args.target {
        Target::Memory if !args.config.exists() => Config::memory_default(),
        _ => Config::load(&args.config)?,
    };

    let ok = match args.target {
        Target::Snowsql => run(&SnowSql::from_config(&cfg), &cfg, &args).await?,
        Target::Memory => {
            let s = &cfg.schemas;
            let wh = MemoryWarehouse::with_schemas([&s.first, &s.second, &s.third])?;
            run(&wh, &cfg, &args).await?
        }
    };
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run<W: Warehouse>(wh: &W, cfg: &Config, args: &Args) -> Result<bool> {
    let started = Instant::now();
    runner::check_connection(wh).await?;

    match &args.command {
        Cmd::Render { .. } => Ok(true),
        Cmd::Check => Ok(true),
        Cmd::Run { schema, all } => {
            let results = if *all {
                runner::execute_all(wh, &cfg.ddl.root, &cfg.schema_map()).await?
            } else {
                let prefix = schema
                    .as_deref()
                    .context("either --schema or --all is required")?;
                vec![runner::execute_schema(wh, &cfg.ddl.root, prefix, prefix).await?]
            };
            let summary = ExecutionSummary::new(results, started.elapsed().as_secs_f64());
            if args.json {
                emit_json(&summary)?;
            } else if summary.all_succeeded {
                println!("{}", summary);
            } else {
                warn!("execution stopped due to failure");
            }
            Ok(summary.all_succeeded)
        }
        Cmd::Drop {
            schema,
            what,
            confirm,
        } => {
            let target = schema
                .clone()
                .or_else(|| cfg.drop.target_schema.clone())
                .filter(|s| !s.trim().is_empty())
                .context("no schema given: pass --schema or set drop.target_schema")?;
            runner::require_confirmation(&target, confirm.as_deref())?;

            let objects = wh.list_objects(&target, ObjectKind::Table).await?;
            info!("{} base table(s) in {}", objects.len(), target.to_uppercase());

            let ok = match what {
                DropWhat::Views => {
                    let out = runner::drop_objects(wh, &target, ObjectKind::View).await?;
                    if args.json {
                        emit_json(&out)?;
                    }
                    out.success
                }
                DropWhat::Tables => {
                    let out = runner::drop_objects(wh, &target, ObjectKind::Table).await?;
                    if args.json {
                        emit_json(&out)?;
                    }
                    out.success
                }
                DropWhat::All => {
                    let out = runner::drop_all(wh, &target).await?;
                    if args.json {
                        emit_json(&out)?;
                    }
                    out.views.success && out.tables.success
                }
            };
            Ok(ok)
        }
    }
}

fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
