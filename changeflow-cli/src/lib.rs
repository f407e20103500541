//! Command-line front end for changeflow runs.
//!
//! The host application owns the changelogs, so this crate is a library: a
//! host binary parses [`CliArgs`] and hands them to [`run_sqlite`] together
//! with its engine factory.
//!
//! ```no_run
//! use changeflow::changeset::Changelog;
//! use changeflow::sqlite::SqliteEngineFactory;
//! use changeflow_cli::{init_tracing, run_sqlite, CliArgs};
//! use clap::Parser;
//!
//! fn main() {
//!     let args = CliArgs::parse();
//!     if let Err(e) = init_tracing().and_then(|_| {
//!         run_sqlite(SqliteEngineFactory::new(vec![Changelog::new("db/master", vec![])]), args)
//!     }) {
//!         eprintln!("Error: {}", e);
//!         std::process::exit(1);
//!     }
//! }
//! ```
//!
//! Long flags match [`ConfigurationKey::flag`] so a resolved configuration
//! rendered with
//! [`to_command_line_args`](changeflow::config::MigrationConfiguration::to_command_line_args)
//! parses back into the same settings.

use std::io::Write;
use std::path::PathBuf;

use changeflow::config::ConfigurationKey;
use changeflow::engine::{ConnectionParams, DatabaseConnector, FileSystemResourceAccessor};
use changeflow::sqlite::{applied_changesets, SqliteConnector, SqliteDatabase, SqliteEngineFactory};
use changeflow::{driver, ExecutionReport, MigrationExecutor, RunSettings};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "changeflow", about = "Database changelog migrations")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending changesets (requires database)
    Update(RunArgs),
    /// Show changesets recorded as applied (requires database)
    History(RunArgs),
    /// List the embedded driver catalog (no database required)
    Drivers {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Options shared by the commands that talk to a database.
#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Properties file providing base configuration
    #[arg(long = "defaults-file", value_name = "PATH")]
    pub defaults_file: Option<PathBuf>,

    /// Changelog to apply
    #[arg(long)]
    pub changelog_file: Option<String>,

    /// Database url, e.g. jdbc:sqlite:app.db
    #[arg(long)]
    pub url: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub default_schema_name: Option<String>,

    /// Comma-separated context labels selecting changesets
    #[arg(long)]
    pub contexts: Option<String>,

    /// Engine display name looked up in the driver catalog
    #[arg(long)]
    pub database_engine: Option<String>,

    /// Driver class, overriding the catalog
    #[arg(long)]
    pub driver: Option<String>,

    /// Roll back and re-apply every applied changeset
    #[arg(long)]
    pub test_rollbacks: bool,

    /// Directory changelog resources are read from
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub workspace: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn to_settings(&self) -> RunSettings {
        let mut settings = RunSettings::new().with_test_rollbacks(self.test_rollbacks);
        settings.properties_path = self.defaults_file.clone();
        settings.fields.changelog_file = self.changelog_file.clone();
        settings.fields.url = self.url.clone();
        settings.fields.username = self.username.clone();
        settings.fields.password = self.password.clone();
        settings.fields.default_schema_name = self.default_schema_name.clone();
        settings.fields.contexts = self.contexts.clone();
        settings.fields.database_engine = self.database_engine.clone();
        settings.driver_override = self.driver.clone();
        settings
    }
}

/// Install a `tracing` fmt subscriber writing to stderr. The filter comes from
/// `RUST_LOG` and defaults to `info`.
pub fn init_tracing() -> CliResult {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(env_filter)
        .try_init()?;
    Ok(())
}

/// Run a parsed command against SQLite, printing to stdout.
pub fn run_sqlite(factory: SqliteEngineFactory, args: CliArgs) -> CliResult {
    run_sqlite_with_output(factory, args, &mut std::io::stdout().lock())
}

/// [`run_sqlite`], printing to `out`.
pub fn run_sqlite_with_output(
    factory: SqliteEngineFactory,
    args: CliArgs,
    out: &mut dyn Write,
) -> CliResult {
    match args.command {
        Commands::Drivers { json } => print_drivers(json, out),
        Commands::History(run) => print_history(&factory, &run, out),
        Commands::Update(run) => {
            let executor = MigrationExecutor::new(SqliteConnector::new(), factory)
                .with_resource_accessor(FileSystemResourceAccessor::new(&run.workspace));
            match executor.run(&run.to_settings()) {
                Ok(report) => print_report(&report, None, run.json, out),
                Err(err) => {
                    print_report(&err.report, Some(err.error.to_string().as_str()), run.json, out)?;
                    Err(err.into())
                }
            }
        }
    }
}

fn print_drivers(json: bool, out: &mut dyn Write) -> CliResult {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(driver::all())?)?;
        return Ok(());
    }
    writeln!(out, "Embedded drivers ({}):", driver::all().len())?;
    for entry in driver::all() {
        writeln!(
            out,
            "  {:<16} {}",
            entry.display_name(),
            entry.driver_class_name()
        )?;
    }
    Ok(())
}

fn print_report(
    report: &ExecutionReport,
    error: Option<&str>,
    json: bool,
    out: &mut dyn Write,
) -> CliResult {
    if json {
        let value = serde_json::json!({
            "executed_changesets": report.executed_changesets,
            "failed_changeset": report.failed_changeset,
            "error": error,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }

    if report.executed_changesets.is_empty() {
        writeln!(out, "No changesets executed.")?;
    } else {
        writeln!(
            out,
            "Executed changesets ({}):",
            report.executed_changesets.len()
        )?;
        for changeset in &report.executed_changesets {
            writeln!(out, "  {}", changeset)?;
        }
    }
    if let Some(failed) = &report.failed_changeset {
        writeln!(out, "Failed changeset: {}", failed)?;
    }
    if let Some(error) = error {
        writeln!(out, "Error: {}", error)?;
    }
    Ok(())
}

fn print_history(factory: &SqliteEngineFactory, run: &RunArgs, out: &mut dyn Write) -> CliResult {
    let config = run.to_settings().resolve()?;
    let changelog = config
        .get(ConfigurationKey::ChangelogFile)
        .ok_or("No changelog file configured")?
        .to_string();

    let mut database = SqliteConnector::new().connect(&ConnectionParams::from_config(&config))?;
    let rows = {
        let conn = database
            .as_any_mut()
            .downcast_mut::<SqliteDatabase>()
            .and_then(SqliteDatabase::connection_mut)
            .ok_or("SQLite connector returned an unusable handle")?;
        applied_changesets(conn, factory.tracking_table_name(), &changelog)
    };
    if let Err(e) = database.close() {
        tracing::warn!(error = %e, "error closing database");
    }
    let rows = rows?;

    if run.json {
        let value: Vec<_> = rows
            .iter()
            .map(|(id, author, order)| {
                serde_json::json!({ "id": id, "author": author, "order_executed": order })
            })
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }
    if rows.is_empty() {
        writeln!(out, "No changesets applied from {}.", changelog)?;
        return Ok(());
    }
    writeln!(out, "Applied changesets from {} ({}):", changelog, rows.len())?;
    for (id, author, order) in rows {
        writeln!(out, "  {:>4}  {} by {}", order, id, author)?;
    }
    Ok(())
}
