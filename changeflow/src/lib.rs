#![cfg_attr(docsrs, feature(doc_cfg))]
//! `changeflow` runs a changelog of database changesets against a database and
//! reports exactly what happened.
//!
//! A run:
//! - resolves its configuration from an optional `key=value` properties file
//!   overlaid with explicit values (explicit values win),
//! - picks a driver class, from an explicit override, the embedded
//!   [driver catalog](driver), or the properties file, in that order,
//! - opens a database handle, applies the changelog forward-only or in
//!   test-rollback mode, and always closes the handle again,
//! - returns an [`ExecutionReport`] listing the executed changesets and, on
//!   failure, the changeset that caused it.
//!
//! # Example
//!
//! ```
//! use changeflow::changeset::Changelog;
//! use changeflow::sqlite::{SqliteConnector, SqliteEngineFactory};
//! use changeflow::{sql_changeset, ChangeSetRef, MigrationExecutor, RunSettings};
//!
//! sql_changeset!(CreateUsers, "1", "alice",
//!     up: "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
//!     down: "DROP TABLE users"
//! );
//! sql_changeset!(AddEmail, "2", "alice",
//!     up: "ALTER TABLE users ADD COLUMN email TEXT"
//! );
//!
//! let executor = MigrationExecutor::new(
//!     SqliteConnector::new(),
//!     SqliteEngineFactory::new(vec![Changelog::new(
//!         "db/master",
//!         vec![Box::new(CreateUsers), Box::new(AddEmail)],
//!     )]),
//! );
//!
//! let settings = RunSettings::new()
//!     .with_url("jdbc:sqlite::memory:")
//!     .with_database_engine("SQLite")
//!     .with_changelog_file("db/master");
//!
//! let report = executor.run(&settings).unwrap();
//! assert_eq!(
//!     report.executed_changesets,
//!     vec![
//!         ChangeSetRef::new("1", "alice", "db/master"),
//!         ChangeSetRef::new("2", "alice", "db/master"),
//!     ]
//! );
//!
//! // changeset 2 has no rollback, so testing rollbacks fails on it
//! let err = executor
//!     .run(&settings.clone().with_test_rollbacks(true).with_url("sqlite::memory:"))
//!     .unwrap_err();
//! assert_eq!(
//!     err.report.failed_changeset,
//!     Some(ChangeSetRef::new("2", "alice", "db/master"))
//! );
//! ```
//!
//! # Database support
//!
//! - [`SQLite`](sqlite) - available with the `sqlite` feature flag (default).
//!
//! Other databases plug in through [`DatabaseConnector`](engine::DatabaseConnector)
//! and [`EngineFactory`](engine::EngineFactory).

mod error;
pub use error::{BoxError, Error};

pub mod attribution;
pub mod config;
pub mod driver;
pub mod engine;
pub mod listener;

mod executor;
pub use executor::{ExecutionReport, MigrationExecutor, MigrationMode, RunError, RunSettings};

pub use engine::ChangeSetRef;

mod macros;

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod changeset;

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;

#[cfg(test)]
pub(crate) mod test_support;
