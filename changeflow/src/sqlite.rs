//! SQLite collaborators built on [`rusqlite`].
//!
//! [`SqliteConnector`] opens databases from `jdbc:sqlite:<path>`,
//! `sqlite://<path>` or `sqlite:<path>` URLs (`:memory:` for an in-memory
//! database). [`SqliteEngineFactory`] builds engines that apply the
//! [`Changelog`]s they were given and record applied changesets in a tracking
//! table.
//!
//! ## Transaction Safety
//!
//! Each changeset, and each rollback, runs in its own transaction. A failing
//! changeset leaves the database as the last successful one left it.
//!
//! ## Example
//!
//! ```
//! use changeflow::sql_changeset;
//! use changeflow::changeset::Changelog;
//! use changeflow::sqlite::{SqliteConnector, SqliteEngineFactory};
//! use changeflow::{MigrationExecutor, RunSettings};
//!
//! sql_changeset!(CreateUsers, "1", "alice",
//!     up: "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
//!     down: "DROP TABLE users"
//! );
//!
//! let executor = MigrationExecutor::new(
//!     SqliteConnector::new(),
//!     SqliteEngineFactory::new(vec![Changelog::new("db/master", vec![Box::new(CreateUsers)])]),
//! );
//! let settings = RunSettings::new()
//!     .with_url("jdbc:sqlite::memory:")
//!     .with_database_engine("SQLite")
//!     .with_changelog_file("db/master")
//!     .with_test_rollbacks(true);
//!
//! let report = executor.run(&settings).unwrap();
//! assert_eq!(report.executed_changesets.len(), 1);
//! assert_eq!(report.failed_changeset, None);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

pub use rusqlite;

use crate::changeset::{calculate_checksum, ChangeSet, Changelog, Precondition};
use crate::engine::{
    cause, ChangeSetFailure, ChangeSetRef, ConnectionParams, Contexts, Database,
    DatabaseConnector, EngineFactory, MigrationEngine, ResourceAccessor,
};
use crate::error::Error;
use crate::listener::ChangeSetListener;

/// Driver class name the SQLite connector accepts.
pub const SQLITE_DRIVER: &str = "org.sqlite.JDBC";

pub(crate) const DEFAULT_TRACKING_TABLE_NAME: &str = "_changeflow_changelog_";

/// An open SQLite database owned by one run.
#[derive(Debug)]
pub struct SqliteDatabase {
    conn: Option<Connection>,
}

impl SqliteDatabase {
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Some(conn) }
    }

    /// The underlying connection, or `None` once closed.
    pub fn connection_mut(&mut self) -> Option<&mut Connection> {
        self.conn.as_mut()
    }
}

impl Database for SqliteDatabase {
    fn close(&mut self) -> Result<(), Error> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| Error::Teardown(Box::new(e))),
            None => Ok(()),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Opens [`SqliteDatabase`]s.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    busy_timeout: Duration,
}

impl Default for SqliteConnector {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(30),
        }
    }
}

impl SqliteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long to wait on a locked database.
    /// Defaults to 30 seconds.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// The file part of a SQLite URL. `None` for URLs of other databases.
fn sqlite_location(url: &str) -> Option<&str> {
    ["jdbc:sqlite:", "sqlite://", "sqlite:"]
        .iter()
        .find_map(|prefix| url.strip_prefix(prefix))
}

impl DatabaseConnector for SqliteConnector {
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Database>, Error> {
        if let Some(driver) = params.driver.as_deref().filter(|d| *d != SQLITE_DRIVER) {
            return Err(Error::DatabaseConnect(cause(format!(
                "driver [{driver}] is not supported by the SQLite connector"
            ))));
        }
        let url = params
            .url
            .as_deref()
            .ok_or_else(|| Error::DatabaseConnect(cause("no database url configured")))?;
        let location = sqlite_location(url).ok_or_else(|| {
            Error::DatabaseConnect(cause(format!("url [{url}] is not a SQLite url")))
        })?;

        if params.default_schema_name.is_some() || params.default_catalog_name.is_some() {
            tracing::debug!("SQLite has no schemas or catalogs, ignoring defaults");
        }

        let conn = match location {
            "" | ":memory:" => Connection::open_in_memory(),
            path => Connection::open(path),
        }
        .map_err(|e| Error::DatabaseConnect(Box::new(e)))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| Error::DatabaseConnect(Box::new(e)))?;

        tracing::debug!(url, "opened SQLite database");
        Ok(Box::new(SqliteDatabase::from_connection(conn)))
    }
}

/// Builds [`MigrationEngine`]s over [`SqliteDatabase`]s for a fixed set of
/// changelogs.
#[derive(Debug)]
pub struct SqliteEngineFactory {
    changelogs: Vec<Changelog>,
    tracking_table_name: String,
}

impl SqliteEngineFactory {
    pub fn new(changelogs: Vec<Changelog>) -> Self {
        Self {
            changelogs,
            tracking_table_name: DEFAULT_TRACKING_TABLE_NAME.to_string(),
        }
    }

    /// Set a custom name for the changelog tracking table.
    /// Defaults to "_changeflow_changelog_".
    pub fn with_tracking_table_name(mut self, name: impl Into<String>) -> Self {
        self.tracking_table_name = name.into();
        self
    }

    pub fn changelogs(&self) -> &[Changelog] {
        &self.changelogs
    }

    pub fn tracking_table_name(&self) -> &str {
        &self.tracking_table_name
    }
}

impl EngineFactory for SqliteEngineFactory {
    fn create<'a>(
        &'a self,
        changelog: &str,
        resources: &'a dyn ResourceAccessor,
        database: &'a mut dyn Database,
    ) -> Result<Box<dyn MigrationEngine + 'a>, Error> {
        let changelog = self
            .changelogs
            .iter()
            .find(|c| c.path() == changelog)
            .ok_or_else(|| {
                Error::EngineInit(cause(format!("changelog [{changelog}] not found")))
            })?;
        let conn = database
            .as_any_mut()
            .downcast_mut::<SqliteDatabase>()
            .ok_or_else(|| Error::EngineInit(cause("database handle is not a SQLite database")))?
            .connection_mut()
            .ok_or_else(|| Error::EngineInit(cause("database handle is already closed")))?;

        Ok(Box::new(SqliteEngine {
            changelog,
            tracking_table: quote_identifier(&self.tracking_table_name),
            conn,
            resources,
            listener: None,
        }))
    }
}

struct SqliteEngine<'a> {
    changelog: &'a Changelog,
    /// Quoted, ready to splice into SQL.
    tracking_table: String,
    conn: &'a mut Connection,
    resources: &'a dyn ResourceAccessor,
    listener: Option<Box<dyn ChangeSetListener>>,
}

/// Quote a table name for SQLite, doubling embedded quotes.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn failed(changeset: &ChangeSetRef, error: Error) -> Error {
    ChangeSetFailure::new(changeset.clone(), error).into()
}

impl<'a> SqliteEngine<'a> {
    fn ensure_tracking_table(&mut self) -> Result<(), Error> {
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT NOT NULL,
                    author TEXT NOT NULL,
                    changelog TEXT NOT NULL,
                    applied_at TEXT NOT NULL,
                    checksum TEXT NOT NULL,
                    order_executed INTEGER NOT NULL,
                    PRIMARY KEY (id, author, changelog)
                )",
                self.tracking_table
            ),
            [],
        )?;
        Ok(())
    }

    /// Checksums of this changelog's applied changesets, keyed by id and author.
    fn applied_checksums(&mut self) -> Result<HashMap<(String, String), String>, Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, author, checksum FROM {} WHERE changelog = ?1",
            self.tracking_table
        ))?;
        let rows = stmt
            .query_map([self.changelog.path()], |row| {
                Ok(((row.get(0)?, row.get(1)?), row.get(2)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Pending changesets in changelog order. Fails if an applied changeset
    /// was modified since.
    fn pending(&mut self, contexts: &Contexts) -> Result<Vec<&'a dyn ChangeSet>, Error> {
        self.ensure_tracking_table()?;
        let applied = self.applied_checksums()?;
        let changelog: &'a Changelog = self.changelog;

        let mut pending = Vec::new();
        for changeset in changelog.changesets() {
            let key = (changeset.id(), changeset.author());
            match applied.get(&key) {
                Some(stored) => {
                    let reference = changelog.reference(changeset.as_ref());
                    let current = calculate_checksum(changeset.as_ref(), self.resources)
                        .map_err(|e| failed(&reference, e))?;
                    if *stored != current {
                        return Err(failed(
                            &reference,
                            Error::Engine(format!(
                                "checksum mismatch. Expected '{stored}' but found '{current}'. \
                                 The changeset was modified after being applied."
                            )),
                        ));
                    }
                }
                None if contexts.matches(&changeset.contexts()) => {
                    pending.push(changeset.as_ref());
                }
                None => {
                    tracing::debug!(
                        changeset = %changelog.reference(changeset.as_ref()),
                        contexts = %contexts,
                        "skipping changeset (contexts do not match)"
                    );
                }
            }
        }
        Ok(pending)
    }

    /// Apply one changeset. Returns whether it actually ran (as opposed to
    /// being stamped because its precondition was satisfied).
    fn apply(&mut self, changeset: &dyn ChangeSet, notify: bool) -> Result<bool, Error> {
        let reference = self.changelog.reference(changeset);
        let _span = tracing::info_span!("changeset_up", changeset = %reference).entered();
        let start = Instant::now();

        let checksum =
            calculate_checksum(changeset, self.resources).map_err(|e| failed(&reference, e))?;

        let tx = self.conn.transaction()?;
        let precondition = changeset
            .sqlite_precondition(&tx)
            .map_err(|e| failed(&reference, e))?;
        let ran = match precondition {
            Precondition::NeedsApply => {
                changeset
                    .sqlite_up(&tx, self.resources)
                    .map_err(|e| failed(&reference, e))?;
                true
            }
            Precondition::AlreadySatisfied => {
                tracing::info!("precondition already satisfied, recording without running");
                false
            }
        };
        let order: i64 = tx.query_row(
            &format!(
                "SELECT COALESCE(MAX(order_executed), 0) + 1 FROM {}",
                self.tracking_table
            ),
            [],
            |row| row.get(0),
        )?;
        tx.execute(
            &format!(
                "INSERT INTO {} (id, author, changelog, applied_at, checksum, order_executed) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                self.tracking_table
            ),
            params![
                reference.id,
                reference.author,
                reference.changelog,
                Utc::now().to_rfc3339(),
                checksum,
                order
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "changeset applied"
        );
        if let Some(listener) = self.listener.as_deref() {
            match (ran, notify) {
                (true, true) => listener.on_changeset_executed(&reference),
                (false, true) => listener.on_changeset_skipped(&reference),
                _ => {}
            }
        }
        Ok(ran)
    }

    fn rollback(&mut self, changeset: &dyn ChangeSet) -> Result<(), Error> {
        let reference = self.changelog.reference(changeset);
        let _span = tracing::info_span!("changeset_down", changeset = %reference).entered();

        let tx = self.conn.transaction()?;
        changeset
            .sqlite_down(&tx, self.resources)
            .map_err(|e| failed(&reference, e))?;
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE id = ?1 AND author = ?2 AND changelog = ?3",
                self.tracking_table
            ),
            params![reference.id, reference.author, reference.changelog],
        )?;
        tx.commit()?;

        if let Some(listener) = self.listener.as_deref() {
            listener.on_changeset_rolled_back(&reference);
        }
        Ok(())
    }

    /// Apply everything pending, returning the changesets that actually ran.
    fn apply_pending(
        &mut self,
        contexts: &Contexts,
        notify: bool,
    ) -> Result<Vec<&'a dyn ChangeSet>, Error> {
        let pending = self.pending(contexts)?;
        tracing::debug!(
            changelog = self.changelog.path(),
            pending = pending.len(),
            "considering changesets to run"
        );
        let mut ran = Vec::new();
        for changeset in pending {
            if self.apply(changeset, notify)? {
                ran.push(changeset);
            }
        }
        Ok(ran)
    }
}

impl<'a> MigrationEngine for SqliteEngine<'a> {
    fn set_changeset_listener(&mut self, listener: Box<dyn ChangeSetListener>) {
        self.listener = Some(listener);
    }

    fn update(&mut self, contexts: &Contexts) -> Result<(), Error> {
        self.apply_pending(contexts, true).map(|_| ())
    }

    fn update_testing_rollback(&mut self, contexts: &Contexts) -> Result<(), Error> {
        let ran = self.apply_pending(contexts, true)?;
        tracing::info!(count = ran.len(), "rolling back applied changesets");
        for changeset in ran.iter().rev() {
            self.rollback(*changeset)?;
        }
        tracing::info!("re-applying rolled back changesets");
        self.apply_pending(contexts, false).map(|_| ())
    }
}

/// Fetch the tracking rows of `changelog` in execution order, as
/// `(id, author, order_executed)`.
pub fn applied_changesets(
    conn: &Connection,
    tracking_table: &str,
    changelog: &str,
) -> Result<Vec<(String, String, i64)>, Error> {
    let table_exists = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
            [tracking_table],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .is_some();
    if !table_exists {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT id, author, order_executed FROM {} \
         WHERE changelog = ?1 ORDER BY order_executed",
        quote_identifier(tracking_table)
    ))?;
    let rows = stmt
        .query_map([changelog], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::SqlFileChangeSet;
    use crate::engine::FileSystemResourceAccessor;
    use crate::executor::{ExecutionReport, MigrationExecutor, RunSettings};
    use crate::sql_changeset;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    const CHANGELOG: &str = "db/master";

    sql_changeset!(CreateUsers, "1", "alice",
        up: "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
        down: "DROP TABLE users"
    );

    sql_changeset!(AddEmail, "2", "alice",
        up: "ALTER TABLE users ADD COLUMN email TEXT",
        down: "ALTER TABLE users DROP COLUMN email"
    );

    sql_changeset!(CreatePosts, "3", "bob",
        up: "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER, title TEXT)",
        down: "DROP TABLE posts"
    );

    sql_changeset!(Broken, "3", "bob",
        up: "bleep blorp"
    );

    sql_changeset!(AddEmailNoRollback, "2", "alice",
        up: "ALTER TABLE users ADD COLUMN email TEXT"
    );

    sql_changeset!(AddEmailEdited, "2", "alice",
        up: "ALTER TABLE users ADD COLUMN email_address TEXT",
        down: "ALTER TABLE users DROP COLUMN email_address"
    );

    struct SeedAdmin;
    impl ChangeSet for SeedAdmin {
        fn id(&self) -> String {
            "seed".to_string()
        }
        fn author(&self) -> String {
            "carol".to_string()
        }
        fn contexts(&self) -> Vec<String> {
            vec!["test".to_string()]
        }
        fn sqlite_up(&self, tx: &rusqlite::Transaction, _: &dyn ResourceAccessor) -> Result<(), Error> {
            tx.execute("INSERT INTO users (name) VALUES ('admin')", [])?;
            Ok(())
        }
        fn sqlite_down(&self, tx: &rusqlite::Transaction, _: &dyn ResourceAccessor) -> Result<(), Error> {
            tx.execute("DELETE FROM users WHERE name = 'admin'", [])?;
            Ok(())
        }
    }

    struct UsersAlreadyThere;
    impl ChangeSet for UsersAlreadyThere {
        fn id(&self) -> String {
            "1".to_string()
        }
        fn author(&self) -> String {
            "alice".to_string()
        }
        fn sqlite_up(&self, _: &rusqlite::Transaction, _: &dyn ResourceAccessor) -> Result<(), Error> {
            panic!("should be stamped, not run");
        }
        fn sqlite_precondition(&self, tx: &rusqlite::Transaction) -> Result<Precondition, Error> {
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='users'",
                [],
                |row| row.get(0),
            )?;
            Ok(if count > 0 {
                Precondition::AlreadySatisfied
            } else {
                Precondition::NeedsApply
            })
        }
    }

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("changeflow_{}.db", uuid::Uuid::new_v4().simple()))
    }

    fn url(path: &PathBuf) -> String {
        format!("jdbc:sqlite:{}", path.display())
    }

    fn executor(changesets: Vec<Box<dyn ChangeSet>>) -> MigrationExecutor {
        MigrationExecutor::new(
            SqliteConnector::new(),
            SqliteEngineFactory::new(vec![Changelog::new(CHANGELOG, changesets)]),
        )
    }

    fn settings(path: &PathBuf) -> RunSettings {
        RunSettings::new()
            .with_url(url(path))
            .with_database_engine("SQLite")
            .with_changelog_file(CHANGELOG)
    }

    fn reference(id: &str, author: &str) -> ChangeSetRef {
        ChangeSetRef::new(id, author, CHANGELOG)
    }

    fn tables(path: &PathBuf) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn columns(path: &PathBuf, table: &str) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn tracked(path: &PathBuf) -> Vec<(String, String, i64)> {
        let conn = Connection::open(path).unwrap();
        applied_changesets(&conn, DEFAULT_TRACKING_TABLE_NAME, CHANGELOG).unwrap()
    }

    #[test]
    fn forward_run_applies_all_in_order() {
        let path = temp_db();
        let report = executor(vec![
            Box::new(CreateUsers),
            Box::new(AddEmail),
            Box::new(CreatePosts),
        ])
        .run(&settings(&path))
        .unwrap();

        assert_eq!(
            report,
            ExecutionReport {
                executed_changesets: vec![
                    reference("1", "alice"),
                    reference("2", "alice"),
                    reference("3", "bob"),
                ],
                failed_changeset: None,
            }
        );
        assert_eq!(
            tables(&path),
            vec!["_changeflow_changelog_", "posts", "users"]
        );
        assert_eq!(columns(&path, "users"), vec!["id", "name", "email"]);
        assert_eq!(
            tracked(&path),
            vec![
                ("1".to_string(), "alice".to_string(), 1),
                ("2".to_string(), "alice".to_string(), 2),
                ("3".to_string(), "bob".to_string(), 3),
            ]
        );
    }

    #[test]
    fn second_run_has_nothing_pending() {
        let path = temp_db();
        let build = || executor(vec![Box::new(CreateUsers), Box::new(AddEmail)]);
        build().run(&settings(&path)).unwrap();
        let report = build().run(&settings(&path)).unwrap();
        assert_eq!(report, ExecutionReport::default());
    }

    #[test]
    fn failing_changeset_is_attributed_and_rolled_back() {
        let path = temp_db();
        let err = executor(vec![
            Box::new(CreateUsers),
            Box::new(AddEmail),
            Box::new(Broken),
        ])
        .run(&settings(&path))
        .unwrap_err();

        assert!(matches!(err.error, Error::MigrationFailed(_)));
        assert_eq!(
            err.report.executed_changesets,
            vec![reference("1", "alice"), reference("2", "alice")]
        );
        assert_eq!(err.report.failed_changeset, Some(reference("3", "bob")));
        assert_eq!(tracked(&path).len(), 2);
    }

    #[test]
    fn test_rollback_mode_leaves_database_migrated() {
        let path = temp_db();
        let report = executor(vec![
            Box::new(CreateUsers),
            Box::new(AddEmail),
            Box::new(CreatePosts),
        ])
        .run(&settings(&path).with_test_rollbacks(true))
        .unwrap();

        assert_eq!(
            report.executed_changesets,
            vec![
                reference("1", "alice"),
                reference("2", "alice"),
                reference("3", "bob"),
            ]
        );
        assert_eq!(report.failed_changeset, None);
        assert_eq!(
            tables(&path),
            vec!["_changeflow_changelog_", "posts", "users"]
        );
        assert_eq!(columns(&path, "users"), vec!["id", "name", "email"]);
        assert_eq!(tracked(&path).len(), 3);
    }

    #[test]
    fn test_rollback_failure_during_rollback_is_attributed() {
        let path = temp_db();
        let err = executor(vec![
            Box::new(CreateUsers),
            Box::new(AddEmailNoRollback),
            Box::new(CreatePosts),
        ])
        .run(&settings(&path).with_test_rollbacks(true))
        .unwrap_err();

        assert!(matches!(err.error, Error::MigrationFailed(_)));
        assert!(err.report.executed_changesets.contains(&reference("1", "alice")));
        assert_eq!(err.report.failed_changeset, Some(reference("2", "alice")));
        // changeset 3 was rolled back before changeset 2 failed to
        assert!(!tables(&path).contains(&"posts".to_string()));
    }

    #[test]
    fn modified_changeset_fails_validation() {
        let path = temp_db();
        executor(vec![Box::new(CreateUsers), Box::new(AddEmail)])
            .run(&settings(&path))
            .unwrap();

        let err = executor(vec![Box::new(CreateUsers), Box::new(AddEmailEdited)])
            .run(&settings(&path))
            .unwrap_err();
        assert!(matches!(err.error, Error::MigrationFailed(_)));
        assert!(err.to_string().contains("checksum mismatch"));
        assert_eq!(err.report.executed_changesets, vec![]);
        assert_eq!(err.report.failed_changeset, Some(reference("2", "alice")));
    }

    #[test]
    fn contexts_filter_changesets() {
        let path = temp_db();
        let build = || executor(vec![Box::new(CreateUsers), Box::new(SeedAdmin)]);

        let report = build()
            .run(&settings(&path).with_contexts("prod"))
            .unwrap();
        assert_eq!(report.executed_changesets, vec![reference("1", "alice")]);

        let report = build()
            .run(&settings(&path).with_contexts("test"))
            .unwrap();
        assert_eq!(report.executed_changesets, vec![reference("seed", "carol")]);
    }

    #[test]
    fn satisfied_precondition_is_stamped_not_reported() {
        let path = temp_db();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", [])
                .unwrap();
        }
        let report = executor(vec![Box::new(UsersAlreadyThere), Box::new(AddEmail)])
            .run(&settings(&path))
            .unwrap();

        assert_eq!(report.executed_changesets, vec![reference("2", "alice")]);
        assert_eq!(tracked(&path).len(), 2);
    }

    #[test]
    fn sql_file_changesets_read_through_the_resource_accessor() {
        let root = std::env::temp_dir().join(format!(
            "changeflow_workspace_{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(root.join("sql")).unwrap();
        std::fs::write(
            root.join("sql/001_up.sql"),
            "CREATE TABLE audit (id INTEGER PRIMARY KEY);\nCREATE INDEX idx_audit ON audit(id);",
        )
        .unwrap();
        std::fs::write(root.join("sql/001_down.sql"), "DROP TABLE audit;").unwrap();

        let path = temp_db();
        let report = executor(vec![Box::new(
            SqlFileChangeSet::new("audit", "dave", "sql/001_up.sql")
                .with_rollback("sql/001_down.sql"),
        )])
        .with_resource_accessor(FileSystemResourceAccessor::new(&root))
        .run(&settings(&path).with_test_rollbacks(true))
        .unwrap();

        assert_eq!(report.executed_changesets, vec![reference("audit", "dave")]);
        assert!(tables(&path).contains(&"audit".to_string()));
    }

    #[test]
    fn edited_sql_file_fails_validation() {
        let root = std::env::temp_dir().join(format!(
            "changeflow_workspace_{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("up.sql"), "CREATE TABLE audit (id INTEGER PRIMARY KEY);").unwrap();

        let path = temp_db();
        let build = || {
            executor(vec![Box::new(SqlFileChangeSet::new("1", "dave", "up.sql"))])
                .with_resource_accessor(FileSystemResourceAccessor::new(&root))
        };
        let report = build().run(&settings(&path)).unwrap();
        assert_eq!(report.executed_changesets, vec![reference("1", "dave")]);

        std::fs::write(
            root.join("up.sql"),
            "CREATE TABLE audit (id INTEGER PRIMARY KEY, note TEXT);",
        )
        .unwrap();
        let err = build().run(&settings(&path)).unwrap_err();
        assert!(matches!(err.error, Error::MigrationFailed(_)));
        assert!(err.to_string().contains("checksum mismatch"));
        assert_eq!(err.report.executed_changesets, vec![]);
        assert_eq!(err.report.failed_changeset, Some(reference("1", "dave")));
    }

    #[test]
    fn deleted_sql_file_of_applied_changeset_is_attributed() {
        let root = std::env::temp_dir().join(format!(
            "changeflow_workspace_{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("up.sql"), "CREATE TABLE audit (id INTEGER PRIMARY KEY);").unwrap();

        let path = temp_db();
        let build = || {
            executor(vec![Box::new(SqlFileChangeSet::new("1", "dave", "up.sql"))])
                .with_resource_accessor(FileSystemResourceAccessor::new(&root))
        };
        build().run(&settings(&path)).unwrap();

        std::fs::remove_file(root.join("up.sql")).unwrap();
        let err = build().run(&settings(&path)).unwrap_err();
        assert!(matches!(err.error, Error::MigrationFailed(_)));
        assert_eq!(err.report.failed_changeset, Some(reference("1", "dave")));
    }

    #[test]
    fn missing_sql_file_fails_the_changeset() {
        let path = temp_db();
        let err = executor(vec![Box::new(SqlFileChangeSet::new(
            "audit",
            "dave",
            "sql/missing.sql",
        ))])
        .run(&settings(&path))
        .unwrap_err();
        assert_eq!(err.report.failed_changeset, Some(reference("audit", "dave")));
    }

    #[test]
    fn unknown_changelog_is_an_engine_init_error() {
        let path = temp_db();
        let err = executor(vec![Box::new(CreateUsers)])
            .run(&settings(&path).with_changelog_file("db/other"))
            .unwrap_err();
        assert!(matches!(err.error, Error::EngineInit(_)));
    }

    #[test]
    fn connector_rejects_foreign_drivers_and_urls() {
        let connector = SqliteConnector::new();
        let err = connector
            .connect(&ConnectionParams {
                url: Some("jdbc:sqlite::memory:".to_string()),
                driver: Some("org.postgresql.Driver".to_string()),
                ..Default::default()
            })
            .err()
            .unwrap();
        assert!(matches!(err, Error::DatabaseConnect(_)));

        let err = connector
            .connect(&ConnectionParams {
                url: Some("jdbc:postgresql://localhost/app".to_string()),
                ..Default::default()
            })
            .err()
            .unwrap();
        assert!(matches!(err, Error::DatabaseConnect(_)));

        let err = connector.connect(&ConnectionParams::default()).err().unwrap();
        assert!(matches!(err, Error::DatabaseConnect(_)));
    }

    #[test]
    fn sqlite_locations() {
        assert_eq!(sqlite_location("jdbc:sqlite::memory:"), Some(":memory:"));
        assert_eq!(sqlite_location("sqlite:///tmp/app.db"), Some("/tmp/app.db"));
        assert_eq!(sqlite_location("sqlite:app.db"), Some("app.db"));
        assert_eq!(sqlite_location("jdbc:h2:mem:test"), None);
    }

    #[test]
    fn close_is_idempotent() {
        let mut database = SqliteDatabase::from_connection(Connection::open_in_memory().unwrap());
        database.close().unwrap();
        database.close().unwrap();
        assert!(database.connection_mut().is_none());
    }

    #[test]
    fn custom_tracking_table_name() {
        let path = temp_db();
        MigrationExecutor::new(
            SqliteConnector::new(),
            SqliteEngineFactory::new(vec![Changelog::new(CHANGELOG, vec![Box::new(CreateUsers)])])
                .with_tracking_table_name("schema_log"),
        )
        .run(&settings(&path))
        .unwrap();
        assert_eq!(tables(&path), vec!["schema_log", "users"]);
    }

    #[test]
    fn tracking_table_names_are_quoted() {
        let path = temp_db();
        let build = || {
            MigrationExecutor::new(
                SqliteConnector::new(),
                SqliteEngineFactory::new(vec![Changelog::new(
                    CHANGELOG,
                    vec![Box::new(CreateUsers), Box::new(AddEmail)],
                )])
                .with_tracking_table_name("schema \"log\""),
            )
        };
        let report = build().run(&settings(&path).with_test_rollbacks(true)).unwrap();
        assert_eq!(report.executed_changesets.len(), 2);
        assert_eq!(build().run(&settings(&path)).unwrap(), ExecutionReport::default());

        assert_eq!(tables(&path), vec!["schema \"log\"", "users"]);
        let conn = Connection::open(&path).unwrap();
        assert_eq!(
            applied_changesets(&conn, "schema \"log\"", CHANGELOG).unwrap(),
            vec![
                ("1".to_string(), "alice".to_string(), 1),
                ("2".to_string(), "alice".to_string(), 2),
            ]
        );
    }

    #[test]
    fn quote_identifier_doubles_quotes() {
        assert_eq!(quote_identifier("schema log"), "\"schema log\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn emits_tracing_events() {
        let events = Arc::new(Mutex::new(Vec::<u8>::new()));
        let events_clone = Arc::clone(&events);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .without_time()
            .with_target(false)
            .with_ansi(false)
            .with_writer(move || {
                struct W(Arc<Mutex<Vec<u8>>>);
                impl std::io::Write for W {
                    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                        self.0.lock().unwrap().extend_from_slice(buf);
                        Ok(buf.len())
                    }
                    fn flush(&mut self) -> std::io::Result<()> {
                        Ok(())
                    }
                }
                W(events_clone.clone())
            })
            .finish();

        let path = temp_db();
        tracing::subscriber::with_default(subscriber, || {
            executor(vec![Box::new(CreateUsers)])
                .run(&settings(&path))
                .unwrap();
        });

        let output = String::from_utf8(events.lock().unwrap().clone()).unwrap();
        assert!(output.contains("starting migration"));
        assert!(output.contains("changeset executed changeset=db/master::1::alice"));
        assert!(output.contains("migration completed successfully executed=1"));
    }
}
