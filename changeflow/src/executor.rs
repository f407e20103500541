//! Running a migration end to end.
//!
//! A run resolves its configuration, opens a database handle, builds an engine
//! over it, applies the changelog in the selected [`MigrationMode`] and closes
//! the handle again. The handle is closed on every path once it was opened; a
//! failed close is logged and otherwise ignored.

use std::path::PathBuf;

use serde::Serialize;

use crate::attribution::{FailureAttributor, SourceChainAttributor};
use crate::config::{self, ConfigurationKey, ExplicitFields, MigrationConfiguration};
use crate::engine::{
    cause, ChangeSetRef, ConnectionParams, Database, DatabaseConnector, EngineFactory,
    FileSystemResourceAccessor, ResourceAccessor,
};
use crate::error::Error;
use crate::listener::ExecutionListener;

/// How the changelog is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationMode {
    /// Apply pending changesets once.
    ForwardOnly,
    /// Apply, roll back, then apply again, checking rollbacks invert the
    /// forward changes.
    TestRollback,
}

impl MigrationMode {
    pub fn from_test_rollbacks(test_rollbacks: bool) -> Self {
        if test_rollbacks {
            Self::TestRollback
        } else {
            Self::ForwardOnly
        }
    }
}

/// What happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Changesets executed successfully, in the order the engine reported them.
    pub executed_changesets: Vec<ChangeSetRef>,
    /// The changeset behind the failure, when it could be identified.
    pub failed_changeset: Option<ChangeSetRef>,
}

/// A failed run: the cause together with the report accumulated before it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunError {
    pub report: ExecutionReport,
    #[source]
    pub error: Error,
}

impl RunError {
    pub fn into_parts(self) -> (ExecutionReport, Error) {
        (self.report, self.error)
    }
}

/// Inputs for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    pub properties_path: Option<PathBuf>,
    pub fields: ExplicitFields,
    pub driver_override: Option<String>,
    pub test_rollbacks: bool,
}

impl RunSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read base configuration from a `key=value` properties file.
    pub fn with_properties_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.properties_path = Some(path.into());
        self
    }

    pub fn with_changelog_file(mut self, changelog: impl Into<String>) -> Self {
        self.fields.changelog_file = Some(changelog.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.fields.url = Some(url.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.fields.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.fields.password = Some(password.into());
        self
    }

    pub fn with_default_schema_name(mut self, schema: impl Into<String>) -> Self {
        self.fields.default_schema_name = Some(schema.into());
        self
    }

    pub fn with_contexts(mut self, contexts: impl Into<String>) -> Self {
        self.fields.contexts = Some(contexts.into());
        self
    }

    /// Pick the driver through the embedded catalog by engine display name.
    pub fn with_database_engine(mut self, engine: impl Into<String>) -> Self {
        self.fields.database_engine = Some(engine.into());
        self
    }

    /// Use this driver class regardless of the catalog.
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver_override = Some(driver.into());
        self
    }

    pub fn with_test_rollbacks(mut self, test_rollbacks: bool) -> Self {
        self.test_rollbacks = test_rollbacks;
        self
    }

    pub fn mode(&self) -> MigrationMode {
        MigrationMode::from_test_rollbacks(self.test_rollbacks)
    }

    /// Resolve the configuration these settings describe.
    pub fn resolve(&self) -> Result<MigrationConfiguration, Error> {
        config::resolve(
            self.properties_path.as_deref(),
            &self.fields,
            self.driver_override.as_deref(),
        )
    }
}

/// Drives runs against a connector and an engine factory.
pub struct MigrationExecutor {
    connector: Box<dyn DatabaseConnector>,
    engines: Box<dyn EngineFactory>,
    resources: Box<dyn ResourceAccessor>,
    attributor: Box<dyn FailureAttributor>,
}

impl std::fmt::Debug for MigrationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationExecutor").finish_non_exhaustive()
    }
}

impl MigrationExecutor {
    /// Resources resolve against the current directory and failures are
    /// attributed with [`SourceChainAttributor`] unless configured otherwise.
    pub fn new(
        connector: impl DatabaseConnector + 'static,
        engines: impl EngineFactory + 'static,
    ) -> Self {
        Self {
            connector: Box::new(connector),
            engines: Box::new(engines),
            resources: Box::new(FileSystemResourceAccessor::new(".")),
            attributor: Box::new(SourceChainAttributor),
        }
    }

    /// Set where the engine reads changelog resources from.
    pub fn with_resource_accessor(mut self, resources: impl ResourceAccessor + 'static) -> Self {
        self.resources = Box::new(resources);
        self
    }

    pub fn with_attributor(mut self, attributor: impl FailureAttributor + 'static) -> Self {
        self.attributor = Box::new(attributor);
        self
    }

    /// Run a migration. On failure the returned [`RunError`] still carries the
    /// report of everything executed before the failure.
    pub fn run(&self, settings: &RunSettings) -> Result<ExecutionReport, RunError> {
        let mode = settings.mode();
        let _span = tracing::info_span!("migration_run", mode = ?mode).entered();

        let config = settings.resolve().map_err(|error| {
            tracing::error!(error = %error, "unable to resolve configuration");
            RunError {
                report: ExecutionReport::default(),
                error,
            }
        })?;
        tracing::debug!(config = ?config, "resolved configuration");

        let params = ConnectionParams::from_config(&config);
        let mut database = self.connector.connect(&params).map_err(|error| {
            tracing::error!(error = %error, "error creating database");
            RunError {
                report: ExecutionReport::default(),
                error,
            }
        })?;

        let listener = ExecutionListener::new();
        let outcome = self.execute(&config, mode, database.as_mut(), &listener);
        release(database.as_mut());

        let mut report = ExecutionReport {
            executed_changesets: listener.executed(),
            failed_changeset: None,
        };
        match outcome {
            Ok(()) => {
                tracing::info!(
                    executed = report.executed_changesets.len(),
                    "migration completed successfully"
                );
                Ok(report)
            }
            Err(error) => {
                report.failed_changeset = self.attributor.attribute(&error);
                tracing::error!(
                    error = %error,
                    kind = error.kind(),
                    executed = report.executed_changesets.len(),
                    failed_changeset = ?report.failed_changeset.as_ref().map(ToString::to_string),
                    "migration failed"
                );
                Err(RunError { report, error })
            }
        }
    }

    fn execute(
        &self,
        config: &MigrationConfiguration,
        mode: MigrationMode,
        database: &mut dyn Database,
        listener: &ExecutionListener,
    ) -> Result<(), Error> {
        let changelog = config
            .get(ConfigurationKey::ChangelogFile)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::EngineInit(cause("no changelog file configured")))?;

        let mut engine = self
            .engines
            .create(changelog, self.resources.as_ref(), database)?;
        engine.set_changeset_listener(Box::new(listener.clone()));

        let contexts = config.contexts();
        tracing::info!(changelog, contexts = %contexts, "starting migration");
        match mode {
            MigrationMode::ForwardOnly => engine.update(&contexts),
            MigrationMode::TestRollback => engine.update_testing_rollback(&contexts),
        }
    }
}

fn release(database: &mut dyn Database) {
    if let Err(error) = database.close() {
        tracing::warn!(error = %error, "error closing database");
    }
}
