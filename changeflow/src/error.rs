use std::path::PathBuf;

/// A boxed cause carried by the collaborator-facing error variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for the changeflow crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The properties file could not be read.
    #[error("unable to load properties file at [{}]: {source}", path.display())]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The database handle could not be created.
    #[error("error creating database: {0}")]
    DatabaseConnect(#[source] BoxError),
    /// The migration engine could not be constructed.
    #[error("error creating migration engine: {0}")]
    EngineInit(#[source] BoxError),
    /// A changeset failed while being applied or rolled back.
    #[error("error executing migration: {0}")]
    MigrationFailed(#[source] BoxError),
    /// A lower-level database fault not tied to a specific changeset.
    #[error("error executing against database: {0}")]
    DatabaseExecution(#[source] BoxError),
    /// A generic engine failure, such as a changeset without a rollback.
    #[error("{0}")]
    Engine(String),
    /// Releasing the database handle failed. Only ever logged.
    #[error("error closing database: {0}")]
    Teardown(#[source] BoxError),
}

impl Error {
    /// Short, stable name of the error kind, used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigLoad { .. } => "config_load",
            Self::DatabaseConnect(_) => "database_connect",
            Self::EngineInit(_) => "engine_init",
            Self::MigrationFailed(_) => "migration_failed",
            Self::DatabaseExecution(_) => "database_execution",
            Self::Engine(_) => "engine",
            Self::Teardown(_) => "teardown",
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::DatabaseExecution(Box::new(value))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Engine(value)
    }
}
