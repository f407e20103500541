//! Contracts for the collaborators a run drives: the database connector, the
//! migration engine and the resource accessor, plus the values passed across
//! them.

use std::any::Any;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::config::{ConfigurationKey, MigrationConfiguration};
use crate::error::{BoxError, Error};
use crate::listener::ChangeSetListener;

/// A reference to one changeset, as identified by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChangeSetRef {
    pub id: String,
    pub author: String,
    pub changelog: String,
}

impl ChangeSetRef {
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        changelog: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            changelog: changelog.into(),
        }
    }
}

impl fmt::Display for ChangeSetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.changelog, self.id, self.author)
    }
}

/// The failure an engine raises when a specific changeset breaks.
///
/// Engines box this inside [`Error::MigrationFailed`]. The changeset is not
/// exposed; it is recovered by [`crate::attribution`].
#[derive(Debug, thiserror::Error)]
#[error("changeset {changeset} failed: {source}")]
pub struct ChangeSetFailure {
    changeset: ChangeSetRef,
    #[source]
    source: Error,
}

impl ChangeSetFailure {
    pub fn new(changeset: ChangeSetRef, source: Error) -> Self {
        Self { changeset, source }
    }

    pub(crate) fn changeset(&self) -> &ChangeSetRef {
        &self.changeset
    }
}

impl From<ChangeSetFailure> for Error {
    fn from(value: ChangeSetFailure) -> Self {
        Error::MigrationFailed(Box::new(value))
    }
}

/// Context labels selecting which changesets run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contexts(Vec<String>);

impl Contexts {
    /// Parse a comma-separated list. Blank entries are dropped.
    pub fn parse(value: &str) -> Self {
        Self(
            value
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Whether a changeset labelled with `labels` runs under this filter. An
    /// empty filter or an unlabelled changeset always matches.
    pub fn matches<S: AsRef<str>>(&self, labels: &[S]) -> bool {
        self.0.is_empty()
            || labels.is_empty()
            || labels
                .iter()
                .any(|label| self.0.iter().any(|c| c.eq_ignore_ascii_case(label.as_ref())))
    }
}

impl fmt::Display for Contexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// What a connector needs to open a database handle.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub driver: Option<String>,
    pub default_schema_name: Option<String>,
    pub default_catalog_name: Option<String>,
}

impl ConnectionParams {
    pub fn from_config(config: &MigrationConfiguration) -> Self {
        let get = |key| config.get(key).map(str::to_string);
        Self {
            url: get(ConfigurationKey::Url),
            username: get(ConfigurationKey::Username),
            password: get(ConfigurationKey::Password),
            driver: get(ConfigurationKey::Driver),
            default_schema_name: get(ConfigurationKey::DefaultSchemaName),
            default_catalog_name: get(ConfigurationKey::DefaultCatalogName),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("driver", &self.driver)
            .field("default_schema_name", &self.default_schema_name)
            .field("default_catalog_name", &self.default_catalog_name)
            .finish()
    }
}

/// A database handle owned by a single run.
pub trait Database {
    /// Release the handle. Called exactly once per run.
    fn close(&mut self) -> Result<(), Error>;

    /// Lets an engine reach its concrete handle type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Opens database handles.
pub trait DatabaseConnector {
    /// Failures are reported as [`Error::DatabaseConnect`].
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Database>, Error>;
}

/// A migration engine bound to one changelog and one database handle.
pub trait MigrationEngine {
    fn set_changeset_listener(&mut self, listener: Box<dyn ChangeSetListener>);

    /// Apply all pending changesets matching `contexts`.
    fn update(&mut self, contexts: &Contexts) -> Result<(), Error>;

    /// Apply all pending changesets, roll back the ones just applied, then
    /// apply them again.
    fn update_testing_rollback(&mut self, contexts: &Contexts) -> Result<(), Error>;
}

/// Builds engines.
pub trait EngineFactory {
    /// Failures are reported as [`Error::EngineInit`]. The engine borrows the
    /// database; the caller keeps ownership and closes it.
    fn create<'a>(
        &'a self,
        changelog: &str,
        resources: &'a dyn ResourceAccessor,
        database: &'a mut dyn Database,
    ) -> Result<Box<dyn MigrationEngine + 'a>, Error>;
}

/// Reads files by workspace-relative path on behalf of the engine.
pub trait ResourceAccessor {
    fn read_to_string(&self, path: &str) -> std::io::Result<String>;
}

/// Resolves resources under a fixed root directory.
#[derive(Debug, Clone)]
pub struct FileSystemResourceAccessor {
    root: PathBuf,
}

impl FileSystemResourceAccessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceAccessor for FileSystemResourceAccessor {
    fn read_to_string(&self, path: &str) -> std::io::Result<String> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("resource path [{path}] must stay inside the workspace"),
            ));
        }
        std::fs::read_to_string(self.root.join(relative))
    }
}

/// Convenience for collaborators turning plain messages into boxed causes.
pub(crate) fn cause(message: impl Into<String>) -> BoxError {
    BoxError::from(message.into())
}
