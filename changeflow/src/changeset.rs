//! Code-defined changesets and the changelogs that order them.

use std::collections::HashSet;

use rusqlite::Transaction;
use sha2::{Digest, Sha256};

use crate::engine::{ChangeSetRef, ResourceAccessor};
use crate::error::Error;

/// Result of a changeset's precondition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The changes are already present; record the changeset without running it.
    AlreadySatisfied,
    /// Run the changeset.
    NeedsApply,
}

/// A single, atomically tracked unit of schema change.
///
/// A changeset is identified by its `id` and `author` within its changelog.
///
/// # IMPORTANT WARNING
///
/// **Once a changeset has been applied to any database, its `id`, `author` and
/// checksum source must not change.** A changed checksum fails the next run
/// before anything is applied.
pub trait ChangeSet {
    fn id(&self) -> String;

    fn author(&self) -> String;

    /// Human-readable notes. Not tracked, free to change.
    fn description(&self) -> Option<&'static str> {
        None
    }

    /// Context labels. An unlabelled changeset runs under every filter.
    fn contexts(&self) -> Vec<String> {
        Vec::new()
    }

    /// Text hashed into the stored checksum. Changesets whose body lives in
    /// resources read it through `resources` so edits to those files are
    /// caught too.
    fn checksum_source(&self, _resources: &dyn ResourceAccessor) -> Result<String, Error> {
        Ok(String::new())
    }

    /// Apply the changeset inside `tx`.
    fn sqlite_up(&self, tx: &Transaction, resources: &dyn ResourceAccessor) -> Result<(), Error>;

    /// Undo [`ChangeSet::sqlite_up`]. Changesets without a rollback fail when
    /// asked to roll back.
    fn sqlite_down(&self, _tx: &Transaction, _resources: &dyn ResourceAccessor) -> Result<(), Error> {
        Err(Error::Engine(format!(
            "changeset {} by {} does not support rollback",
            self.id(),
            self.author()
        )))
    }

    /// Checked before [`ChangeSet::sqlite_up`]. Defaults to
    /// [`Precondition::NeedsApply`].
    fn sqlite_precondition(&self, _tx: &Transaction) -> Result<Precondition, Error> {
        Ok(Precondition::NeedsApply)
    }
}

impl std::fmt::Debug for dyn ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSet")
            .field("id", &self.id())
            .field("author", &self.author())
            .finish()
    }
}

/// An ordered list of changesets, addressed by its path.
#[derive(Debug)]
pub struct Changelog {
    path: String,
    changesets: Vec<Box<dyn ChangeSet>>,
}

impl Changelog {
    /// Create a changelog, rejecting duplicate `id`/`author` pairs.
    pub fn try_new(
        path: impl Into<String>,
        changesets: Vec<Box<dyn ChangeSet>>,
    ) -> Result<Self, String> {
        let path = path.into();
        let mut seen = HashSet::new();
        for changeset in &changesets {
            let key = (changeset.id(), changeset.author());
            if !seen.insert(key) {
                return Err(format!(
                    "Duplicate changeset {} by {} in changelog {}",
                    changeset.id(),
                    changeset.author(),
                    path
                ));
            }
        }
        Ok(Self { path, changesets })
    }

    /// Create a changelog, panicking on duplicate changesets.
    /// For a non-panicking version, use `try_new`.
    pub fn new(path: impl Into<String>, changesets: Vec<Box<dyn ChangeSet>>) -> Self {
        match Self::try_new(path, changesets) {
            Ok(changelog) => changelog,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn changesets(&self) -> &[Box<dyn ChangeSet>] {
        &self.changesets
    }

    pub fn reference(&self, changeset: &dyn ChangeSet) -> ChangeSetRef {
        ChangeSetRef::new(changeset.id(), changeset.author(), self.path.as_str())
    }
}

/// Checksum stored alongside an applied changeset.
pub(crate) fn calculate_checksum(
    changeset: &dyn ChangeSet,
    resources: &dyn ResourceAccessor,
) -> Result<String, Error> {
    let source = changeset.checksum_source(resources)?;
    let mut hasher = Sha256::new();
    hasher.update(changeset.id().as_bytes());
    hasher.update(b"|");
    hasher.update(changeset.author().as_bytes());
    hasher.update(b"|");
    hasher.update(source.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// A changeset whose SQL lives in workspace files, read through the
/// [`ResourceAccessor`].
#[derive(Debug, Clone)]
pub struct SqlFileChangeSet {
    id: String,
    author: String,
    up_path: String,
    down_path: Option<String>,
    contexts: Vec<String>,
}

impl SqlFileChangeSet {
    pub fn new(id: impl Into<String>, author: impl Into<String>, up_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            up_path: up_path.into(),
            down_path: None,
            contexts: Vec::new(),
        }
    }

    pub fn with_rollback(mut self, down_path: impl Into<String>) -> Self {
        self.down_path = Some(down_path.into());
        self
    }

    pub fn with_contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contexts = contexts.into_iter().map(Into::into).collect();
        self
    }

    fn read_script(resources: &dyn ResourceAccessor, path: &str) -> Result<String, Error> {
        resources
            .read_to_string(path)
            .map_err(|e| Error::Engine(format!("unable to read sql file [{path}]: {e}")))
    }

    fn run_script(
        tx: &Transaction,
        resources: &dyn ResourceAccessor,
        path: &str,
    ) -> Result<(), Error> {
        tx.execute_batch(&Self::read_script(resources, path)?)?;
        Ok(())
    }
}

impl ChangeSet for SqlFileChangeSet {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn author(&self) -> String {
        self.author.clone()
    }

    fn contexts(&self) -> Vec<String> {
        self.contexts.clone()
    }

    /// The up script's SQL, followed by the rollback script's when there is one.
    fn checksum_source(&self, resources: &dyn ResourceAccessor) -> Result<String, Error> {
        let mut source = Self::read_script(resources, &self.up_path)?;
        if let Some(down) = &self.down_path {
            source.push_str("\n--rollback\n");
            source.push_str(&Self::read_script(resources, down)?);
        }
        Ok(source)
    }

    fn sqlite_up(&self, tx: &Transaction, resources: &dyn ResourceAccessor) -> Result<(), Error> {
        Self::run_script(tx, resources, &self.up_path)
    }

    fn sqlite_down(&self, tx: &Transaction, resources: &dyn ResourceAccessor) -> Result<(), Error> {
        match &self.down_path {
            Some(down) => Self::run_script(tx, resources, down),
            None => Err(Error::Engine(format!(
                "changeset {} by {} does not support rollback",
                self.id, self.author
            ))),
        }
    }
}
