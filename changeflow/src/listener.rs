//! Observing engine progress.
//!
//! Engines report each changeset they execute, skip or roll back to a
//! [`ChangeSetListener`]; [`ExecutionListener`] turns those callbacks into the
//! run's list of executed changesets.

use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::ChangeSetRef;

/// Callbacks an engine invokes synchronously while it works through a
/// changelog.
pub trait ChangeSetListener {
    /// A changeset completed successfully. Never called for changesets that
    /// failed or were skipped.
    fn on_changeset_executed(&self, changeset: &ChangeSetRef);

    /// A changeset's precondition was already satisfied, so it was recorded
    /// without running.
    fn on_changeset_skipped(&self, _changeset: &ChangeSetRef) {}

    /// A changeset was rolled back.
    fn on_changeset_rolled_back(&self, _changeset: &ChangeSetRef) {}
}

/// Records executed changesets in the order the engine reports them.
///
/// Clones share the same record, so the executor keeps one clone while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ExecutionListener {
    executed: Rc<RefCell<Vec<ChangeSetRef>>>,
}

impl ExecutionListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changesets executed so far.
    pub fn executed(&self) -> Vec<ChangeSetRef> {
        self.executed.borrow().clone()
    }
}

impl ChangeSetListener for ExecutionListener {
    fn on_changeset_executed(&self, changeset: &ChangeSetRef) {
        tracing::info!(changeset = %changeset, "changeset executed");
        self.executed.borrow_mut().push(changeset.clone());
    }

    fn on_changeset_skipped(&self, changeset: &ChangeSetRef) {
        tracing::debug!(changeset = %changeset, "changeset skipped, precondition already satisfied");
    }

    fn on_changeset_rolled_back(&self, changeset: &ChangeSetRef) {
        tracing::info!(changeset = %changeset, "changeset rolled back");
    }
}
