//! Recovering the changeset behind a failure.
//!
//! Engines do not hand the failing changeset back through a stable API; it is
//! buried in the failure value. Extraction is best effort and a miss is a
//! normal outcome.

use crate::engine::{ChangeSetFailure, ChangeSetRef};
use crate::error::Error;

/// Extracts the changeset that caused `failure`, if it can be found.
pub trait FailureAttributor {
    fn attribute(&self, failure: &Error) -> Option<ChangeSetRef>;
}

/// Walks the error's source chain looking for a [`ChangeSetFailure`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceChainAttributor;

impl FailureAttributor for SourceChainAttributor {
    fn attribute(&self, failure: &Error) -> Option<ChangeSetRef> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(failure);
        while let Some(err) = current {
            if let Some(failed) = err.downcast_ref::<ChangeSetFailure>() {
                let changeset = failed.changeset().clone();
                tracing::debug!(changeset = %changeset, "retrieved reference to failed changeset");
                return Some(changeset);
            }
            current = err.source();
        }
        tracing::debug!(kind = failure.kind(), "no failed changeset found in failure");
        None
    }
}
