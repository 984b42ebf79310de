//! Lock reconciliation.
//!
//! Merges what a run observed into what the lock file already knew and
//! decides whether the file must be rewritten.

use crate::locks::{LockEntry, Locks};

/// How the persisted lock changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockChange {
    /// Identical to the previous lock; nothing is written.
    Unchanged,
    /// First population of the lock file.
    Created,
    /// Selections differ from the previous lock.
    Updated,
}

impl LockChange {
    /// Whether the lock file must be written.
    pub fn needs_write(self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    /// Explanation shown to the user, if any.
    pub fn message(self, file_name: &str) -> Option<String> {
        match self {
            Self::Unchanged => None,
            Self::Created => Some(format!(
                "pinion has created a lock file {file_name} to record the provider selections it made above. \
                 Include this file in your version control repository so that pinion can guarantee to make \
                 the same selections by default when you run \"pinion init\" in the future."
            )),
            Self::Updated => Some(format!(
                "pinion has made some changes to the provider dependency selections recorded in the \
                 {file_name} file. Review those changes and commit them to your version control system \
                 if they represent changes you intended to make."
            )),
        }
    }
}

/// Combine `fresh` selections with `previous` and classify the result.
///
/// When a provider keeps its version, every hash the previous entry knew is
/// retained alongside the new ones, as is its signing record if the new
/// entry has none. Providers absent from `fresh` are dropped.
pub fn reconcile(previous: &Locks, fresh: Locks) -> (Locks, LockChange) {
    let merged: Locks = fresh
        .iter()
        .map(|entry| match previous.get(&entry.provider) {
            Some(old) if old.version == entry.version => merge(old, entry),
            _ => entry.clone(),
        })
        .collect();

    let change = if merged == *previous {
        LockChange::Unchanged
    } else if previous.is_empty() {
        LockChange::Created
    } else {
        LockChange::Updated
    };
    tracing::debug!("Lock reconciliation: {change:?}");
    (merged, change)
}

fn merge(old: &LockEntry, new: &LockEntry) -> LockEntry {
    let mut entry = new.clone();
    entry.hashes.extend(old.hashes.iter().cloned());
    if entry.signing.is_none() {
        entry.signing.clone_from(&old.signing);
    }
    entry
}
