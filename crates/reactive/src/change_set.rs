//! Change set delivered to subscribers.
//!
//! A ChangeSet groups the `GroupChange`s of one mutation by kind: groups
//! that appeared, groups that disappeared, and groups whose members or
//! aggregates changed. Every entry carries the scope path of its stage.

use alloc::vec::Vec;
use tally_incremental::{GroupChange, GroupSummary, ScopePath, Snapshot};

/// Changes to pipeline groups.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    /// Groups that were created
    pub added: Vec<(ScopePath, GroupSummary)>,
    /// Groups that were destroyed, with their last state
    pub removed: Vec<(ScopePath, GroupSummary)>,
    /// Groups that changed (scope, old, new)
    pub modified: Vec<(ScopePath, GroupSummary, GroupSummary)>,
}

impl ChangeSet {
    /// Creates a new empty change set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts group changes by kind, keeping their relative order.
    pub fn from_changes<I>(changes: I) -> Self
    where
        I: IntoIterator<Item = GroupChange>,
    {
        let mut set = Self::new();
        for change in changes {
            set.push(change);
        }
        set
    }

    /// A change set where every live group is an addition.
    pub fn initial(snapshot: &Snapshot) -> Self {
        Self {
            added: snapshot
                .iter()
                .map(|((scope, _), summary)| (scope.clone(), summary.clone()))
                .collect(),
            ..Self::default()
        }
    }

    /// Adds one group change.
    pub fn push(&mut self, change: GroupChange) {
        match change {
            GroupChange::Added { scope, summary } => self.added.push((scope, summary)),
            GroupChange::Removed { scope, summary } => self.removed.push((scope, summary)),
            GroupChange::Modified { scope, before, after } => {
                self.modified.push((scope, before, after))
            }
        }
    }

    /// The subset of changes made in the stage at `scope`.
    pub fn for_scope(&self, scope: &[alloc::string::String]) -> Self {
        Self {
            added: self.added.iter().filter(|(s, _)| s.as_slice() == scope).cloned().collect(),
            removed: self.removed.iter().filter(|(s, _)| s.as_slice() == scope).cloned().collect(),
            modified: self
                .modified
                .iter()
                .filter(|(s, _, _)| s.as_slice() == scope)
                .cloned()
                .collect(),
        }
    }

    /// Returns true if there are no changes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Returns the total number of changes.
    #[inline]
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    /// Merges another change set into this one.
    pub fn merge(&mut self, other: ChangeSet) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.modified.extend(other.modified);
    }
}
