//! Group-level change events.

use crate::group::{GroupPath, GroupSummary};
use alloc::collections::btree_map::Entry;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

/// Names of the scopes leading from the root pipeline to a stage; empty for
/// the root stage.
pub type ScopePath = Vec<String>;

/// Every live group of a pipeline, keyed by scope and group path.
pub type Snapshot = BTreeMap<(ScopePath, GroupPath), GroupSummary>;

/// A change to one group caused by a mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupChange {
    /// A group was created
    Added { scope: ScopePath, summary: GroupSummary },
    /// A group was destroyed; `summary` is its last state
    Removed { scope: ScopePath, summary: GroupSummary },
    /// A group's members or aggregates changed
    Modified {
        scope: ScopePath,
        before: GroupSummary,
        after: GroupSummary,
    },
}

impl GroupChange {
    /// Change between two states of the same group, `None` if nothing
    /// observable changed.
    pub fn between(
        scope: ScopePath,
        before: Option<GroupSummary>,
        after: Option<GroupSummary>,
    ) -> Option<GroupChange> {
        match (before, after) {
            (None, Some(summary)) => Some(GroupChange::Added { scope, summary }),
            (Some(summary), None) => Some(GroupChange::Removed { scope, summary }),
            (Some(before), Some(after)) if before != after => {
                Some(GroupChange::Modified { scope, before, after })
            }
            _ => None,
        }
    }

    /// Splits the change into its before and after states.
    pub fn into_states(self) -> (Option<GroupSummary>, Option<GroupSummary>) {
        match self {
            GroupChange::Added { summary, .. } => (None, Some(summary)),
            GroupChange::Removed { summary, .. } => (Some(summary), None),
            GroupChange::Modified { before, after, .. } => (Some(before), Some(after)),
        }
    }

    /// Scope the group belongs to.
    pub fn scope(&self) -> &[String] {
        match self {
            GroupChange::Added { scope, .. }
            | GroupChange::Removed { scope, .. }
            | GroupChange::Modified { scope, .. } => scope,
        }
    }

    /// Path of the changed group.
    pub fn path(&self) -> &[tally_core::Value] {
        match self {
            GroupChange::Added { summary, .. } | GroupChange::Removed { summary, .. } => {
                &summary.path
            }
            GroupChange::Modified { after, .. } => &after.path,
        }
    }

    /// State after the change; `None` for removals.
    pub fn current(&self) -> Option<&GroupSummary> {
        match self {
            GroupChange::Added { summary, .. } => Some(summary),
            GroupChange::Modified { after, .. } => Some(after),
            GroupChange::Removed { .. } => None,
        }
    }

    /// State before the change; `None` for additions.
    pub fn previous(&self) -> Option<&GroupSummary> {
        match self {
            GroupChange::Removed { summary, .. } => Some(summary),
            GroupChange::Modified { before, .. } => Some(before),
            GroupChange::Added { .. } => None,
        }
    }

    #[inline]
    pub fn is_added(&self) -> bool {
        matches!(self, GroupChange::Added { .. })
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        matches!(self, GroupChange::Removed { .. })
    }

    #[inline]
    pub fn is_modified(&self) -> bool {
        matches!(self, GroupChange::Modified { .. })
    }
}

/// Compares two snapshots and reports the groups that appeared,
/// disappeared, or changed, in key order.
pub fn diff_snapshots(before: &Snapshot, after: &Snapshot) -> Vec<GroupChange> {
    let mut keys: Vec<&(ScopePath, GroupPath)> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter_map(|key| {
            GroupChange::between(key.0.clone(), before.get(key).cloned(), after.get(key).cloned())
        })
        .collect()
}

/// Folds a sequence of changes into one net change per group, in key order.
///
/// A group added and removed within the sequence disappears; a group
/// modified back to its original state disappears too.
pub fn coalesce(changes: Vec<GroupChange>) -> Vec<GroupChange> {
    type Net = (Option<GroupSummary>, Option<GroupSummary>);
    let mut net: BTreeMap<(ScopePath, GroupPath), Net> = BTreeMap::new();
    for change in changes {
        let key = (change.scope().to_vec(), change.path().to_vec());
        let (before, after) = change.into_states();
        match net.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert((before, after));
            }
            Entry::Occupied(mut entry) => entry.get_mut().1 = after,
        }
    }
    net.into_iter()
        .filter_map(|((scope, _), (before, after))| GroupChange::between(scope, before, after))
        .collect()
}
