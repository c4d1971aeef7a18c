//! Scopes: nested pipelines fed by a filtered subset of records.

use crate::change::ScopePath;
use crate::definition::ScopeFilter;
use crate::group::{GroupPath, GroupSummary};
use crate::stage::{Stage, StageStats};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use tally_core::{Error, Record, RecordId, Result, Value};

impl ScopeFilter {
    /// Returns true if a record view at `path` enters the scope.
    pub fn matches(&self, view: &Record, path: &[Value]) -> bool {
        match self {
            ScopeFilter::Predicate(predicate) => predicate(view),
            ScopeFilter::Path(prefix) => path.starts_with(prefix),
        }
    }
}

/// Read-only access to one stage of a pipeline: the root, or a scope.
#[derive(Clone, Copy)]
pub struct ScopeView<'a> {
    stage: &'a Stage,
}

impl<'a> ScopeView<'a> {
    pub(crate) fn new(stage: &'a Stage) -> Self {
        Self { stage }
    }

    /// Scope names from the root to this stage.
    pub fn path(&self) -> &'a ScopePath {
        self.stage.scope_path()
    }

    /// Summaries of every live group whose path starts with `prefix`,
    /// intermediate levels included.
    pub fn query(&self, prefix: &[Value]) -> BTreeMap<GroupPath, GroupSummary> {
        self.stage.index().query(prefix)
    }

    pub fn group(&self, path: &[Value]) -> Option<GroupSummary> {
        self.stage.index().summary(path)
    }

    /// Keys of the child groups under `path`.
    pub fn children(&self, path: &[Value]) -> Vec<Value> {
        self.stage.index().children(path)
    }

    /// Identities of the records in the group at `path`.
    pub fn members(&self, path: &[Value]) -> Vec<RecordId> {
        self.stage.index().members(path)
    }

    /// Nested scope by name.
    pub fn scope(&self, name: &str) -> Result<ScopeView<'a>> {
        self.stage
            .scope(name)
            .map(ScopeView::new)
            .ok_or_else(|| Error::unknown_scope(name))
    }

    /// Names of the nested scopes in declaration order.
    pub fn scope_names(&self) -> Vec<&'a str> {
        self.stage.scope_names().collect()
    }

    /// Returns true if the record reached this stage.
    pub fn contains(&self, id: RecordId) -> bool {
        self.stage.index().contains(id)
    }

    /// Group path of a record in this stage.
    pub fn path_of(&self, id: RecordId) -> Option<&'a [Value]> {
        self.stage.index().path_of(id)
    }

    /// Number of records that reached this stage.
    pub fn len(&self) -> usize {
        self.stage.index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stage.index().is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.stage.index().group_count()
    }

    pub fn stats(&self) -> StageStats {
        self.stage.stats()
    }
}
