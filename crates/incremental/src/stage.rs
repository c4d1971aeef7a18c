//! A running definition: one group index plus one nested stage per scope.

use crate::change::{GroupChange, ScopePath, Snapshot};
use crate::config::PipelineConfig;
use crate::definition::Definition;
use crate::group::{GroupIndex, GroupPath, GroupSummary};
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec::Vec;
use tally_core::{Record, RecordId};

/// Mutation counters of one stage, as seen by that stage.
///
/// A record entering a scope counts as an insert there even if the root
/// stage saw an update. Re-running records after a live property change
/// counts as updates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageStats {
    pub inserts: u64,
    pub updates: u64,
    pub removes: u64,
}

pub(crate) struct Stage {
    definition: Definition,
    index: GroupIndex,
    scope: ScopePath,
    scopes: Vec<(String, Stage)>,
    stats: StageStats,
}

impl Stage {
    pub fn new(definition: Definition, config: &PipelineConfig, scope: ScopePath) -> Self {
        let index = GroupIndex::new(definition.layout(), config);
        let scopes = definition
            .scopes()
            .map(|spec| {
                let mut path = scope.clone();
                path.push(spec.name.clone());
                (spec.name.clone(), Stage::new(spec.definition.clone(), config, path))
            })
            .collect();
        Self {
            definition,
            index,
            scope,
            scopes,
            stats: StageStats::default(),
        }
    }

    #[inline]
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    #[inline]
    pub fn index(&self) -> &GroupIndex {
        &self.index
    }

    #[inline]
    pub fn scope_path(&self) -> &ScopePath {
        &self.scope
    }

    #[inline]
    pub fn stats(&self) -> StageStats {
        self.stats
    }

    pub fn scope(&self, name: &str) -> Option<&Stage> {
        self.scopes.iter().find(|(n, _)| n == name).map(|(_, stage)| stage)
    }

    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(|(n, _)| n.as_str())
    }

    /// Inserts the record, or moves it if already placed.
    ///
    /// The old contribution leaves before the new one enters. Nested scopes
    /// receive an insert, update or remove depending on whether the record
    /// was and is admitted.
    pub fn upsert(
        &mut self,
        id: RecordId,
        seq: u64,
        record: &Record,
        changes: &mut Vec<GroupChange>,
    ) {
        let evaluation = self.definition.evaluate(seq, record);

        let mut affected = prefixes(&evaluation.path);
        match self.index.path_of(id) {
            Some(old) => {
                affected.extend(prefixes(old));
                self.stats.updates += 1;
            }
            None => self.stats.inserts += 1,
        }

        let before = self.summaries(&affected);
        self.index.unplace(id);
        self.index.place(id, evaluation.path, evaluation.contributions);
        self.emit(before, changes);

        for ((_, nested), admitted) in self.scopes.iter_mut().zip(evaluation.scopes) {
            match admitted {
                Some(view) => nested.upsert(id, seq, &view, changes),
                None => nested.remove(id, changes),
            }
        }
    }

    /// Removes the record from this stage and every nested scope. Does
    /// nothing if the record never reached this stage.
    pub fn remove(&mut self, id: RecordId, changes: &mut Vec<GroupChange>) {
        let Some(old) = self.index.path_of(id) else {
            return;
        };
        let affected = prefixes(old);
        self.stats.removes += 1;

        let before = self.summaries(&affected);
        self.index.unplace(id);
        self.emit(before, changes);

        for (_, nested) in self.scopes.iter_mut() {
            nested.remove(id, changes);
        }
    }

    /// Swaps in a definition with the same grouping, aggregate and scope
    /// structure. Summary properties apply at once; placed records keep
    /// their old contributions until they are re-run through
    /// [`Stage::upsert`].
    pub fn redefine(&mut self, definition: Definition) {
        for ((_, nested), spec) in self.scopes.iter_mut().zip(definition.scopes()) {
            nested.redefine(spec.definition.clone());
        }
        self.index.relayout(definition.layout());
        self.definition = definition;
    }

    /// Adds every live group of this stage and its scopes to `out`.
    pub fn snapshot(&self, out: &mut Snapshot) {
        for (path, summary) in self.index.query(&[]) {
            out.insert((self.scope.clone(), path), summary);
        }
        for (_, nested) in &self.scopes {
            nested.snapshot(out);
        }
    }

    /// Inverse-law violations detected here and in nested scopes.
    pub fn inverse_violations(&self) -> u64 {
        self.index.inverse_violations()
            + self
                .scopes
                .iter()
                .map(|(_, nested)| nested.inverse_violations())
                .sum::<u64>()
    }

    fn summaries(&self, paths: &BTreeSet<GroupPath>) -> BTreeMap<GroupPath, Option<GroupSummary>> {
        paths
            .iter()
            .map(|path| (path.clone(), self.index.summary(path)))
            .collect()
    }

    fn emit(
        &self,
        before: BTreeMap<GroupPath, Option<GroupSummary>>,
        changes: &mut Vec<GroupChange>,
    ) {
        for (path, old) in before {
            let new = self.index.summary(&path);
            if let Some(change) = GroupChange::between(self.scope.clone(), old, new) {
                changes.push(change);
            }
        }
    }
}

/// The path and all of its ancestors, root included.
fn prefixes(path: &[tally_core::Value]) -> BTreeSet<GroupPath> {
    (0..=path.len()).map(|n| path[..n].to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{field, PipelineBuilder};
    use alloc::vec;
    use tally_core::Value;

    fn stage(builder: PipelineBuilder) -> Stage {
        Stage::new(builder.into_definition(), &PipelineConfig::default(), ScopePath::new())
    }

    #[test]
    fn test_upsert_reports_changes_leaf_and_ancestors() {
        let mut stage = stage(PipelineBuilder::new().group_by(field("a")).sum("total", field("x")));
        let mut changes = Vec::new();
        stage.upsert(1, 0, &Record::new(1).with("a", 1).with("x", 10), &mut changes);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(GroupChange::is_added));

        changes.clear();
        stage.upsert(1, 0, &Record::new(1).with("a", 2).with("x", 10), &mut changes);
        let kinds: Vec<_> = changes
            .iter()
            .map(|c| (c.path().to_vec(), c.is_added(), c.is_removed()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (vec![Value::Int64(1)], false, true),
                (vec![Value::Int64(2)], true, false),
            ]
        );
        // The root group keeps one member and has no aggregates, so it is unchanged
        assert_eq!(stage.stats(), StageStats { inserts: 1, updates: 1, removes: 0 });
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut stage = stage(PipelineBuilder::new().count("n"));
        let mut changes = Vec::new();
        stage.remove(7, &mut changes);
        assert!(changes.is_empty());
        assert_eq!(stage.stats(), StageStats::default());
    }

    #[test]
    fn test_scope_paths_nest() {
        let stage = stage(PipelineBuilder::new().within("outer", |_: &Record| true, |s| {
            s.within("inner", |_: &Record| true, |s| s.count("n"))
        }));
        let inner = stage.scope("outer").and_then(|s| s.scope("inner")).unwrap();
        assert_eq!(inner.scope_path(), &vec![String::from("outer"), String::from("inner")]);
        assert_eq!(stage.scope_names().collect::<Vec<_>>(), ["outer"]);
    }
}
