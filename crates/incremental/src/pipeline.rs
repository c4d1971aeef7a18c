//! Live pipelines: record mutations in, group changes out.

use crate::change::{coalesce, diff_snapshots, GroupChange, ScopePath, Snapshot};
use crate::config::PipelineConfig;
use crate::definition::{Definition, PipelineBuilder};
use crate::group::{GroupPath, GroupSummary};
use crate::scope::ScopeView;
use crate::stage::{Stage, StageStats};
use crate::store::RecordStore;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use hashbrown::HashMap;
use tally_core::{Error, Record, RecordId, Result, Value};

/// One record-level change, for [`Pipeline::apply_batch`].
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    Insert(Record),
    Update(Record),
    Upsert(Record),
    Remove(RecordId),
}

impl Mutation {
    /// Identity of the record the mutation targets.
    pub fn id(&self) -> RecordId {
        match self {
            Mutation::Insert(r) | Mutation::Update(r) | Mutation::Upsert(r) => r.id(),
            Mutation::Remove(id) => *id,
        }
    }
}

/// A pipeline definition applied to a live set of records.
///
/// Every mutation runs to completion before returning: identities are
/// validated first, then the old contribution of the record is removed,
/// then the new one is added. A rejected mutation leaves all state
/// untouched.
pub struct Pipeline {
    store: RecordStore,
    stage: Stage,
    config: PipelineConfig,
}

impl Pipeline {
    /// Starts a builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Creates an empty pipeline. The definition is assumed valid; use
    /// [`PipelineBuilder::build`] to validate.
    pub fn new(definition: Definition, config: PipelineConfig) -> Self {
        let stage = Stage::new(definition, &config, ScopePath::new());
        Self {
            store: RecordStore::new(),
            stage,
            config,
        }
    }

    /// Adds a record. Fails if its identity is already present.
    pub fn insert(&mut self, record: Record) -> Result<Vec<GroupChange>> {
        let id = record.id();
        self.store.insert(record)?;
        tracing::trace!(record = id, "insert");
        let mut changes = Vec::new();
        self.propagate(id, &mut changes);
        Ok(changes)
    }

    /// Replaces a record. Fails if its identity is unknown.
    pub fn update(&mut self, record: Record) -> Result<Vec<GroupChange>> {
        let id = record.id();
        self.store.replace(record)?;
        tracing::trace!(record = id, "update");
        let mut changes = Vec::new();
        self.propagate(id, &mut changes);
        Ok(changes)
    }

    /// Inserts the record if its identity is unknown, updates it otherwise.
    pub fn upsert(&mut self, record: Record) -> Result<Vec<GroupChange>> {
        if self.store.contains(record.id()) {
            self.update(record)
        } else {
            self.insert(record)
        }
    }

    /// Removes a record. Fails if its identity is unknown.
    pub fn remove(&mut self, id: RecordId) -> Result<Vec<GroupChange>> {
        self.store.remove(id)?;
        tracing::trace!(record = id, "remove");
        let mut changes = Vec::new();
        self.stage.remove(id, &mut changes);
        Ok(changes)
    }

    /// Applies several mutations as one.
    ///
    /// Identities are checked against the whole batch before anything is
    /// applied; on error nothing changes. The result holds one net change
    /// per affected group.
    pub fn apply_batch<I>(&mut self, mutations: I) -> Result<Vec<GroupChange>>
    where
        I: IntoIterator<Item = Mutation>,
    {
        let mutations: Vec<Mutation> = mutations.into_iter().collect();
        self.check_batch(&mutations)?;

        let mut changes = Vec::new();
        for mutation in mutations {
            let applied = match mutation {
                Mutation::Insert(record) => self.insert(record)?,
                Mutation::Update(record) => self.update(record)?,
                Mutation::Upsert(record) => self.upsert(record)?,
                Mutation::Remove(id) => self.remove(id)?,
            };
            changes.extend(applied);
        }
        Ok(coalesce(changes))
    }

    /// Derives `name` with `compute` before every other step, replacing any
    /// earlier definition or drop of `name`, and re-runs every stored record.
    pub fn define_property<F>(
        &mut self,
        name: impl Into<String>,
        compute: F,
    ) -> Result<Vec<GroupChange>>
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        let definition = self.stage.definition().with_property(name.clone(), compute);
        tracing::debug!(property = %name, "define property");
        self.reconfigure(definition)
    }

    /// Hides `name` from every step, including inside scopes, and re-runs
    /// every stored record as if the value became absent.
    pub fn drop_property(&mut self, name: impl Into<String>) -> Result<Vec<GroupChange>> {
        let name = name.into();
        let definition = self.stage.definition().without_property(name.clone());
        tracing::debug!(property = %name, "drop property");
        self.reconfigure(definition)
    }

    /// Derives `name` on every summary at grouping `level` of the root
    /// stage, after the level's other outputs, replacing any earlier
    /// summary property of that name there. Reports every group whose
    /// summary changed.
    pub fn define_group_property<F>(
        &mut self,
        level: usize,
        name: impl Into<String>,
        compute: F,
    ) -> Result<Vec<GroupChange>>
    where
        F: Fn(&GroupSummary) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        let definition = self.stage.definition().with_group_property(level, name.clone(), compute)?;
        tracing::debug!(property = %name, level, "define group property");
        self.reconfigure(definition)
    }

    /// Removes `name` from every summary at grouping `level` of the root
    /// stage. Fails if no aggregate or summary property has that name.
    pub fn drop_group_property(
        &mut self,
        level: usize,
        name: impl Into<String>,
    ) -> Result<Vec<GroupChange>> {
        let name = name.into();
        let definition = self.stage.definition().without_group_property(level, name.clone())?;
        tracing::debug!(property = %name, level, "drop group property");
        self.reconfigure(definition)
    }

    /// Read access to the root stage.
    pub fn root(&self) -> ScopeView<'_> {
        ScopeView::new(&self.stage)
    }

    /// Summaries of every live group whose path starts with `prefix`.
    pub fn query(&self, prefix: &[Value]) -> BTreeMap<GroupPath, GroupSummary> {
        self.root().query(prefix)
    }

    /// Summary of the group at `path`.
    pub fn group(&self, path: &[Value]) -> Option<GroupSummary> {
        self.root().group(path)
    }

    pub fn children(&self, path: &[Value]) -> Vec<Value> {
        self.root().children(path)
    }

    pub fn members(&self, path: &[Value]) -> Vec<RecordId> {
        self.root().members(path)
    }

    /// A named scope of the root stage.
    pub fn scope(&self, name: &str) -> Result<ScopeView<'_>> {
        self.root().scope(name)
    }

    /// A stored record.
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.store.get(id)
    }

    #[inline]
    pub fn contains(&self, id: RecordId) -> bool {
        self.store.contains(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Number of live groups in the root stage.
    pub fn group_count(&self) -> usize {
        self.root().group_count()
    }

    pub fn stats(&self) -> StageStats {
        self.stage.stats()
    }

    /// Inverse-law violations detected by sampling, across all stages.
    pub fn inverse_violations(&self) -> u64 {
        self.stage.inverse_violations()
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn definition(&self) -> &Definition {
        self.stage.definition()
    }

    /// Every live group of every stage.
    pub fn snapshot(&self) -> Snapshot {
        let mut out = Snapshot::new();
        self.stage.snapshot(&mut out);
        out
    }

    fn propagate(&mut self, id: RecordId, changes: &mut Vec<GroupChange>) {
        let Self { store, stage, .. } = &mut *self;
        if let (Some(record), Some(seq)) = (store.get(id), store.seq(id)) {
            stage.upsert(id, seq, record, changes);
        }
    }

    fn check_batch(&self, mutations: &[Mutation]) -> Result<()> {
        // Presence overrides for identities touched earlier in the batch
        let mut present: HashMap<RecordId, bool> = HashMap::new();
        for mutation in mutations {
            let id = mutation.id();
            let exists = present.get(&id).copied().unwrap_or_else(|| self.store.contains(id));
            let after = match mutation {
                Mutation::Insert(_) if exists => return Err(Error::duplicate_record(id)),
                Mutation::Update(_) | Mutation::Remove(_) if !exists => {
                    return Err(Error::unknown_record(id))
                }
                Mutation::Remove(_) => false,
                _ => true,
            };
            present.insert(id, after);
        }
        Ok(())
    }

    fn reconfigure(&mut self, definition: Definition) -> Result<Vec<GroupChange>> {
        definition.validate()?;
        let before = self.snapshot();
        self.stage.redefine(definition);

        // Summary properties change groups no record touches, so the net
        // result comes from the snapshots rather than per-record changes
        let mut scratch = Vec::new();
        let Self { store, stage, .. } = &mut *self;
        for (seq, record) in store.iter_by_arrival() {
            stage.upsert(record.id(), seq, record, &mut scratch);
        }
        tracing::debug!(records = store.len(), "pipeline re-evaluated");
        Ok(diff_snapshots(&before, &self.snapshot()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::field;
    use alloc::vec;

    fn pipeline() -> Pipeline {
        PipelineBuilder::new()
            .group_by(field("a"))
            .sum("total", field("x"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_insert_reports_added_groups() {
        let mut p = pipeline();
        let changes = p.insert(Record::new(1).with("a", 1).with("x", 3)).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(GroupChange::is_added));
        assert_eq!(p.len(), 1);
        assert_eq!(p.group_count(), 2);
    }

    #[test]
    fn test_identity_errors_leave_state_untouched() {
        let mut p = pipeline();
        p.insert(Record::new(1).with("a", 1).with("x", 3)).unwrap();
        let before = p.snapshot();

        assert_eq!(p.insert(Record::new(1).with("a", 2)), Err(Error::duplicate_record(1)));
        assert_eq!(p.update(Record::new(2)), Err(Error::unknown_record(2)));
        assert_eq!(p.remove(2), Err(Error::unknown_record(2)));
        assert_eq!(p.snapshot(), before);
        assert_eq!(p.stats(), StageStats { inserts: 1, updates: 0, removes: 0 });
    }

    #[test]
    fn test_check_batch_tracks_presence() {
        let mut p = pipeline();
        p.insert(Record::new(1)).unwrap();
        assert!(p
            .check_batch(&[Mutation::Remove(1), Mutation::Insert(Record::new(1))])
            .is_ok());
        assert_eq!(
            p.check_batch(&[Mutation::Remove(1), Mutation::Update(Record::new(1))]),
            Err(Error::unknown_record(1))
        );
        assert_eq!(
            p.check_batch(&[Mutation::Upsert(Record::new(5)), Mutation::Insert(Record::new(5))]),
            Err(Error::duplicate_record(5))
        );
    }

    #[test]
    fn test_define_property_invalid_name() {
        let mut p = pipeline();
        let result = p.define_property("", |_: &Record| Value::Null);
        assert!(matches!(result, Err(Error::InvalidPipeline { .. })));
        assert_eq!(p.definition().steps().len(), 2);
    }

    #[test]
    fn test_members() {
        let mut p = pipeline();
        p.insert(Record::new(4).with("a", 1)).unwrap();
        p.insert(Record::new(2).with("a", 1)).unwrap();
        assert_eq!(p.members(&[Value::Int64(1)]), vec![2, 4]);
        assert_eq!(p.children(&[]), vec![Value::Int64(1)]);
    }
}
