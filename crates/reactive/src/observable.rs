//! Observable pipeline implementation.
//!
//! `ObservablePipeline` wraps a `Pipeline` and adds a listener list. Every
//! successful mutation dispatches its changes to subscribers before it
//! returns; a rejected mutation notifies nobody.

use crate::change_set::ChangeSet;
use crate::subscription::{SubscriptionId, SubscriptionManager};
use alloc::string::String;
use alloc::vec::Vec;
use tally_core::{Record, RecordId, Result, Value};
use tally_incremental::{GroupChange, GroupSummary, Mutation, Pipeline, ScopePath};

/// A pipeline that notifies subscribers of group changes.
///
/// # Example
///
/// ```
/// use core::cell::RefCell;
/// use std::rc::Rc;
/// use tally_core::Record;
/// use tally_incremental::{field, PipelineBuilder};
/// use tally_reactive::ObservablePipeline;
///
/// let pipeline = PipelineBuilder::new()
///     .group_by(field("team"))
///     .sum("points", field("score"))
///     .build()
///     .unwrap();
/// let mut observable = ObservablePipeline::new(pipeline);
///
/// let added = Rc::new(RefCell::new(0));
/// let counter = added.clone();
/// observable.subscribe(move |changes| *counter.borrow_mut() += changes.added.len());
///
/// observable.insert(Record::new(1).with("team", "red").with("score", 3)).unwrap();
/// assert_eq!(*added.borrow(), 2);
/// ```
pub struct ObservablePipeline {
    pipeline: Pipeline,
    subscriptions: SubscriptionManager,
}

impl ObservablePipeline {
    /// Wraps a pipeline. Existing groups are not announced; use
    /// [`ObservablePipeline::initial`] to read them.
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            subscriptions: SubscriptionManager::new(),
        }
    }

    /// The wrapped pipeline, for reads.
    #[inline]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Unwraps the pipeline, dropping all subscriptions.
    pub fn into_inner(self) -> Pipeline {
        self.pipeline
    }

    /// Current state of every stage, as additions.
    pub fn initial(&self) -> ChangeSet {
        ChangeSet::initial(&self.pipeline.snapshot())
    }

    /// Subscribes to every change. Returns the id to unsubscribe with.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeSet) + 'static,
    {
        self.subscriptions.subscribe(callback)
    }

    /// Subscribes to changes of one scope, given as the scope names from the
    /// root; an empty path selects the root stage.
    pub fn subscribe_scope<F>(&mut self, scope: ScopePath, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeSet) + 'static,
    {
        self.subscriptions.subscribe_scope(scope, callback)
    }

    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    #[inline]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn insert(&mut self, record: Record) -> Result<Vec<GroupChange>> {
        let changes = self.pipeline.insert(record)?;
        self.dispatch(&changes);
        Ok(changes)
    }

    pub fn update(&mut self, record: Record) -> Result<Vec<GroupChange>> {
        let changes = self.pipeline.update(record)?;
        self.dispatch(&changes);
        Ok(changes)
    }

    pub fn upsert(&mut self, record: Record) -> Result<Vec<GroupChange>> {
        let changes = self.pipeline.upsert(record)?;
        self.dispatch(&changes);
        Ok(changes)
    }

    pub fn remove(&mut self, id: RecordId) -> Result<Vec<GroupChange>> {
        let changes = self.pipeline.remove(id)?;
        self.dispatch(&changes);
        Ok(changes)
    }

    /// Applies a batch and dispatches its net changes once.
    pub fn apply_batch<I>(&mut self, mutations: I) -> Result<Vec<GroupChange>>
    where
        I: IntoIterator<Item = Mutation>,
    {
        let changes = self.pipeline.apply_batch(mutations)?;
        self.dispatch(&changes);
        Ok(changes)
    }

    pub fn define_property<F>(
        &mut self,
        name: impl Into<String>,
        compute: F,
    ) -> Result<Vec<GroupChange>>
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        let changes = self.pipeline.define_property(name, compute)?;
        self.dispatch(&changes);
        Ok(changes)
    }

    pub fn drop_property(&mut self, name: impl Into<String>) -> Result<Vec<GroupChange>> {
        let changes = self.pipeline.drop_property(name)?;
        self.dispatch(&changes);
        Ok(changes)
    }

    pub fn define_group_property<F>(
        &mut self,
        level: usize,
        name: impl Into<String>,
        compute: F,
    ) -> Result<Vec<GroupChange>>
    where
        F: Fn(&GroupSummary) -> Value + Send + Sync + 'static,
    {
        let changes = self.pipeline.define_group_property(level, name, compute)?;
        self.dispatch(&changes);
        Ok(changes)
    }

    pub fn drop_group_property(
        &mut self,
        level: usize,
        name: impl Into<String>,
    ) -> Result<Vec<GroupChange>> {
        let changes = self.pipeline.drop_group_property(level, name)?;
        self.dispatch(&changes);
        Ok(changes)
    }

    fn dispatch(&self, changes: &[GroupChange]) {
        if changes.is_empty() || self.subscriptions.is_empty() {
            return;
        }
        let set = ChangeSet::from_changes(changes.iter().cloned());
        tracing::trace!(changes = set.len(), subscribers = self.subscriptions.len(), "dispatch");
        self.subscriptions.notify_all(&set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec;
    use core::cell::RefCell;
    use tally_core::Error;
    use tally_incremental::{field, PipelineBuilder};

    fn observable() -> ObservablePipeline {
        ObservablePipeline::new(
            PipelineBuilder::new()
                .group_by(field("team"))
                .sum("points", field("score"))
                .within(
                    "big",
                    |r: &Record| r.get_or_null("score").as_i64().unwrap_or(0) >= 10,
                    |s| s.count("n"),
                )
                .build()
                .unwrap(),
        )
    }

    fn recorder(observable: &mut ObservablePipeline) -> Rc<RefCell<Vec<ChangeSet>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        observable.subscribe(move |changes| sink.borrow_mut().push(changes.clone()));
        log
    }

    #[test]
    fn test_mutations_dispatch_synchronously() {
        let mut obs = observable();
        let log = recorder(&mut obs);

        obs.insert(Record::new(1).with("team", "red").with("score", 3)).unwrap();
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0].added.len(), 2);

        obs.update(Record::new(1).with("team", "red").with("score", 4)).unwrap();
        assert_eq!(log.borrow()[1].modified.len(), 1);

        obs.remove(1).unwrap();
        assert_eq!(log.borrow()[2].removed.len(), 2);
    }

    #[test]
    fn test_failed_mutation_notifies_nobody() {
        let mut obs = observable();
        let log = recorder(&mut obs);
        assert_eq!(obs.remove(9).unwrap_err(), Error::unknown_record(9));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_no_op_update_notifies_nobody() {
        let mut obs = observable();
        obs.insert(Record::new(1).with("team", "red").with("score", 3)).unwrap();
        let log = recorder(&mut obs);
        obs.update(Record::new(1).with("team", "red").with("score", 3).with("note", "x")).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_scoped_subscription() {
        let mut obs = observable();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        obs.subscribe_scope(vec![String::from("big")], move |changes| {
            sink.borrow_mut().push(changes.clone())
        });

        obs.insert(Record::new(1).with("team", "red").with("score", 3)).unwrap();
        assert!(log.borrow().is_empty());

        // Crossing into the scope arrives as an addition there
        obs.update(Record::new(1).with("team", "red").with("score", 12)).unwrap();
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0].added.len(), 1);
        assert!(log.borrow()[0].modified.is_empty());
    }

    #[test]
    fn test_initial_and_unsubscribe() {
        let mut obs = observable();
        obs.insert(Record::new(1).with("team", "red").with("score", 30)).unwrap();
        let initial = obs.initial();
        assert_eq!(initial.added.len(), 3);
        assert!(initial.added.iter().any(|(scope, _)| scope == &vec![String::from("big")]));

        let log = recorder(&mut obs);
        assert_eq!(obs.subscription_count(), 1);
        assert!(obs.unsubscribe(1));
        obs.insert(Record::new(2).with("team", "blue").with("score", 1)).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(obs.pipeline().len(), 2);
    }

    #[test]
    fn test_batch_and_property_changes_dispatch_once() {
        let mut obs = observable();
        let log = recorder(&mut obs);
        obs.apply_batch(vec![
            Mutation::Insert(Record::new(1).with("team", "red").with("score", 3)),
            Mutation::Insert(Record::new(2).with("team", "red").with("score", 4)),
        ])
        .unwrap();
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0].added.len(), 2);

        obs.drop_property("score").unwrap();
        {
            let log = log.borrow();
            assert_eq!(log.len(), 2);
            assert_eq!(log[1].modified.len(), 1);
            assert_eq!(log[1].modified[0].2.value("points"), Some(&Value::Int64(0)));
        }

        obs.define_property("score", |_: &Record| Value::Int64(10)).unwrap();
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(obs.into_inner().len(), 2);
    }

    #[test]
    fn test_group_property_changes_dispatch() {
        let mut obs = observable();
        obs.insert(Record::new(1).with("team", "red").with("score", 3)).unwrap();
        let log = recorder(&mut obs);

        obs.define_group_property(1, "doubled", |g: &GroupSummary| {
            Value::Int64(g.value("points").and_then(Value::as_i64).unwrap_or(0) * 2)
        })
        .unwrap();
        {
            let log = log.borrow();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].modified.len(), 1);
            assert_eq!(log[0].modified[0].2.value("doubled"), Some(&Value::Int64(6)));
        }

        obs.update(Record::new(1).with("team", "red").with("score", 5)).unwrap();
        assert_eq!(log.borrow()[1].modified[0].2.value("doubled"), Some(&Value::Int64(10)));

        obs.drop_group_property(1, "doubled").unwrap();
        assert!(!log.borrow()[2].modified[0].2.aggregates.contains_key("doubled"));
        assert!(obs.drop_group_property(1, "doubled").is_err());
        assert_eq!(log.borrow().len(), 3);
    }
}
