//! Fluent pipeline builder.

use super::step::{AggregateKind, AggregateSpec, ScopeFilter, ScopeSpec, Step};
use super::Definition;
use crate::aggregate::{CommutativeAggregate, FnAggregate};
use crate::config::PipelineConfig;
use crate::group::{GroupPath, GroupSummary};
use crate::pipeline::Pipeline;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use tally_core::{Record, Result, Value};

/// Builder for pipelines.
///
/// Steps are recorded in call order. Aggregates attach to the grouping level
/// opened by the most recent `group_by` (the root group before any).
///
/// # Example
///
/// ```
/// use tally_incremental::{field, PipelineBuilder};
/// use tally_core::{Record, Value};
///
/// let mut pipeline = PipelineBuilder::new()
///     .group_by(field("team"))
///     .sum("points", field("score"))
///     .pick_by_max("leader", field("score"), field("name"))
///     .build()
///     .unwrap();
///
/// pipeline
///     .insert(Record::new(1).with("team", "red").with("name", "ann").with("score", 7))
///     .unwrap();
/// pipeline
///     .insert(Record::new(2).with("team", "red").with("name", "bob").with("score", 9))
///     .unwrap();
///
/// let red = pipeline.group(&[Value::from("red")]).unwrap();
/// assert_eq!(red.value("points"), Some(&Value::Int64(16)));
/// assert_eq!(red.value("leader"), Some(&Value::from("bob")));
/// ```
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Step>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the runtime configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Opens a grouping level keyed by `key`.
    pub fn group_by<F>(mut self, key: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.steps.push(Step::GroupBy(Arc::new(key)));
        self
    }

    /// Counts member records.
    pub fn count(self, name: impl Into<String>) -> Self {
        self.aggregate_kind(name, AggregateKind::Count)
    }

    /// Sums numeric values.
    pub fn sum<F>(self, name: impl Into<String>, value: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.aggregate_kind(name, AggregateKind::Sum(Arc::new(value)))
    }

    /// Smallest non-null value.
    pub fn min<F>(self, name: impl Into<String>, value: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.aggregate_kind(name, AggregateKind::Min(Arc::new(value)))
    }

    /// Largest non-null value.
    pub fn max<F>(self, name: impl Into<String>, value: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.aggregate_kind(name, AggregateKind::Max(Arc::new(value)))
    }

    /// Mean of numeric values.
    pub fn average<F>(self, name: impl Into<String>, value: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.aggregate_kind(name, AggregateKind::Average(Arc::new(value)))
    }

    /// Projection of the record with the smallest rank; earliest arrival wins ties.
    pub fn pick_by_min<R, P>(self, name: impl Into<String>, rank: R, project: P) -> Self
    where
        R: Fn(&Record) -> Value + Send + Sync + 'static,
        P: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.aggregate_kind(
            name,
            AggregateKind::PickByMin {
                rank: Arc::new(rank),
                project: Arc::new(project),
            },
        )
    }

    /// Projection of the record with the largest rank; earliest arrival wins ties.
    pub fn pick_by_max<R, P>(self, name: impl Into<String>, rank: R, project: P) -> Self
    where
        R: Fn(&Record) -> Value + Send + Sync + 'static,
        P: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.aggregate_kind(
            name,
            AggregateKind::PickByMax {
                rank: Arc::new(rank),
                project: Arc::new(project),
            },
        )
    }

    /// A user aggregate type; `factory` creates one instance per group.
    pub fn aggregate<F, A>(self, name: impl Into<String>, value: F, factory: A) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
        A: Fn() -> Box<dyn CommutativeAggregate> + Send + Sync + 'static,
    {
        self.aggregate_kind(
            name,
            AggregateKind::Custom {
                value: Arc::new(value),
                factory: Arc::new(factory),
            },
        )
    }

    /// A user aggregate given as initial state plus add/remove/result closures.
    ///
    /// `remove` must undo `add`; see [`CommutativeAggregate`].
    pub fn commutative_aggregate<F, S, A, R, O>(
        self,
        name: impl Into<String>,
        value: F,
        init: S,
        add: A,
        remove: R,
        result: O,
    ) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
        S: Clone + Send + Sync + 'static,
        A: Fn(&mut S, &Value) + Send + Sync + 'static,
        R: Fn(&mut S, &Value) + Send + Sync + 'static,
        O: Fn(&S) -> Option<Value> + Send + Sync + 'static,
    {
        let prototype = FnAggregate::new(init, add, remove, result);
        self.aggregate(name, value, move || {
            Box::new(prototype.clone()) as Box<dyn CommutativeAggregate>
        })
    }

    /// Routes records matching `predicate` into a nested pipeline.
    ///
    /// A record that starts or stops matching reaches the nested pipeline as
    /// an insert or a remove.
    pub fn within<P, N>(self, name: impl Into<String>, predicate: P, nested: N) -> Self
    where
        P: Fn(&Record) -> bool + Send + Sync + 'static,
        N: FnOnce(PipelineBuilder) -> PipelineBuilder,
    {
        self.scope(name, ScopeFilter::Predicate(Arc::new(predicate)), nested)
    }

    /// Routes records whose group path so far starts with `path` into a
    /// nested pipeline.
    pub fn within_path<N>(self, name: impl Into<String>, path: GroupPath, nested: N) -> Self
    where
        N: FnOnce(PipelineBuilder) -> PipelineBuilder,
    {
        self.scope(name, ScopeFilter::Path(path), nested)
    }

    /// Derives a field visible to every later step.
    pub fn define_property<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.steps.push(Step::DefineProperty {
            name: name.into(),
            compute: Arc::new(compute),
        });
        self
    }

    /// Hides a field (stored or derived) from every later step.
    pub fn drop_property(mut self, name: impl Into<String>) -> Self {
        self.steps.push(Step::DropProperty { name: name.into() });
        self
    }

    /// Derives a field on every summary of the current grouping level from
    /// the summary itself: the level's aggregates and earlier summary
    /// properties. It is recomputed whenever the group changes; a `Null`
    /// result reads as empty.
    pub fn define_group_property<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&GroupSummary) -> Value + Send + Sync + 'static,
    {
        self.steps.push(Step::DefineGroupProperty {
            name: name.into(),
            compute: Arc::new(compute),
        });
        self
    }

    /// Removes an aggregate or summary property of the current grouping
    /// level from its summaries. Later summary properties no longer see it.
    pub fn drop_group_property(mut self, name: impl Into<String>) -> Self {
        self.steps.push(Step::DropGroupProperty { name: name.into() });
        self
    }

    /// Returns the recorded steps without validating them.
    pub fn into_definition(self) -> Definition {
        Definition::from_steps(self.steps)
    }

    /// Validates the definition and creates an empty pipeline.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config.clone();
        let definition = self.into_definition();
        definition.validate()?;
        Ok(Pipeline::new(definition, config))
    }

    fn aggregate_kind(mut self, name: impl Into<String>, kind: AggregateKind) -> Self {
        self.steps.push(Step::Aggregate(AggregateSpec {
            name: name.into(),
            kind,
        }));
        self
    }

    fn scope<N>(mut self, name: impl Into<String>, filter: ScopeFilter, nested: N) -> Self
    where
        N: FnOnce(PipelineBuilder) -> PipelineBuilder,
    {
        let definition = nested(PipelineBuilder::new()).into_definition();
        self.steps.push(Step::Scope(ScopeSpec {
            name: name.into(),
            filter,
            definition,
        }));
        self
    }
}
