//! Pipeline step definitions.

use crate::aggregate::{CommutativeAggregate, Contribution};
use crate::group::{GroupPath, GroupSummary};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use tally_core::{Record, Value};

/// Extracts a value (group key, aggregate input, property) from a record.
pub type ValueFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Decides whether a record belongs to a scope.
pub type PredicateFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Derives a summary field from a group's summary.
pub type SummaryFn = Arc<dyn Fn(&GroupSummary) -> Value + Send + Sync>;

/// Creates fresh state for a custom aggregate, one per group.
pub type AggregateFactory = Arc<dyn Fn() -> Box<dyn CommutativeAggregate> + Send + Sync>;

/// Returns a value function reading a field, `Null` when absent.
pub fn field(name: impl Into<String>) -> impl Fn(&Record) -> Value + Send + Sync + Clone + 'static {
    let name: String = name.into();
    move |record: &Record| record.get_or_null(&name).clone()
}

/// The reduction an aggregate step performs.
#[derive(Clone)]
pub enum AggregateKind {
    Count,
    Sum(ValueFn),
    Min(ValueFn),
    Max(ValueFn),
    Average(ValueFn),
    /// Projects the record with the smallest rank
    PickByMin { rank: ValueFn, project: ValueFn },
    /// Projects the record with the largest rank
    PickByMax { rank: ValueFn, project: ValueFn },
    Custom { value: ValueFn, factory: AggregateFactory },
}

impl AggregateKind {
    /// Short name for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            AggregateKind::Count => "count",
            AggregateKind::Sum(_) => "sum",
            AggregateKind::Min(_) => "min",
            AggregateKind::Max(_) => "max",
            AggregateKind::Average(_) => "average",
            AggregateKind::PickByMin { .. } => "pick_by_min",
            AggregateKind::PickByMax { .. } => "pick_by_max",
            AggregateKind::Custom { .. } => "custom",
        }
    }
}

/// A named aggregate attached at one grouping level.
#[derive(Clone)]
pub struct AggregateSpec {
    pub name: String,
    pub kind: AggregateKind,
}

impl AggregateSpec {
    /// Computes what a record view contributes to this aggregate.
    pub fn contribution(&self, seq: u64, view: &Record) -> Contribution {
        match &self.kind {
            AggregateKind::Count => Contribution::of(Value::Null),
            AggregateKind::Sum(f)
            | AggregateKind::Min(f)
            | AggregateKind::Max(f)
            | AggregateKind::Average(f) => Contribution::of(f(view)),
            AggregateKind::PickByMin { rank, project }
            | AggregateKind::PickByMax { rank, project } => {
                Contribution::ranked(rank(view), seq, project(view))
            }
            AggregateKind::Custom { value, .. } => Contribution::of(value(view)),
        }
    }
}

/// A summary field derived at one grouping level, applied in declaration
/// order after the level's aggregates.
#[derive(Clone)]
pub enum SummaryProperty {
    Define { name: String, compute: SummaryFn },
    Drop { name: String },
}

/// Condition a record must meet to enter a scope.
#[derive(Clone)]
pub enum ScopeFilter {
    /// Records for which the predicate holds
    Predicate(PredicateFn),
    /// Records whose group path so far starts with this prefix
    Path(GroupPath),
}

/// A named sub-pipeline fed by the subset of records passing its filter.
#[derive(Clone)]
pub struct ScopeSpec {
    pub name: String,
    pub filter: ScopeFilter,
    pub definition: super::Definition,
}

/// One step of a pipeline definition.
#[derive(Clone)]
pub enum Step {
    /// Opens a new grouping level keyed by the function's result
    GroupBy(ValueFn),
    /// Attaches an aggregate to the current grouping level
    Aggregate(AggregateSpec),
    /// Routes matching records into a nested pipeline
    Scope(ScopeSpec),
    /// Attaches a derived field visible to later steps
    DefineProperty { name: String, compute: ValueFn },
    /// Hides a field from later steps
    DropProperty { name: String },
    /// Adds a field to every summary of the current grouping level
    DefineGroupProperty { name: String, compute: SummaryFn },
    /// Removes an aggregate or summary field of the current grouping level
    DropGroupProperty { name: String },
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::GroupBy(_) => f.write_str("GroupBy"),
            Step::Aggregate(spec) => write!(f, "Aggregate({} {:?})", spec.kind.label(), spec.name),
            Step::Scope(scope) => f
                .debug_struct("Scope")
                .field("name", &scope.name)
                .field("steps", &scope.definition.steps())
                .finish(),
            Step::DefineProperty { name, .. } => write!(f, "DefineProperty({:?})", name),
            Step::DropProperty { name } => write!(f, "DropProperty({:?})", name),
            Step::DefineGroupProperty { name, .. } => {
                write!(f, "DefineGroupProperty({:?})", name)
            }
            Step::DropGroupProperty { name } => write!(f, "DropGroupProperty({:?})", name),
        }
    }
}
