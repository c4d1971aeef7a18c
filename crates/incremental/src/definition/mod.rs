//! Pipeline definitions.
//!
//! A `Definition` is an immutable, ordered list of steps built once through
//! [`PipelineBuilder`]. Steps only describe work; all mutable state lives in
//! the groups of the stage that runs the definition.

mod builder;
mod step;

pub use builder::PipelineBuilder;
pub use step::{
    field, AggregateFactory, AggregateKind, AggregateSpec, PredicateFn, ScopeFilter, ScopeSpec,
    Step, SummaryFn, SummaryProperty, ValueFn,
};

use crate::aggregate::Contribution;
use crate::group::GroupPath;
use crate::property;
use alloc::borrow::Cow;
use alloc::collections::BTreeSet;
use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use tally_core::{Error, Record, Result};

/// An ordered list of pipeline steps.
#[derive(Clone, Debug, Default)]
pub struct Definition {
    pub(crate) steps: Vec<Step>,
}

/// Aggregates and summary properties attached at each grouping level;
/// index 0 is the root group.
#[derive(Clone, Default)]
pub struct Layout {
    pub levels: Vec<Vec<AggregateSpec>>,
    pub properties: Vec<Vec<SummaryProperty>>,
}

/// Everything one record view produces when run through a definition.
pub(crate) struct Evaluation {
    /// One key per grouping level
    pub path: GroupPath,
    /// Contributions per level, aligned with `Layout::levels`
    pub contributions: Vec<Vec<Contribution>>,
    /// Per scope step: the view handed to the scope, or None if filtered out
    pub scopes: Vec<Option<Record>>,
}

impl Definition {
    /// Creates a definition from raw steps.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Returns the steps in order.
    #[inline]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of grouping levels.
    pub fn depth(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::GroupBy(_)))
            .count()
    }

    /// Scope steps in declaration order.
    pub fn scopes(&self) -> impl Iterator<Item = &ScopeSpec> {
        self.steps.iter().filter_map(|s| match s {
            Step::Scope(scope) => Some(scope),
            _ => None,
        })
    }

    /// Aggregates and summary properties grouped by the level they attach to.
    pub fn layout(&self) -> Layout {
        let mut levels = vec![Vec::new()];
        let mut properties = vec![Vec::new()];
        for step in &self.steps {
            let property = match step {
                Step::GroupBy(_) => {
                    levels.push(Vec::new());
                    properties.push(Vec::new());
                    continue;
                }
                Step::Aggregate(spec) => {
                    if let Some(level) = levels.last_mut() {
                        level.push(spec.clone());
                    }
                    continue;
                }
                Step::DefineGroupProperty { name, compute } => SummaryProperty::Define {
                    name: name.clone(),
                    compute: compute.clone(),
                },
                Step::DropGroupProperty { name } => SummaryProperty::Drop { name: name.clone() },
                _ => continue,
            };
            if let Some(level) = properties.last_mut() {
                level.push(property);
            }
        }
        Layout { levels, properties }
    }

    /// Checks names and scope paths, recursing into scopes.
    pub fn validate(&self) -> Result<()> {
        self.validate_at("")
    }

    fn validate_at(&self, location: &str) -> Result<()> {
        let mut depth = 0usize;
        // Names visible in the current level's summaries, and every name
        // declared at the level so far
        let mut outputs: BTreeSet<&str> = BTreeSet::new();
        let mut declared: BTreeSet<&str> = BTreeSet::new();
        let mut scope_names: BTreeSet<&str> = BTreeSet::new();

        for step in &self.steps {
            match step {
                Step::GroupBy(_) => {
                    depth += 1;
                    outputs.clear();
                    declared.clear();
                }
                Step::Aggregate(spec) => {
                    if spec.name.is_empty() {
                        return Err(Error::invalid_pipeline(format!(
                            "{}aggregate {} has an empty name",
                            location,
                            spec.kind.label()
                        )));
                    }
                    // Aggregates are summarized before any summary property,
                    // so their names cannot be reused at the same level
                    if !declared.insert(spec.name.as_str()) {
                        return Err(Error::invalid_pipeline(format!(
                            "{}duplicate aggregate name '{}' at level {}",
                            location, spec.name, depth
                        )));
                    }
                    outputs.insert(spec.name.as_str());
                }
                Step::Scope(scope) => {
                    if scope.name.is_empty() {
                        return Err(Error::invalid_pipeline(format!(
                            "{}scope has an empty name",
                            location
                        )));
                    }
                    if !scope_names.insert(scope.name.as_str()) {
                        return Err(Error::invalid_pipeline(format!(
                            "{}duplicate scope name '{}'",
                            location, scope.name
                        )));
                    }
                    if let ScopeFilter::Path(path) = &scope.filter {
                        if path.len() > depth {
                            return Err(Error::invalid_pipeline(format!(
                                "{}scope '{}' filters on a path of length {} \
                                 but only {} grouping levels precede it",
                                location,
                                scope.name,
                                path.len(),
                                depth
                            )));
                        }
                    }
                    let nested: String = format!("{}scope '{}': ", location, scope.name);
                    scope.definition.validate_at(&nested)?;
                }
                Step::DefineProperty { name, .. } | Step::DropProperty { name } => {
                    if name.is_empty() {
                        return Err(Error::invalid_pipeline(format!(
                            "{}property with an empty name",
                            location
                        )));
                    }
                }
                Step::DefineGroupProperty { name, .. } => {
                    if name.is_empty() {
                        return Err(Error::invalid_pipeline(format!(
                            "{}group property with an empty name",
                            location
                        )));
                    }
                    if !outputs.insert(name.as_str()) {
                        return Err(Error::invalid_pipeline(format!(
                            "{}duplicate output name '{}' at level {}",
                            location, name, depth
                        )));
                    }
                    declared.insert(name.as_str());
                }
                Step::DropGroupProperty { name } => {
                    if !outputs.remove(name.as_str()) {
                        return Err(Error::invalid_pipeline(format!(
                            "{}no output named '{}' to drop at level {}",
                            location, name, depth
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs a record through the steps.
    ///
    /// Property steps work on a copy-on-write view, so the stored record is
    /// never modified.
    pub(crate) fn evaluate(&self, seq: u64, record: &Record) -> Evaluation {
        let mut view = Cow::Borrowed(record);
        let mut path = GroupPath::new();
        let mut contributions = vec![Vec::new()];
        let mut scopes = Vec::new();

        for step in &self.steps {
            match step {
                Step::GroupBy(key) => {
                    path.push(key(&*view));
                    contributions.push(Vec::new());
                }
                Step::Aggregate(spec) => {
                    if let Some(level) = contributions.last_mut() {
                        level.push(spec.contribution(seq, &view));
                    }
                }
                Step::Scope(scope) => {
                    let admitted = scope.filter.matches(&view, &path);
                    scopes.push(admitted.then(|| view.clone().into_owned()));
                }
                Step::DefineProperty { name, compute } => {
                    property::define(&mut view, name, compute);
                }
                Step::DropProperty { name } => {
                    property::drop(&mut view, name);
                }
                Step::DefineGroupProperty { .. } | Step::DropGroupProperty { .. } => {}
            }
        }

        Evaluation {
            path,
            contributions,
            scopes,
        }
    }
}
