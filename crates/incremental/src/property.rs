//! Property layer: derived fields on record views and group summaries.
//!
//! Record properties never touch stored records. A definition runs each
//! record through a copy-on-write view; `define` and `drop` edit that view
//! so later steps read the derived value, or see the field as absent.
//!
//! Summary properties are computed from a group's summary whenever it is
//! read, after the aggregates of the group's level, so they follow every
//! change to the group.

use crate::definition::{Definition, Step, SummaryProperty, ValueFn};
use crate::group::GroupSummary;
use alloc::borrow::Cow;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use tally_core::{Error, Record, Result, Value};

/// Sets `name` on the view to the computed value, shadowing any stored field.
pub(crate) fn define(view: &mut Cow<'_, Record>, name: &str, compute: &ValueFn) {
    let value = compute(&**view);
    view.to_mut().set(name, value);
}

/// Removes `name` from the view; clones the record only if the field exists.
pub(crate) fn drop(view: &mut Cow<'_, Record>, name: &str) {
    if view.contains(name) {
        view.to_mut().remove(name);
    }
}

/// Applies a level's summary properties in order. A `Null` result is
/// stored as the empty marker.
pub(crate) fn summarize(summary: &mut GroupSummary, properties: &[SummaryProperty]) {
    for property in properties {
        match property {
            SummaryProperty::Define { name, compute } => {
                let value = compute(summary);
                let value = (!value.is_null()).then_some(value);
                summary.aggregates.insert(name.clone(), value);
            }
            SummaryProperty::Drop { name } => {
                summary.aggregates.remove(name);
            }
        }
    }
}

impl Definition {
    /// Returns a definition where `name` is derived by `compute` before any
    /// other step. Existing define/drop steps for `name` are removed at every
    /// scope depth.
    pub fn with_property<F>(&self, name: impl Into<String>, compute: F) -> Definition
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.push(Step::DefineProperty {
            name: name.clone(),
            compute: Arc::new(compute),
        });
        steps.extend(strip_property(&self.steps, &name));
        Definition::from_steps(steps)
    }

    /// Returns a definition where `name` reads as absent everywhere: the
    /// field is dropped before any other step and all define/drop steps for
    /// `name` are removed at every scope depth.
    pub fn without_property(&self, name: impl Into<String>) -> Definition {
        let name = name.into();
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.push(Step::DropProperty { name: name.clone() });
        steps.extend(strip_property(&self.steps, &name));
        Definition::from_steps(steps)
    }

    /// Returns a definition where `name` is derived by `compute` on every
    /// summary at grouping `level`, after the level's other outputs. Earlier
    /// group property steps for `name` at that level are removed. Scopes are
    /// left alone.
    pub fn with_group_property<F>(
        &self,
        level: usize,
        name: impl Into<String>,
        compute: F,
    ) -> Result<Definition>
    where
        F: Fn(&GroupSummary) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        self.check_level(level)?;
        let mut steps = strip_group_property(&self.steps, level, &name);
        let at = end_of_level(&steps, level);
        steps.insert(
            at,
            Step::DefineGroupProperty {
                name,
                compute: Arc::new(compute),
            },
        );
        Ok(Definition::from_steps(steps))
    }

    /// Returns a definition where `name` no longer appears in summaries at
    /// grouping `level`: summary properties for it are removed, and an
    /// aggregate of that name is hidden. Fails if nothing is named `name`.
    pub fn without_group_property(
        &self,
        level: usize,
        name: impl Into<String>,
    ) -> Result<Definition> {
        let name = name.into();
        self.check_level(level)?;
        let mut steps = strip_group_property(&self.steps, level, &name);
        let stripped = steps.len() != self.steps.len();
        let aggregate = levels(&steps).any(|(l, step)| {
            l == level && matches!(step, Step::Aggregate(spec) if spec.name == name)
        });
        if aggregate {
            let at = end_of_level(&steps, level);
            steps.insert(at, Step::DropGroupProperty { name });
        } else if !stripped {
            return Err(Error::invalid_pipeline(format!(
                "no output named '{}' at level {}",
                name, level
            )));
        }
        Ok(Definition::from_steps(steps))
    }

    fn check_level(&self, level: usize) -> Result<()> {
        let depth = self.depth();
        if level > depth {
            return Err(Error::invalid_pipeline(format!(
                "level {} is deeper than the {} grouping levels",
                level, depth
            )));
        }
        Ok(())
    }
}

/// Pairs each step with the grouping level it belongs to.
fn levels(steps: &[Step]) -> impl Iterator<Item = (usize, &Step)> {
    steps.iter().scan(0usize, |depth, step| {
        if matches!(step, Step::GroupBy(_)) {
            *depth += 1;
        }
        Some((*depth, step))
    })
}

/// Index just past the last step of `level`.
fn end_of_level(steps: &[Step], level: usize) -> usize {
    levels(steps)
        .position(|(l, _)| l > level)
        .unwrap_or(steps.len())
}

fn strip_group_property(steps: &[Step], level: usize, name: &str) -> Vec<Step> {
    levels(steps)
        .filter(|(l, step)| match step {
            Step::DefineGroupProperty { name: n, .. } | Step::DropGroupProperty { name: n } => {
                *l != level || n != name
            }
            _ => true,
        })
        .map(|(_, step)| step.clone())
        .collect()
}

fn strip_property(steps: &[Step], name: &str) -> Vec<Step> {
    steps
        .iter()
        .filter(|step| match step {
            Step::DefineProperty { name: n, .. } | Step::DropProperty { name: n } => n != name,
            _ => true,
        })
        .map(|step| match step {
            Step::Scope(scope) => {
                let mut scope = scope.clone();
                let steps = strip_property(scope.definition.steps(), name);
                scope.definition = Definition::from_steps(steps);
                Step::Scope(scope)
            }
            other => other.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{field, PipelineBuilder};

    #[test]
    fn test_define_shadows_without_touching_record() {
        let record = Record::new(1).with("x", 1);
        let mut view = Cow::Borrowed(&record);
        let compute: ValueFn = Arc::new(|_: &Record| Value::Int64(99));
        define(&mut view, "x", &compute);
        assert_eq!(view.get("x"), Some(&Value::Int64(99)));
        assert_eq!(record.get("x"), Some(&Value::Int64(1)));
    }

    #[test]
    fn test_drop_missing_field_does_not_clone() {
        let record = Record::new(1).with("x", 1);
        let mut view = Cow::Borrowed(&record);
        drop(&mut view, "y");
        assert!(matches!(view, Cow::Borrowed(_)));
        drop(&mut view, "x");
        assert!(matches!(view, Cow::Owned(_)));
        assert!(!view.contains("x"));
    }

    #[test]
    fn test_without_property_strips_nested_defines() {
        let def = PipelineBuilder::new()
            .define_property("bonus", field("x"))
            .within("s", |_: &Record| true, |s| {
                s.define_property("bonus", field("y")).sum("b", field("bonus"))
            })
            .into_definition();

        let dropped = def.without_property("bonus");
        assert!(matches!(&dropped.steps()[0], Step::DropProperty { name } if name == "bonus"));
        assert_eq!(dropped.steps().len(), 2);
        let scope = dropped.scopes().next().unwrap();
        assert_eq!(scope.definition.steps().len(), 1);
    }

    #[test]
    fn test_with_property_replaces_earlier_drop() {
        let def = PipelineBuilder::new()
            .drop_property("bonus")
            .sum("b", field("bonus"))
            .into_definition();
        let defined = def.with_property("bonus", |_: &Record| Value::Int64(1));
        assert_eq!(defined.steps().len(), 2);
        assert!(matches!(&defined.steps()[0], Step::DefineProperty { .. }));
    }
}
