//! Per-group aggregate state.

use super::custom::CommutativeAggregate;
use super::exact::ExactSum;
use crate::definition::AggregateKind;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::fmt;
use tally_core::Value;

/// The value one record contributes to one aggregate.
///
/// `seq` and `payload` are only meaningful for pick-by aggregates: `value`
/// is the rank, `payload` the projected result, `seq` the record's arrival
/// order used to break ties.
#[derive(Clone, Debug, PartialEq)]
pub struct Contribution {
    pub value: Value,
    pub seq: u64,
    pub payload: Value,
}

impl Contribution {
    /// A plain contributing value.
    pub fn of(value: Value) -> Self {
        Self {
            value,
            seq: 0,
            payload: Value::Null,
        }
    }

    /// A ranked candidate for pick-by aggregates.
    pub fn ranked(rank: Value, seq: u64, payload: Value) -> Self {
        Self {
            value: rank,
            seq,
            payload,
        }
    }
}

/// Exact running sum.
///
/// Integers accumulate in an `i128`. Finite floats go into an exact
/// fixed-point accumulator, allocated on the first float term, and infinities
/// and NaNs are counted. Adding then removing any term restores the result
/// bit for bit, whatever the order of the terms.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunningSum {
    ints: i128,
    floats: Option<Box<ExactSum>>,
    finite_floats: u64,
    positive_infinities: u64,
    negative_infinities: u64,
    nans: u64,
    terms: u64,
}

impl RunningSum {
    /// Adds a term; non-numeric values are ignored.
    pub fn add(&mut self, value: &Value) {
        match value {
            Value::Int64(i) => self.ints += *i as i128,
            Value::Float64(f) if f.is_nan() => self.nans += 1,
            Value::Float64(f) if *f == f64::INFINITY => self.positive_infinities += 1,
            Value::Float64(f) if *f == f64::NEG_INFINITY => self.negative_infinities += 1,
            Value::Float64(f) => {
                self.floats
                    .get_or_insert_with(|| Box::new(ExactSum::new()))
                    .add_f64(*f);
                self.finite_floats += 1;
            }
            _ => return,
        }
        self.terms += 1;
    }

    /// Removes a previously added term.
    pub fn remove(&mut self, value: &Value) {
        match value {
            Value::Int64(i) => self.ints -= *i as i128,
            Value::Float64(f) if f.is_nan() => self.nans = self.nans.saturating_sub(1),
            Value::Float64(f) if *f == f64::INFINITY => {
                self.positive_infinities = self.positive_infinities.saturating_sub(1)
            }
            Value::Float64(f) if *f == f64::NEG_INFINITY => {
                self.negative_infinities = self.negative_infinities.saturating_sub(1)
            }
            Value::Float64(f) => {
                if let Some(acc) = self.floats.as_mut() {
                    acc.remove_f64(*f);
                }
                self.finite_floats = self.finite_floats.saturating_sub(1);
                if self.finite_floats == 0 {
                    self.floats = None;
                }
            }
            _ => return,
        }
        self.terms = self.terms.saturating_sub(1);
    }

    /// Number of numeric terms currently summed.
    #[inline]
    pub fn terms(&self) -> u64 {
        self.terms
    }

    fn float_terms(&self) -> u64 {
        self.finite_floats + self.positive_infinities + self.negative_infinities + self.nans
    }

    /// The sum as f64, rounded once from the exact total.
    pub fn as_f64(&self) -> f64 {
        if self.nans > 0 || (self.positive_infinities > 0 && self.negative_infinities > 0) {
            return f64::NAN;
        }
        if self.positive_infinities > 0 {
            return f64::INFINITY;
        }
        if self.negative_infinities > 0 {
            return f64::NEG_INFINITY;
        }
        match &self.floats {
            Some(acc) => {
                let mut total = ExactSum::clone(acc);
                total.add_i128(self.ints);
                total.to_f64()
            }
            None => self.ints as f64,
        }
    }

    /// The sum as a value: Int64 while only integers contributed.
    pub fn total(&self) -> Value {
        if self.float_terms() == 0 {
            match i64::try_from(self.ints) {
                Ok(v) => Value::Int64(v),
                Err(_) => Value::Float64(self.ints as f64),
            }
        } else {
            Value::Float64(self.as_f64())
        }
    }
}

/// Ordered candidates: rank -> (arrival seq -> payload).
type Candidates = BTreeMap<Value, BTreeMap<u64, Value>>;

/// Aggregate state owned by exactly one group.
///
/// Null contributions are skipped by every built-in except `Count`, which
/// counts records.
pub enum AggregateState {
    Count { count: u64 },
    Sum { sum: RunningSum },
    Average { sum: RunningSum },
    /// Multiset of values with multiplicities
    Min { values: BTreeMap<Value, u32> },
    /// Multiset of values with multiplicities
    Max { values: BTreeMap<Value, u32> },
    PickByMin { candidates: Candidates },
    PickByMax { candidates: Candidates },
    Custom(Box<dyn CommutativeAggregate>),
}

impl AggregateState {
    /// Creates empty state for an aggregate kind.
    pub fn new(kind: &AggregateKind) -> Self {
        match kind {
            AggregateKind::Count => AggregateState::Count { count: 0 },
            AggregateKind::Sum(_) => AggregateState::Sum {
                sum: RunningSum::default(),
            },
            AggregateKind::Average(_) => AggregateState::Average {
                sum: RunningSum::default(),
            },
            AggregateKind::Min(_) => AggregateState::Min {
                values: BTreeMap::new(),
            },
            AggregateKind::Max(_) => AggregateState::Max {
                values: BTreeMap::new(),
            },
            AggregateKind::PickByMin { .. } => AggregateState::PickByMin {
                candidates: BTreeMap::new(),
            },
            AggregateKind::PickByMax { .. } => AggregateState::PickByMax {
                candidates: BTreeMap::new(),
            },
            AggregateKind::Custom { factory, .. } => AggregateState::Custom(factory()),
        }
    }

    /// Folds a contribution in.
    pub fn add(&mut self, c: &Contribution) {
        match self {
            AggregateState::Count { count } => *count += 1,
            AggregateState::Sum { sum } | AggregateState::Average { sum } => sum.add(&c.value),
            AggregateState::Min { values } | AggregateState::Max { values } => {
                if !c.value.is_null() {
                    *values.entry(c.value.clone()).or_insert(0) += 1;
                }
            }
            AggregateState::PickByMin { candidates } | AggregateState::PickByMax { candidates } => {
                if !c.value.is_null() {
                    candidates
                        .entry(c.value.clone())
                        .or_default()
                        .insert(c.seq, c.payload.clone());
                }
            }
            AggregateState::Custom(agg) => agg.add(&c.value),
        }
    }

    /// Takes a previously added contribution back out.
    pub fn remove(&mut self, c: &Contribution) {
        match self {
            AggregateState::Count { count } => *count = count.saturating_sub(1),
            AggregateState::Sum { sum } | AggregateState::Average { sum } => sum.remove(&c.value),
            AggregateState::Min { values } | AggregateState::Max { values } => {
                if let Some(n) = values.get_mut(&c.value) {
                    *n -= 1;
                    if *n == 0 {
                        values.remove(&c.value);
                    }
                }
            }
            AggregateState::PickByMin { candidates } | AggregateState::PickByMax { candidates } => {
                if let Some(tied) = candidates.get_mut(&c.value) {
                    tied.remove(&c.seq);
                    if tied.is_empty() {
                        candidates.remove(&c.value);
                    }
                }
            }
            AggregateState::Custom(agg) => agg.remove(&c.value),
        }
    }

    /// Current result; `None` marks an empty aggregate.
    pub fn result(&self) -> Option<Value> {
        match self {
            AggregateState::Count { count } => Some(Value::Int64(*count as i64)),
            AggregateState::Sum { sum } => Some(sum.total()),
            AggregateState::Average { sum } => {
                if sum.terms() == 0 {
                    None
                } else {
                    Some(Value::Float64(sum.as_f64() / sum.terms() as f64))
                }
            }
            AggregateState::Min { values } => values.keys().next().cloned(),
            AggregateState::Max { values } => values.keys().next_back().cloned(),
            AggregateState::PickByMin { candidates } => candidates
                .values()
                .next()
                .and_then(|tied| tied.values().next().cloned()),
            AggregateState::PickByMax { candidates } => candidates
                .values()
                .next_back()
                .and_then(|tied| tied.values().next().cloned()),
            AggregateState::Custom(agg) => agg.result(),
        }
    }

    /// Returns the user aggregate if this is a custom state.
    pub fn as_custom(&self) -> Option<&dyn CommutativeAggregate> {
        match self {
            AggregateState::Custom(agg) => Some(agg.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Debug for AggregateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            AggregateState::Count { .. } => "Count",
            AggregateState::Sum { .. } => "Sum",
            AggregateState::Average { .. } => "Average",
            AggregateState::Min { .. } => "Min",
            AggregateState::Max { .. } => "Max",
            AggregateState::PickByMin { .. } => "PickByMin",
            AggregateState::PickByMax { .. } => "PickByMax",
            AggregateState::Custom(_) => "Custom",
        };
        f.debug_struct(kind).field("result", &self.result()).finish()
    }
}
