//! Property-based tests for tally-incremental using proptest.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tally_core::{Record, Value};
use tally_incremental::{
    diff_snapshots, field, AggregateKind, AggregateState, Contribution, Pipeline, PipelineBuilder,
};

fn kinds() -> Vec<AggregateKind> {
    vec![
        AggregateKind::Count,
        AggregateKind::Sum(Arc::new(field("v"))),
        AggregateKind::Min(Arc::new(field("v"))),
        AggregateKind::Max(Arc::new(field("v"))),
        AggregateKind::Average(Arc::new(field("v"))),
    ]
}

fn special_float() -> impl Strategy<Value = f64> {
    prop::sample::select(vec![
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::NAN,
        f64::MAX,
        f64::MIN,
        f64::MIN_POSITIVE,
        5e-324,
        1e300,
        -1e-300,
        0.0,
        -0.0,
    ])
}

/// Integers, floats of every magnitude, non-finite floats and nulls, mixed
/// within the same group.
fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => (-1000i64..1000).prop_map(Value::Int64),
        2 => (-1000i64..1000).prop_map(|i| Value::Float64(i as f64 / 10.0)),
        2 => any::<f64>().prop_map(Value::Float64),
        1 => special_float().prop_map(Value::Float64),
        1 => any::<i64>().prop_map(Value::Int64),
        1 => Just(Value::Null),
    ]
}

#[derive(Clone, Debug)]
enum FloatOp {
    Upsert { id: u64, group: i64, x: f64 },
    Remove { id: u64 },
}

fn float_op() -> impl Strategy<Value = FloatOp> {
    let x = prop_oneof![
        3 => (-100i64..100).prop_map(|i| i as f64 * 0.1),
        1 => any::<f64>(),
        1 => special_float(),
    ];
    prop_oneof![
        3 => (0u64..12, 0i64..3, x).prop_map(|(id, group, x)| FloatOp::Upsert { id, group, x }),
        1 => (0u64..12).prop_map(|id| FloatOp::Remove { id }),
    ]
}

#[derive(Clone, Debug)]
enum Op {
    Upsert { id: u64, group: i64, x: i64, flag: bool },
    Remove { id: u64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..16, 0i64..4, -50i64..50, any::<bool>())
            .prop_map(|(id, group, x, flag)| Op::Upsert { id, group, x, flag }),
        1 => (0u64..16).prop_map(|id| Op::Remove { id }),
    ]
}

fn pipeline() -> Pipeline {
    PipelineBuilder::new()
        .count("n")
        .group_by(field("g"))
        .sum("total", field("x"))
        .max("top", field("x"))
        .within("flagged", |r: &Record| r.get_or_null("flag").is_truthy(), |s| {
            s.group_by(field("g")).sum("total", field("x"))
        })
        .build()
        .unwrap()
}

fn apply(pipeline: &mut Pipeline, model: &mut BTreeMap<u64, (i64, i64, bool)>, op: &Op) {
    match *op {
        Op::Upsert { id, group, x, flag } => {
            let record = Record::new(id).with("g", group).with("x", x).with("flag", flag);
            pipeline.upsert(record).unwrap();
            model.insert(id, (group, x, flag));
        }
        Op::Remove { id } => {
            let result = pipeline.remove(id);
            assert_eq!(result.is_ok(), model.remove(&id).is_some());
        }
    }
}

proptest! {
    /// add(v) then remove(v) restores the prior result of every built-in.
    #[test]
    fn inverse_law(values in prop::collection::vec(value(), 0..40), extra in value()) {
        for kind in kinds() {
            let mut state = AggregateState::new(&kind);
            for v in &values {
                state.add(&Contribution::of(v.clone()));
            }
            let before = state.result();
            let c = Contribution::of(extra.clone());
            state.add(&c);
            state.remove(&c);
            prop_assert_eq!(state.result(), before, "{}", kind.label());
        }
    }

    /// The result does not depend on the order values were added in.
    #[test]
    fn order_independence(
        (values, shuffled) in prop::collection::vec(value(), 0..40)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        for kind in kinds() {
            let mut a = AggregateState::new(&kind);
            let mut b = AggregateState::new(&kind);
            for v in &values {
                a.add(&Contribution::of(v.clone()));
            }
            for v in &shuffled {
                b.add(&Contribution::of(v.clone()));
            }
            prop_assert_eq!(a.result(), b.result(), "{}", kind.label());
        }
    }

    /// Pick-by follows the earliest arrival among the current extremes.
    #[test]
    fn pick_by_max_matches_scan(
        ranks in prop::collection::vec(0i64..5, 1..30),
        drop_mask in any::<u32>(),
    ) {
        let kind = AggregateKind::PickByMax {
            rank: Arc::new(field("r")),
            project: Arc::new(field("r")),
        };
        let mut state = AggregateState::new(&kind);
        let contributions: Vec<_> = ranks
            .iter()
            .enumerate()
            .map(|(seq, r)| {
                Contribution::ranked(Value::Int64(*r), seq as u64, Value::Int64(seq as i64))
            })
            .collect();
        for c in &contributions {
            state.add(c);
        }
        let mut alive = Vec::new();
        for (i, c) in contributions.iter().enumerate() {
            if drop_mask & (1 << (i % 32)) != 0 {
                state.remove(c);
            } else {
                alive.push(i);
            }
        }
        let expected = alive
            .iter()
            .copied()
            .max_by(|a, b| ranks[*a].cmp(&ranks[*b]).then(b.cmp(a)))
            .map(|i| Value::Int64(i as i64));
        prop_assert_eq!(state.result(), expected);
    }

    /// After any sequence of mutations, every group matches a full recompute
    /// from the live record set.
    #[test]
    fn move_correctness(ops in prop::collection::vec(op(), 1..60)) {
        let mut pipeline = pipeline();
        let mut model = BTreeMap::new();
        for op in &ops {
            apply(&mut pipeline, &mut model, op);
        }

        let mut totals: BTreeMap<i64, (i64, usize)> = BTreeMap::new();
        let mut flagged: BTreeMap<i64, i64> = BTreeMap::new();
        for (group, x, flag) in model.values() {
            let entry = totals.entry(*group).or_insert((0, 0));
            entry.0 += x;
            entry.1 += 1;
            if *flag {
                *flagged.entry(*group).or_insert(0) += x;
            }
        }

        prop_assert_eq!(pipeline.len(), model.len());
        let expected_groups = if model.is_empty() { 0 } else { totals.len() + 1 };
        prop_assert_eq!(pipeline.group_count(), expected_groups);
        if let Some(root) = pipeline.group(&[]) {
            prop_assert_eq!(root.value("n"), Some(&Value::Int64(model.len() as i64)));
        }
        for (group, (total, members)) in &totals {
            let summary = pipeline.group(&[Value::Int64(*group)]).unwrap();
            prop_assert_eq!(summary.value("total"), Some(&Value::Int64(*total)));
            prop_assert_eq!(summary.members, *members);
        }

        let scope = pipeline.scope("flagged").unwrap();
        prop_assert_eq!(scope.children(&[]).len(), flagged.len());
        for (group, total) in &flagged {
            let summary = scope.group(&[Value::Int64(*group)]).unwrap();
            prop_assert_eq!(summary.value("total"), Some(&Value::Int64(*total)));
        }
    }

    /// Float sums and averages after any mutation sequence equal a fresh
    /// computation over the live records.
    #[test]
    fn float_aggregates_match_recompute(ops in prop::collection::vec(float_op(), 1..60)) {
        let mut pipeline = PipelineBuilder::new()
            .group_by(field("g"))
            .sum("total", field("x"))
            .average("mean", field("x"))
            .build()
            .unwrap();
        let mut model: BTreeMap<u64, (i64, f64)> = BTreeMap::new();
        for op in &ops {
            match *op {
                FloatOp::Upsert { id, group, x } => {
                    pipeline.upsert(Record::new(id).with("g", group).with("x", x)).unwrap();
                    model.insert(id, (group, x));
                }
                FloatOp::Remove { id } => {
                    prop_assert_eq!(pipeline.remove(id).is_ok(), model.remove(&id).is_some());
                }
            }
        }

        let mut fresh: BTreeMap<i64, (AggregateState, AggregateState)> = BTreeMap::new();
        for (group, x) in model.values() {
            let (sum, mean) = fresh.entry(*group).or_insert_with(|| {
                (
                    AggregateState::new(&AggregateKind::Sum(Arc::new(field("x")))),
                    AggregateState::new(&AggregateKind::Average(Arc::new(field("x")))),
                )
            });
            sum.add(&Contribution::of(Value::Float64(*x)));
            mean.add(&Contribution::of(Value::Float64(*x)));
        }
        prop_assert_eq!(pipeline.children(&[]).len(), fresh.len());
        for (group, (sum, mean)) in &fresh {
            let summary = pipeline.group(&[Value::Int64(*group)]).unwrap();
            prop_assert_eq!(summary.aggregates["total"].clone(), sum.result());
            prop_assert_eq!(summary.aggregates["mean"].clone(), mean.result());
        }
    }

    /// The changes a mutation reports are exactly the snapshot difference.
    #[test]
    fn changes_match_snapshot_diff(ops in prop::collection::vec(op(), 1..40)) {
        let mut pipeline = pipeline();
        let mut model = BTreeMap::new();
        for op in &ops {
            let before = pipeline.snapshot();
            let reported = match *op {
                Op::Upsert { id, group, x, flag } => {
                    model.insert(id, ());
                    pipeline
                        .upsert(Record::new(id).with("g", group).with("x", x).with("flag", flag))
                        .unwrap()
                }
                Op::Remove { id } => match model.remove(&id) {
                    Some(()) => pipeline.remove(id).unwrap(),
                    None => continue,
                },
            };
            let after = pipeline.snapshot();
            prop_assert_eq!(reported, diff_snapshots(&before, &after));
        }
    }
}
