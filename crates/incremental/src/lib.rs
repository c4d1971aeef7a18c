//! Tally Incremental - live grouped aggregations over a mutable record set.
//!
//! A pipeline is built once from an ordered list of steps and then driven by
//! record mutations. Each insert, update or remove adjusts only the groups
//! the record belongs to, before and after the change; nothing is ever
//! recomputed from scratch.
//!
//! # Core Concepts
//!
//! - `PipelineBuilder`: fluent construction of group-by, aggregate, scope,
//!   record property and summary property steps
//! - `Pipeline`: the live engine with `insert`/`update`/`remove` and a read
//!   API (`query`, `group`, `scope`)
//! - `CommutativeAggregate`: the `add`/`remove`/`result` contract every
//!   aggregate satisfies
//! - `GroupChange`: what a mutation did to each affected group
//!
//! # Example
//!
//! ```
//! use tally_incremental::{field, PipelineBuilder};
//! use tally_core::{Record, Value};
//!
//! let mut pipeline = PipelineBuilder::new()
//!     .group_by(field("a"))
//!     .group_by(field("b"))
//!     .sum("x", field("x"))
//!     .build()
//!     .unwrap();
//!
//! pipeline.insert(Record::new(1).with("a", 1).with("b", "x").with("x", 10)).unwrap();
//! pipeline.insert(Record::new(2).with("a", 1).with("b", "y").with("x", 5)).unwrap();
//! pipeline.insert(Record::new(3).with("a", 2).with("b", "x").with("x", 1)).unwrap();
//!
//! let group = pipeline.group(&[Value::Int64(1), Value::from("y")]).unwrap();
//! assert_eq!(group.value("x"), Some(&Value::Int64(5)));
//!
//! pipeline.remove(1).unwrap();
//! assert!(pipeline.group(&[Value::Int64(1), Value::from("x")]).is_none());
//! ```

#![no_std]

extern crate alloc;

pub mod aggregate;
pub mod change;
pub mod config;
pub mod definition;
pub mod group;
pub mod pipeline;
mod property;
pub mod scope;
mod stage;
mod store;

pub use aggregate::{AggregateState, CommutativeAggregate, Contribution, FnAggregate, RunningSum};
pub use change::{coalesce, diff_snapshots, GroupChange, ScopePath, Snapshot};
pub use config::PipelineConfig;
pub use definition::{field, AggregateKind, Definition, PipelineBuilder, ScopeFilter, Step};
pub use group::{GroupIndex, GroupPath, GroupSummary};
pub use pipeline::{Mutation, Pipeline};
pub use scope::ScopeView;
pub use stage::StageStats;
pub use store::RecordStore;
