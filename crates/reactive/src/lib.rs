//! Tally Reactive - change notification for live aggregation pipelines.
//!
//! This crate wraps a `Pipeline` so that hosts can subscribe to group
//! changes. Notification is a plain listener list dispatched synchronously
//! at the end of each mutation; there is no scheduler and no buffering.
//!
//! # Core Concepts
//!
//! - `ChangeSet`: groups added, removed and modified by one mutation
//! - `ObservablePipeline`: a pipeline plus its subscribers
//! - `SubscriptionManager`: the listener list, with optional per-scope filters
//!
//! # Example
//!
//! ```
//! use tally_core::Record;
//! use tally_incremental::{field, PipelineBuilder};
//! use tally_reactive::ObservablePipeline;
//!
//! let pipeline = PipelineBuilder::new()
//!     .within("active", |r: &Record| r.get_or_null("active").is_truthy(), |s| s.count("n"))
//!     .build()
//!     .unwrap();
//! let mut observable = ObservablePipeline::new(pipeline);
//!
//! observable.subscribe_scope(vec!["active".into()], |changes| {
//!     assert_eq!(changes.added.len(), 1);
//! });
//!
//! observable.insert(Record::new(1).with("active", false)).unwrap();
//! observable.update(Record::new(1).with("active", true)).unwrap();
//! ```

#![no_std]

extern crate alloc;

pub mod change_set;
pub mod observable;
pub mod subscription;

pub use change_set::ChangeSet;
pub use observable::ObservablePipeline;
pub use subscription::{ChangeCallback, Subscription, SubscriptionId, SubscriptionManager};

// Re-export commonly used types from dependencies
pub use tally_incremental::{GroupChange, GroupSummary, Mutation, ScopePath};
