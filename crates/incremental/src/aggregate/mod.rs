//! Commutative aggregates.
//!
//! Every aggregate supports incremental `add`/`remove` of a contributing
//! value without rescanning its group:
//! - Count: a running count
//! - Sum/Average: exact running totals, so removal never drifts, even for
//!   floats
//! - Min/Max: ordered multiset, O(log n) per change, including removal of
//!   the current extreme
//! - PickByMin/PickByMax: ordered candidates carrying a projected payload,
//!   ties resolved to the earliest arrival
//! - Custom: a user-supplied [`CommutativeAggregate`]

mod custom;
mod exact;
mod state;

pub use custom::{CommutativeAggregate, FnAggregate};
pub use state::{AggregateState, Contribution, RunningSum};
