//! Tally Core - value, record and error types shared by the tally crates.
//!
//! This crate provides the foundational types for the live aggregation engine:
//!
//! - `Value`: A dynamically typed field value (also used as a group key)
//! - `Record`: An identity-bearing mapping from field name to value
//! - `Error`: Error types for pipeline construction and mutation
//!
//! # Example
//!
//! ```rust
//! use tally_core::{Record, Value};
//!
//! let record = Record::new(1)
//!     .with("team", "red")
//!     .with("score", 42);
//!
//! assert_eq!(record.id(), 1);
//! assert_eq!(record.get("score"), Some(&Value::Int64(42)));
//! assert!(record.get_or_null("missing").is_null());
//! ```

#![no_std]

extern crate alloc;

mod error;
mod record;
mod value;

pub use error::{Error, Result};
pub use record::{Record, RecordId};
pub use value::Value;
