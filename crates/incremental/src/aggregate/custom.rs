//! User-supplied commutative aggregates.

use alloc::boxed::Box;
use alloc::sync::Arc;
use tally_core::Value;

/// A reduction that supports order-independent incremental add/remove.
///
/// Implementations must satisfy two laws the engine cannot verify:
///
/// - inverse: `add(v)` followed by `remove(v)` restores the prior `result()`
/// - commutativity: `result()` does not depend on the order of `add`s
///
/// `remove` is only ever called with a value that was previously passed to
/// `add` on the same instance.
///
/// A `PipelineConfig::inverse_check_interval` enables sampled runtime checks
/// of the inverse law. A check runs `add(v); remove(v)` on a copy obtained
/// from [`CommutativeAggregate::fork`] and compares results exactly, so the
/// live state is never touched. Aggregates that cannot fork are not sampled.
pub trait CommutativeAggregate {
    /// Folds a contributing value in.
    fn add(&mut self, value: &Value);

    /// Takes a previously added value back out.
    fn remove(&mut self, value: &Value);

    /// Current result, `None` while the aggregate has nothing to report.
    fn result(&self) -> Option<Value>;

    /// An independent copy of the current state, for inverse-law sampling.
    fn fork(&self) -> Option<Box<dyn CommutativeAggregate>> {
        None
    }
}

type AddFn<S> = Arc<dyn Fn(&mut S, &Value) + Send + Sync>;
type ResultFn<S> = Arc<dyn Fn(&S) -> Option<Value> + Send + Sync>;

/// A [`CommutativeAggregate`] assembled from an initial state and three
/// closures.
pub struct FnAggregate<S> {
    state: S,
    add: AddFn<S>,
    remove: AddFn<S>,
    result: ResultFn<S>,
}

impl<S> FnAggregate<S> {
    /// Creates an aggregate from its parts.
    pub fn new<A, R, F>(init: S, add: A, remove: R, result: F) -> Self
    where
        A: Fn(&mut S, &Value) + Send + Sync + 'static,
        R: Fn(&mut S, &Value) + Send + Sync + 'static,
        F: Fn(&S) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            state: init,
            add: Arc::new(add),
            remove: Arc::new(remove),
            result: Arc::new(result),
        }
    }

    /// Returns the raw state.
    #[inline]
    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S: Clone> Clone for FnAggregate<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            add: self.add.clone(),
            remove: self.remove.clone(),
            result: self.result.clone(),
        }
    }
}

impl<S: Clone + 'static> CommutativeAggregate for FnAggregate<S> {
    fn add(&mut self, value: &Value) {
        (self.add)(&mut self.state, value)
    }

    fn remove(&mut self, value: &Value) {
        (self.remove)(&mut self.state, value)
    }

    fn result(&self) -> Option<Value> {
        (self.result)(&self.state)
    }

    fn fork(&self) -> Option<Box<dyn CommutativeAggregate>> {
        Some(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> FnAggregate<(i64, u32)> {
        // (product of non-zero factors, number of zeros)
        FnAggregate::new(
            (1i64, 0u32),
            |s, v| match v.as_i64() {
                Some(0) => s.1 += 1,
                Some(x) => s.0 *= x,
                None => {}
            },
            |s, v| match v.as_i64() {
                Some(0) => s.1 -= 1,
                Some(x) => s.0 /= x,
                None => {}
            },
            |s| Some(Value::Int64(if s.1 > 0 { 0 } else { s.0 })),
        )
    }

    #[test]
    fn test_fn_aggregate_add_remove() {
        let mut agg = product();
        agg.add(&Value::Int64(3));
        agg.add(&Value::Int64(4));
        assert_eq!(agg.result(), Some(Value::Int64(12)));

        agg.add(&Value::Int64(0));
        assert_eq!(agg.result(), Some(Value::Int64(0)));

        agg.remove(&Value::Int64(0));
        agg.remove(&Value::Int64(3));
        assert_eq!(agg.result(), Some(Value::Int64(4)));
        assert_eq!(agg.state(), &(4, 0));
    }

    #[test]
    fn test_fn_aggregate_clone_is_independent() {
        let mut a = product();
        a.add(&Value::Int64(5));
        let mut b = a.clone();
        b.add(&Value::Int64(2));
        assert_eq!(a.result(), Some(Value::Int64(5)));
        assert_eq!(b.result(), Some(Value::Int64(10)));
    }

    #[test]
    fn test_fork_is_independent() {
        let mut agg = product();
        agg.add(&Value::Int64(6));
        let Some(mut copy) = agg.fork() else {
            panic!("closure aggregates fork");
        };
        copy.add(&Value::Int64(0));
        assert_eq!(copy.result(), Some(Value::Int64(0)));
        assert_eq!(agg.result(), Some(Value::Int64(6)));
    }
}
