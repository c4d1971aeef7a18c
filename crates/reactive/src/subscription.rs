//! Subscription management for observable pipelines.
//!
//! A subscription either sees every change set, or only the changes of one
//! scope. Scoped subscriptions are skipped when their scope did not change.

use crate::change_set::ChangeSet;
use alloc::boxed::Box;
use alloc::vec::Vec;
use hashbrown::HashMap;
use tally_incremental::ScopePath;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback type for change notifications.
pub type ChangeCallback = Box<dyn Fn(&ChangeSet)>;

/// A subscription to pipeline changes.
pub struct Subscription {
    id: SubscriptionId,
    callback: ChangeCallback,
    /// Only changes of this stage are delivered
    scope: Option<ScopePath>,
    active: bool,
}

impl Subscription {
    /// Creates a subscription to every change.
    pub fn new<F>(id: SubscriptionId, callback: F) -> Self
    where
        F: Fn(&ChangeSet) + 'static,
    {
        Self {
            id,
            callback: Box::new(callback),
            scope: None,
            active: true,
        }
    }

    /// Creates a subscription to the changes of one scope.
    pub fn scoped<F>(id: SubscriptionId, scope: ScopePath, callback: F) -> Self
    where
        F: Fn(&ChangeSet) + 'static,
    {
        Self {
            scope: Some(scope),
            ..Self::new(id, callback)
        }
    }

    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Scope filter, if any.
    #[inline]
    pub fn scope(&self) -> Option<&ScopePath> {
        self.scope.as_ref()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Delivers changes, filtered to the subscription's scope.
    pub fn notify(&self, changes: &ChangeSet) {
        if !self.active {
            return;
        }
        match &self.scope {
            Some(scope) => {
                let filtered = changes.for_scope(scope);
                if !filtered.is_empty() {
                    (self.callback)(&filtered);
                }
            }
            None => (self.callback)(changes),
        }
    }
}

/// Listener list for one observable pipeline.
pub struct SubscriptionManager {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_id: SubscriptionId,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Subscribes to every change. Returns the id to unsubscribe with.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeSet) + 'static,
    {
        let id = self.next_id();
        self.subscriptions.insert(id, Subscription::new(id, callback));
        id
    }

    /// Subscribes to the changes of the stage at `scope`.
    pub fn subscribe_scope<F>(&mut self, scope: ScopePath, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeSet) + 'static,
    {
        let id = self.next_id();
        self.subscriptions.insert(id, Subscription::scoped(id, scope, callback));
        id
    }

    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    /// Notifies one subscription.
    pub fn notify(&self, id: SubscriptionId, changes: &ChangeSet) {
        if let Some(sub) = self.subscriptions.get(&id) {
            sub.notify(changes);
        }
    }

    /// Notifies every subscription, in subscription order.
    pub fn notify_all(&self, changes: &ChangeSet) {
        let mut subs: Vec<&Subscription> = self.subscriptions.values().collect();
        subs.sort_unstable_by_key(|sub| sub.id);
        for sub in subs {
            sub.notify(changes);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.subscriptions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    fn next_id(&mut self) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
