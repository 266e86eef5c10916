//! Subscriptions of receivers to message types.

use crate::context::{MessageContext, MessageScope, MessageType, ScopeRange};
use crate::receiver::Receiver;
use ahash::AHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Interest of a receiver in one message type.
///
/// Shared between the router and the subscriber, which may toggle it with
/// [`Subscription::enable`] / [`Subscription::disable`] while it is registered.
pub struct Subscription {
    subscriber: Weak<dyn Receiver>,
    message_type: MessageType,
    scope_range: ScopeRange,
    enabled: AtomicBool,
}

impl Subscription {
    pub fn new(subscriber: Weak<dyn Receiver>, message_type: MessageType, scope_range: ScopeRange) -> Self {
        Self {
            subscriber,
            message_type,
            scope_range,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn subscriber(&self) -> &Weak<dyn Receiver> {
        &self.subscriber
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn scope_range(&self) -> ScopeRange {
        self.scope_range
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("message_type", &self.message_type)
            .field("scope_range", &self.scope_range)
            .field("enabled", &self.is_enabled())
            .field("alive", &(self.subscriber.strong_count() > 0))
            .finish()
    }
}

/// Subscriptions keyed by message type, including the wildcard type.
#[derive(Default)]
pub struct SubscriptionTable {
    by_type: AHashMap<MessageType, Vec<Arc<Subscription>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription. An existing subscription of the same subscriber to
    /// the same type is replaced.
    pub fn add(&mut self, subscription: Arc<Subscription>) {
        let list = self
            .by_type
            .entry(subscription.message_type().clone())
            .or_default();

        match list
            .iter_mut()
            .find(|s| Weak::ptr_eq(s.subscriber(), subscription.subscriber()))
        {
            Some(existing) => *existing = subscription,
            None => list.push(subscription),
        }
    }

    /// Removes the subscriber's subscription to `message_type`, or to every
    /// type when `message_type` is the wildcard. Returns the number removed.
    pub fn remove(&mut self, subscriber: &Weak<dyn Receiver>, message_type: &MessageType) -> usize {
        let mut removed = 0;

        if message_type.is_all() {
            for list in self.by_type.values_mut() {
                let before = list.len();
                list.retain(|s| !Weak::ptr_eq(s.subscriber(), subscriber));
                removed += before - list.len();
            }
        } else if let Some(list) = self.by_type.get_mut(message_type) {
            let before = list.len();
            list.retain(|s| !Weak::ptr_eq(s.subscriber(), subscriber));
            removed = before - list.len();
        }

        self.by_type.retain(|_, list| !list.is_empty());
        removed
    }

    /// Appends every live, eligible subscriber for `context` to `out`.
    ///
    /// Candidates come from the exact type and from the wildcard type; a
    /// receiver already present in `out` is not added again. Expired
    /// subscribers are pruned along the way.
    pub fn collect(&mut self, context: &MessageContext, out: &mut Vec<Arc<dyn Receiver>>) {
        let wildcard = MessageType::all();
        for key in [context.message_type(), &wildcard] {
            let Some(list) = self.by_type.get_mut(key) else {
                continue;
            };

            list.retain(|subscription| {
                let Some(subscriber) = subscription.subscriber().upgrade() else {
                    return false;
                };

                if !subscription.is_enabled() || !subscription.scope_range().contains(context.scope()) {
                    return true;
                }

                // Thread-scoped messages never leave the sender's thread
                if context.scope() == MessageScope::Thread
                    && subscriber.recipient_thread() != *context.sender_thread()
                {
                    return true;
                }

                if !out.iter().any(|r| Arc::ptr_eq(r, &subscriber)) {
                    out.push(subscriber);
                }
                true
            });
        }

        self.by_type.retain(|_, list| !list.is_empty());
    }

    /// Total number of registered subscriptions, live or not.
    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
